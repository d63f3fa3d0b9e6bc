//! Flat, serde-friendly records a bid is loaded from and exported to.
//!
//! A record's `config` block is optional. On export it is written only when
//! the entity's wiring differs from what was loaded (or when a full export is
//! forced); on reload a missing block keeps the surviving entity's wiring.

use std::collections::{BTreeMap, BTreeSet};

use bidgraph_core::{BidGraphError, EntityId, EntityKind, Result, StructuralError};
use serde::{Deserialize, Serialize};

use crate::bid::BidStatus;
use crate::entity::{
    BidVariable, Component, Datatable, DatatableRow, DynamicGroup, Entity, Field, FieldConfig, GroupTotals,
    LineItem, LineItemConfig, LineItemValues, Metric, MetricConfig, Overrides, PropSet, VariableValue,
};
use crate::prediction::PredictionModel;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BidRecord {
    pub id: EntityId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: BidStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub totals: Option<GroupTotals>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BidSnapshot {
    pub bid: BidRecord,
    #[serde(default)]
    pub variables: Vec<VariableRecord>,
    #[serde(default)]
    pub datatables: Vec<DatatableRecord>,
    #[serde(default)]
    pub fields: Vec<FieldRecord>,
    #[serde(default)]
    pub metrics: Vec<MetricRecord>,
    #[serde(default)]
    pub line_items: Vec<LineItemRecord>,
    #[serde(default)]
    pub components: Vec<ComponentRecord>,
    #[serde(default)]
    pub dynamic_groups: Vec<DynamicGroupRecord>,
    #[serde(default)]
    pub prediction_models: Vec<PredictionModel>,
}

impl BidSnapshot {
    pub fn new(id: impl Into<EntityId>, title: impl Into<String>) -> Self {
        Self {
            bid: BidRecord {
                id: id.into(),
                title: title.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Conversion between an entity and its flat record.
pub trait Record: Sized {
    type Entity: Entity;
    const KIND: EntityKind;

    fn id(&self) -> &EntityId;

    fn into_entity(self) -> Result<Self::Entity>;

    /// Update a surviving entity in place, keeping its assessed state.
    fn merge_into(self, entity: &mut Self::Entity);

    fn from_entity(entity: &Self::Entity, force_full: bool) -> Self;
}

/// What a reload did to the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeCounts {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

impl MergeCounts {
    pub fn add(&mut self, other: MergeCounts) {
        self.added += other.added;
        self.updated += other.updated;
        self.removed += other.removed;
    }
}

/// Reconcile one keyed collection with `records`: surviving ids are updated
/// in place, missing ones dropped, new ones created.
pub fn merge_collection<R: Record>(
    map: &mut BTreeMap<EntityId, R::Entity>,
    records: Vec<R>,
) -> Result<MergeCounts> {
    let mut seen = BTreeSet::new();
    for record in &records {
        if !seen.insert(record.id().clone()) {
            return Err(StructuralError::DuplicateId {
                kind: R::KIND,
                id: record.id().clone(),
            }
            .into());
        }
    }

    let mut counts = MergeCounts::default();
    let before = map.len();
    map.retain(|id, _| seen.contains(id));
    counts.removed = before - map.len();

    for record in records {
        match map.get_mut(record.id()) {
            Some(existing) => {
                record.merge_into(existing);
                counts.updated += 1;
            }
            None => {
                let id = record.id().clone();
                map.insert(id, record.into_entity()?);
                counts.added += 1;
            }
        }
    }
    Ok(counts)
}

fn config_block<C: Clone>(config: &C, changed: bool, force_full: bool) -> Option<C> {
    (force_full || changed).then(|| config.clone())
}

fn included_default() -> bool {
    true
}

fn is_true(b: &bool) -> bool {
    *b
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItemRecord {
    pub id: EntityId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub values: LineItemValues,
    #[serde(default = "included_default", skip_serializing_if = "is_true")]
    pub is_included: bool,
    #[serde(default, skip_serializing_if = "Overrides::is_empty")]
    pub overrides: Overrides,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub undefined: PropSet,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub predicted: PropSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<LineItemConfig>,
}

impl LineItemRecord {
    pub fn new(id: impl Into<EntityId>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            values: LineItemValues::default(),
            is_included: true,
            overrides: Overrides::default(),
            undefined: PropSet::new(),
            predicted: PropSet::new(),
            config: None,
        }
    }
}

impl Record for LineItemRecord {
    type Entity = LineItem;
    const KIND: EntityKind = EntityKind::LineItem;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn into_entity(self) -> Result<LineItem> {
        let mut item = LineItem::new(self.id, self.title).with_config(self.config.unwrap_or_default());
        item.values = self.values;
        item.is_included = self.is_included;
        item.overrides = self.overrides;
        Ok(item)
    }

    fn merge_into(self, item: &mut LineItem) {
        item.header.title = self.title;
        item.values = self.values;
        item.is_included = self.is_included;
        item.overrides = self.overrides;
        if let Some(config) = self.config {
            item.loaded_config = config.clone();
            item.config = config;
        }
    }

    fn from_entity(item: &LineItem, force_full: bool) -> Self {
        Self {
            id: item.header.id.clone(),
            title: item.header.title.clone(),
            values: item.values,
            is_included: item.is_included,
            overrides: item.overrides.clone(),
            undefined: item.undefined.clone(),
            predicted: item.predicted.clone(),
            config: config_block(&item.config, item.config_changed(), force_full),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRecord {
    pub id: EntityId,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_row: Option<String>,
    /// Effective value; informational on load.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<FieldConfig>,
}

impl Record for FieldRecord {
    type Entity = Field;
    const KIND: EntityKind = EntityKind::Field;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn into_entity(self) -> Result<Field> {
        let mut field = Field::new(self.id, self.title, self.config.unwrap_or_default());
        field.input = self.input;
        field.selected_row = self.selected_row;
        field.value = self.value.or(self.input);
        Ok(field)
    }

    fn merge_into(self, field: &mut Field) {
        field.header.title = self.title;
        field.input = self.input;
        field.selected_row = self.selected_row;
        if let Some(config) = self.config {
            field.loaded_config = config.clone();
            field.config = config;
        }
    }

    fn from_entity(field: &Field, force_full: bool) -> Self {
        Self {
            id: field.header.id.clone(),
            title: field.header.title.clone(),
            input: field.input,
            selected_row: field.selected_row.clone(),
            value: field.value,
            config: config_block(&field.config, field.config_changed(), force_full),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub id: EntityId,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<MetricConfig>,
}

impl Record for MetricRecord {
    type Entity = Metric;
    const KIND: EntityKind = EntityKind::Metric;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn into_entity(self) -> Result<Metric> {
        let config = self.config.ok_or_else(|| {
            BidGraphError::invalid_value(format!("metric {}", self.id), "new metric needs a formula")
        })?;
        let mut metric = Metric::new(self.id, self.title, config.formula);
        metric.value = self.value;
        Ok(metric)
    }

    fn merge_into(self, metric: &mut Metric) {
        metric.header.title = self.title;
        if let Some(config) = self.config {
            metric.loaded_config = config.clone();
            metric.config = config;
        }
    }

    fn from_entity(metric: &Metric, force_full: bool) -> Self {
        Self {
            id: metric.header.id.clone(),
            title: metric.header.title.clone(),
            value: metric.value,
            config: config_block(&metric.config, metric.config_changed(), force_full),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableRecord {
    pub id: EntityId,
    #[serde(default)]
    pub title: String,
    pub value: VariableValue,
}

impl Record for VariableRecord {
    type Entity = BidVariable;
    const KIND: EntityKind = EntityKind::BidVariable;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn into_entity(self) -> Result<BidVariable> {
        Ok(BidVariable::new(self.id, self.title, self.value))
    }

    fn merge_into(self, variable: &mut BidVariable) {
        variable.header.title = self.title;
        variable.value = self.value;
    }

    fn from_entity(variable: &BidVariable, _force_full: bool) -> Self {
        Self {
            id: variable.header.id.clone(),
            title: variable.header.title.clone(),
            value: variable.value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatatableRecord {
    pub id: EntityId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<DatatableRow>,
}

impl Record for DatatableRecord {
    type Entity = Datatable;
    const KIND: EntityKind = EntityKind::Datatable;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn into_entity(self) -> Result<Datatable> {
        let mut table = Datatable::new(self.id, self.title, self.columns);
        table.rows = self.rows;
        Ok(table)
    }

    fn merge_into(self, table: &mut Datatable) {
        table.header.title = self.title;
        table.columns = self.columns;
        table.rows = self.rows;
    }

    fn from_entity(table: &Datatable, _force_full: bool) -> Self {
        Self {
            id: table.header.id.clone(),
            title: table.header.title.clone(),
            columns: table.columns.clone(),
            rows: table.rows.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub id: EntityId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub line_items: Vec<EntityId>,
    #[serde(default)]
    pub sub_components: Vec<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub totals: Option<GroupTotals>,
}

impl Record for ComponentRecord {
    type Entity = Component;
    const KIND: EntityKind = EntityKind::Component;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn into_entity(self) -> Result<Component> {
        let mut component = Component::new(self.id, self.title);
        component.line_item_ids = self.line_items;
        component.sub_component_ids = self.sub_components;
        component.totals = self.totals.unwrap_or_default();
        Ok(component)
    }

    fn merge_into(self, component: &mut Component) {
        component.header.title = self.title;
        component.line_item_ids = self.line_items;
        component.sub_component_ids = self.sub_components;
    }

    fn from_entity(component: &Component, _force_full: bool) -> Self {
        Self {
            id: component.header.id.clone(),
            title: component.header.title.clone(),
            line_items: component.line_item_ids.clone(),
            sub_components: component.sub_component_ids.clone(),
            totals: Some(component.totals),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicGroupRecord {
    pub id: EntityId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub line_items: Vec<EntityId>,
    #[serde(default)]
    pub components: Vec<EntityId>,
    #[serde(default)]
    pub dynamic_groups: Vec<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub totals: Option<GroupTotals>,
}

impl Record for DynamicGroupRecord {
    type Entity = DynamicGroup;
    const KIND: EntityKind = EntityKind::DynamicGroup;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn into_entity(self) -> Result<DynamicGroup> {
        let mut group = DynamicGroup::new(self.id, self.title);
        group.line_item_ids = self.line_items;
        group.component_ids = self.components;
        group.dynamic_group_ids = self.dynamic_groups;
        group.totals = self.totals.unwrap_or_default();
        Ok(group)
    }

    fn merge_into(self, group: &mut DynamicGroup) {
        group.header.title = self.title;
        group.line_item_ids = self.line_items;
        group.component_ids = self.components;
        group.dynamic_group_ids = self.dynamic_groups;
    }

    fn from_entity(group: &DynamicGroup, _force_full: bool) -> Self {
        Self {
            id: group.header.id.clone(),
            title: group.header.title.clone(),
            line_items: group.line_item_ids.clone(),
            components: group.component_ids.clone(),
            dynamic_groups: group.dynamic_group_ids.clone(),
            totals: Some(group.totals),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::LineItemProp;

    #[test]
    fn default_snapshot_is_empty() {
        let snap = BidSnapshot::default();
        assert_eq!(snap.bid.id, EntityId::default());
        assert!(snap.bid.id.as_str().is_empty());
        assert!(snap.bid.totals.is_none());
        assert!(snap.line_items.is_empty() && snap.prediction_models.is_empty());

        let named = BidSnapshot::new("b1", "Garage");
        assert_eq!(named.bid.id, EntityId::from("b1"));
        assert_eq!(named.bid.status, BidStatus::default());
    }

    #[test]
    fn parses_a_minimal_snapshot() {
        let json = r#"{
            "bid": {"id": "b1", "title": "Smith residence"},
            "variables": [{"id": "wage", "value": 42.5}, {"id": "taxable_labor", "value": true}],
            "line_items": [{"id": "li1", "values": {"base": 3.0}, "overrides": {"cost": true}}]
        }"#;
        let snap = BidSnapshot::from_json(json).unwrap();
        assert_eq!(snap.variables[0].value, VariableValue::Number(42.5));
        assert_eq!(snap.variables[1].value, VariableValue::Toggle(true));
        let li = snap.line_items[0].clone().into_entity().unwrap();
        assert_eq!(li.values.base, 3.0);
        assert_eq!(li.values.scalar, 1.0);
        assert!(li.is_included);
        assert!(li.is_overridden(LineItemProp::Cost));
    }

    #[test]
    fn merge_updates_survivors_and_drops_missing() {
        let mut map = BTreeMap::new();
        let mut keep = LineItem::new("keep", "Keep");
        keep.predicted.insert(LineItemProp::Cost);
        map.insert(EntityId::from("keep"), keep);
        map.insert(EntityId::from("drop"), LineItem::new("drop", "Drop"));

        let mut updated = LineItemRecord::new("keep");
        updated.title = "Kept".into();
        let counts = merge_collection(&mut map, vec![updated, LineItemRecord::new("new")]).unwrap();
        assert_eq!(
            counts,
            MergeCounts {
                added: 1,
                updated: 1,
                removed: 1
            }
        );
        let keep = &map[&EntityId::from("keep")];
        assert_eq!(keep.header.title, "Kept");
        assert!(keep.is_predicted(LineItemProp::Cost));
    }

    #[test]
    fn duplicate_record_ids_are_structural_errors() {
        let mut map: BTreeMap<EntityId, LineItem> = BTreeMap::new();
        let err = merge_collection(&mut map, vec![LineItemRecord::new("a"), LineItemRecord::new("a")])
            .unwrap_err();
        assert!(matches!(
            err,
            BidGraphError::Structural(StructuralError::DuplicateId { .. })
        ));
        assert!(map.is_empty());
    }

    #[test]
    fn export_omits_unchanged_config() {
        let mut item = LineItem::new("li", "Li").with_config(LineItemConfig {
            tags: vec!["roof".into()],
            ..Default::default()
        });
        assert!(LineItemRecord::from_entity(&item, false).config.is_none());
        assert!(LineItemRecord::from_entity(&item, true).config.is_some());
        item.config.tags.push("extra".into());
        assert!(LineItemRecord::from_entity(&item, false).config.is_some());
    }

    #[test]
    fn metric_without_formula_cannot_be_created() {
        let record = MetricRecord {
            id: "m".into(),
            title: String::new(),
            value: None,
            config: None,
        };
        assert!(record.into_entity().is_err());
    }
}
