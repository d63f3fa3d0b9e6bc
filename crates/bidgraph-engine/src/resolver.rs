//! Dependency contract resolution against a bid's entity store.

use bidgraph_core::{DependencyContract, EntityId, EntityKind, StructuralError};

use crate::entity::{
    BidVariable, Component, Datatable, DynamicGroup, Field, FieldConfig, GroupProp, GroupProvenance,
    GroupTotals, LineItem, LineItemProp, Metric,
};
use crate::store::EntityStore;

/// Anything that can turn a contract into a number.
pub trait ValueSource {
    /// Live value, or `None` when the target or field does not exist or is empty.
    fn resolve(&self, contract: &DependencyContract) -> Option<f64>;

    /// Non-null and not itself derived from an undefined input.
    fn is_fully_defined(&self, contract: &DependencyContract) -> bool;
}

/// Bid-level totals visible to contracts of kind `bid`.
#[derive(Debug, Clone, Copy)]
pub struct BidView<'a> {
    pub id: &'a EntityId,
    pub totals: &'a GroupTotals,
    pub provenance: &'a GroupProvenance,
    pub watts: f64,
}

/// Borrowed handle to whatever a contract points at.
#[derive(Debug, Clone, Copy)]
pub enum EntityView<'a> {
    LineItem(&'a LineItem),
    Component(&'a Component),
    DynamicGroup(&'a DynamicGroup),
    Field(&'a Field),
    Metric(&'a Metric),
    Variable(&'a BidVariable),
    Datatable(&'a Datatable),
    Bid(BidView<'a>),
}

impl<'a> EntityView<'a> {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityView::LineItem(_) => EntityKind::LineItem,
            EntityView::Component(_) => EntityKind::Component,
            EntityView::DynamicGroup(_) => EntityKind::DynamicGroup,
            EntityView::Field(_) => EntityKind::Field,
            EntityView::Metric(_) => EntityKind::Metric,
            EntityView::Variable(_) => EntityKind::BidVariable,
            EntityView::Datatable(_) => EntityKind::Datatable,
            EntityView::Bid(_) => EntityKind::Bid,
        }
    }
}

pub struct DependencyResolver<'a> {
    store: &'a EntityStore,
    bid: Option<BidView<'a>>,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(store: &'a EntityStore) -> Self {
        Self { store, bid: None }
    }

    pub fn with_bid(mut self, bid: BidView<'a>) -> Self {
        self.bid = Some(bid);
        self
    }

    pub fn store(&self) -> &'a EntityStore {
        self.store
    }

    /// The entity a contract targets. Bid contracts match the owning bid
    /// whatever id they carry.
    pub fn entity(&self, contract: &DependencyContract) -> Option<EntityView<'a>> {
        let id = &contract.target_id;
        let s = self.store;
        match contract.kind {
            EntityKind::LineItem => s.line_items.get(id).map(EntityView::LineItem),
            EntityKind::Component => s.components.get(id).map(EntityView::Component),
            EntityKind::DynamicGroup => s.dynamic_groups.get(id).map(EntityView::DynamicGroup),
            EntityKind::Field => s.fields.get(id).map(EntityView::Field),
            EntityKind::Metric => s.metrics.get(id).map(EntityView::Metric),
            EntityKind::BidVariable => s.variables.get(id).map(EntityView::Variable),
            EntityKind::Datatable => s.datatables.get(id).map(EntityView::Datatable),
            EntityKind::Bid => self.bid.map(EntityView::Bid),
        }
    }

    pub fn lookup(&self, contract: &DependencyContract) -> Result<EntityView<'a>, StructuralError> {
        self.entity(contract)
            .ok_or_else(|| StructuralError::DanglingReference {
                kind: contract.kind,
                id: contract.target_id.clone(),
            })
    }

    pub fn resolve(&self, contract: &DependencyContract) -> Option<f64> {
        let field = contract.field.as_str();
        match self.entity(contract)? {
            EntityView::LineItem(li) => match field.parse::<LineItemProp>() {
                Ok(prop) => Some(li.value(prop)),
                Err(_) => li.values.derived(field),
            },
            EntityView::Component(c) => group_value(&c.totals, field),
            EntityView::DynamicGroup(g) => group_value(&g.totals, field),
            EntityView::Field(f) => self.field_value(f, field),
            EntityView::Metric(m) => m.value,
            EntityView::Variable(v) => Some(v.value.as_f64()),
            EntityView::Datatable(t) => t.lookup(field),
            EntityView::Bid(bid) => {
                if field == "watts" {
                    Some(bid.watts)
                } else {
                    group_value(bid.totals, field)
                }
            }
        }
    }

    pub fn has_null_dependency(&self, contract: &DependencyContract) -> bool {
        let field = contract.field.as_str();
        match self.entity(contract) {
            None => false,
            Some(EntityView::LineItem(li)) => line_item_null(li, field),
            Some(EntityView::Component(c)) => group_null(&c.provenance, field),
            Some(EntityView::DynamicGroup(g)) => group_null(&g.provenance, field),
            Some(EntityView::Field(f)) => f.has_null_dependency,
            Some(EntityView::Metric(m)) => m.has_null_dependency,
            Some(EntityView::Variable(_)) | Some(EntityView::Datatable(_)) => false,
            Some(EntityView::Bid(bid)) => group_null(bid.provenance, field),
        }
    }

    pub fn is_fully_defined(&self, contract: &DependencyContract) -> bool {
        self.resolve(contract).is_some() && !self.has_null_dependency(contract)
    }

    /// Row currently selected in a list field.
    pub fn selected_row(&self, field_id: &EntityId) -> Option<&'a str> {
        self.store.fields.get(field_id)?.selected_row.as_deref()
    }

    fn field_value(&self, field: &Field, column: &str) -> Option<f64> {
        match &field.config {
            FieldConfig::List {
                datatable_id,
                value_column,
            } => {
                let table = self.store.datatables.get(datatable_id)?;
                let row = field.selected_row.as_deref()?;
                let column = if column == "value" { value_column.as_str() } else { column };
                table.cell(row, column)
            }
            _ => field.value,
        }
    }
}

impl ValueSource for DependencyResolver<'_> {
    fn resolve(&self, contract: &DependencyContract) -> Option<f64> {
        DependencyResolver::resolve(self, contract)
    }

    fn is_fully_defined(&self, contract: &DependencyContract) -> bool {
        DependencyResolver::is_fully_defined(self, contract)
    }
}

fn group_value(totals: &GroupTotals, field: &str) -> Option<f64> {
    match field {
        "is_included" | "isIncluded" => Some(if totals.included_line_item_count > 0 { 1.0 } else { 0.0 }),
        "included_line_item_count" | "count" => Some(totals.included_line_item_count as f64),
        other => other.parse::<GroupProp>().ok().map(|p| totals.get(p)),
    }
}

fn group_null(provenance: &GroupProvenance, field: &str) -> bool {
    field
        .parse::<GroupProp>()
        .map(|p| provenance.get(p).has_null_dependency)
        .unwrap_or(false)
}

fn line_item_null(li: &LineItem, field: &str) -> bool {
    if let Ok(prop) = field.parse::<LineItemProp>() {
        return li.has_null_dependency(prop);
    }
    let sources: &[LineItemProp] = match crate::entity::normalize_name(field).as_str() {
        "laborcost" => &[LineItemProp::Cost, LineItemProp::LaborHours],
        "nonlaborcost" | "materialcost" | "taxablecost" => &[LineItemProp::Cost],
        "subtotal" => &[LineItemProp::Quantity, LineItemProp::PerQuantity],
        _ => &[],
    };
    sources.iter().any(|p| li.has_null_dependency(*p))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::{HashMap, HashSet};

    use super::*;
    use crate::entity::{Formula, VariableValue};

    /// Value source keyed by target id, for testing formula consumers in isolation.
    #[derive(Default)]
    pub(crate) struct MapSource {
        values: HashMap<String, f64>,
        nulls: HashSet<String>,
    }

    impl MapSource {
        pub(crate) fn with(mut self, id: &str, value: f64) -> Self {
            self.values.insert(id.to_string(), value);
            self
        }

        pub(crate) fn with_null(mut self, id: &str, value: f64) -> Self {
            self.nulls.insert(id.to_string());
            self.with(id, value)
        }
    }

    impl ValueSource for MapSource {
        fn resolve(&self, contract: &DependencyContract) -> Option<f64> {
            self.values.get(contract.target_id.as_str()).copied()
        }

        fn is_fully_defined(&self, contract: &DependencyContract) -> bool {
            self.resolve(contract).is_some() && !self.nulls.contains(contract.target_id.as_str())
        }
    }

    fn store() -> EntityStore {
        let mut store = EntityStore::new();
        store
            .add_datatable(
                Datatable::new("panels", "Panels", vec!["watts".into(), "price".into()])
                    .with_row("p400", "400W", vec![Some(400.0), Some(210.0)]),
            )
            .unwrap();
        store.add_field(Field::list("panel", "panels", "price", Some("p400"))).unwrap();
        store.add_field(Field::list("unpicked", "panels", "price", None)).unwrap();
        let mut metric = Metric::new("m", "M", Formula::new("1"));
        metric.value = Some(12.0);
        metric.has_null_dependency = true;
        store.add_metric(metric).unwrap();
        store
            .add_variable(BidVariable::new("taxable_labor", "Taxable labor", VariableValue::Toggle(true)))
            .unwrap();
        let mut li = LineItem::new("li", "Item").with_value(LineItemProp::Cost, 50.0);
        li.values.labor_cost = 20.0;
        li.undefined.insert(LineItemProp::Cost);
        store.add_line_item(li).unwrap();
        store
    }

    #[test]
    fn list_field_pulls_through_datatable() {
        let store = store();
        let r = DependencyResolver::new(&store);
        assert_eq!(r.resolve(&DependencyContract::field("panel")), Some(210.0));
        assert_eq!(
            r.resolve(&DependencyContract::new(EntityKind::Field, "panel", "watts")),
            Some(400.0)
        );
        assert_eq!(r.resolve(&DependencyContract::field("unpicked")), None);
        assert_eq!(
            r.resolve(&DependencyContract::new(EntityKind::Datatable, "panels", "p400:watts")),
            Some(400.0)
        );
    }

    #[test]
    fn dangling_contract_resolves_undefined() {
        let store = store();
        let r = DependencyResolver::new(&store);
        let c = DependencyContract::metric("nope");
        assert_eq!(r.resolve(&c), None);
        assert!(!r.is_fully_defined(&c));
        assert!(matches!(r.lookup(&c), Err(StructuralError::DanglingReference { .. })));
    }

    #[test]
    fn null_dependency_makes_value_not_fully_defined() {
        let store = store();
        let r = DependencyResolver::new(&store);
        let metric = DependencyContract::metric("m");
        assert_eq!(r.resolve(&metric), Some(12.0));
        assert!(!r.is_fully_defined(&metric));
        assert!(r.is_fully_defined(&DependencyContract::variable("taxable_labor")));
    }

    #[test]
    fn line_item_fields_and_derived_exposures() {
        let store = store();
        let r = DependencyResolver::new(&store);
        let cost = DependencyContract::new(EntityKind::LineItem, "li", "cost");
        let labor = DependencyContract::new(EntityKind::LineItem, "li", "labor_cost");
        let included = DependencyContract::new(EntityKind::LineItem, "li", "is_included");
        assert_eq!(r.resolve(&cost), Some(50.0));
        assert_eq!(r.resolve(&labor), Some(20.0));
        assert_eq!(r.resolve(&included), Some(1.0));
        assert!(r.has_null_dependency(&labor));
        assert!(!r.has_null_dependency(&included));
    }

    #[test]
    fn bid_contracts_need_a_bid_view() {
        let store = store();
        let id = EntityId::from("bid");
        let totals = GroupTotals {
            price: 900.0,
            ..Default::default()
        };
        let provenance = GroupProvenance::default();
        let c = DependencyContract::new(EntityKind::Bid, "bid", "price");
        assert_eq!(DependencyResolver::new(&store).resolve(&c), None);

        let r = DependencyResolver::new(&store).with_bid(BidView {
            id: &id,
            totals: &totals,
            provenance: &provenance,
            watts: 7200.0,
        });
        assert_eq!(r.resolve(&c), Some(900.0));
        assert_eq!(
            r.resolve(&DependencyContract::new(EntityKind::Bid, "bid", "watts")),
            Some(7200.0)
        );
    }
}
