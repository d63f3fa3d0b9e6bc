//! Keyed collections of every entity a bid owns.

use std::collections::BTreeMap;

use bidgraph_core::{DependencyContract, EntityId, EntityKind, EntityRef, StructuralError};

use crate::entity::{
    BidSwitches, BidVariable, Component, Datatable, DynamicGroup, Entity, EntityHeader, Field,
    GroupChildren, LineItem, Metric, VariableValue,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityStore {
    pub line_items: BTreeMap<EntityId, LineItem>,
    pub components: BTreeMap<EntityId, Component>,
    pub dynamic_groups: BTreeMap<EntityId, DynamicGroup>,
    pub fields: BTreeMap<EntityId, Field>,
    pub metrics: BTreeMap<EntityId, Metric>,
    pub variables: BTreeMap<EntityId, BidVariable>,
    pub datatables: BTreeMap<EntityId, Datatable>,
}

fn insert_unique<T>(
    map: &mut BTreeMap<EntityId, T>,
    kind: EntityKind,
    id: EntityId,
    entity: T,
) -> Result<(), StructuralError> {
    if map.contains_key(&id) {
        return Err(StructuralError::DuplicateId { kind, id });
    }
    map.insert(id, entity);
    Ok(())
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_line_item(&mut self, item: LineItem) -> Result<(), StructuralError> {
        let id = item.id().clone();
        insert_unique(&mut self.line_items, EntityKind::LineItem, id, item)
    }

    pub fn add_component(&mut self, component: Component) -> Result<(), StructuralError> {
        let id = component.id().clone();
        insert_unique(&mut self.components, EntityKind::Component, id, component)
    }

    pub fn add_dynamic_group(&mut self, group: DynamicGroup) -> Result<(), StructuralError> {
        let id = group.id().clone();
        insert_unique(&mut self.dynamic_groups, EntityKind::DynamicGroup, id, group)
    }

    pub fn add_field(&mut self, field: Field) -> Result<(), StructuralError> {
        let id = field.id().clone();
        insert_unique(&mut self.fields, EntityKind::Field, id, field)
    }

    pub fn add_metric(&mut self, metric: Metric) -> Result<(), StructuralError> {
        let id = metric.id().clone();
        insert_unique(&mut self.metrics, EntityKind::Metric, id, metric)
    }

    pub fn add_variable(&mut self, variable: BidVariable) -> Result<(), StructuralError> {
        let id = variable.id().clone();
        insert_unique(&mut self.variables, EntityKind::BidVariable, id, variable)
    }

    pub fn add_datatable(&mut self, table: Datatable) -> Result<(), StructuralError> {
        let id = table.id().clone();
        insert_unique(&mut self.datatables, EntityKind::Datatable, id, table)
    }

    /// Remove a line item and every group reference to it.
    pub fn remove_line_item(&mut self, id: &EntityId) -> Option<LineItem> {
        let removed = self.line_items.remove(id)?;
        for component in self.components.values_mut() {
            component.line_item_ids.retain(|x| x != id);
        }
        for group in self.dynamic_groups.values_mut() {
            group.line_item_ids.retain(|x| x != id);
        }
        Some(removed)
    }

    pub fn contains(&self, entity: &EntityRef) -> bool {
        self.header(entity).is_some()
    }

    pub fn header(&self, entity: &EntityRef) -> Option<&EntityHeader> {
        let id = &entity.id;
        match entity.kind {
            EntityKind::LineItem => self.line_items.get(id).map(|e| e.header()),
            EntityKind::Component => self.components.get(id).map(|e| e.header()),
            EntityKind::DynamicGroup => self.dynamic_groups.get(id).map(|e| e.header()),
            EntityKind::Field => self.fields.get(id).map(|e| e.header()),
            EntityKind::Metric => self.metrics.get(id).map(|e| e.header()),
            EntityKind::BidVariable => self.variables.get(id).map(|e| e.header()),
            EntityKind::Datatable => self.datatables.get(id).map(|e| e.header()),
            EntityKind::Bid => None,
        }
    }

    pub fn header_mut(&mut self, entity: &EntityRef) -> Option<&mut EntityHeader> {
        let id = &entity.id;
        match entity.kind {
            EntityKind::LineItem => self.line_items.get_mut(id).map(|e| e.header_mut()),
            EntityKind::Component => self.components.get_mut(id).map(|e| e.header_mut()),
            EntityKind::DynamicGroup => self.dynamic_groups.get_mut(id).map(|e| e.header_mut()),
            EntityKind::Field => self.fields.get_mut(id).map(|e| e.header_mut()),
            EntityKind::Metric => self.metrics.get_mut(id).map(|e| e.header_mut()),
            EntityKind::BidVariable => self.variables.get_mut(id).map(|e| e.header_mut()),
            EntityKind::Datatable => self.datatables.get_mut(id).map(|e| e.header_mut()),
            EntityKind::Bid => None,
        }
    }

    pub fn dependencies_of(&self, entity: &EntityRef) -> Vec<DependencyContract> {
        let id = &entity.id;
        match entity.kind {
            EntityKind::LineItem => self.line_items.get(id).map(|e| e.dependencies()),
            EntityKind::Component => self.components.get(id).map(|e| e.dependencies()),
            EntityKind::DynamicGroup => self.dynamic_groups.get(id).map(|e| e.dependencies()),
            EntityKind::Field => self.fields.get(id).map(|e| e.dependencies()),
            EntityKind::Metric => self.metrics.get(id).map(|e| e.dependencies()),
            EntityKind::BidVariable => self.variables.get(id).map(|e| e.dependencies()),
            EntityKind::Datatable => self.datatables.get(id).map(|e| e.dependencies()),
            EntityKind::Bid => None,
        }
        .unwrap_or_default()
    }

    pub fn group_children(&self, group: &EntityRef) -> Option<GroupChildren<'_>> {
        match group.kind {
            EntityKind::Component => self.components.get(&group.id).map(|c| c.children()),
            EntityKind::DynamicGroup => self.dynamic_groups.get(&group.id).map(|g| g.children()),
            _ => None,
        }
    }

    /// Every entity, leaves first, so a full pass roughly follows data flow.
    pub fn refs(&self) -> Vec<EntityRef> {
        fn refs_of<T>(kind: EntityKind, map: &BTreeMap<EntityId, T>) -> impl Iterator<Item = EntityRef> + '_ {
            map.keys().map(move |id| EntityRef::new(kind, id.clone()))
        }
        refs_of(EntityKind::BidVariable, &self.variables)
            .chain(refs_of(EntityKind::Datatable, &self.datatables))
            .chain(refs_of(EntityKind::Field, &self.fields))
            .chain(refs_of(EntityKind::Metric, &self.metrics))
            .chain(refs_of(EntityKind::LineItem, &self.line_items))
            .chain(refs_of(EntityKind::Component, &self.components))
            .chain(refs_of(EntityKind::DynamicGroup, &self.dynamic_groups))
            .collect()
    }

    /// Every declared contract with its owner, for external validators.
    pub fn contracts(&self) -> Vec<(EntityRef, DependencyContract)> {
        self.refs()
            .into_iter()
            .flat_map(|r| {
                let deps = self.dependencies_of(&r);
                deps.into_iter().map(move |c| (r.clone(), c))
            })
            .collect()
    }

    pub fn variable_value(&self, id: &str) -> Option<VariableValue> {
        self.variables.get(&EntityId::from(id)).map(|v| v.value)
    }

    pub fn switches(&self) -> BidSwitches {
        BidSwitches::from_lookup(|id| self.variable_value(id))
    }

    pub fn len(&self) -> usize {
        self.line_items.len()
            + self.components.len()
            + self.dynamic_groups.len()
            + self.fields.len()
            + self.metrics.len()
            + self.variables.len()
            + self.datatables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dirty(&self) -> Vec<EntityRef> {
        self.refs()
            .into_iter()
            .filter(|r| self.header(r).is_some_and(|h| h.dirty))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut store = EntityStore::new();
        store.add_line_item(LineItem::new("a", "A")).unwrap();
        let err = store.add_line_item(LineItem::new("a", "again")).unwrap_err();
        assert!(matches!(err, StructuralError::DuplicateId { .. }));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn removing_a_line_item_detaches_it_from_groups() {
        let mut store = EntityStore::new();
        store.add_line_item(LineItem::new("a", "A")).unwrap();
        store.add_line_item(LineItem::new("b", "B")).unwrap();
        store
            .add_component(Component::new("c", "C").with_line_items(&["a", "b"]))
            .unwrap();
        store
            .add_dynamic_group(DynamicGroup::new("g", "G").with_line_items(&["a"]))
            .unwrap();

        assert!(store.remove_line_item(&EntityId::from("a")).is_some());
        assert_eq!(store.components[&EntityId::from("c")].line_item_ids, vec![EntityId::from("b")]);
        assert!(store.dynamic_groups[&EntityId::from("g")].line_item_ids.is_empty());
    }

    #[test]
    fn refs_list_leaves_before_groups() {
        let mut store = EntityStore::new();
        store.add_component(Component::new("c", "C")).unwrap();
        store.add_line_item(LineItem::new("a", "A")).unwrap();
        store.add_variable(BidVariable::number("wage", 40.0)).unwrap();
        let kinds: Vec<EntityKind> = store.refs().iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![EntityKind::BidVariable, EntityKind::LineItem, EntityKind::Component]
        );
    }
}
