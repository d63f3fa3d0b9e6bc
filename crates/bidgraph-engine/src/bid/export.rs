use bidgraph_core::EntityId;

use super::Bid;
use crate::entity::{Component, DynamicGroup, Field, LineItem, Metric};
use crate::snapshot::{
    BidRecord, BidSnapshot, ComponentRecord, DatatableRecord, DynamicGroupRecord, FieldRecord,
    LineItemRecord, MetricRecord, Record, VariableRecord,
};

impl Bid {
    /// Current state as a snapshot.
    ///
    /// With `force_full` every entity carries its config block and the
    /// result loads into a fresh bid with the same wiring and values.
    /// Without it, config blocks are written only for entities whose wiring
    /// changed since load; that form is for a store that merges it into the
    /// records it already holds.
    pub fn export(&self, force_full: bool) -> BidSnapshot {
        fn records<'a, R>(entities: impl Iterator<Item = &'a R::Entity>, force_full: bool) -> Vec<R>
        where
            R: Record,
            R::Entity: 'a,
        {
            entities.map(|e| R::from_entity(e, force_full)).collect()
        }

        BidSnapshot {
            bid: BidRecord {
                id: self.header.id.clone(),
                title: self.header.title.clone(),
                status: self.status,
                totals: Some(self.totals),
            },
            variables: records::<VariableRecord>(self.store.variables.values(), force_full),
            datatables: records::<DatatableRecord>(self.store.datatables.values(), force_full),
            fields: records::<FieldRecord>(self.store.fields.values(), force_full),
            metrics: records::<MetricRecord>(self.store.metrics.values(), force_full),
            line_items: records::<LineItemRecord>(self.store.line_items.values(), force_full),
            components: records::<ComponentRecord>(self.store.components.values(), force_full),
            dynamic_groups: records::<DynamicGroupRecord>(self.store.dynamic_groups.values(), force_full),
            prediction_models: self.predictor.models().cloned().collect(),
        }
    }

    pub fn line_item(&self, id: &EntityId) -> Option<&LineItem> {
        self.store.line_items.get(id)
    }

    pub fn component(&self, id: &EntityId) -> Option<&Component> {
        self.store.components.get(id)
    }

    pub fn dynamic_group(&self, id: &EntityId) -> Option<&DynamicGroup> {
        self.store.dynamic_groups.get(id)
    }

    pub fn field(&self, id: &EntityId) -> Option<&Field> {
        self.store.fields.get(id)
    }

    pub fn metric(&self, id: &EntityId) -> Option<&Metric> {
        self.store.metrics.get(id)
    }
}
