use bidgraph_core::{DependencyContract, EntityId, EntityKind};

use super::{Entity, EntityHeader, GroupChildren, GroupProvenance, GroupTotals};

/// Strict-tree grouping of line items and sub-components.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub header: EntityHeader,
    pub line_item_ids: Vec<EntityId>,
    pub sub_component_ids: Vec<EntityId>,
    pub totals: GroupTotals,
    pub provenance: GroupProvenance,
}

impl Component {
    pub fn new(id: impl Into<EntityId>, title: impl Into<String>) -> Self {
        Self {
            header: EntityHeader::new(EntityKind::Component, id, title),
            line_item_ids: Vec::new(),
            sub_component_ids: Vec::new(),
            totals: GroupTotals::default(),
            provenance: GroupProvenance::default(),
        }
    }

    pub fn with_line_items(mut self, ids: &[&str]) -> Self {
        self.line_item_ids = ids.iter().map(|id| EntityId::from(*id)).collect();
        self
    }

    pub fn with_sub_components(mut self, ids: &[&str]) -> Self {
        self.sub_component_ids = ids.iter().map(|id| EntityId::from(*id)).collect();
        self
    }

    pub fn children(&self) -> GroupChildren<'_> {
        GroupChildren {
            line_items: &self.line_item_ids,
            components: &self.sub_component_ids,
            dynamic_groups: &[],
        }
    }

    pub fn is_included(&self) -> bool {
        self.totals.included_line_item_count > 0
    }
}

impl Entity for Component {
    fn header(&self) -> &EntityHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut EntityHeader {
        &mut self.header
    }

    fn dependencies(&self) -> Vec<DependencyContract> {
        self.children()
            .refs()
            .map(|r| DependencyContract::new(r.kind, r.id, "cost"))
            .collect()
    }
}
