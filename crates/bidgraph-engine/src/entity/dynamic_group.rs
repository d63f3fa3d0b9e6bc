use bidgraph_core::{DependencyContract, EntityId, EntityKind};

use super::{Entity, EntityHeader, GroupChildren, GroupProvenance, GroupTotals};

/// Ad-hoc grouping that may reference line items, components and other
/// dynamic groups. The same line item may be reachable along several paths.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicGroup {
    pub header: EntityHeader,
    pub line_item_ids: Vec<EntityId>,
    pub component_ids: Vec<EntityId>,
    pub dynamic_group_ids: Vec<EntityId>,
    pub totals: GroupTotals,
    pub provenance: GroupProvenance,
}

impl DynamicGroup {
    pub fn new(id: impl Into<EntityId>, title: impl Into<String>) -> Self {
        Self {
            header: EntityHeader::new(EntityKind::DynamicGroup, id, title),
            line_item_ids: Vec::new(),
            component_ids: Vec::new(),
            dynamic_group_ids: Vec::new(),
            totals: GroupTotals::default(),
            provenance: GroupProvenance::default(),
        }
    }

    pub fn with_line_items(mut self, ids: &[&str]) -> Self {
        self.line_item_ids = ids.iter().map(|id| EntityId::from(*id)).collect();
        self
    }

    pub fn with_components(mut self, ids: &[&str]) -> Self {
        self.component_ids = ids.iter().map(|id| EntityId::from(*id)).collect();
        self
    }

    pub fn with_dynamic_groups(mut self, ids: &[&str]) -> Self {
        self.dynamic_group_ids = ids.iter().map(|id| EntityId::from(*id)).collect();
        self
    }

    pub fn children(&self) -> GroupChildren<'_> {
        GroupChildren {
            line_items: &self.line_item_ids,
            components: &self.component_ids,
            dynamic_groups: &self.dynamic_group_ids,
        }
    }

    pub fn is_included(&self) -> bool {
        self.totals.included_line_item_count > 0
    }
}

impl Entity for DynamicGroup {
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
