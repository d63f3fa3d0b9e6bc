//! Entity definitions owned by a bid.
//!
//! Every entity carries an [`EntityHeader`] and lists the dependency contracts
//! it reads through [`Entity::dependencies`]. Cross references are plain ids;
//! the bid's [`crate::store::EntityStore`] is the only owner.

mod component;
mod datatable;
mod dynamic_group;
mod field;
mod formula;
mod group;
mod line_item;
mod metric;
mod variable;

pub use component::Component;
pub use datatable::{Datatable, DatatableRow};
pub use dynamic_group::DynamicGroup;
pub use field::{Field, FieldConfig};
pub use formula::{Formula, FormulaOutcome};
pub use group::{GroupChildren, GroupProp, GroupProvenance, GroupTotals, Provenance};
pub use line_item::{
    InclusionConfig, InclusionPolicy, InclusionRule, LineItem, LineItemConfig, LineItemProp,
    LineItemValues, Overrides, PropSet,
};
pub use metric::{Metric, MetricConfig};
pub use variable::{BidSwitches, BidVariable, VariableValue, RESERVED_VARIABLES};

use bidgraph_core::{DependencyContract, EntityId, EntityKind, EntityRef};
use serde::{Deserialize, Serialize};

/// Identity and bookkeeping shared by every entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityHeader {
    pub id: EntityId,
    pub kind: EntityKind,
    pub title: String,
    #[serde(skip)]
    pub dirty: bool,
}

impl EntityHeader {
    pub fn new(kind: EntityKind, id: impl Into<EntityId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            title: title.into(),
            dirty: false,
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.kind, self.id.clone())
    }
}

pub trait Entity {
    fn header(&self) -> &EntityHeader;

    fn header_mut(&mut self) -> &mut EntityHeader;

    /// Contracts this entity reads during its own assessment.
    fn dependencies(&self) -> Vec<DependencyContract> {
        Vec::new()
    }

    fn id(&self) -> &EntityId {
        &self.header().id
    }

    fn kind(&self) -> EntityKind {
        self.header().kind
    }

    fn title(&self) -> &str {
        &self.header().title
    }

    fn entity_ref(&self) -> EntityRef {
        self.header().entity_ref()
    }

    fn is_dirty(&self) -> bool {
        self.header().dirty
    }

    fn mark_dirty(&mut self) {
        self.header_mut().dirty = true;
    }

    fn mark_clean(&mut self) {
        self.header_mut().dirty = false;
    }
}

/// Property names arrive as `snake_case` or `camelCase`; compare them folded.
pub(crate) fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}
