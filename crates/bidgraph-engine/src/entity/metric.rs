use bidgraph_core::{DependencyContract, EntityId, EntityKind};
use serde::{Deserialize, Serialize};

use super::{Entity, EntityHeader, Formula};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricConfig {
    pub formula: Formula,
}

/// Derived number computed from other entities through a formula.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub header: EntityHeader,
    pub config: MetricConfig,
    pub(crate) loaded_config: MetricConfig,
    pub value: Option<f64>,
    pub has_null_dependency: bool,
}

impl Metric {
    pub fn new(id: impl Into<EntityId>, title: impl Into<String>, formula: Formula) -> Self {
        let config = MetricConfig { formula };
        Self {
            header: EntityHeader::new(EntityKind::Metric, id, title),
            loaded_config: config.clone(),
            config,
            value: None,
            has_null_dependency: false,
        }
    }

    pub fn config_changed(&self) -> bool {
        self.config != self.loaded_config
    }
}

impl Entity for Metric {
    fn header(&self) -> &EntityHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut EntityHeader {
        &mut self.header
    }

    fn dependencies(&self) -> Vec<DependencyContract> {
        self.config.formula.contracts().cloned().collect()
    }
}
