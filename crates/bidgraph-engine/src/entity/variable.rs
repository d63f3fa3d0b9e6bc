use bidgraph_core::{EntityId, EntityKind};
use serde::{Deserialize, Serialize};

use super::{Entity, EntityHeader};

/// Variable ids with engine-defined meaning.
pub const RESERVED_VARIABLES: [&str; 11] = [
    "markup_strategy",
    "taxable_labor",
    "taxable_profit",
    "predictive_pricing",
    "use_computed",
    "watts",
    "wage",
    "burden",
    "escalator",
    "tax_percent",
    "markup_percent",
];

/// Serialized bare: `true` is a toggle, a number is a number.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    Toggle(bool),
    Number(f64),
}

impl VariableValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            VariableValue::Number(n) => *n,
            VariableValue::Toggle(true) => 1.0,
            VariableValue::Toggle(false) => 0.0,
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            VariableValue::Number(n) => *n != 0.0,
            VariableValue::Toggle(b) => *b,
        }
    }
}

/// Bid-scoped named value: a switch or a default rate.
#[derive(Debug, Clone, PartialEq)]
pub struct BidVariable {
    pub header: EntityHeader,
    pub value: VariableValue,
}

impl BidVariable {
    pub fn new(id: impl Into<EntityId>, title: impl Into<String>, value: VariableValue) -> Self {
        Self {
            header: EntityHeader::new(EntityKind::BidVariable, id, title),
            value,
        }
    }

    pub fn number(id: &str, value: f64) -> Self {
        Self::new(id, id, VariableValue::Number(value))
    }

    pub fn toggle(id: &str, value: bool) -> Self {
        Self::new(id, id, VariableValue::Toggle(value))
    }

    pub fn is_reserved(&self) -> bool {
        RESERVED_VARIABLES.contains(&self.header.id.as_str())
    }
}

impl Entity for BidVariable {
    fn header(&self) -> &EntityHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut EntityHeader {
        &mut self.header
    }
}

/// Snapshot of the bid-wide switches a line item pass reads.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BidSwitches {
    /// Markup is computed before tax and tax may include profit.
    pub markup_strategy: bool,
    pub taxable_labor: bool,
    pub taxable_profit: bool,
    pub predictive_pricing: bool,
    pub use_computed: bool,
    pub watts: f64,
}

impl BidSwitches {
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<VariableValue>,
    {
        let flag = |id: &str| lookup(id).map(|v| v.as_bool()).unwrap_or(false);
        Self {
            markup_strategy: flag("markup_strategy"),
            taxable_labor: flag("taxable_labor"),
            taxable_profit: flag("taxable_profit"),
            predictive_pricing: flag("predictive_pricing"),
            use_computed: flag("use_computed"),
            watts: lookup("watts").map(|v| v.as_f64()).unwrap_or(0.0),
        }
    }
}
