use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Stable identifier of an entity inside one bid.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    LineItem,
    Metric,
    Field,
    Component,
    DynamicGroup,
    BidVariable,
    Datatable,
    Bid,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::LineItem => "line_item",
            EntityKind::Metric => "metric",
            EntityKind::Field => "field",
            EntityKind::Component => "component",
            EntityKind::DynamicGroup => "dynamic_group",
            EntityKind::BidVariable => "bid_variable",
            EntityKind::Datatable => "datatable",
            EntityKind::Bid => "bid",
        }
    }

    /// Group kinds aggregate line items and other groups.
    pub fn is_group(&self) -> bool {
        matches!(self, EntityKind::Component | EntityKind::DynamicGroup)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "line_item" | "lineitem" => Ok(EntityKind::LineItem),
            "metric" => Ok(EntityKind::Metric),
            "field" => Ok(EntityKind::Field),
            "component" => Ok(EntityKind::Component),
            "dynamic_group" | "dynamicgroup" => Ok(EntityKind::DynamicGroup),
            "bid_variable" | "bidvariable" => Ok(EntityKind::BidVariable),
            "datatable" => Ok(EntityKind::Datatable),
            "bid" => Ok(EntityKind::Bid),
            other => Err(format!("unknown entity kind: {}", other)),
        }
    }
}

/// A typed handle to an entity: its kind plus its id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: impl Into<EntityId>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Typed pointer from one entity's configuration into another entity's exposed value.
///
/// Contracts are plain data. They are resolved at assessment time, so a contract
/// pointing at a missing entity is a representable state and simply resolves to
/// "undefined".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyContract {
    pub kind: EntityKind,
    pub target_id: EntityId,
    #[serde(default = "DependencyContract::default_field")]
    pub field: String,
}

impl DependencyContract {
    fn default_field() -> String {
        "value".to_string()
    }

    pub fn new(kind: EntityKind, target_id: impl Into<EntityId>, field: impl Into<String>) -> Self {
        Self {
            kind,
            target_id: target_id.into(),
            field: field.into(),
        }
    }

    pub fn field(target_id: impl Into<EntityId>) -> Self {
        Self::new(EntityKind::Field, target_id, "value")
    }

    pub fn metric(target_id: impl Into<EntityId>) -> Self {
        Self::new(EntityKind::Metric, target_id, "value")
    }

    pub fn variable(target_id: impl Into<EntityId>) -> Self {
        Self::new(EntityKind::BidVariable, target_id, "value")
    }

    pub fn target(&self) -> EntityRef {
        EntityRef::new(self.kind, self.target_id.clone())
    }
}

impl fmt::Display for DependencyContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}.{}", self.kind, self.target_id, self.field)
    }
}

/// Decimal places used when deciding whether a recomputed value actually moved.
pub const COMPARE_DECIMALS: u32 = 7;

pub fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}

/// Equality at `COMPARE_DECIMALS` rounding; absorbs floating noise between passes.
pub fn nearly_equal(a: f64, b: f64) -> bool {
    nearly_equal_at(a, b, COMPARE_DECIMALS)
}

pub fn nearly_equal_at(a: f64, b: f64, places: u32) -> bool {
    if a == b {
        return true;
    }
    let tolerance = 0.5 * 10f64.powi(-(places as i32));
    (a - b).abs() < tolerance || round_to(a, places) == round_to(b, places)
}

/// Division that yields zero instead of inf/NaN for an empty denominator.
pub fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 || !denominator.is_finite() {
        0.0
    } else {
        numerator / denominator
    }
}
