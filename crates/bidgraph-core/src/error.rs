use thiserror::Error;

use crate::config_manager::ConfigError;
use crate::expression::ExpressionError;
use crate::types::{EntityId, EntityKind};

/// Errors raised when an edit would leave the entity graph in an invalid shape.
/// No mutation is committed when one of these is returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StructuralError {
    #[error("dangling reference: {kind} {id} does not exist")]
    DanglingReference { kind: EntityKind, id: EntityId },

    #[error("cyclic membership: adding {child} to {parent} would make {parent} its own descendant")]
    CyclicMembership { parent: EntityId, child: EntityId },

    #[error("{child_kind} {child} cannot be a child of {parent_kind} {parent}")]
    WrongChildKind {
        parent: EntityId,
        parent_kind: EntityKind,
        child: EntityId,
        child_kind: EntityKind,
    },

    #[error("duplicate id {id} in {kind} collection")]
    DuplicateId { kind: EntityKind, id: EntityId },
}

#[derive(Error, Debug)]
pub enum BidGraphError {
    #[error("Structural error: {0}")]
    Structural(#[from] StructuralError),

    #[error("Permission denied: bid {bid} is read-only")]
    PermissionDenied { bid: EntityId },

    #[error("Invalid value for {property}: {reason}")]
    InvalidValue { property: String, reason: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: EntityId },

    #[error("Bid did not converge after {attempts} reassessments (last price delta {last_delta})")]
    NonConvergence { attempts: u32, last_delta: f64 },

    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BidGraphError {
    pub fn invalid_value(property: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            property: property.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(kind: EntityKind, id: &EntityId) -> Self {
        Self::NotFound {
            kind,
            id: id.clone(),
        }
    }

    /// Non-convergence points at a diverging formula graph rather than a bad call.
    pub fn is_non_convergence(&self) -> bool {
        matches!(self, Self::NonConvergence { .. })
    }
}

pub type Result<T> = std::result::Result<T, BidGraphError>;
