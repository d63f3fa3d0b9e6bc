//! Seams to the world outside the engine: edit permission, structural
//! validation and settle notification.

use bidgraph_core::{DependencyContract, EntityId, EntityRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bid::BidStatus;
use crate::entity::GroupTotals;

/// Decides whether edits to a bid are refused.
pub trait EditPermission: Send + Sync {
    fn is_read_only(&self, bid: &EntityId, status: &BidStatus) -> bool;
}

impl<F> EditPermission for F
where
    F: Fn(&EntityId, &BidStatus) -> bool + Send + Sync,
{
    fn is_read_only(&self, bid: &EntityId, status: &BidStatus) -> bool {
        self(bid, status)
    }
}

/// Read-only exactly when the bid is locked or a read-only shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusPermission;

impl EditPermission for StatusPermission {
    fn is_read_only(&self, _bid: &EntityId, status: &BidStatus) -> bool {
        status.locked || status.read_only_shell
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub entity: EntityRef,
    pub message: String,
}

/// External structural linting. Any reported issue makes the bid non-assessable.
pub trait BidValidator: Send + Sync {
    fn validate(&self, bid: &EntityId, contracts: &[(EntityRef, DependencyContract)]) -> Vec<ValidationIssue>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopValidator;

impl BidValidator for NoopValidator {
    fn validate(&self, _bid: &EntityId, _contracts: &[(EntityRef, DependencyContract)]) -> Vec<ValidationIssue> {
        Vec::new()
    }
}

/// Emitted once per burst of assessments, after the queue went quiet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettledEvent {
    pub bid_id: EntityId,
    pub totals: GroupTotals,
    /// Entity passes that reported a change during the burst.
    pub changes: u64,
    /// Listener invocations the trigger breaker skipped during the burst.
    pub breaker_trips: u64,
    pub settled_at: DateTime<Utc>,
}

/// Pluggable sink for settle events, e.g. an autosave scheduler.
pub trait SettleNotifier: Send + Sync {
    fn notify(&self, event: &SettledEvent);
}
