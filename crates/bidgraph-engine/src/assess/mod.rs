//! Per-entity assessment passes.
//!
//! Each pass is a pure function from the current store to an assessment
//! value; `apply_*` writes the result back and reports whether anything
//! moved at the configured rounding. Only a reported change is propagated.

mod group;
mod inclusion;
mod leaf;
mod line_item;

pub use group::{aggregate_bid, aggregate_group, apply_group, GroupAssessment};
pub use inclusion::{evaluate_inclusion, rule_passes};
pub use leaf::{apply_field, apply_metric, assess_field, assess_metric, LeafAssessment};
pub use line_item::{apply_line_item, assess_line_item, LineItemAssessment};

use crate::entity::BidSwitches;
use crate::prediction::PredictionService;
use crate::resolver::DependencyResolver;

/// Everything a line item pass reads besides the item itself.
pub struct AssessContext<'a> {
    pub resolver: &'a DependencyResolver<'a>,
    pub predictor: &'a PredictionService,
    pub switches: BidSwitches,
}

impl<'a> AssessContext<'a> {
    pub fn new(resolver: &'a DependencyResolver<'a>, predictor: &'a PredictionService) -> Self {
        Self {
            switches: resolver.store().switches(),
            resolver,
            predictor,
        }
    }
}
