//! Reactive assessment of hierarchical bid estimates.
//!
//! - `entity`: line items, groups, fields, metrics, variables, datatables
//! - `assess`: per-entity derivation passes with change detection
//! - `bid`: the root aggregate that loads, dispatches, edits and settles
//! - `redistribute`: pushing group edits down into line items
//! - `prediction`: regression-based estimates for undefined values

pub mod assess;
pub mod bid;
pub mod collaborators;
pub mod entity;
pub mod prediction;
pub mod redistribute;
pub mod resolver;
pub mod snapshot;
pub mod store;
pub mod structure;

pub use bid::{Bid, BidStatus, DrainReport, LoadOptions};
pub use collaborators::*;
pub use entity::*;
pub use prediction::{PredictionBounds, PredictionModel, PredictionService, PredictionTarget};
pub use redistribute::{plan_redistribution, RedistributionPlan};
pub use resolver::{DependencyResolver, ValueSource};
pub use snapshot::*;
pub use store::EntityStore;
