//! Change propagation substrate for cascading recomputation across entities.
//!
//! This module provides:
//! - Topic: what happened to which entity (changed, assess request, settled)
//! - EventBus: listener registry with a per-(topic, requester) trigger breaker
//! - Debounced scheduling: insert-or-replace pending work on a logical clock,
//!   collapsing bursts into one trailing call per key
//!
//! The bus never runs callbacks itself. Emitting returns the payloads that
//! passed the breaker and draining returns the payloads that came due; the
//! owning bid dispatches them. This keeps the entity arena free of closures
//! that would need to borrow it.

mod substrate;

pub use substrate::*;
