use bidgraph_core::{nearly_equal_at, BidGraphError, EntityKind, EntityRef, Result, Topic};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use super::{Bid, Task};
use crate::assess::{
    aggregate_bid, aggregate_group, apply_field, apply_group, apply_line_item, apply_metric,
    assess_field, assess_line_item, assess_metric, AssessContext,
};
use crate::collaborators::SettledEvent;

/// What one drain of the bus did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub steps: usize,
    pub settled: bool,
    pub breaker_trips: u64,
    /// The step budget ran out and remaining work was dropped.
    pub exhausted: bool,
    pub clock_ms: u64,
}

impl Bid {
    /// Queue an assessment of `target` behind the dependency delay.
    pub(crate) fn request_assess(&mut self, target: EntityRef) {
        let delay = self.config.propagation.dependency_delay_ms;
        self.bus
            .on_delay(Topic::assess(target.clone()), target.clone(), delay, Task::Assess(target));
    }

    /// Queue every entity, leaves first, then the bid.
    pub fn request_full_assessment(&mut self) {
        for entity in self.store.refs() {
            self.request_assess(entity);
        }
        let bid = self.bid_ref();
        self.request_assess(bid);
    }

    /// Record a change on `source` and wake its listeners.
    pub(crate) fn on_changed(&mut self, source: &EntityRef) {
        self.burst_changes += 1;
        match self.store.header_mut(source) {
            Some(header) => header.dirty = true,
            None if source.kind == EntityKind::Bid => self.header.dirty = true,
            None => {}
        }

        let delay = self.config.propagation.dependency_delay_ms;
        for (requester, task) in self.bus.emit(&Topic::changed(source.clone())) {
            trace!(source = %source, requester = %requester, "change delivered");
            self.bus.on_delay(Topic::assess(requester.clone()), requester, delay, task);
        }
        self.schedule_settle();
    }

    fn schedule_settle(&mut self) {
        let bid = self.bid_ref();
        let delay = self.config.propagation.settle_delay_ms;
        self.bus.on_delay(Topic::settled(bid.clone()), bid, delay, Task::Settle);
    }

    pub(crate) fn dispatch(&mut self, task: Task) {
        match task {
            Task::Assess(target) => {
                if !self.is_assessable() {
                    debug!(entity = %target, "bid not assessable; skipping");
                    return;
                }
                if self.assess_entity(&target) {
                    self.on_changed(&target);
                }
            }
            Task::Settle => self.settle(),
        }
    }

    /// Re-derive one entity. Returns whether any exposed value moved.
    pub(crate) fn assess_entity(&mut self, target: &EntityRef) -> bool {
        let places = self.config.assessment.compare_decimals;
        let id = &target.id;
        match target.kind {
            EntityKind::LineItem => {
                let assessment = {
                    let Some(item) = self.store.line_items.get(id) else {
                        return false;
                    };
                    let resolver = self.resolver();
                    let ctx = AssessContext::new(&resolver, &self.predictor);
                    assess_line_item(item, &ctx)
                };
                self.store
                    .line_items
                    .get_mut(id)
                    .is_some_and(|item| apply_line_item(item, assessment, places))
            }
            EntityKind::Field => {
                let assessment = {
                    let Some(field) = self.store.fields.get(id) else {
                        return false;
                    };
                    assess_field(field, &self.resolver())
                };
                self.store
                    .fields
                    .get_mut(id)
                    .is_some_and(|field| apply_field(field, assessment, places))
            }
            EntityKind::Metric => {
                let assessment = {
                    let Some(metric) = self.store.metrics.get(id) else {
                        return false;
                    };
                    assess_metric(metric, &self.resolver())
                };
                self.store
                    .metrics
                    .get_mut(id)
                    .is_some_and(|metric| apply_metric(metric, assessment, places))
            }
            EntityKind::Component => {
                let assessment = {
                    let Some(component) = self.store.components.get(id) else {
                        return false;
                    };
                    aggregate_group(component.children(), &self.store)
                };
                self.store.components.get_mut(id).is_some_and(|c| {
                    apply_group(&mut c.totals, &mut c.provenance, assessment, places)
                })
            }
            EntityKind::DynamicGroup => {
                let assessment = {
                    let Some(group) = self.store.dynamic_groups.get(id) else {
                        return false;
                    };
                    aggregate_group(group.children(), &self.store)
                };
                self.store.dynamic_groups.get_mut(id).is_some_and(|g| {
                    apply_group(&mut g.totals, &mut g.provenance, assessment, places)
                })
            }
            EntityKind::Bid => {
                let assessment = aggregate_bid(&self.store);
                apply_group(&mut self.totals, &mut self.provenance, assessment, places)
            }
            // Plain data; edits announce their own changes.
            EntityKind::BidVariable | EntityKind::Datatable => false,
        }
    }

    /// Close the burst: reset breakers and tell subscribers.
    fn settle(&mut self) {
        let trips = self.bus.tripped();
        self.breaker_trips += trips;
        self.bus.reset_counters();
        self.settle_count += 1;

        let event = SettledEvent {
            bid_id: self.header.id.clone(),
            totals: self.totals,
            changes: self.burst_changes,
            breaker_trips: trips,
            settled_at: Utc::now(),
        };
        self.burst_changes = 0;

        info!(
            bid = %event.bid_id,
            price = event.totals.price,
            cost = event.totals.cost,
            changes = event.changes,
            breaker_trips = trips,
            "bid settled"
        );
        // No receivers is fine.
        let _ = self.settled_tx.send(event.clone());
        if let Some(notifier) = &self.notifier {
            notifier.notify(&event);
        }
    }

    /// Run due work, advancing the clock, until nothing is pending.
    pub fn run_until_idle(&mut self) -> DrainReport {
        self.drain(None)
    }

    /// Run only what comes due within the next `ms` milliseconds.
    pub fn advance(&mut self, ms: u64) -> DrainReport {
        let horizon = self.bus.now().saturating_add(ms);
        let report = self.drain(Some(horizon));
        self.bus.advance_to(horizon);
        DrainReport {
            clock_ms: self.bus.now(),
            ..report
        }
    }

    fn drain(&mut self, horizon: Option<u64>) -> DrainReport {
        let max_steps = self.config.propagation.max_drain_steps;
        let trips_before = self.breaker_trips + self.bus.tripped();
        let mut report = DrainReport::default();

        'drain: loop {
            let due = self.bus.pop_due();
            if due.is_empty() {
                match self.bus.next_due() {
                    Some(next) if horizon.map_or(true, |h| next <= h) => {
                        self.bus.advance_to(next);
                        continue;
                    }
                    _ => break,
                }
            }
            for task in due {
                if report.steps >= max_steps {
                    warn!(
                        bid = %self.header.id,
                        steps = report.steps,
                        pending = self.bus.pending_len(),
                        "drain step budget exhausted; dropping pending work"
                    );
                    self.bus.cancel_pending();
                    report.exhausted = true;
                    break 'drain;
                }
                report.steps += 1;
                report.settled |= matches!(task, Task::Settle);
                self.dispatch(task);
            }
        }

        report.breaker_trips = (self.breaker_trips + self.bus.tripped()).saturating_sub(trips_before);
        report.clock_ms = self.bus.now();
        report
    }

    /// Drive full assessments until the bid price stops moving.
    ///
    /// Returns the number of passes used, or `NonConvergence` once the
    /// configured attempt budget is spent.
    pub fn reassess_until_stable(&mut self) -> Result<u32> {
        let budget = self.config.assessment.max_reassess_attempts.max(1);
        let places = self.config.assessment.compare_decimals;
        let mut last_delta = 0.0;

        for attempt in 1..=budget {
            let before = self.totals.price;
            self.request_full_assessment();
            self.run_until_idle();
            let after = self.totals.price;
            if nearly_equal_at(before, after, places) {
                debug!(bid = %self.header.id, attempt, price = after, "bid stable");
                return Ok(attempt);
            }
            last_delta = (after - before).abs();
        }

        warn!(bid = %self.header.id, attempts = budget, last_delta, "bid did not converge");
        Err(BidGraphError::NonConvergence {
            attempts: budget,
            last_delta,
        })
    }

    pub fn breaker_trips(&self) -> u64 {
        self.breaker_trips + self.bus.tripped()
    }

    pub fn settle_count(&self) -> u64 {
        self.settle_count
    }

    pub fn clock_ms(&self) -> u64 {
        self.bus.now()
    }

    pub fn pending(&self) -> usize {
        self.bus.pending_len()
    }

    pub fn is_idle(&self) -> bool {
        self.bus.is_idle()
    }
}
