use std::collections::HashMap;

use tracing::{debug, warn};

use crate::types::{EntityKind, EntityRef};

/// What happened to the topic's source entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Signal {
    /// The source's exposed values or provenance changed after an assessment.
    Changed,
    /// The source asked to be re-assessed.
    Assess,
    /// The bid finished a burst of assessments.
    Settled,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Topic {
    pub source: EntityRef,
    pub signal: Signal,
}

impl Topic {
    pub fn changed(source: EntityRef) -> Self {
        Self {
            source,
            signal: Signal::Changed,
        }
    }

    pub fn assess(target: EntityRef) -> Self {
        Self {
            source: target,
            signal: Signal::Assess,
        }
    }

    pub fn settled(bid: EntityRef) -> Self {
        Self {
            source: bid,
            signal: Signal::Settled,
        }
    }

    /// Bid-class topics fan out to every line item, so they trip sooner.
    pub fn is_bid_class(&self) -> bool {
        self.source.kind == EntityKind::Bid || self.signal == Signal::Settled
    }
}

/// Trigger-count thresholds for the runaway-recomputation breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerLimits {
    pub ordinary: u32,
    pub bid_class: u32,
}

impl Default for BreakerLimits {
    fn default() -> Self {
        Self {
            ordinary: 25,
            bid_class: 10,
        }
    }
}

impl BreakerLimits {
    fn for_topic(&self, topic: &Topic) -> u32 {
        if topic.is_bid_class() {
            self.bid_class
        } else {
            self.ordinary
        }
    }
}

#[derive(Debug, Clone)]
struct Listener<T> {
    requester: EntityRef,
    payload: T,
}

#[derive(Debug, Clone)]
struct Pending<T> {
    due: u64,
    seq: u64,
    payload: T,
}

/// Deterministic, single-threaded event bus with a logical millisecond clock.
///
/// `emit` consults the breaker and hands back the payloads of listeners that may
/// run. `on_delay` parks a payload under `(topic, requester)`; scheduling the
/// same key again replaces the payload and pushes the due time back, so a burst
/// collapses into one trailing delivery.
#[derive(Debug)]
pub struct EventBus<T> {
    listeners: HashMap<Topic, Vec<Listener<T>>>,
    counters: HashMap<(Topic, EntityRef), u32>,
    pending: HashMap<(Topic, EntityRef), Pending<T>>,
    clock: u64,
    seq: u64,
    limits: BreakerLimits,
    tripped: u64,
}

impl<T: Clone> Default for EventBus<T> {
    fn default() -> Self {
        Self::new(BreakerLimits::default())
    }
}

impl<T: Clone> EventBus<T> {
    pub fn new(limits: BreakerLimits) -> Self {
        Self {
            listeners: HashMap::new(),
            counters: HashMap::new(),
            pending: HashMap::new(),
            clock: 0,
            seq: 0,
            limits,
            tripped: 0,
        }
    }

    pub fn limits(&self) -> BreakerLimits {
        self.limits
    }

    /// Register `requester` on `topic`. Re-subscribing replaces the payload.
    pub fn subscribe(&mut self, topic: Topic, requester: EntityRef, payload: T) {
        let entry = self.listeners.entry(topic).or_default();
        match entry.iter_mut().find(|l| l.requester == requester) {
            Some(existing) => existing.payload = payload,
            None => entry.push(Listener { requester, payload }),
        }
    }

    pub fn unsubscribe(&mut self, topic: &Topic, requester: &EntityRef) {
        if let Some(list) = self.listeners.get_mut(topic) {
            list.retain(|l| &l.requester != requester);
            if list.is_empty() {
                self.listeners.remove(topic);
            }
        }
    }

    /// Drop every subscription and pending delivery owned by `requester`.
    pub fn unsubscribe_requester(&mut self, requester: &EntityRef) {
        self.listeners.retain(|_, list| {
            list.retain(|l| &l.requester != requester);
            !list.is_empty()
        });
        self.pending.retain(|(_, r), _| r != requester);
        self.counters.retain(|(_, r), _| r != requester);
    }

    pub fn clear_listeners(&mut self) {
        self.listeners.clear();
    }

    pub fn listener_count(&self, topic: &Topic) -> usize {
        self.listeners.get(topic).map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_subscribed(&self, topic: &Topic, requester: &EntityRef) -> bool {
        self.listeners
            .get(topic)
            .is_some_and(|l| l.iter().any(|x| &x.requester == requester))
    }

    /// Payloads of listeners allowed to run for `topic`, in subscription order.
    ///
    /// A listener whose trigger counter already reached the threshold is
    /// skipped and its counter is left where it is.
    pub fn emit(&mut self, topic: &Topic) -> Vec<(EntityRef, T)> {
        let Some(list) = self.listeners.get(topic) else {
            return Vec::new();
        };
        let limit = self.limits.for_topic(topic);
        let mut out = Vec::with_capacity(list.len());
        for listener in list {
            let count = self
                .counters
                .entry((topic.clone(), listener.requester.clone()))
                .or_insert(0);
            if *count >= limit {
                self.tripped += 1;
                warn!(
                    topic = ?topic.signal,
                    source = %topic.source,
                    requester = %listener.requester,
                    limit,
                    "trigger breaker tripped; skipping listener"
                );
                continue;
            }
            *count += 1;
            out.push((listener.requester.clone(), listener.payload.clone()));
        }
        out
    }

    /// Defer `payload` by `delay_ms`, collapsing with any pending entry for the same key.
    pub fn on_delay(&mut self, topic: Topic, requester: EntityRef, delay_ms: u64, payload: T) {
        self.seq += 1;
        let due = self.clock + delay_ms;
        let seq = self.seq;
        match self.pending.get_mut(&(topic.clone(), requester.clone())) {
            Some(existing) => {
                existing.due = due;
                existing.payload = payload;
            }
            None => {
                self.pending.insert((topic, requester), Pending { due, seq, payload });
            }
        }
    }

    pub fn is_pending(&self, topic: &Topic, requester: &EntityRef) -> bool {
        self.pending.contains_key(&(topic.clone(), requester.clone()))
    }

    pub fn now(&self) -> u64 {
        self.clock
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn next_due(&self) -> Option<u64> {
        self.pending.values().map(|p| p.due).min()
    }

    /// Move the logical clock forward; it never runs backwards.
    pub fn advance_to(&mut self, at: u64) {
        if at > self.clock {
            self.clock = at;
        }
    }

    pub fn advance(&mut self, ms: u64) {
        self.clock += ms;
    }

    /// Remove and return every payload due at the current clock, oldest first.
    pub fn pop_due(&mut self) -> Vec<T> {
        let now = self.clock;
        let mut due: Vec<((Topic, EntityRef), Pending<T>)> = Vec::new();
        let keys: Vec<(Topic, EntityRef)> = self
            .pending
            .iter()
            .filter(|(_, p)| p.due <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in keys {
            if let Some(p) = self.pending.remove(&key) {
                due.push((key, p));
            }
        }
        due.sort_by(|a, b| a.1.due.cmp(&b.1.due).then(a.1.seq.cmp(&b.1.seq)));
        if !due.is_empty() {
            debug!(count = due.len(), clock = now, "delivering due work");
        }
        due.into_iter().map(|(_, p)| p.payload).collect()
    }

    /// Quiescence marker: every breaker counter starts over.
    pub fn reset_counters(&mut self) {
        self.counters.clear();
        self.tripped = 0;
    }

    pub fn trigger_count(&self, topic: &Topic, requester: &EntityRef) -> u32 {
        self.counters
            .get(&(topic.clone(), requester.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// Listener invocations skipped by the breaker since the last reset.
    pub fn tripped(&self) -> u64 {
        self.tripped
    }

    pub fn cancel_pending(&mut self) {
        self.pending.clear();
    }
}
