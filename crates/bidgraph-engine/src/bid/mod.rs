//! The bid: root aggregate that owns every entity, the event bus and the
//! edit gate.
//!
//! Entities never call each other. A change is announced on the bus as
//! `Changed(source)`; listeners get a debounced `Assess` task, and the bid
//! dispatches due tasks in order. The bid also listens to its own line items
//! and, after every burst, emits one [`SettledEvent`].

mod edit;
mod export;
mod runtime;

pub use runtime::DrainReport;

use std::sync::Arc;

use bidgraph_core::{
    DependencyContract, EngineConfig, EntityId, EntityKind, EntityRef, EventBus, Result, Topic,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::collaborators::{
    BidValidator, EditPermission, NoopValidator, SettleNotifier, SettledEvent, StatusPermission,
    ValidationIssue,
};
use crate::entity::{EntityHeader, GroupProvenance, GroupTotals, RESERVED_VARIABLES};
use crate::prediction::PredictionService;
use crate::resolver::{BidView, DependencyResolver};
use crate::snapshot::{merge_collection, BidSnapshot, MergeCounts};
use crate::store::EntityStore;
use crate::structure::validate_structure;

/// Lifecycle flags that gate assessment and edits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidStatus {
    #[serde(skip)]
    pub loaded: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub read_only_shell: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Run one full assessment pass and drain it before returning.
    pub assess: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self { assess: true }
    }
}

impl LoadOptions {
    pub fn without_assessment() -> Self {
        Self { assess: false }
    }
}

/// Work parked on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Task {
    Assess(EntityRef),
    Settle,
}

pub struct Bid {
    header: EntityHeader,
    status: BidStatus,
    store: EntityStore,
    totals: GroupTotals,
    provenance: GroupProvenance,
    predictor: PredictionService,
    bus: EventBus<Task>,
    config: EngineConfig,
    permission: Arc<dyn EditPermission>,
    validator: Arc<dyn BidValidator>,
    notifier: Option<Arc<dyn SettleNotifier>>,
    settled_tx: broadcast::Sender<SettledEvent>,
    issues: Vec<ValidationIssue>,
    burst_changes: u64,
    breaker_trips: u64,
    settle_count: u64,
}

impl std::fmt::Debug for Bid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bid")
            .field("id", &self.header.id)
            .field("status", &self.status)
            .field("entities", &self.store.len())
            .field("totals", &self.totals)
            .field("pending", &self.bus.pending_len())
            .finish()
    }
}

impl Bid {
    pub fn new(config: EngineConfig) -> Self {
        let (settled_tx, _rx) = broadcast::channel(64);
        let tolerance = config.assessment.prediction_bounds_tolerance;
        Self {
            header: EntityHeader::new(EntityKind::Bid, EntityId::generate(), ""),
            status: BidStatus::default(),
            store: EntityStore::new(),
            totals: GroupTotals::default(),
            provenance: GroupProvenance::default(),
            predictor: PredictionService::new(Vec::new(), tolerance),
            bus: EventBus::new(config.propagation.breaker_limits()),
            config,
            permission: Arc::new(StatusPermission),
            validator: Arc::new(NoopValidator),
            notifier: None,
            settled_tx,
            issues: Vec::new(),
            burst_changes: 0,
            breaker_trips: 0,
            settle_count: 0,
        }
    }

    /// Construct and load in one step, running the initial assessment.
    pub fn from_snapshot(snapshot: BidSnapshot, config: EngineConfig) -> Result<Self> {
        let mut bid = Self::new(config);
        bid.load(snapshot, LoadOptions::default())?;
        Ok(bid)
    }

    pub fn with_permission(mut self, permission: Arc<dyn EditPermission>) -> Self {
        self.permission = permission;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn BidValidator>) -> Self {
        self.validator = validator;
        self.revalidate();
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn SettleNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Receive every settle event from now on.
    pub fn subscribe_settled(&self) -> broadcast::Receiver<SettledEvent> {
        self.settled_tx.subscribe()
    }

    /// Load or reload from a snapshot.
    ///
    /// Reloading the same bid keeps entities whose ids survive (updated in
    /// place), drops missing ones and adds new ones. The snapshot is checked
    /// for structural problems before anything is replaced.
    pub fn load(&mut self, snapshot: BidSnapshot, options: LoadOptions) -> Result<MergeCounts> {
        let reload = self.status.loaded && self.header.id == snapshot.bid.id;
        let mut store = if reload {
            self.store.clone()
        } else {
            EntityStore::new()
        };

        let mut counts = MergeCounts::default();
        counts.add(merge_collection(&mut store.variables, snapshot.variables)?);
        counts.add(merge_collection(&mut store.datatables, snapshot.datatables)?);
        counts.add(merge_collection(&mut store.fields, snapshot.fields)?);
        counts.add(merge_collection(&mut store.metrics, snapshot.metrics)?);
        counts.add(merge_collection(&mut store.line_items, snapshot.line_items)?);
        counts.add(merge_collection(&mut store.components, snapshot.components)?);
        counts.add(merge_collection(&mut store.dynamic_groups, snapshot.dynamic_groups)?);
        validate_structure(&store)?;

        self.store = store;
        self.header.id = snapshot.bid.id;
        self.header.title = snapshot.bid.title;
        self.status = BidStatus {
            loaded: true,
            ..snapshot.bid.status
        };
        if !reload {
            self.totals = snapshot.bid.totals.unwrap_or_default();
            self.provenance = GroupProvenance::default();
        }
        self.predictor = PredictionService::new(
            snapshot.prediction_models,
            self.config.assessment.prediction_bounds_tolerance,
        );
        self.bus.cancel_pending();
        self.bus.reset_counters();
        self.burst_changes = 0;
        self.bind_listeners();
        self.revalidate();

        info!(
            bid = %self.header.id,
            reload,
            entities = self.store.len(),
            added = counts.added,
            updated = counts.updated,
            removed = counts.removed,
            "bid loaded"
        );

        if options.assess {
            self.request_full_assessment();
            self.run_until_idle();
        }
        Ok(counts)
    }

    /// Rebuild every subscription from the current wiring.
    pub(crate) fn bind_listeners(&mut self) {
        self.bus.clear_listeners();
        let bid = self.bid_ref();
        let mut edges: Vec<(EntityRef, EntityRef)> = Vec::new();

        for entity in self.store.refs() {
            for contract in self.store.dependencies_of(&entity) {
                edges.push((contract.target(), entity.clone()));
            }
            if entity.kind != EntityKind::LineItem {
                continue;
            }
            for id in RESERVED_VARIABLES {
                edges.push((EntityRef::new(EntityKind::BidVariable, id), entity.clone()));
            }
            let definition = self
                .store
                .line_items
                .get(&entity.id)
                .and_then(|li| li.config.definition_id.as_deref());
            if let Some(definition) = definition {
                for model in self.predictor.models_for(definition) {
                    edges.extend(model.contracts().map(|c| (c.target(), entity.clone())));
                }
            }
            edges.push((entity.clone(), bid.clone()));
        }

        for (source, requester) in edges {
            let source = if source.kind == EntityKind::Bid { bid.clone() } else { source };
            if source == requester {
                warn!(entity = %source, "entity depends on itself; ignoring");
                continue;
            }
            self.bus
                .subscribe(Topic::changed(source), requester.clone(), Task::Assess(requester));
        }
    }

    /// Ask the external validator again; issues make the bid non-assessable.
    pub fn revalidate(&mut self) -> &[ValidationIssue] {
        self.issues = self.validator.validate(&self.header.id, &self.store.contracts());
        if !self.issues.is_empty() {
            warn!(bid = %self.header.id, issues = self.issues.len(), "bid has validation issues");
        }
        &self.issues
    }

    pub(crate) fn resolver(&self) -> DependencyResolver<'_> {
        DependencyResolver::new(&self.store).with_bid(BidView {
            id: &self.header.id,
            totals: &self.totals,
            provenance: &self.provenance,
            watts: self.store.switches().watts,
        })
    }

    pub fn bid_ref(&self) -> EntityRef {
        self.header.entity_ref()
    }

    pub fn id(&self) -> &EntityId {
        &self.header.id
    }

    pub fn title(&self) -> &str {
        &self.header.title
    }

    pub fn status(&self) -> BidStatus {
        self.status
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn totals(&self) -> &GroupTotals {
        &self.totals
    }

    pub fn provenance(&self) -> &GroupProvenance {
        &self.provenance
    }

    pub fn predictor(&self) -> &PredictionService {
        &self.predictor
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    /// Declared contracts with their owners, for external validators.
    pub fn contracts(&self) -> Vec<(EntityRef, DependencyContract)> {
        self.store.contracts()
    }

    pub fn watts(&self) -> f64 {
        self.store.switches().watts
    }

    pub fn is_assessable(&self) -> bool {
        self.status.loaded
            && !self.status.locked
            && !self.status.read_only_shell
            && self.issues.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.header.dirty || !self.store.dirty().is_empty()
    }

    /// Clear every dirty flag, e.g. after the persistence layer saved.
    pub fn mark_clean(&mut self) {
        self.header.dirty = false;
        for entity in self.store.refs() {
            if let Some(header) = self.store.header_mut(&entity) {
                header.dirty = false;
            }
        }
    }
}
