mod common;

use std::sync::{Arc, Mutex};

use approx::assert_relative_eq;
use bidgraph_core::{
    BidGraphError, DependencyContract, EngineConfig, EntityId, EntityKind, EntityRef, StructuralError,
};
use bidgraph_engine::{
    Bid, BidSnapshot, BidStatus, BidValidator, GroupProp, LineItemConfig, LineItemProp, LineItemRecord,
    LoadOptions, MergeCounts, PredictionBounds, PredictionModel, PredictionTarget, SettleNotifier,
    SettledEvent, ValidationIssue, VariableValue,
};
use common::*;

const SOLAR: &str = r#"{
    "bid": {"id": "solar-7", "title": "Rooftop array"},
    "datatables": [{
        "id": "panels",
        "title": "Panels",
        "columns": ["watts", "price"],
        "rows": [
            {"id": "p400", "label": "400 W", "cells": [400, 250]},
            {"id": "p500", "label": "500 W", "cells": [500, 350]}
        ]
    }],
    "fields": [
        {"id": "panel", "title": "Panel", "selected_row": "p400",
         "config": {"type": "list", "datatable_id": "panels", "value_column": "price"}},
        {"id": "battery", "title": "Battery", "input": 0,
         "config": {"type": "toggle"}}
    ],
    "line_items": [
        {"id": "modules", "title": "Modules",
         "values": {"quantity": 4},
         "config": {"contracts": {"base": {"kind": "field", "target_id": "panel"}}}},
        {"id": "batt", "title": "Battery",
         "values": {"cost": 500},
         "overrides": {"cost": true},
         "config": {"inclusion": {"rules": [
             {"type": "toggle", "dependency": {"kind": "field", "target_id": "battery"}}
         ]}}}
    ],
    "components": [{"id": "array", "title": "Array", "line_items": ["modules", "batt"]}]
}"#;

fn solar() -> Bid {
    load(BidSnapshot::from_json(SOLAR).unwrap())
}

#[test]
fn list_fields_and_toggles_drive_line_items() {
    let mut bid = solar();
    assert_relative_eq!(bid.line_item(&id("modules")).unwrap().values.cost, 1000.0);
    assert!(!bid.line_item(&id("batt")).unwrap().is_included);
    assert_relative_eq!(bid.totals().price, 1000.0);

    bid.set_field_toggle(&id("battery"), true).unwrap();
    bid.run_until_idle();
    assert!(bid.line_item(&id("batt")).unwrap().is_included);
    assert_relative_eq!(bid.totals().price, 1500.0);
    assert_eq!(bid.component(&id("array")).unwrap().totals.included_line_item_count, 2);

    bid.set_datatable_cell(&id("panels"), "p400", "price", Some(300.0)).unwrap();
    bid.run_until_idle();
    assert_relative_eq!(bid.line_item(&id("modules")).unwrap().values.cost, 1200.0);

    bid.select_field_row(&id("panel"), Some("p500")).unwrap();
    bid.run_until_idle();
    assert_relative_eq!(bid.line_item(&id("modules")).unwrap().values.cost, 1400.0);
    assert_relative_eq!(bid.totals().price, 1900.0);
}

#[test]
fn invalid_edits_are_rejected_without_mutation() {
    let mut bid = solar();

    let err = bid.select_field_row(&id("panel"), Some("p999")).unwrap_err();
    assert!(matches!(err, BidGraphError::InvalidValue { .. }));
    assert_eq!(bid.field(&id("panel")).unwrap().selected_row.as_deref(), Some("p400"));

    let err = bid.set_labor_hours(&id("modules"), -1.0).unwrap_err();
    assert!(matches!(err, BidGraphError::InvalidValue { .. }));

    let err = bid.set_cost(&id("modules"), f64::NAN).unwrap_err();
    assert!(matches!(err, BidGraphError::InvalidValue { .. }));

    let err = bid.set_cost(&id("missing"), 1.0).unwrap_err();
    assert!(matches!(err, BidGraphError::NotFound { .. }));

    let array = EntityRef::new(EntityKind::Component, "array");
    let err = bid.set_group_value(&array, GroupProp::LaborCost, 10.0).unwrap_err();
    assert!(matches!(err, BidGraphError::InvalidValue { .. }));
}

#[test]
fn overrides_release_when_inputs_change() {
    let mut bid = load(snapshot(vec![material("li", 10.0, 2.0)]));
    assert_relative_eq!(bid.line_item(&id("li")).unwrap().values.cost, 20.0);

    bid.set_cost(&id("li"), 50.0).unwrap();
    bid.run_until_idle();
    let item = bid.line_item(&id("li")).unwrap();
    assert!(item.is_overridden(LineItemProp::Cost));
    assert_relative_eq!(item.values.price, 50.0);

    bid.set_quantity(&id("li"), 3.0).unwrap();
    bid.run_until_idle();
    let item = bid.line_item(&id("li")).unwrap();
    assert!(!item.is_overridden(LineItemProp::Cost));
    assert!(item.is_overridden(LineItemProp::Quantity));
    assert_relative_eq!(item.values.cost, 30.0);
    assert_relative_eq!(bid.totals().price, 30.0);
}

#[test]
fn labor_hours_edit_becomes_a_multiplier() {
    let mut li = material("li", 0.0, 10.0);
    li.values.per_quantity = 0.5;
    let mut bid = load(snapshot(vec![li]));
    assert_relative_eq!(bid.line_item(&id("li")).unwrap().values.labor_hours, 5.0);

    bid.set_labor_hours(&id("li"), 10.0).unwrap();
    bid.run_until_idle();

    let item = bid.line_item(&id("li")).unwrap();
    assert_relative_eq!(item.values.multiplier, 2.0);
    assert_relative_eq!(item.values.labor_hours, 10.0);
    assert!(item.is_overridden(LineItemProp::Multiplier));
    assert!(!item.is_overridden(LineItemProp::LaborHours));
}

#[test]
fn cyclic_membership_is_rejected() {
    let mut snap = snapshot(vec![priced("li", 1.0)]);
    snap.dynamic_groups.push(dynamic_group("outer", &[], &[], &["inner"]));
    snap.dynamic_groups.push(dynamic_group("inner", &["li"], &[], &[]));
    let mut bid = load(snap);

    let outer = EntityRef::new(EntityKind::DynamicGroup, "outer");
    let inner = EntityRef::new(EntityKind::DynamicGroup, "inner");
    let err = bid.add_child(&inner, &outer).unwrap_err();
    assert!(matches!(
        err,
        BidGraphError::Structural(StructuralError::CyclicMembership { .. })
    ));
    assert!(bid.dynamic_group(&id("inner")).unwrap().dynamic_group_ids.is_empty());
    assert_eq!(bid.dynamic_group(&id("outer")).unwrap().dynamic_group_ids, vec![id("inner")]);

    let mut cyclic = snapshot(vec![]);
    cyclic.dynamic_groups.push(dynamic_group("a", &[], &[], &["b"]));
    cyclic.dynamic_groups.push(dynamic_group("b", &[], &[], &["a"]));
    assert!(Bid::from_snapshot(cyclic, EngineConfig::default()).is_err());
}

#[test]
fn structure_edits_reaggregate() {
    let mut snap = snapshot(vec![priced("a", 10.0), priced("b", 4.0)]);
    snap.components.push(component("c", &["a"], &[]));
    let mut bid = load(snap);
    let c = EntityRef::new(EntityKind::Component, "c");
    let b = EntityRef::new(EntityKind::LineItem, "b");

    assert!(bid.add_child(&c, &b).unwrap());
    assert!(!bid.add_child(&c, &b).unwrap());
    bid.run_until_idle();
    assert_relative_eq!(bid.component(&id("c")).unwrap().totals.cost, 14.0);

    bid.remove_line_item(&id("a")).unwrap();
    bid.run_until_idle();
    assert_relative_eq!(bid.component(&id("c")).unwrap().totals.cost, 4.0);
    assert_relative_eq!(bid.totals().cost, 4.0);

    let added = bid.add_line_item(priced("d", 6.0), Some(&c)).unwrap();
    bid.run_until_idle();
    assert_eq!(added, id("d"));
    assert_relative_eq!(bid.component(&id("c")).unwrap().totals.cost, 10.0);
}

#[test]
fn reload_keeps_survivors_and_drops_the_rest() {
    let mut bid = load(snapshot(vec![priced("a", 10.0), priced("b", 20.0)]));
    assert_relative_eq!(bid.totals().price, 30.0);

    let mut a = priced("a", 15.0);
    a.title = "A, revised".into();
    let counts = bid
        .load(snapshot(vec![a, priced("c", 5.0)]), LoadOptions::default())
        .unwrap();

    assert_eq!(
        counts,
        MergeCounts {
            added: 1,
            updated: 1,
            removed: 1
        }
    );
    assert!(bid.line_item(&id("b")).is_none());
    assert_eq!(bid.line_item(&id("a")).unwrap().header.title, "A, revised");
    assert_relative_eq!(bid.totals().price, 20.0);
}

#[test]
fn failed_reload_leaves_the_bid_untouched() {
    let mut bid = load(snapshot(vec![priced("a", 10.0)]));
    let mut broken = snapshot(vec![priced("z", 1.0)]);
    broken.components.push(component("c", &["nope"], &[]));

    assert!(bid.load(broken, LoadOptions::default()).is_err());
    assert!(bid.line_item(&id("a")).is_some());
    assert!(bid.line_item(&id("z")).is_none());
    assert_relative_eq!(bid.totals().price, 10.0);
}

#[test]
fn export_writes_config_only_when_changed() {
    let mut li = material("li", 3.0, 2.0);
    li.config = Some(LineItemConfig {
        tags: vec!["roof".into()],
        ..Default::default()
    });
    let mut bid = load(snapshot(vec![li]));

    let exported = bid.export(false);
    assert!(exported.line_items[0].config.is_none());
    assert!(bid.export(true).line_items[0].config.is_some());

    bid.set_line_item_contract(&id("li"), LineItemProp::Wage, Some(DependencyContract::variable("wage")))
        .unwrap();
    assert!(bid.export(false).line_items[0].config.is_some());
}

#[test]
fn full_export_loads_into_an_identical_bid() {
    let mut snap = snapshot(vec![material("a", 3.0, 2.0), priced("b", 9.0)]);
    snap.components.push(component("c", &["a", "b"], &[]));
    snap.variables.push(variable("markup_percent", VariableValue::Number(10.0)));
    let bid = load(snap);

    let json = bid.export(true).to_json_pretty().unwrap();
    let copy = load(BidSnapshot::from_json(&json).unwrap());

    assert_eq!(copy.totals(), bid.totals());
    assert_eq!(
        copy.component(&id("c")).unwrap().totals,
        bid.component(&id("c")).unwrap().totals
    );
    assert_relative_eq!(copy.totals().markup, 1.5);
}

#[test]
fn full_export_keeps_dependency_wiring() {
    let json = solar().export(true).to_json_pretty().unwrap();
    let mut copy = load(BidSnapshot::from_json(&json).unwrap());
    assert_relative_eq!(copy.line_item(&id("modules")).unwrap().values.cost, 1000.0);

    copy.select_field_row(&id("panel"), Some("p500")).unwrap();
    copy.set_field_toggle(&id("battery"), true).unwrap();
    copy.run_until_idle();
    assert_relative_eq!(copy.line_item(&id("modules")).unwrap().values.cost, 1400.0);
    assert!(copy.line_item(&id("batt")).unwrap().is_included);
    assert_relative_eq!(copy.totals().price, 1900.0);
}

#[test]
fn watts_edits_check_permission_first_and_skip_no_ops() {
    let mut snap = snapshot(vec![priced("li", 10.0)]);
    snap.bid.status.locked = true;
    let mut bid = load(snap);
    let err = bid.set_watts(-5.0).unwrap_err();
    assert!(matches!(err, BidGraphError::PermissionDenied { .. }));

    bid.set_locked(false);
    bid.run_until_idle();
    let err = bid.set_watts(-5.0).unwrap_err();
    assert!(matches!(err, BidGraphError::InvalidValue { .. }));

    bid.set_watts(6000.0).unwrap();
    bid.run_until_idle();
    assert_relative_eq!(bid.watts(), 6000.0);

    let settles = bid.settle_count();
    bid.set_watts(6000.0).unwrap();
    assert!(bid.is_idle());
    bid.run_until_idle();
    assert_eq!(bid.settle_count(), settles);
}

#[test]
fn predicted_cost_fills_undefined_inputs() {
    let mut li = material("roof", 0.0, 10.0);
    li.config = Some(LineItemConfig {
        contracts: [(LineItemProp::Base, DependencyContract::field("unit"))]
            .into_iter()
            .collect(),
        definition_id: Some("rooftop".into()),
        ..Default::default()
    });
    let mut snap = snapshot(vec![li]);
    snap.fields.push(bidgraph_engine::FieldRecord {
        id: id("unit"),
        title: "Unit".into(),
        input: None,
        selected_row: None,
        value: None,
        config: None,
    });
    snap.variables.push(variable("predictive_pricing", VariableValue::Toggle(true)));
    snap.variables.push(variable("watts", VariableValue::Number(6000.0)));
    snap.prediction_models.push(PredictionModel {
        id: "cost-per-watt".into(),
        definition_id: "rooftop".into(),
        target: PredictionTarget::Cost,
        equation: "a * 2".into(),
        a: DependencyContract::variable("watts"),
        b: None,
        r_squared: 0.9,
        bounds: PredictionBounds {
            min: 0.0,
            max: 20_000.0,
        },
    });
    let mut bid = load(snap);

    let item = bid.line_item(&id("roof")).unwrap();
    assert_relative_eq!(item.values.cost, 12_000.0);
    assert!(item.is_predicted(LineItemProp::Cost));
    assert!(bid.provenance().get(GroupProp::Price).is_predicted);

    bid.set_watts(7000.0).unwrap();
    bid.run_until_idle();
    assert_relative_eq!(bid.line_item(&id("roof")).unwrap().values.cost, 14_000.0);

    bid.set_field_value(&id("unit"), Some(2.0)).unwrap();
    bid.run_until_idle();
    let item = bid.line_item(&id("roof")).unwrap();
    assert_relative_eq!(item.values.cost, 20.0);
    assert!(!item.is_predicted(LineItemProp::Cost));
}

#[test]
fn locked_bids_refuse_edits() {
    let mut snap = snapshot(vec![priced("li", 10.0)]);
    snap.bid.status.locked = true;
    let mut bid = load(snap);
    assert!(!bid.is_assessable());

    let err = bid.set_cost(&id("li"), 20.0).unwrap_err();
    assert!(matches!(err, BidGraphError::PermissionDenied { .. }));

    bid.set_locked(false);
    bid.run_until_idle();
    assert_relative_eq!(bid.totals().price, 10.0);
    bid.set_cost(&id("li"), 20.0).unwrap();
    bid.run_until_idle();
    assert_relative_eq!(bid.totals().price, 20.0);
}

#[test]
fn custom_permission_predicate_is_consulted() {
    let mut bid = Bid::new(EngineConfig::default())
        .with_permission(Arc::new(|_: &EntityId, _: &BidStatus| true));
    bid.load(snapshot(vec![priced("li", 10.0)]), LoadOptions::default())
        .unwrap();

    let err = bid.set_variable("wage", VariableValue::Number(40.0)).unwrap_err();
    assert!(matches!(err, BidGraphError::PermissionDenied { .. }));
}

struct RejectAll;

impl BidValidator for RejectAll {
    fn validate(&self, _bid: &EntityId, _contracts: &[(EntityRef, DependencyContract)]) -> Vec<ValidationIssue> {
        vec![ValidationIssue {
            entity: EntityRef::new(EntityKind::Bid, "solar-7"),
            message: "missing assembly".into(),
        }]
    }
}

#[test]
fn validation_issues_block_assessment() {
    let mut bid = Bid::new(EngineConfig::default()).with_validator(Arc::new(RejectAll));
    bid.load(snapshot(vec![priced("li", 10.0)]), LoadOptions::default())
        .unwrap();

    assert_eq!(bid.issues().len(), 1);
    assert!(!bid.is_assessable());
    assert_relative_eq!(bid.totals().price, 0.0);
}

#[derive(Default)]
struct Recorder(Mutex<Vec<SettledEvent>>);

impl SettleNotifier for Recorder {
    fn notify(&self, event: &SettledEvent) {
        if let Ok(mut events) = self.0.lock() {
            events.push(event.clone());
        }
    }
}

#[test]
fn notifier_hears_every_settle() {
    let recorder = Arc::new(Recorder::default());
    let mut bid = Bid::new(EngineConfig::default()).with_notifier(recorder.clone());
    bid.load(snapshot(vec![priced("li", 10.0)]), LoadOptions::default())
        .unwrap();
    bid.set_cost(&id("li"), 12.0).unwrap();
    bid.run_until_idle();

    let events = recorder.0.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert_relative_eq!(events[1].totals.price, 12.0);
    assert_eq!(events[1].breaker_trips, 0);
}

#[test]
fn new_line_items_start_from_a_record() {
    let mut bid = load(snapshot(vec![]));
    let mut record = LineItemRecord::new("fresh");
    record.values.base = 2.0;
    record.values.quantity = 3.0;
    bid.add_line_item(record, None).unwrap();
    bid.run_until_idle();
    assert_relative_eq!(bid.totals().cost, 6.0);
}
