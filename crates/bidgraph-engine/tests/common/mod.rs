#![allow(dead_code)]

use bidgraph_core::{EngineConfig, EntityId};
use bidgraph_engine::{
    Bid, BidSnapshot, ComponentRecord, DynamicGroupRecord, LineItemProp, LineItemRecord,
    VariableRecord, VariableValue,
};

pub fn id(s: &str) -> EntityId {
    EntityId::from(s)
}

fn ids(list: &[&str]) -> Vec<EntityId> {
    list.iter().map(|s| id(s)).collect()
}

/// Line item with a user-entered (pinned) cost.
pub fn priced(item: &str, cost: f64) -> LineItemRecord {
    let mut record = LineItemRecord::new(item);
    record.title = item.to_string();
    record.values.cost = cost;
    record.overrides.pin(LineItemProp::Cost);
    record
}

/// Line item costed from `base × quantity`.
pub fn material(item: &str, base: f64, quantity: f64) -> LineItemRecord {
    let mut record = LineItemRecord::new(item);
    record.title = item.to_string();
    record.values.base = base;
    record.values.quantity = quantity;
    record
}

pub fn component(group: &str, line_items: &[&str], sub_components: &[&str]) -> ComponentRecord {
    ComponentRecord {
        id: id(group),
        title: group.to_string(),
        line_items: ids(line_items),
        sub_components: ids(sub_components),
        totals: None,
    }
}

pub fn dynamic_group(
    group: &str,
    line_items: &[&str],
    components: &[&str],
    dynamic_groups: &[&str],
) -> DynamicGroupRecord {
    DynamicGroupRecord {
        id: id(group),
        title: group.to_string(),
        line_items: ids(line_items),
        components: ids(components),
        dynamic_groups: ids(dynamic_groups),
        totals: None,
    }
}

pub fn variable(name: &str, value: VariableValue) -> VariableRecord {
    VariableRecord {
        id: id(name),
        title: name.to_string(),
        value,
    }
}

pub fn snapshot(line_items: Vec<LineItemRecord>) -> BidSnapshot {
    let mut snap = BidSnapshot::new("bid-1", "Test bid");
    snap.line_items = line_items;
    snap
}

pub fn load(snap: BidSnapshot) -> Bid {
    Bid::from_snapshot(snap, EngineConfig::default()).unwrap()
}
