//! Pushing a direct group edit down into its line items.

use std::collections::BTreeMap;

use bidgraph_core::{BidGraphError, EntityId, EntityKind, EntityRef, Result};

use crate::entity::{GroupProp, GroupTotals, LineItemProp};
use crate::store::EntityStore;
use crate::structure::descendant_line_items;

/// Per-line-item edits that realise a new group total.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RedistributionPlan {
    pub prop: Option<LineItemProp>,
    pub edits: BTreeMap<EntityId, f64>,
    /// Excluded items that must be switched on to receive their share.
    pub include: Vec<EntityId>,
}

/// Plan how `new_total` for `prop` on `group` is spread over its descendants.
///
/// Sums scale every included descendant by `new_total / old_total`. With no
/// prior total the amount is split evenly per included path, or across all
/// paths (switching them on) when nothing is included. Percentages scale the
/// same way, except that a prior percentage of exactly zero is applied
/// verbatim to each descendant.
pub fn plan_redistribution(
    store: &EntityStore,
    group: &EntityRef,
    prop: GroupProp,
    new_total: f64,
) -> Result<RedistributionPlan> {
    let target = prop.editable_target().ok_or_else(|| {
        BidGraphError::invalid_value(prop.as_str(), "property is derived and cannot be edited on a group")
    })?;
    if !new_total.is_finite() {
        return Err(BidGraphError::invalid_value(prop.as_str(), "value must be a finite number"));
    }

    let paths = descendant_line_items(store, group);
    if paths.is_empty() {
        return Err(BidGraphError::invalid_value(
            prop.as_str(),
            format!("{} has no line items to distribute into", group),
        ));
    }
    let included: Vec<&EntityId> = paths
        .iter()
        .filter(|id| store.line_items.get(*id).is_some_and(|li| li.is_included))
        .collect();
    let value_of = |id: &EntityId| store.line_items.get(id).map(|li| li.value(target)).unwrap_or(0.0);

    let mut plan = RedistributionPlan {
        prop: Some(target),
        ..Default::default()
    };

    if prop.is_percent() {
        let old = group_totals(store, group).get(prop);
        if old == 0.0 {
            let receivers: Vec<&EntityId> = if included.is_empty() {
                plan.include = dedup(paths.iter());
                paths.iter().collect()
            } else {
                included
            };
            for id in receivers {
                plan.edits.insert(id.clone(), new_total);
            }
        } else {
            let ratio = new_total / old;
            for id in included {
                plan.edits.insert(id.clone(), value_of(id) * ratio);
            }
        }
        return Ok(plan);
    }

    let old: f64 = included.iter().map(|id| value_of(id)).sum();
    if old > 0.0 {
        let ratio = new_total / old;
        for id in included {
            plan.edits.insert(id.clone(), value_of(id) * ratio);
        }
    } else if !included.is_empty() {
        let share = new_total / included.len() as f64;
        for id in included {
            plan.edits.insert(id.clone(), share);
        }
    } else {
        let share = new_total / paths.len() as f64;
        plan.include = dedup(paths.iter());
        for id in &paths {
            plan.edits.insert(id.clone(), share);
        }
    }
    Ok(plan)
}

fn group_totals(store: &EntityStore, group: &EntityRef) -> GroupTotals {
    match group.kind {
        EntityKind::Component => store.components.get(&group.id).map(|c| c.totals),
        EntityKind::DynamicGroup => store.dynamic_groups.get(&group.id).map(|g| g.totals),
        _ => None,
    }
    .unwrap_or_default()
}

fn dedup<'a>(ids: impl Iterator<Item = &'a EntityId>) -> Vec<EntityId> {
    let mut out: Vec<EntityId> = Vec::new();
    for id in ids {
        if !out.contains(id) {
            out.push(id.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Component, LineItem};

    fn comp() -> EntityRef {
        EntityRef::new(EntityKind::Component, "c")
    }

    fn store(costs: &[(&str, f64, bool)]) -> EntityStore {
        let mut store = EntityStore::new();
        let ids: Vec<&str> = costs.iter().map(|(id, _, _)| *id).collect();
        let mut component = Component::new("c", "C").with_line_items(&ids);
        for (id, cost, included) in costs {
            let mut li = LineItem::new(*id, *id).with_value(LineItemProp::Cost, *cost);
            li.is_included = *included;
            component.totals.cost += if *included { *cost } else { 0.0 };
            store.add_line_item(li).unwrap();
        }
        store.add_component(component).unwrap();
        store
    }

    #[test]
    fn scales_proportionally() {
        let store = store(&[("a", 30.0, true), ("b", 10.0, true), ("x", 99.0, false)]);
        let plan = plan_redistribution(&store, &comp(), GroupProp::Cost, 80.0).unwrap();
        assert_eq!(plan.prop, Some(LineItemProp::Cost));
        assert_eq!(plan.edits[&EntityId::from("a")], 60.0);
        assert_eq!(plan.edits[&EntityId::from("b")], 20.0);
        assert!(!plan.edits.contains_key(&EntityId::from("x")));
        assert!(plan.include.is_empty());
    }

    #[test]
    fn splits_evenly_without_prior_total() {
        let store = store(&[("a", 0.0, true), ("b", 0.0, true)]);
        let plan = plan_redistribution(&store, &comp(), GroupProp::Cost, 50.0).unwrap();
        assert_eq!(plan.edits.values().copied().collect::<Vec<_>>(), vec![25.0, 25.0]);
    }

    #[test]
    fn includes_everything_when_nothing_is_included() {
        let store = store(&[("a", 5.0, false), ("b", 7.0, false)]);
        let plan = plan_redistribution(&store, &comp(), GroupProp::Price, 10.0).unwrap();
        assert_eq!(plan.include.len(), 2);
        assert_eq!(plan.edits[&EntityId::from("a")], 5.0);
    }

    #[test]
    fn zero_percent_is_applied_absolutely() {
        let store = store(&[("a", 0.0, true), ("b", 0.0, true)]);
        let plan = plan_redistribution(&store, &comp(), GroupProp::MarkupPercent, 100.0).unwrap();
        assert_eq!(plan.prop, Some(LineItemProp::MarkupPercent));
        assert!(plan.edits.values().all(|v| *v == 100.0));
        assert_eq!(plan.edits.len(), 2);
    }

    #[test]
    fn derived_props_and_empty_groups_are_rejected() {
        let s = store(&[("a", 1.0, true)]);
        assert!(plan_redistribution(&s, &comp(), GroupProp::LaborCost, 5.0).is_err());
        let empty = store(&[]);
        assert!(plan_redistribution(&empty, &comp(), GroupProp::Cost, 5.0).is_err());
    }
}
