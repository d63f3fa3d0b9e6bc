//! Group membership edits and the acyclicity rules that guard them.
//!
//! Components form a strict tree of sub-components; dynamic groups form a
//! DAG and may also hold components. Every check runs before any list is
//! touched, so a rejected edit leaves the store exactly as it was.

use std::collections::HashSet;

use bidgraph_core::{EntityId, EntityKind, EntityRef, StructuralError};

use crate::store::EntityStore;

fn dangling(entity: &EntityRef) -> StructuralError {
    StructuralError::DanglingReference {
        kind: entity.kind,
        id: entity.id.clone(),
    }
}

fn wrong_kind(parent: &EntityRef, child: &EntityRef) -> StructuralError {
    StructuralError::WrongChildKind {
        parent: parent.id.clone(),
        parent_kind: parent.kind,
        child: child.id.clone(),
        child_kind: child.kind,
    }
}

fn cyclic(parent: &EntityRef, child: &EntityRef) -> StructuralError {
    StructuralError::CyclicMembership {
        parent: parent.id.clone(),
        child: child.id.clone(),
    }
}

/// Whether `target` is `from` or one of its sub-components, transitively.
pub fn component_reaches(store: &EntityStore, from: &EntityId, target: &EntityId) -> bool {
    let mut seen = HashSet::new();
    let mut stack = vec![from.clone()];
    while let Some(id) = stack.pop() {
        if &id == target {
            return true;
        }
        if !seen.insert(id.clone()) {
            continue;
        }
        if let Some(c) = store.components.get(&id) {
            stack.extend(c.sub_component_ids.iter().cloned());
        }
    }
    false
}

/// Whether `target` is `from` or nested below it through dynamic groups.
pub fn dynamic_group_reaches(store: &EntityStore, from: &EntityId, target: &EntityId) -> bool {
    let mut seen = HashSet::new();
    let mut stack = vec![from.clone()];
    while let Some(id) = stack.pop() {
        if &id == target {
            return true;
        }
        if !seen.insert(id.clone()) {
            continue;
        }
        if let Some(g) = store.dynamic_groups.get(&id) {
            stack.extend(g.dynamic_group_ids.iter().cloned());
        }
    }
    false
}

/// Validate adding `child` under `parent` without mutating anything.
pub fn check_add_child(
    store: &EntityStore,
    parent: &EntityRef,
    child: &EntityRef,
) -> Result<(), StructuralError> {
    if !parent.kind.is_group() {
        return Err(wrong_kind(parent, child));
    }
    if !store.contains(parent) {
        return Err(dangling(parent));
    }
    if !store.contains(child) {
        return Err(dangling(child));
    }
    match (parent.kind, child.kind) {
        (EntityKind::Component, EntityKind::LineItem)
        | (EntityKind::DynamicGroup, EntityKind::LineItem)
        | (EntityKind::DynamicGroup, EntityKind::Component) => Ok(()),
        (EntityKind::Component, EntityKind::Component) => {
            if component_reaches(store, &child.id, &parent.id) {
                Err(cyclic(parent, child))
            } else {
                Ok(())
            }
        }
        (EntityKind::DynamicGroup, EntityKind::DynamicGroup) => {
            if dynamic_group_reaches(store, &child.id, &parent.id) {
                Err(cyclic(parent, child))
            } else {
                Ok(())
            }
        }
        _ => Err(wrong_kind(parent, child)),
    }
}

/// Append `child` to `parent`'s ordered list. Returns `false` when it was
/// already a direct child.
pub fn add_child(
    store: &mut EntityStore,
    parent: &EntityRef,
    child: &EntityRef,
) -> Result<bool, StructuralError> {
    check_add_child(store, parent, child)?;
    let list = child_list_mut(store, parent, child.kind).ok_or_else(|| wrong_kind(parent, child))?;
    if list.contains(&child.id) {
        return Ok(false);
    }
    list.push(child.id.clone());
    Ok(true)
}

/// Remove `child` from `parent`'s direct children. Returns `false` when it
/// was not a direct child.
pub fn remove_child(
    store: &mut EntityStore,
    parent: &EntityRef,
    child: &EntityRef,
) -> Result<bool, StructuralError> {
    if !store.contains(parent) {
        return Err(dangling(parent));
    }
    let list = child_list_mut(store, parent, child.kind).ok_or_else(|| wrong_kind(parent, child))?;
    let before = list.len();
    list.retain(|id| id != &child.id);
    Ok(list.len() != before)
}

fn child_list_mut<'s>(
    store: &'s mut EntityStore,
    parent: &EntityRef,
    child_kind: EntityKind,
) -> Option<&'s mut Vec<EntityId>> {
    match (parent.kind, child_kind) {
        (EntityKind::Component, EntityKind::LineItem) => {
            store.components.get_mut(&parent.id).map(|c| &mut c.line_item_ids)
        }
        (EntityKind::Component, EntityKind::Component) => {
            store.components.get_mut(&parent.id).map(|c| &mut c.sub_component_ids)
        }
        (EntityKind::DynamicGroup, EntityKind::LineItem) => {
            store.dynamic_groups.get_mut(&parent.id).map(|g| &mut g.line_item_ids)
        }
        (EntityKind::DynamicGroup, EntityKind::Component) => {
            store.dynamic_groups.get_mut(&parent.id).map(|g| &mut g.component_ids)
        }
        (EntityKind::DynamicGroup, EntityKind::DynamicGroup) => {
            store.dynamic_groups.get_mut(&parent.id).map(|g| &mut g.dynamic_group_ids)
        }
        _ => None,
    }
}

/// Whole-store check run on load: every child id exists and no group is its
/// own descendant.
pub fn validate_structure(store: &EntityStore) -> Result<(), StructuralError> {
    for (id, component) in &store.components {
        let parent = EntityRef::new(EntityKind::Component, id.clone());
        for child in component.children().refs() {
            if !store.contains(&child) {
                return Err(dangling(&child));
            }
        }
        for sub in &component.sub_component_ids {
            if component_reaches(store, sub, id) {
                return Err(cyclic(&parent, &EntityRef::new(EntityKind::Component, sub.clone())));
            }
        }
    }
    for (id, group) in &store.dynamic_groups {
        let parent = EntityRef::new(EntityKind::DynamicGroup, id.clone());
        for child in group.children().refs() {
            if !store.contains(&child) {
                return Err(dangling(&child));
            }
        }
        for sub in &group.dynamic_group_ids {
            if dynamic_group_reaches(store, sub, id) {
                return Err(cyclic(&parent, &EntityRef::new(EntityKind::DynamicGroup, sub.clone())));
            }
        }
    }
    Ok(())
}

/// Line items below `group`, once per containment path.
pub fn descendant_line_items(store: &EntityStore, group: &EntityRef) -> Vec<EntityId> {
    let mut out = Vec::new();
    let mut path = Vec::new();
    collect_descendants(store, group, &mut path, &mut out);
    out
}

fn collect_descendants(
    store: &EntityStore,
    group: &EntityRef,
    path: &mut Vec<EntityRef>,
    out: &mut Vec<EntityId>,
) {
    if path.contains(group) {
        return;
    }
    let Some(children) = store.group_children(group) else {
        return;
    };
    path.push(group.clone());
    for child in children.refs() {
        match child.kind {
            EntityKind::LineItem => out.push(child.id),
            _ => collect_descendants(store, &child, path, out),
        }
    }
    path.pop();
}

/// Groups that list `child` directly.
pub fn parents_of(store: &EntityStore, child: &EntityRef) -> Vec<EntityRef> {
    let mut out = Vec::new();
    for (id, c) in &store.components {
        if c.children().refs().any(|r| &r == child) {
            out.push(EntityRef::new(EntityKind::Component, id.clone()));
        }
    }
    for (id, g) in &store.dynamic_groups {
        if g.children().refs().any(|r| &r == child) {
            out.push(EntityRef::new(EntityKind::DynamicGroup, id.clone()));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Component, DynamicGroup, LineItem};

    fn dg(id: &str) -> EntityRef {
        EntityRef::new(EntityKind::DynamicGroup, id)
    }

    fn comp(id: &str) -> EntityRef {
        EntityRef::new(EntityKind::Component, id)
    }

    fn li(id: &str) -> EntityRef {
        EntityRef::new(EntityKind::LineItem, id)
    }

    fn store() -> EntityStore {
        let mut store = EntityStore::new();
        store.add_line_item(LineItem::new("li", "Item")).unwrap();
        store.add_component(Component::new("root", "Root").with_sub_components(&["mid"])).unwrap();
        store.add_component(Component::new("mid", "Mid").with_line_items(&["li"])).unwrap();
        store.add_dynamic_group(DynamicGroup::new("a", "A").with_dynamic_groups(&["b"])).unwrap();
        store.add_dynamic_group(DynamicGroup::new("b", "B")).unwrap();
        store
    }

    #[test]
    fn rejects_dynamic_group_cycle_without_mutation() {
        let mut store = store();
        let before = store.clone();
        let err = add_child(&mut store, &dg("b"), &dg("a")).unwrap_err();
        assert!(matches!(err, StructuralError::CyclicMembership { .. }));
        let err = add_child(&mut store, &dg("a"), &dg("a")).unwrap_err();
        assert!(matches!(err, StructuralError::CyclicMembership { .. }));
        assert_eq!(store, before);
    }

    #[test]
    fn components_reject_ancestors() {
        let mut store = store();
        let err = add_child(&mut store, &comp("mid"), &comp("root")).unwrap_err();
        assert!(matches!(err, StructuralError::CyclicMembership { .. }));
        assert!(store.components[&EntityId::from("mid")].sub_component_ids.is_empty());
    }

    #[test]
    fn wrong_kind_and_dangling_children() {
        let mut store = store();
        assert!(matches!(
            add_child(&mut store, &comp("root"), &dg("a")),
            Err(StructuralError::WrongChildKind { .. })
        ));
        assert!(matches!(
            add_child(&mut store, &li("li"), &li("li")),
            Err(StructuralError::WrongChildKind { .. })
        ));
        assert!(matches!(
            add_child(&mut store, &dg("a"), &li("ghost")),
            Err(StructuralError::DanglingReference { .. })
        ));
    }

    #[test]
    fn add_and_remove_children() {
        let mut store = store();
        assert!(add_child(&mut store, &dg("b"), &comp("root")).unwrap());
        assert!(!add_child(&mut store, &dg("b"), &comp("root")).unwrap());
        assert!(add_child(&mut store, &dg("b"), &li("li")).unwrap());
        assert_eq!(descendant_line_items(&store, &dg("a")).len(), 2);
        assert_eq!(parents_of(&store, &li("li")).len(), 2);

        assert!(remove_child(&mut store, &dg("b"), &li("li")).unwrap());
        assert!(!remove_child(&mut store, &dg("b"), &li("li")).unwrap());
        assert_eq!(descendant_line_items(&store, &dg("a")), vec![EntityId::from("li")]);
    }

    #[test]
    fn validate_structure_finds_cycles_and_dangling_ids() {
        let mut store = store();
        assert!(validate_structure(&store).is_ok());
        store
            .dynamic_groups
            .get_mut(&EntityId::from("b"))
            .unwrap()
            .dynamic_group_ids
            .push("a".into());
        assert!(matches!(
            validate_structure(&store),
            Err(StructuralError::CyclicMembership { .. })
        ));

        let mut store = self::store();
        store
            .components
            .get_mut(&EntityId::from("mid"))
            .unwrap()
            .line_item_ids
            .push("ghost".into());
        assert!(matches!(
            validate_structure(&store),
            Err(StructuralError::DanglingReference { .. })
        ));
    }
}
