use crate::entity::{GroupChildren, GroupProp, GroupProvenance, GroupTotals};
use crate::store::EntityStore;

/// Aggregated totals and provenance of a group or the bid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupAssessment {
    pub totals: GroupTotals,
    pub provenance: GroupProvenance,
}

impl GroupAssessment {
    fn add_line_item(&mut self, item: &crate::entity::LineItem) {
        self.totals.add(&item.totals());
        for prop in GroupProp::SUMMED {
            self.provenance.merge_prop(prop, item.provenance(prop));
        }
    }

    fn add_group(&mut self, totals: &GroupTotals, provenance: &GroupProvenance) {
        self.totals.add(totals);
        self.provenance.merge(provenance);
    }
}

/// Sum included direct line items plus each child group's stored totals.
///
/// Child groups carry their own per-path counts, so a line item reachable
/// along two paths is counted (and summed) twice. Missing ids contribute
/// nothing.
pub fn aggregate_group(children: GroupChildren<'_>, store: &EntityStore) -> GroupAssessment {
    let mut out = GroupAssessment::default();
    for id in children.line_items {
        if let Some(item) = store.line_items.get(id).filter(|li| li.is_included) {
            out.add_line_item(item);
        }
    }
    for id in children.components {
        if let Some(c) = store.components.get(id) {
            out.add_group(&c.totals, &c.provenance);
        }
    }
    for id in children.dynamic_groups {
        if let Some(g) = store.dynamic_groups.get(id) {
            out.add_group(&g.totals, &g.provenance);
        }
    }
    out
}

/// Bid totals: every included line item exactly once.
pub fn aggregate_bid(store: &EntityStore) -> GroupAssessment {
    let mut out = GroupAssessment::default();
    for item in store.line_items.values().filter(|li| li.is_included) {
        out.add_line_item(item);
    }
    out
}

pub fn apply_group(
    totals: &mut GroupTotals,
    provenance: &mut GroupProvenance,
    assessment: GroupAssessment,
    places: u32,
) -> bool {
    let changed = totals.differs(&assessment.totals, places) || *provenance != assessment.provenance;
    *totals = assessment.totals;
    *provenance = assessment.provenance;
    changed
}
