use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bidgraph_core::{nearly_equal_at, safe_ratio, EntityId, EntityKind, EntityRef};
use serde::{Deserialize, Serialize};

use super::{normalize_name, LineItemProp};

/// Properties a group (or the bid) exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupProp {
    Cost,
    Price,
    Markup,
    Tax,
    TaxableCost,
    LaborHours,
    LaborCost,
    NonLaborCost,
    MarkupPercent,
    TaxPercent,
}

impl GroupProp {
    pub const SUMMED: [GroupProp; 8] = [
        GroupProp::Cost,
        GroupProp::Price,
        GroupProp::Markup,
        GroupProp::Tax,
        GroupProp::TaxableCost,
        GroupProp::LaborHours,
        GroupProp::LaborCost,
        GroupProp::NonLaborCost,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GroupProp::Cost => "cost",
            GroupProp::Price => "price",
            GroupProp::Markup => "markup",
            GroupProp::Tax => "tax",
            GroupProp::TaxableCost => "taxable_cost",
            GroupProp::LaborHours => "labor_hours",
            GroupProp::LaborCost => "labor_cost",
            GroupProp::NonLaborCost => "non_labor_cost",
            GroupProp::MarkupPercent => "markup_percent",
            GroupProp::TaxPercent => "tax_percent",
        }
    }

    pub fn is_percent(&self) -> bool {
        matches!(self, GroupProp::MarkupPercent | GroupProp::TaxPercent)
    }

    /// The line item property a direct group edit is redistributed into.
    pub fn editable_target(&self) -> Option<LineItemProp> {
        match self {
            GroupProp::Cost => Some(LineItemProp::Cost),
            GroupProp::Price => Some(LineItemProp::Price),
            GroupProp::Markup => Some(LineItemProp::Markup),
            GroupProp::Tax => Some(LineItemProp::Tax),
            GroupProp::LaborHours => Some(LineItemProp::LaborHours),
            GroupProp::MarkupPercent => Some(LineItemProp::MarkupPercent),
            GroupProp::TaxPercent => Some(LineItemProp::TaxPercent),
            GroupProp::TaxableCost | GroupProp::LaborCost | GroupProp::NonLaborCost => None,
        }
    }

    /// Summed properties a derived percentage is built from.
    fn sources(&self) -> &'static [GroupProp] {
        match self {
            GroupProp::MarkupPercent => &[GroupProp::Markup, GroupProp::Cost],
            GroupProp::TaxPercent => &[GroupProp::Tax, GroupProp::TaxableCost],
            _ => &[],
        }
    }
}

impl fmt::Display for GroupProp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupProp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_name(s).as_str() {
            "cost" => Ok(GroupProp::Cost),
            "price" => Ok(GroupProp::Price),
            "markup" => Ok(GroupProp::Markup),
            "tax" => Ok(GroupProp::Tax),
            "taxablecost" => Ok(GroupProp::TaxableCost),
            "laborhours" => Ok(GroupProp::LaborHours),
            "laborcost" => Ok(GroupProp::LaborCost),
            "nonlaborcost" | "materialcost" => Ok(GroupProp::NonLaborCost),
            "markuppercent" => Ok(GroupProp::MarkupPercent),
            "taxpercent" => Ok(GroupProp::TaxPercent),
            _ => Err(format!("unknown group property: {}", s)),
        }
    }
}

/// Where a value came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub is_predicted: bool,
    pub has_null_dependency: bool,
    pub is_overridden: bool,
}

impl Provenance {
    pub fn merge(&mut self, other: Provenance) {
        self.is_predicted |= other.is_predicted;
        self.has_null_dependency |= other.has_null_dependency;
        self.is_overridden |= other.is_overridden;
    }
}

/// Per-property provenance OR-reduced across contributing descendants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupProvenance(BTreeMap<GroupProp, Provenance>);

impl GroupProvenance {
    pub fn get(&self, prop: GroupProp) -> Provenance {
        let sources = prop.sources();
        if sources.is_empty() {
            return self.0.get(&prop).copied().unwrap_or_default();
        }
        let mut out = Provenance::default();
        for source in sources {
            out.merge(self.get(*source));
        }
        out
    }

    pub fn merge_prop(&mut self, prop: GroupProp, provenance: Provenance) {
        self.0.entry(prop).or_default().merge(provenance);
    }

    pub fn merge(&mut self, other: &GroupProvenance) {
        for (prop, p) in &other.0 {
            self.merge_prop(*prop, *p);
        }
    }

    pub fn any_null_dependency(&self) -> bool {
        self.0.values().any(|p| p.has_null_dependency)
    }
}

/// Aggregated money and hours for a group or the whole bid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupTotals {
    pub cost: f64,
    pub price: f64,
    pub markup: f64,
    pub tax: f64,
    pub taxable_cost: f64,
    pub labor_hours: f64,
    pub labor_cost: f64,
    pub non_labor_cost: f64,
    /// Included line items counted once per containment path.
    pub included_line_item_count: usize,
}

impl GroupTotals {
    pub fn get(&self, prop: GroupProp) -> f64 {
        match prop {
            GroupProp::Cost => self.cost,
            GroupProp::Price => self.price,
            GroupProp::Markup => self.markup,
            GroupProp::Tax => self.tax,
            GroupProp::TaxableCost => self.taxable_cost,
            GroupProp::LaborHours => self.labor_hours,
            GroupProp::LaborCost => self.labor_cost,
            GroupProp::NonLaborCost => self.non_labor_cost,
            GroupProp::MarkupPercent => self.markup_percent(),
            GroupProp::TaxPercent => self.tax_percent(),
        }
    }

    pub fn markup_percent(&self) -> f64 {
        safe_ratio(self.markup, self.cost) * 100.0
    }

    pub fn tax_percent(&self) -> f64 {
        safe_ratio(self.tax, self.taxable_cost) * 100.0
    }

    pub fn add(&mut self, other: &GroupTotals) {
        self.cost += other.cost;
        self.price += other.price;
        self.markup += other.markup;
        self.tax += other.tax;
        self.taxable_cost += other.taxable_cost;
        self.labor_hours += other.labor_hours;
        self.labor_cost += other.labor_cost;
        self.non_labor_cost += other.non_labor_cost;
        self.included_line_item_count += other.included_line_item_count;
    }

    /// True when any summed value moved at `places` rounding or the count changed.
    pub fn differs(&self, other: &GroupTotals, places: u32) -> bool {
        self.included_line_item_count != other.included_line_item_count
            || GroupProp::SUMMED
                .iter()
                .any(|p| !nearly_equal_at(self.get(*p), other.get(*p), places))
    }
}

/// Borrowed view of a group's ordered children.
#[derive(Debug, Clone, Copy)]
pub struct GroupChildren<'a> {
    pub line_items: &'a [EntityId],
    pub components: &'a [EntityId],
    pub dynamic_groups: &'a [EntityId],
}

impl<'a> GroupChildren<'a> {
    pub fn refs(&self) -> impl Iterator<Item = EntityRef> + 'a {
        let line_items = self
            .line_items
            .iter()
            .map(|id| EntityRef::new(EntityKind::LineItem, id.clone()));
        let components = self
            .components
            .iter()
            .map(|id| EntityRef::new(EntityKind::Component, id.clone()));
        let groups = self
            .dynamic_groups
            .iter()
            .map(|id| EntityRef::new(EntityKind::DynamicGroup, id.clone()));
        line_items.chain(components).chain(groups)
    }

    pub fn is_empty(&self) -> bool {
        self.line_items.is_empty() && self.components.is_empty() && self.dynamic_groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_provenance_reads_its_sources() {
        let mut prov = GroupProvenance::default();
        prov.merge_prop(
            GroupProp::Cost,
            Provenance {
                is_predicted: true,
                ..Default::default()
            },
        );
        assert!(prov.get(GroupProp::MarkupPercent).is_predicted);
        assert!(!prov.get(GroupProp::TaxPercent).is_predicted);
        assert!(!prov.any_null_dependency());
    }

    #[test]
    fn totals_derive_percentages() {
        let totals = GroupTotals {
            cost: 200.0,
            markup: 30.0,
            tax: 10.0,
            taxable_cost: 100.0,
            ..Default::default()
        };
        assert_eq!(totals.markup_percent(), 15.0);
        assert_eq!(totals.tax_percent(), 10.0);
        assert_eq!(GroupTotals::default().markup_percent(), 0.0);
    }

    #[test]
    fn prop_names_accept_camel_case() {
        assert_eq!("markupPercent".parse::<GroupProp>().unwrap(), GroupProp::MarkupPercent);
        assert_eq!("labor_hours".parse::<GroupProp>().unwrap(), GroupProp::LaborHours);
        assert!("watts".parse::<GroupProp>().is_err());
    }
}
