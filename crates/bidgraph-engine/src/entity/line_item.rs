use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use bidgraph_core::{nearly_equal_at, BidGraphError, DependencyContract, EntityId, EntityKind, Result};
use serde::{Deserialize, Serialize};

use super::{normalize_name, Entity, EntityHeader, Formula, GroupProp, GroupTotals, Provenance};

/// Every overridable line item property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineItemProp {
    Base,
    Wage,
    Burden,
    Quantity,
    PerQuantity,
    #[serde(alias = "x")]
    Scalar,
    Multiplier,
    Escalator,
    Ohp,
    Cost,
    Tax,
    TaxPercent,
    Markup,
    MarkupPercent,
    Price,
    LaborHours,
    IsIncluded,
}

impl LineItemProp {
    /// Inputs that may be bound to a dependency contract.
    pub const INPUTS: [LineItemProp; 10] = [
        LineItemProp::Base,
        LineItemProp::Wage,
        LineItemProp::Burden,
        LineItemProp::PerQuantity,
        LineItemProp::Multiplier,
        LineItemProp::Escalator,
        LineItemProp::Ohp,
        LineItemProp::TaxPercent,
        LineItemProp::MarkupPercent,
        LineItemProp::Scalar,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LineItemProp::Base => "base",
            LineItemProp::Wage => "wage",
            LineItemProp::Burden => "burden",
            LineItemProp::Quantity => "quantity",
            LineItemProp::PerQuantity => "per_quantity",
            LineItemProp::Scalar => "scalar",
            LineItemProp::Multiplier => "multiplier",
            LineItemProp::Escalator => "escalator",
            LineItemProp::Ohp => "ohp",
            LineItemProp::Cost => "cost",
            LineItemProp::Tax => "tax",
            LineItemProp::TaxPercent => "tax_percent",
            LineItemProp::Markup => "markup",
            LineItemProp::MarkupPercent => "markup_percent",
            LineItemProp::Price => "price",
            LineItemProp::LaborHours => "labor_hours",
            LineItemProp::IsIncluded => "is_included",
        }
    }

    /// Plain inputs: editing one invalidates cost and price.
    pub fn is_input(&self) -> bool {
        matches!(
            self,
            LineItemProp::Base
                | LineItemProp::Wage
                | LineItemProp::Burden
                | LineItemProp::Quantity
                | LineItemProp::PerQuantity
                | LineItemProp::Scalar
                | LineItemProp::Multiplier
                | LineItemProp::Escalator
                | LineItemProp::Ohp
        )
    }

    /// Bid variable consulted when the line item declares no contract.
    pub fn default_variable(&self) -> Option<&'static str> {
        match self {
            LineItemProp::Wage => Some("wage"),
            LineItemProp::Burden => Some("burden"),
            LineItemProp::Escalator => Some("escalator"),
            LineItemProp::TaxPercent => Some("tax_percent"),
            LineItemProp::MarkupPercent => Some("markup_percent"),
            _ => None,
        }
    }

    fn allows_negative(&self) -> bool {
        !matches!(
            self,
            LineItemProp::Wage | LineItemProp::Burden | LineItemProp::Escalator | LineItemProp::LaborHours
        )
    }
}

impl fmt::Display for LineItemProp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LineItemProp {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let prop = match normalize_name(s).as_str() {
            "base" => LineItemProp::Base,
            "wage" => LineItemProp::Wage,
            "burden" => LineItemProp::Burden,
            "quantity" => LineItemProp::Quantity,
            "perquantity" => LineItemProp::PerQuantity,
            "scalar" | "x" => LineItemProp::Scalar,
            "multiplier" => LineItemProp::Multiplier,
            "escalator" => LineItemProp::Escalator,
            "ohp" => LineItemProp::Ohp,
            "cost" => LineItemProp::Cost,
            "tax" => LineItemProp::Tax,
            "taxpercent" => LineItemProp::TaxPercent,
            "markup" => LineItemProp::Markup,
            "markuppercent" => LineItemProp::MarkupPercent,
            "price" => LineItemProp::Price,
            "laborhours" => LineItemProp::LaborHours,
            "isincluded" => LineItemProp::IsIncluded,
            _ => return Err(format!("unknown line item property: {}", s)),
        };
        Ok(prop)
    }
}

pub type PropSet = BTreeSet<LineItemProp>;

/// Per-property override switches. A missing entry means "derived".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Overrides(BTreeMap<LineItemProp, bool>);

impl Overrides {
    pub fn is(&self, prop: LineItemProp) -> bool {
        self.0.get(&prop).copied().unwrap_or(false)
    }

    pub fn pin(&mut self, prop: LineItemProp) {
        self.0.insert(prop, true);
    }

    pub fn release(&mut self, prop: LineItemProp) {
        self.0.remove(&prop);
    }

    pub fn pinned(&self) -> impl Iterator<Item = LineItemProp> + '_ {
        self.0.iter().filter(|(_, on)| **on).map(|(p, _)| *p)
    }

    pub fn is_empty(&self) -> bool {
        self.pinned().next().is_none()
    }
}

/// Numeric state of a line item. Labor/material split and taxable base are
/// exposed read-only and recomputed every pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineItemValues {
    pub base: f64,
    pub wage: f64,
    pub burden: f64,
    pub quantity: f64,
    pub per_quantity: f64,
    pub scalar: f64,
    pub multiplier: f64,
    pub escalator: f64,
    pub ohp: f64,
    pub cost: f64,
    pub tax: f64,
    pub tax_percent: f64,
    pub markup: f64,
    pub markup_percent: f64,
    pub price: f64,
    pub labor_hours: f64,
    pub labor_cost: f64,
    pub non_labor_cost: f64,
    pub taxable_cost: f64,
}

impl Default for LineItemValues {
    fn default() -> Self {
        Self {
            base: 0.0,
            wage: 0.0,
            burden: 0.0,
            quantity: 0.0,
            per_quantity: 0.0,
            scalar: 1.0,
            multiplier: 1.0,
            escalator: 1.0,
            ohp: 0.0,
            cost: 0.0,
            tax: 0.0,
            tax_percent: 0.0,
            markup: 0.0,
            markup_percent: 0.0,
            price: 0.0,
            labor_hours: 0.0,
            labor_cost: 0.0,
            non_labor_cost: 0.0,
            taxable_cost: 0.0,
        }
    }
}

impl LineItemValues {
    /// `None` for `is_included`, which is not numeric.
    pub fn get(&self, prop: LineItemProp) -> Option<f64> {
        let v = match prop {
            LineItemProp::Base => self.base,
            LineItemProp::Wage => self.wage,
            LineItemProp::Burden => self.burden,
            LineItemProp::Quantity => self.quantity,
            LineItemProp::PerQuantity => self.per_quantity,
            LineItemProp::Scalar => self.scalar,
            LineItemProp::Multiplier => self.multiplier,
            LineItemProp::Escalator => self.escalator,
            LineItemProp::Ohp => self.ohp,
            LineItemProp::Cost => self.cost,
            LineItemProp::Tax => self.tax,
            LineItemProp::TaxPercent => self.tax_percent,
            LineItemProp::Markup => self.markup,
            LineItemProp::MarkupPercent => self.markup_percent,
            LineItemProp::Price => self.price,
            LineItemProp::LaborHours => self.labor_hours,
            LineItemProp::IsIncluded => return None,
        };
        Some(v)
    }

    pub fn set(&mut self, prop: LineItemProp, value: f64) {
        let slot = match prop {
            LineItemProp::Base => &mut self.base,
            LineItemProp::Wage => &mut self.wage,
            LineItemProp::Burden => &mut self.burden,
            LineItemProp::Quantity => &mut self.quantity,
            LineItemProp::PerQuantity => &mut self.per_quantity,
            LineItemProp::Scalar => &mut self.scalar,
            LineItemProp::Multiplier => &mut self.multiplier,
            LineItemProp::Escalator => &mut self.escalator,
            LineItemProp::Ohp => &mut self.ohp,
            LineItemProp::Cost => &mut self.cost,
            LineItemProp::Tax => &mut self.tax,
            LineItemProp::TaxPercent => &mut self.tax_percent,
            LineItemProp::Markup => &mut self.markup,
            LineItemProp::MarkupPercent => &mut self.markup_percent,
            LineItemProp::Price => &mut self.price,
            LineItemProp::LaborHours => &mut self.labor_hours,
            LineItemProp::IsIncluded => return,
        };
        *slot = value;
    }

    /// quantity × per_quantity, the labor-hours base before the multiplier.
    pub fn subtotal(&self) -> f64 {
        self.quantity * self.per_quantity
    }

    pub fn material_cost(&self) -> f64 {
        self.quantity * self.base
    }

    /// Read-only exposures resolvable through contracts.
    pub fn derived(&self, name: &str) -> Option<f64> {
        match normalize_name(name).as_str() {
            "laborcost" => Some(self.labor_cost),
            "nonlaborcost" | "materialcost" => Some(self.non_labor_cost),
            "taxablecost" => Some(self.taxable_cost),
            "subtotal" => Some(self.subtotal()),
            _ => None,
        }
    }

    pub fn differs(&self, other: &LineItemValues, places: u32) -> bool {
        let pairs = [
            (self.base, other.base),
            (self.wage, other.wage),
            (self.burden, other.burden),
            (self.quantity, other.quantity),
            (self.per_quantity, other.per_quantity),
            (self.scalar, other.scalar),
            (self.multiplier, other.multiplier),
            (self.escalator, other.escalator),
            (self.ohp, other.ohp),
            (self.cost, other.cost),
            (self.tax, other.tax),
            (self.tax_percent, other.tax_percent),
            (self.markup, other.markup),
            (self.markup_percent, other.markup_percent),
            (self.price, other.price),
            (self.labor_hours, other.labor_hours),
            (self.labor_cost, other.labor_cost),
            (self.non_labor_cost, other.non_labor_cost),
            (self.taxable_cost, other.taxable_cost),
        ];
        pairs.iter().any(|(a, b)| !nearly_equal_at(*a, *b, places))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InclusionPolicy {
    #[default]
    All,
    Any,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InclusionRule {
    Always,
    /// Passes when the referenced value is non-zero (or zero when negated).
    Toggle {
        dependency: DependencyContract,
        #[serde(default)]
        negate: bool,
    },
    /// Numeric comparison over `a` and an optional `b`, e.g. `a > 1000`.
    Compare {
        expression: String,
        a: DependencyContract,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        b: Option<DependencyContract>,
    },
    /// Passes when the list field's selected row is one of `options`.
    OneOf {
        field_id: EntityId,
        options: Vec<String>,
    },
}

impl InclusionRule {
    pub fn contracts(&self) -> Vec<DependencyContract> {
        match self {
            InclusionRule::Always => Vec::new(),
            InclusionRule::Toggle { dependency, .. } => vec![dependency.clone()],
            InclusionRule::Compare { a, b, .. } => std::iter::once(a.clone()).chain(b.clone()).collect(),
            InclusionRule::OneOf { field_id, .. } => vec![DependencyContract::field(field_id.clone())],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InclusionConfig {
    #[serde(default)]
    pub policy: InclusionPolicy,
    #[serde(default)]
    pub rules: Vec<InclusionRule>,
}

/// Wiring of a line item into the rest of the bid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineItemConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Formula>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scalar: Option<Formula>,
    /// Input property -> where it reads its value from.
    pub contracts: BTreeMap<LineItemProp, DependencyContract>,
    pub inclusion: InclusionConfig,
    /// Assembly definition whose prediction models apply to this item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition_id: Option<String>,
    /// Share of a predicted cost attributed to this item, 0..=1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction_weight: Option<f64>,
    pub tags: Vec<String>,
}

impl LineItemConfig {
    pub fn prediction_weight(&self) -> f64 {
        self.prediction_weight.map(|w| w.clamp(0.0, 1.0)).unwrap_or(1.0)
    }
}

/// Leaf cost item.
#[derive(Debug, Clone, PartialEq)]
pub struct LineItem {
    pub header: EntityHeader,
    pub values: LineItemValues,
    pub is_included: bool,
    pub overrides: Overrides,
    /// Properties whose derivation touched an undefined input this pass.
    pub undefined: PropSet,
    /// Properties whose value came from the prediction service.
    pub predicted: PropSet,
    pub tags: BTreeSet<String>,
    pub config: LineItemConfig,
    pub(crate) loaded_config: LineItemConfig,
}

impl LineItem {
    pub fn new(id: impl Into<EntityId>, title: impl Into<String>) -> Self {
        Self {
            header: EntityHeader::new(EntityKind::LineItem, id, title),
            values: LineItemValues::default(),
            is_included: true,
            overrides: Overrides::default(),
            undefined: PropSet::new(),
            predicted: PropSet::new(),
            tags: BTreeSet::new(),
            config: LineItemConfig::default(),
            loaded_config: LineItemConfig::default(),
        }
    }

    pub fn with_value(mut self, prop: LineItemProp, value: f64) -> Self {
        self.values.set(prop, value);
        self
    }

    pub fn with_contract(mut self, prop: LineItemProp, contract: DependencyContract) -> Self {
        self.config.contracts.insert(prop, contract);
        self.loaded_config = self.config.clone();
        self
    }

    pub fn with_quantity(mut self, formula: Formula) -> Self {
        self.config.quantity = Some(formula);
        self.loaded_config = self.config.clone();
        self
    }

    pub fn with_config(mut self, config: LineItemConfig) -> Self {
        self.loaded_config = config.clone();
        self.config = config;
        self
    }

    pub fn value(&self, prop: LineItemProp) -> f64 {
        match prop {
            LineItemProp::IsIncluded => {
                if self.is_included {
                    1.0
                } else {
                    0.0
                }
            }
            other => self.values.get(other).unwrap_or(0.0),
        }
    }

    pub fn is_overridden(&self, prop: LineItemProp) -> bool {
        self.overrides.is(prop)
    }

    pub fn has_null_dependency(&self, prop: LineItemProp) -> bool {
        self.undefined.contains(&prop)
    }

    pub fn is_predicted(&self, prop: LineItemProp) -> bool {
        self.predicted.contains(&prop)
    }

    pub fn config_changed(&self) -> bool {
        self.config != self.loaded_config
    }

    /// This item's contribution to a group: its own values, counted once.
    pub fn totals(&self) -> GroupTotals {
        GroupTotals {
            cost: self.values.cost,
            price: self.values.price,
            markup: self.values.markup,
            tax: self.values.tax,
            taxable_cost: self.values.taxable_cost,
            labor_hours: self.values.labor_hours,
            labor_cost: self.values.labor_cost,
            non_labor_cost: self.values.non_labor_cost,
            included_line_item_count: 1,
        }
    }

    pub fn provenance(&self, prop: GroupProp) -> Provenance {
        let sources: &[LineItemProp] = match prop {
            GroupProp::Cost | GroupProp::TaxableCost | GroupProp::NonLaborCost => &[LineItemProp::Cost],
            GroupProp::LaborCost => &[LineItemProp::Cost, LineItemProp::LaborHours],
            GroupProp::Price => &[LineItemProp::Price],
            GroupProp::Markup => &[LineItemProp::Markup],
            GroupProp::Tax => &[LineItemProp::Tax],
            GroupProp::LaborHours => &[LineItemProp::LaborHours],
            GroupProp::MarkupPercent => &[LineItemProp::MarkupPercent],
            GroupProp::TaxPercent => &[LineItemProp::TaxPercent],
        };
        let mut out = Provenance::default();
        for p in sources {
            out.merge(Provenance {
                is_predicted: self.is_predicted(*p),
                has_null_dependency: self.has_null_dependency(*p),
                is_overridden: self.is_overridden(*p),
            });
        }
        out
    }

    /// Write a user value and flip overrides so dependent values re-derive.
    ///
    /// Permission checks happen in the bid; this only validates and records.
    pub fn apply_edit(&mut self, prop: LineItemProp, value: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(BidGraphError::invalid_value(prop.as_str(), "value must be a finite number"));
        }
        if value < 0.0 && !prop.allows_negative() {
            return Err(BidGraphError::invalid_value(prop.as_str(), "value must not be negative"));
        }

        match prop {
            LineItemProp::IsIncluded => {
                self.set_included(value != 0.0);
                return Ok(());
            }
            LineItemProp::LaborHours => {
                let subtotal = self.values.subtotal();
                self.values.labor_hours = value;
                self.overrides.release(LineItemProp::Cost);
                if subtotal > 0.0 {
                    self.values.multiplier = value / subtotal;
                    self.overrides.pin(LineItemProp::Multiplier);
                    self.overrides.release(LineItemProp::LaborHours);
                } else {
                    self.values.multiplier = 1.0;
                    self.overrides.pin(LineItemProp::LaborHours);
                }
            }
            LineItemProp::Cost | LineItemProp::Tax | LineItemProp::Markup => {
                self.values.set(prop, value);
                self.overrides.pin(prop);
                self.overrides.release(LineItemProp::Price);
            }
            LineItemProp::TaxPercent => {
                self.values.tax_percent = value;
                self.overrides.pin(prop);
                self.overrides.release(LineItemProp::Tax);
                self.overrides.release(LineItemProp::Price);
            }
            LineItemProp::MarkupPercent => {
                self.values.markup_percent = value;
                self.overrides.pin(prop);
                self.overrides.release(LineItemProp::Markup);
                self.overrides.release(LineItemProp::Price);
            }
            LineItemProp::Price => {
                self.values.price = value;
                self.overrides.pin(prop);
            }
            input => {
                self.values.set(input, value);
                self.overrides.pin(input);
                self.overrides.release(LineItemProp::Cost);
                self.overrides.release(LineItemProp::Price);
                if matches!(
                    input,
                    LineItemProp::Quantity
                        | LineItemProp::PerQuantity
                        | LineItemProp::Multiplier
                        | LineItemProp::Scalar
                ) {
                    self.overrides.release(LineItemProp::LaborHours);
                }
            }
        }
        self.mark_dirty();
        Ok(())
    }

    pub fn set_included(&mut self, included: bool) {
        self.is_included = included;
        self.overrides.pin(LineItemProp::IsIncluded);
        self.mark_dirty();
    }

    /// Returns whether an override was actually released.
    pub fn clear_override(&mut self, prop: LineItemProp) -> bool {
        let was = self.overrides.is(prop);
        self.overrides.release(prop);
        if was {
            self.mark_dirty();
        }
        was
    }
}

impl Entity for LineItem {
    fn header(&self) -> &EntityHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut EntityHeader {
        &mut self.header
    }

    fn dependencies(&self) -> Vec<DependencyContract> {
        let mut deps: Vec<DependencyContract> = self.config.contracts.values().cloned().collect();
        for formula in [&self.config.quantity, &self.config.scalar].into_iter().flatten() {
            deps.extend(formula.contracts().cloned());
        }
        for rule in &self.config.inclusion.rules {
            deps.extend(rule.contracts());
        }
        deps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> LineItem {
        LineItem::new("li", "Racking")
            .with_value(LineItemProp::Quantity, 10.0)
            .with_value(LineItemProp::PerQuantity, 2.0)
    }

    #[test]
    fn editing_cost_releases_price() {
        let mut li = item();
        li.overrides.pin(LineItemProp::Price);
        li.apply_edit(LineItemProp::Cost, 50.0).unwrap();
        assert!(li.is_overridden(LineItemProp::Cost));
        assert!(!li.is_overridden(LineItemProp::Price));
        assert!(li.is_dirty());
    }

    #[test]
    fn labor_hours_edit_rescales_multiplier() {
        let mut li = item();
        li.overrides.pin(LineItemProp::Cost);
        li.apply_edit(LineItemProp::LaborHours, 30.0).unwrap();
        assert_eq!(li.values.multiplier, 1.5);
        assert!(!li.is_overridden(LineItemProp::LaborHours));
        assert!(!li.is_overridden(LineItemProp::Cost));
    }

    #[test]
    fn labor_hours_edit_without_subtotal_stays_pinned() {
        let mut li = LineItem::new("li", "Permit");
        li.values.multiplier = 3.0;
        li.apply_edit(LineItemProp::LaborHours, 4.0).unwrap();
        assert_eq!(li.values.multiplier, 1.0);
        assert_eq!(li.values.labor_hours, 4.0);
        assert!(li.is_overridden(LineItemProp::LaborHours));
    }

    #[test]
    fn percent_edits_release_their_amount() {
        let mut li = item();
        li.overrides.pin(LineItemProp::Markup);
        li.overrides.pin(LineItemProp::Tax);
        li.apply_edit(LineItemProp::MarkupPercent, 20.0).unwrap();
        assert!(!li.is_overridden(LineItemProp::Markup));
        assert!(li.is_overridden(LineItemProp::Tax));
        li.apply_edit(LineItemProp::TaxPercent, 8.0).unwrap();
        assert!(!li.is_overridden(LineItemProp::Tax));
    }

    #[test]
    fn input_edits_release_derived_values() {
        let mut li = item();
        for p in [LineItemProp::Cost, LineItemProp::Price, LineItemProp::LaborHours] {
            li.overrides.pin(p);
        }
        li.apply_edit(LineItemProp::Base, 3.0).unwrap();
        assert!(!li.is_overridden(LineItemProp::Cost));
        assert!(li.is_overridden(LineItemProp::LaborHours));
        li.apply_edit(LineItemProp::Quantity, 4.0).unwrap();
        assert!(!li.is_overridden(LineItemProp::LaborHours));
    }

    #[test]
    fn rejects_non_finite_and_forbidden_negative() {
        let mut li = item();
        let err = li.apply_edit(LineItemProp::Cost, f64::NAN).unwrap_err();
        assert!(matches!(err, BidGraphError::InvalidValue { .. }));
        assert!(li.apply_edit(LineItemProp::Wage, -1.0).is_err());
        assert!(li.apply_edit(LineItemProp::Cost, -10.0).is_ok());
        assert_eq!(li.values.wage, 0.0);
    }

    #[test]
    fn clear_override_releases_one_property() {
        let mut li = item();
        li.apply_edit(LineItemProp::Price, 99.0).unwrap();
        assert!(li.clear_override(LineItemProp::Price));
        assert!(!li.clear_override(LineItemProp::Price));
        assert!(li.overrides.is_empty());
    }

    #[test]
    fn prop_names_parse_aliases() {
        assert_eq!("x".parse::<LineItemProp>().unwrap(), LineItemProp::Scalar);
        assert_eq!("laborHours".parse::<LineItemProp>().unwrap(), LineItemProp::LaborHours);
        let overrides: Overrides = serde_json::from_str(r#"{"cost":true,"x":false}"#).unwrap();
        assert!(overrides.is(LineItemProp::Cost));
        assert!(!overrides.is(LineItemProp::Scalar));
    }
}
