use std::collections::BTreeSet;

use bidgraph_core::{safe_ratio, DependencyContract, EntityId};
use tracing::debug;

use super::{evaluate_inclusion, AssessContext};
use crate::entity::{Entity, Formula, LineItem, LineItemProp, LineItemValues, PropSet};
use crate::prediction::{PredictionCache, PredictionTarget};

/// Outcome of one line item pass.
#[derive(Debug, Clone, PartialEq)]
pub struct LineItemAssessment {
    pub values: LineItemValues,
    pub is_included: bool,
    pub undefined: PropSet,
    pub predicted: PropSet,
    pub tags: BTreeSet<String>,
}

/// Recompute every non-overridden property in the fixed order:
/// inputs, quantity, labor hours, cost, tax and markup (order set by the
/// markup strategy), price, inclusion, tags.
pub fn assess_line_item(item: &LineItem, ctx: &AssessContext<'_>) -> LineItemAssessment {
    let mut pass = Pass {
        item,
        ctx,
        values: item.values,
        undefined: PropSet::new(),
        predicted: PropSet::new(),
        cache: PredictionCache::new(),
    };

    pass.input(LineItemProp::Base);
    pass.input(LineItemProp::Burden);
    pass.input(LineItemProp::Wage);
    pass.scalar();
    pass.quantity();
    pass.input(LineItemProp::PerQuantity);
    pass.input(LineItemProp::Multiplier);
    pass.input(LineItemProp::Ohp);
    pass.input(LineItemProp::Escalator);
    pass.labor_hours();
    pass.cost();
    pass.input(LineItemProp::TaxPercent);
    let markup_first = ctx.switches.markup_strategy;
    if !markup_first {
        pass.tax(false);
    }
    pass.input(LineItemProp::MarkupPercent);
    pass.markup();
    if markup_first {
        pass.tax(ctx.switches.taxable_profit);
    }
    pass.price();

    let is_included = pass.is_included();
    let tags = pass.tags();
    LineItemAssessment {
        values: pass.values,
        is_included,
        undefined: pass.undefined,
        predicted: pass.predicted,
        tags,
    }
}

/// Store an assessment; returns whether values, flags or inclusion moved.
pub fn apply_line_item(item: &mut LineItem, assessment: LineItemAssessment, places: u32) -> bool {
    let changed = item.values.differs(&assessment.values, places)
        || item.is_included != assessment.is_included
        || item.undefined != assessment.undefined
        || item.predicted != assessment.predicted
        || item.tags != assessment.tags;
    item.values = assessment.values;
    item.is_included = assessment.is_included;
    item.undefined = assessment.undefined;
    item.predicted = assessment.predicted;
    item.tags = assessment.tags;
    if changed {
        debug!(line_item = %item.id(), price = item.values.price, "line item changed");
    }
    changed
}

struct Pass<'i, 'c, 'a> {
    item: &'i LineItem,
    ctx: &'c AssessContext<'a>,
    values: LineItemValues,
    undefined: PropSet,
    predicted: PropSet,
    cache: PredictionCache,
}

impl Pass<'_, '_, '_> {
    fn pinned(&self, prop: LineItemProp) -> bool {
        self.item.overrides.is(prop)
    }

    fn any_undefined(&self, props: &[LineItemProp]) -> bool {
        props.iter().any(|p| self.undefined.contains(p))
    }

    fn any_predicted(&self, props: &[LineItemProp]) -> bool {
        props.iter().any(|p| self.predicted.contains(p))
    }

    fn flag(&mut self, prop: LineItemProp, undefined: bool, predicted: bool) {
        if undefined {
            self.undefined.insert(prop);
        }
        if predicted {
            self.predicted.insert(prop);
        }
    }

    /// Explicit contract first, then the reserved bid variable of the same name.
    fn source_for(&self, prop: LineItemProp) -> Option<DependencyContract> {
        if let Some(c) = self.item.config.contracts.get(&prop) {
            return Some(c.clone());
        }
        let id = prop.default_variable()?;
        self.ctx
            .resolver
            .store()
            .variables
            .contains_key(&EntityId::from(id))
            .then(|| DependencyContract::variable(id))
    }

    fn input(&mut self, prop: LineItemProp) {
        if self.pinned(prop) {
            return;
        }
        let Some(contract) = self.source_for(prop) else {
            return;
        };
        let resolver = self.ctx.resolver;
        self.values.set(prop, resolver.resolve(&contract).unwrap_or(0.0));
        if !resolver.is_fully_defined(&contract) {
            self.undefined.insert(prop);
        }
    }

    fn eval(&self, formula: &Formula) -> (f64, bool) {
        let out = formula.evaluate(self.ctx.resolver);
        (out.value_or_zero(), out.is_defined())
    }

    fn scalar(&mut self) {
        if self.pinned(LineItemProp::Scalar) {
            return;
        }
        if let Some(formula) = &self.item.config.scalar {
            let out = formula.evaluate(self.ctx.resolver);
            self.values.scalar = out.value.unwrap_or(1.0);
            self.flag(LineItemProp::Scalar, !out.is_defined(), false);
        } else if let Some(contract) = self.source_for(LineItemProp::Scalar) {
            let resolver = self.ctx.resolver;
            self.values.scalar = resolver.resolve(&contract).unwrap_or(1.0);
            self.flag(LineItemProp::Scalar, !resolver.is_fully_defined(&contract), false);
        }
    }

    fn quantity(&mut self) {
        if self.pinned(LineItemProp::Quantity) {
            return;
        }
        let Some(formula) = &self.item.config.quantity else {
            return;
        };
        let (raw, defined) = self.eval(formula);
        self.values.quantity = raw * self.values.scalar;
        let undefined = !defined || self.any_undefined(&[LineItemProp::Scalar]);
        self.flag(LineItemProp::Quantity, undefined, false);
    }

    fn labor_hours(&mut self) {
        if self.pinned(LineItemProp::LaborHours) {
            return;
        }
        let v = self.values;
        self.values.labor_hours = v.quantity * v.per_quantity * v.multiplier;
        let undefined = self.any_undefined(&[
            LineItemProp::Quantity,
            LineItemProp::PerQuantity,
            LineItemProp::Multiplier,
        ]);
        self.flag(LineItemProp::LaborHours, undefined, false);
        self.predict(LineItemProp::LaborHours, PredictionTarget::LaborHours);
    }

    fn cost(&mut self) {
        let v = self.values;
        let factor = v.escalator * (1.0 + v.ohp / 100.0);
        let material = v.material_cost() * factor;
        let labor = v.labor_hours * (v.wage + v.burden) * factor;

        if !self.pinned(LineItemProp::Cost) {
            self.values.cost = material + labor;
            let undefined = self.any_undefined(&[
                LineItemProp::Quantity,
                LineItemProp::Base,
                LineItemProp::LaborHours,
                LineItemProp::Wage,
                LineItemProp::Burden,
                LineItemProp::Escalator,
                LineItemProp::Ohp,
            ]);
            let predicted = self.any_predicted(&[LineItemProp::LaborHours]);
            self.flag(LineItemProp::Cost, undefined, predicted);
            self.predict(LineItemProp::Cost, PredictionTarget::Cost);
        }

        let cost = self.values.cost;
        self.values.labor_cost = if self.pinned(LineItemProp::Cost) || self.predicted.contains(&LineItemProp::Cost) {
            cost * safe_ratio(labor, material + labor)
        } else {
            labor
        };
        self.values.non_labor_cost = cost - self.values.labor_cost;
        self.values.taxable_cost = self.values.non_labor_cost
            + if self.ctx.switches.taxable_labor {
                self.values.labor_cost
            } else {
                0.0
            };
    }

    fn tax(&mut self, include_profit: bool) {
        if self.pinned(LineItemProp::Tax) {
            return;
        }
        let profit = if include_profit { self.values.markup } else { 0.0 };
        self.values.tax = (self.values.taxable_cost + profit) * self.values.tax_percent / 100.0;
        let undefined = self.any_undefined(&[LineItemProp::Cost, LineItemProp::TaxPercent])
            || (include_profit && self.any_undefined(&[LineItemProp::Markup]));
        let predicted = self.any_predicted(&[LineItemProp::Cost])
            || (include_profit && self.any_predicted(&[LineItemProp::Markup]));
        self.flag(LineItemProp::Tax, undefined, predicted);
    }

    fn markup(&mut self) {
        if self.pinned(LineItemProp::Markup) {
            return;
        }
        self.values.markup = self.values.cost * self.values.markup_percent / 100.0;
        let undefined = self.any_undefined(&[LineItemProp::Cost, LineItemProp::MarkupPercent]);
        let predicted = self.any_predicted(&[LineItemProp::Cost]);
        self.flag(LineItemProp::Markup, undefined, predicted);
    }

    fn price(&mut self) {
        if self.pinned(LineItemProp::Price) {
            return;
        }
        let v = self.values;
        self.values.price = v.cost + v.tax + v.markup;
        let parts = [LineItemProp::Cost, LineItemProp::Tax, LineItemProp::Markup];
        let undefined = self.any_undefined(&parts);
        let predicted = self.any_predicted(&parts);
        self.flag(LineItemProp::Price, undefined, predicted);
    }

    /// Replace an undefined derived value with the prediction service's
    /// estimate when the bid allows it.
    fn predict(&mut self, prop: LineItemProp, target: PredictionTarget) {
        let switches = self.ctx.switches;
        if !switches.predictive_pricing || switches.watts <= 0.0 {
            return;
        }
        let Some(definition) = self.item.config.definition_id.as_deref() else {
            return;
        };
        if !self.undefined.contains(&prop) {
            return;
        }
        let computed = self.values.get(prop).unwrap_or(0.0);
        if switches.use_computed && computed > 0.0 {
            return;
        }
        let Some(mut value) =
            self.ctx
                .predictor
                .predict(definition, target, self.ctx.resolver, &mut self.cache)
        else {
            return;
        };
        if prop == LineItemProp::Cost {
            value *= self.item.config.prediction_weight();
        }
        self.values.set(prop, value);
        self.undefined.remove(&prop);
        self.predicted.insert(prop);
    }

    fn is_included(&self) -> bool {
        if self.pinned(LineItemProp::IsIncluded) {
            return self.item.is_included;
        }
        evaluate_inclusion(
            &self.item.config.inclusion,
            self.ctx.resolver,
            self.ctx.switches.predictive_pricing,
        )
        .unwrap_or(self.item.is_included)
    }

    fn tags(&self) -> BTreeSet<String> {
        let mut tags: BTreeSet<String> = self.item.config.tags.iter().cloned().collect();
        if self.values.labor_hours > 0.0 {
            tags.insert("labor".to_string());
        }
        if self.values.material_cost() > 0.0 {
            tags.insert("material".to_string());
        }
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{BidVariable, Field};
    use crate::prediction::{PredictionBounds, PredictionModel, PredictionService};
    use crate::resolver::DependencyResolver;
    use crate::store::EntityStore;
    use approx::assert_relative_eq;
    use bidgraph_core::COMPARE_DECIMALS;

    fn run(store: &EntityStore, id: &str) -> LineItemAssessment {
        run_with(store, id, &PredictionService::default())
    }

    fn run_with(store: &EntityStore, id: &str, predictor: &PredictionService) -> LineItemAssessment {
        let resolver = DependencyResolver::new(store);
        let ctx = AssessContext::new(&resolver, predictor);
        assess_line_item(&store.line_items[&EntityId::from(id)], &ctx)
    }

    fn labor_item() -> LineItem {
        LineItem::new("li", "Install")
            .with_value(LineItemProp::Quantity, 10.0)
            .with_value(LineItemProp::PerQuantity, 0.5)
            .with_value(LineItemProp::Base, 4.0)
            .with_contract(LineItemProp::Wage, DependencyContract::field("wage"))
    }

    #[test]
    fn tax_then_markup_on_overridden_cost() {
        let mut store = EntityStore::new();
        let mut li = LineItem::new("li", "Fixed")
            .with_value(LineItemProp::TaxPercent, 15.0)
            .with_value(LineItemProp::MarkupPercent, 15.0);
        li.apply_edit(LineItemProp::Cost, 50.0).unwrap();
        store.add_line_item(li).unwrap();

        let a = run(&store, "li");
        assert_relative_eq!(a.values.tax, 7.5);
        assert_relative_eq!(a.values.markup, 7.5);
        assert_relative_eq!(a.values.price, 65.0);
    }

    #[test]
    fn full_formula_chain() {
        let mut store = EntityStore::new();
        store.add_field(Field::number("wage", Some(30.0))).unwrap();
        store.add_variable(BidVariable::number("burden", 10.0)).unwrap();
        store.add_variable(BidVariable::number("escalator", 1.1)).unwrap();
        let mut li = labor_item().with_value(LineItemProp::Ohp, 10.0);
        li.values.markup_percent = 20.0;
        store.add_line_item(li).unwrap();

        let a = run(&store, "li");
        assert_relative_eq!(a.values.labor_hours, 5.0);
        assert_relative_eq!(a.values.burden, 10.0);
        // material 40, labor 5 * 40 = 200, factor 1.1 * 1.1
        assert_relative_eq!(a.values.cost, 240.0 * 1.21, epsilon = 1e-9);
        assert_relative_eq!(a.values.labor_cost, 200.0 * 1.21, epsilon = 1e-9);
        assert_relative_eq!(a.values.markup, a.values.cost * 0.2, epsilon = 1e-9);
        assert!(a.undefined.is_empty());
        assert!(a.tags.contains("labor") && a.tags.contains("material"));
    }

    #[test]
    fn unresolved_scalar_contract_keeps_quantity() {
        let mut store = EntityStore::new();
        store.add_field(Field::number("empty", None)).unwrap();
        store
            .add_line_item(
                LineItem::new("li", "Panels")
                    .with_value(LineItemProp::Base, 10.0)
                    .with_quantity(Formula::new("3"))
                    .with_contract(LineItemProp::Scalar, DependencyContract::field("empty")),
            )
            .unwrap();

        let a = run(&store, "li");
        assert_relative_eq!(a.values.scalar, 1.0);
        assert_relative_eq!(a.values.quantity, 3.0);
        assert_relative_eq!(a.values.cost, 30.0);
        assert!(a.undefined.contains(&LineItemProp::Scalar));
        assert!(a.undefined.contains(&LineItemProp::Quantity));
    }

    #[test]
    fn null_wage_flags_money_but_not_hours() {
        let mut store = EntityStore::new();
        store.add_field(Field::number("wage", None)).unwrap();
        store.add_line_item(labor_item()).unwrap();

        let a = run(&store, "li");
        for p in [LineItemProp::Cost, LineItemProp::Markup, LineItemProp::Tax, LineItemProp::Price] {
            assert!(a.undefined.contains(&p), "{} should be flagged", p);
        }
        assert!(!a.undefined.contains(&LineItemProp::LaborHours));
        assert_relative_eq!(a.values.cost, 40.0);
    }

    #[test]
    fn markup_includes_tax_strategy() {
        let mut store = EntityStore::new();
        store.add_variable(BidVariable::toggle("markup_strategy", true)).unwrap();
        store.add_variable(BidVariable::toggle("taxable_profit", true)).unwrap();
        let mut li = LineItem::new("li", "Panels")
            .with_value(LineItemProp::TaxPercent, 10.0)
            .with_value(LineItemProp::MarkupPercent, 20.0);
        li.apply_edit(LineItemProp::Cost, 100.0).unwrap();
        store.add_line_item(li).unwrap();

        let a = run(&store, "li");
        assert_relative_eq!(a.values.markup, 20.0);
        assert_relative_eq!(a.values.tax, 12.0);
        assert_relative_eq!(a.values.price, 132.0);
    }

    #[test]
    fn taxable_labor_switch_changes_tax_base() {
        let mut store = EntityStore::new();
        store.add_field(Field::number("wage", Some(20.0))).unwrap();
        let mut li = labor_item();
        li.values.tax_percent = 10.0;
        store.add_line_item(li).unwrap();

        // material 40, labor 100
        assert_relative_eq!(run(&store, "li").values.tax, 4.0);
        store.add_variable(BidVariable::toggle("taxable_labor", true)).unwrap();
        assert_relative_eq!(run(&store, "li").values.tax, 14.0);
    }

    #[test]
    fn undefined_quantity_is_predicted_under_predictive_pricing() {
        let mut store = EntityStore::new();
        store.add_variable(BidVariable::toggle("predictive_pricing", true)).unwrap();
        store.add_variable(BidVariable::number("watts", 6000.0)).unwrap();
        store.add_field(Field::number("panels", None)).unwrap();
        let mut li = LineItem::new("li", "Array")
            .with_value(LineItemProp::Base, 300.0)
            .with_value(LineItemProp::MarkupPercent, 10.0)
            .with_quantity(Formula::of(DependencyContract::field("panels")));
        li.config.definition_id = Some("rooftop".into());
        li.config.prediction_weight = Some(0.5);
        store.add_line_item(li).unwrap();

        let predictor = PredictionService::new(
            vec![PredictionModel {
                id: "m".into(),
                definition_id: "rooftop".into(),
                target: PredictionTarget::Cost,
                equation: "a * 1.5".into(),
                a: DependencyContract::variable("watts"),
                b: None,
                r_squared: 0.8,
                bounds: PredictionBounds {
                    min: 0.0,
                    max: 20_000.0,
                },
            }],
            0.15,
        );
        let a = run_with(&store, "li", &predictor);
        assert_relative_eq!(a.values.cost, 4500.0);
        assert!(a.predicted.contains(&LineItemProp::Cost));
        assert!(!a.undefined.contains(&LineItemProp::Cost));
        assert!(a.predicted.contains(&LineItemProp::Markup));
        assert!(a.predicted.contains(&LineItemProp::Price));
        assert!(a.undefined.contains(&LineItemProp::Quantity));
    }

    #[test]
    fn reapplying_a_settled_assessment_reports_no_change() {
        let mut store = EntityStore::new();
        store.add_field(Field::number("wage", Some(30.0))).unwrap();
        store.add_line_item(labor_item()).unwrap();

        let first = run(&store, "li");
        let li = store.line_items.get_mut(&EntityId::from("li")).unwrap();
        assert!(apply_line_item(li, first, COMPARE_DECIMALS));
        let second = run(&store, "li");
        let li = store.line_items.get_mut(&EntityId::from("li")).unwrap();
        assert!(!apply_line_item(li, second, COMPARE_DECIMALS));
    }
}
