use bidgraph_core::Expression;
use tracing::warn;

use crate::entity::{InclusionConfig, InclusionPolicy, InclusionRule};
use crate::resolver::DependencyResolver;

/// Decide inclusion from the configured rules; `None` when there are none.
///
/// A rule whose dependency is undefined passes under predictive pricing and
/// fails otherwise.
pub fn evaluate_inclusion(
    config: &InclusionConfig,
    resolver: &DependencyResolver<'_>,
    predictive: bool,
) -> Option<bool> {
    if config.rules.is_empty() {
        return None;
    }
    let mut results = config.rules.iter().map(|r| rule_passes(r, resolver, predictive));
    Some(match config.policy {
        InclusionPolicy::All => results.all(|ok| ok),
        InclusionPolicy::Any => results.any(|ok| ok),
    })
}

pub fn rule_passes(rule: &InclusionRule, resolver: &DependencyResolver<'_>, predictive: bool) -> bool {
    match rule {
        InclusionRule::Always => true,
        InclusionRule::Toggle { dependency, negate } => {
            if !resolver.is_fully_defined(dependency) {
                return predictive;
            }
            let on = resolver.resolve(dependency).is_some_and(|v| v != 0.0);
            on != *negate
        }
        InclusionRule::Compare { expression, a, b } => {
            let b_defined = b.as_ref().map_or(true, |c| resolver.is_fully_defined(c));
            if !resolver.is_fully_defined(a) || !b_defined {
                return predictive;
            }
            let av = resolver.resolve(a);
            let bv = b.as_ref().and_then(|c| resolver.resolve(c));
            let result = Expression::parse(expression).and_then(|e| {
                e.evaluate(|name| match name {
                    "a" => av,
                    "b" => bv,
                    _ => None,
                })
            });
            match result {
                Ok(v) => v != 0.0 && !v.is_nan(),
                Err(e) => {
                    warn!(expression = %expression, error = %e, "inclusion comparison failed");
                    false
                }
            }
        }
        InclusionRule::OneOf { field_id, options } => match resolver.selected_row(field_id) {
            Some(row) => options.iter().any(|o| o == row),
            None => predictive,
        },
    }
}
