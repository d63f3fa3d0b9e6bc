use bidgraph_core::nearly_equal_at;

use crate::entity::{Field, FieldConfig, Metric};
use crate::resolver::DependencyResolver;

/// Value and null-dependency flag of a field or metric after a pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeafAssessment {
    pub value: Option<f64>,
    pub has_null_dependency: bool,
}

pub fn assess_field(field: &Field, resolver: &DependencyResolver<'_>) -> LeafAssessment {
    match &field.config {
        FieldConfig::Number { auto_populate } => match (field.input, auto_populate) {
            (Some(v), _) => LeafAssessment {
                value: Some(v),
                has_null_dependency: false,
            },
            (None, Some(contract)) => LeafAssessment {
                value: resolver.resolve(contract),
                has_null_dependency: !resolver.is_fully_defined(contract),
            },
            (None, None) => LeafAssessment {
                value: None,
                has_null_dependency: false,
            },
        },
        FieldConfig::Toggle => LeafAssessment {
            value: Some(if field.input.unwrap_or(0.0) != 0.0 { 1.0 } else { 0.0 }),
            has_null_dependency: false,
        },
        FieldConfig::List {
            datatable_id,
            value_column,
        } => {
            let value = field.selected_row.as_deref().and_then(|row| {
                resolver
                    .store()
                    .datatables
                    .get(datatable_id)
                    .and_then(|t| t.cell(row, value_column))
            });
            LeafAssessment {
                value,
                has_null_dependency: false,
            }
        }
        FieldConfig::Computed { formula } => {
            let out = formula.evaluate(resolver);
            LeafAssessment {
                value: out.value,
                has_null_dependency: !out.fully_defined,
            }
        }
    }
}

pub fn assess_metric(metric: &Metric, resolver: &DependencyResolver<'_>) -> LeafAssessment {
    let out = metric.config.formula.evaluate(resolver);
    LeafAssessment {
        value: out.value,
        has_null_dependency: !out.fully_defined,
    }
}

fn moved(old: Option<f64>, new: Option<f64>, places: u32) -> bool {
    match (old, new) {
        (Some(a), Some(b)) => !nearly_equal_at(a, b, places),
        (None, None) => false,
        _ => true,
    }
}

pub fn apply_field(field: &mut Field, assessment: LeafAssessment, places: u32) -> bool {
    let changed = moved(field.value, assessment.value, places)
        || field.has_null_dependency != assessment.has_null_dependency;
    field.value = assessment.value;
    field.has_null_dependency = assessment.has_null_dependency;
    changed
}

pub fn apply_metric(metric: &mut Metric, assessment: LeafAssessment, places: u32) -> bool {
    let changed = moved(metric.value, assessment.value, places)
        || metric.has_null_dependency != assessment.has_null_dependency;
    metric.value = assessment.value;
    metric.has_null_dependency = assessment.has_null_dependency;
    changed
}
