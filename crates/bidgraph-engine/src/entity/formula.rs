use std::collections::BTreeMap;

use bidgraph_core::{DependencyContract, Expression};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::resolver::ValueSource;

/// A fixed-grammar expression whose variables are bound to dependency contracts.
///
/// The source text is parsed once, on first evaluation; a malformed
/// expression is remembered as such.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formula {
    expression: String,
    #[serde(default)]
    pub variables: BTreeMap<String, DependencyContract>,
    #[serde(skip)]
    compiled: OnceCell<Option<Expression>>,
}

impl PartialEq for Formula {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression && self.variables == other.variables
    }
}

/// Result of evaluating a [`Formula`].
///
/// `value` is `None` when the expression is malformed or produced a
/// non-finite number. Unresolved variables evaluate as zero and clear
/// `fully_defined`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormulaOutcome {
    pub value: Option<f64>,
    pub fully_defined: bool,
}

impl FormulaOutcome {
    pub fn value_or_zero(&self) -> f64 {
        self.value.unwrap_or(0.0)
    }

    pub fn is_defined(&self) -> bool {
        self.value.is_some() && self.fully_defined
    }
}

impl Formula {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            variables: BTreeMap::new(),
            compiled: OnceCell::new(),
        }
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    fn compiled(&self) -> Option<&Expression> {
        self.compiled
            .get_or_init(|| match Expression::parse(&self.expression) {
                Ok(e) => Some(e),
                Err(e) => {
                    warn!(expression = %self.expression, error = %e, "malformed formula");
                    None
                }
            })
            .as_ref()
    }

    /// Formula that simply reads one contract.
    pub fn of(contract: DependencyContract) -> Self {
        Self::new("a").bind("a", contract)
    }

    pub fn bind(mut self, name: impl Into<String>, contract: DependencyContract) -> Self {
        self.variables.insert(name.into(), contract);
        self
    }

    pub fn contracts(&self) -> impl Iterator<Item = &DependencyContract> {
        self.variables.values()
    }

    pub fn evaluate(&self, source: &dyn ValueSource) -> FormulaOutcome {
        let Some(expression) = self.compiled() else {
            return FormulaOutcome {
                value: None,
                fully_defined: false,
            };
        };

        let mut fully_defined = true;
        for name in expression.variables() {
            match self.variables.get(&name) {
                Some(contract) => fully_defined &= source.is_fully_defined(contract),
                None => fully_defined = false,
            }
        }

        let result = expression.evaluate(|name| {
            self.variables
                .get(name)
                .map(|contract| source.resolve(contract).unwrap_or(0.0))
        });

        match result {
            Ok(v) if v.is_finite() => FormulaOutcome {
                value: Some(v),
                fully_defined,
            },
            Ok(_) => FormulaOutcome {
                value: None,
                fully_defined: false,
            },
            Err(e) => {
                warn!(expression = %self.expression, error = %e, "formula evaluation failed");
                FormulaOutcome {
                    value: None,
                    fully_defined: false,
                }
            }
        }
    }
}
