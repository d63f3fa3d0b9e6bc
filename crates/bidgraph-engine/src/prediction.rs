//! Regression-based fallback for line items whose inputs are missing.
//!
//! Each assembly definition may carry models `y = f(a[, b])` fitted offline.
//! A model is usable when its inputs resolve and its result lands inside the
//! model's bounds window widened by a tolerance. Usable models are combined as
//! an r²-weighted average.

use std::collections::{BTreeMap, HashMap};

use bidgraph_core::{DependencyContract, Expression};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::resolver::ValueSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionTarget {
    Cost,
    LaborHours,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionBounds {
    pub min: f64,
    pub max: f64,
}

impl PredictionBounds {
    /// Window widened by `tolerance` of each bound's magnitude.
    pub fn contains(&self, value: f64, tolerance: f64) -> bool {
        let lo = self.min - self.min.abs() * tolerance;
        let hi = self.max + self.max.abs() * tolerance;
        value >= lo && value <= hi
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionModel {
    pub id: String,
    pub definition_id: String,
    pub target: PredictionTarget,
    /// Expression over `a` and optionally `b`.
    pub equation: String,
    pub a: DependencyContract,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b: Option<DependencyContract>,
    pub r_squared: f64,
    pub bounds: PredictionBounds,
}

impl PredictionModel {
    pub fn contracts(&self) -> impl Iterator<Item = &DependencyContract> {
        std::iter::once(&self.a).chain(self.b.as_ref())
    }
}

/// One model's evaluated output.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub model_id: String,
    pub value: f64,
    pub r_squared: f64,
    pub in_bounds: bool,
}

/// Per-pass memo of combined predictions keyed by definition and target.
pub type PredictionCache = HashMap<(String, PredictionTarget), Option<f64>>;

#[derive(Debug, Clone, Default)]
pub struct PredictionService {
    models: BTreeMap<String, Vec<PredictionModel>>,
    compiled: HashMap<String, Expression>,
    tolerance: f64,
}

impl PredictionService {
    pub fn new(models: Vec<PredictionModel>, tolerance: f64) -> Self {
        let mut service = Self {
            models: BTreeMap::new(),
            compiled: HashMap::new(),
            tolerance,
        };
        for model in models {
            service.add_model(model);
        }
        service
    }

    pub fn add_model(&mut self, model: PredictionModel) {
        match Expression::parse(&model.equation) {
            Ok(expr) => {
                self.compiled.insert(model.id.clone(), expr);
            }
            Err(e) => warn!(model = %model.id, error = %e, "prediction model equation does not parse"),
        }
        self.models
            .entry(model.definition_id.clone())
            .or_default()
            .push(model);
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn models(&self) -> impl Iterator<Item = &PredictionModel> {
        self.models.values().flatten()
    }

    pub fn models_for(&self, definition_id: &str) -> &[PredictionModel] {
        self.models
            .get(definition_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_models(&self, definition_id: &str) -> bool {
        !self.models_for(definition_id).is_empty()
    }

    /// Evaluate one model. `None` when an input is unresolved or the result is
    /// not a finite number; negative results are clamped to zero.
    pub fn evaluate(&self, model: &PredictionModel, source: &dyn ValueSource) -> Option<Candidate> {
        let expr = self.compiled.get(&model.id)?;
        let a = source.resolve(&model.a)?;
        let b = match &model.b {
            Some(c) => Some(source.resolve(c)?),
            None => None,
        };
        let raw = expr
            .evaluate(|name| match name {
                "a" => Some(a),
                "b" => b,
                _ => None,
            })
            .ok()?;
        if !raw.is_finite() {
            return None;
        }
        let value = raw.max(0.0);
        Some(Candidate {
            model_id: model.id.clone(),
            value,
            r_squared: model.r_squared,
            in_bounds: model.bounds.contains(value, self.tolerance),
        })
    }

    pub fn candidates(
        &self,
        definition_id: &str,
        target: PredictionTarget,
        source: &dyn ValueSource,
    ) -> Vec<Candidate> {
        self.models_for(definition_id)
            .iter()
            .filter(|m| m.target == target)
            .filter_map(|m| self.evaluate(m, source))
            .collect()
    }

    /// Combined prediction, memoised in `cache` for the current pass.
    pub fn predict(
        &self,
        definition_id: &str,
        target: PredictionTarget,
        source: &dyn ValueSource,
        cache: &mut PredictionCache,
    ) -> Option<f64> {
        let key = (definition_id.to_string(), target);
        if let Some(hit) = cache.get(&key) {
            return *hit;
        }
        let candidates = self.candidates(definition_id, target, source);
        let value = combine(&candidates);
        debug!(
            definition = definition_id,
            ?target,
            candidates = candidates.len(),
            ?value,
            "prediction evaluated"
        );
        cache.insert(key, value);
        value
    }
}

/// r²-weighted average of in-bounds candidates; with none in bounds, of the
/// out-of-bounds candidates sharing the best r².
pub fn combine(candidates: &[Candidate]) -> Option<f64> {
    let in_bounds: Vec<&Candidate> = candidates.iter().filter(|c| c.in_bounds).collect();
    let chosen: Vec<&Candidate> = if !in_bounds.is_empty() {
        in_bounds
    } else {
        let best = candidates
            .iter()
            .map(|c| c.r_squared)
            .fold(f64::NEG_INFINITY, f64::max);
        candidates.iter().filter(|c| c.r_squared == best).collect()
    };
    if chosen.is_empty() {
        return None;
    }

    let weight: f64 = chosen.iter().map(|c| c.r_squared).sum();
    if weight > 0.0 {
        Some(chosen.iter().map(|c| c.value * c.r_squared).sum::<f64>() / weight)
    } else {
        Some(chosen.iter().map(|c| c.value).sum::<f64>() / chosen.len() as f64)
    }
}
