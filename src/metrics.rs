//! Point-level divergence metrics between NWP models.
//!
//! All functions are stateless. Model maps are keyed by canonical model name,
//! so iteration order is the lexicographic pair ordering the metric contract
//! requires.

use std::collections::BTreeMap;

use crate::grid::extract_point;
use crate::models::{FieldSet, Variable};

/// Sample standard deviation (ddof = 1). Zero for fewer than two values.
pub fn sample_stddev(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let ss = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>();
    (ss / (n - 1) as f64).sqrt()
}

/// Pairwise metrics between two models at one point.
#[derive(Debug, Clone, PartialEq)]
pub struct PairMetric {
    pub model_a: String,
    pub model_b: String,
    /// Single-point RMSE reduces to the absolute difference.
    pub rmse: f64,
    pub bias: f64,
    pub value_a: f64,
    pub value_b: f64,
}

/// Extract each model's scalar at the point nearest `(lat, lon)`.
///
/// Models without the variable are absent from the result. NaN extractions
/// (the nearest cell is missing) are dropped too, so downstream spread and
/// pair math only ever sees finite values. Generic over the map's value so
/// both plain and `Arc`-shared field sets work.
pub fn point_values<S: std::borrow::Borrow<FieldSet>>(
    fields: &BTreeMap<String, S>,
    variable: Variable,
    lat: f64,
    lon: f64,
) -> BTreeMap<String, f64> {
    fields
        .iter()
        .filter_map(|(name, set)| {
            let field = set.borrow().get(variable)?;
            let value = extract_point(field, lat, lon);
            value.is_finite().then(|| (name.clone(), value))
        })
        .collect()
}

/// Ensemble spread: sample std-dev across all model values at a point.
pub fn ensemble_spread(values: &BTreeMap<String, f64>) -> f64 {
    let vals: Vec<f64> = values.values().copied().collect();
    sample_stddev(&vals)
}

/// One row per unordered model pair `(A, B)` with `A < B` lexicographically.
///
/// Emits nothing when fewer than two models hold a value.
pub fn pairwise_metrics(values: &BTreeMap<String, f64>) -> Vec<PairMetric> {
    let names: Vec<&String> = values.keys().collect();
    let mut rows = Vec::new();
    for (i, a) in names.iter().enumerate() {
        for b in &names[i + 1..] {
            let va = values[*a];
            let vb = values[*b];
            let diff = va - vb;
            rows.push(PairMetric {
                model_a: (*a).clone(),
                model_b: (*b).clone(),
                rmse: diff.abs(),
                bias: diff,
                value_a: va,
                value_b: vb,
            });
        }
    }
    rows
}
