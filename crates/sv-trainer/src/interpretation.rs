//! Linear attributions from posterior-mean coefficients.
//!
//! For a linear model the exact additive attribution of feature `j` on row
//! `i` is `x_ij * coef_j` on the standardized scale, so no sampling-based
//! explainer is needed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use bayes_model::{PosteriorTrace, ResidualSummary, TraceSummary};
use sv_core::{SvError, SvResult};

pub const INTERPRETATION_FILE: &str = "interpretation.json";

/// Attributions smaller than this are left out of the per-film breakdown.
pub const ATTRIBUTION_THRESHOLD: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attribution {
    pub feature: String,
    /// Standardized feature value.
    pub value: f64,
    pub contribution: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestFilm {
    /// Position within the cleaned training rows.
    pub row: usize,
    pub source_index: usize,
    pub predicted_normalized: f64,
    pub predicted: f64,
    pub observed: f64,
    pub labels: BTreeMap<String, String>,
    pub attributions: Vec<Attribution>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub mean_abs_attribution: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InterpretationReport {
    pub generated_at: DateTime<Utc>,
    pub alpha: f64,
    pub coefficients: BTreeMap<String, f64>,
    pub best_film: BestFilm,
    /// Sorted by decreasing importance.
    pub global_importance: Vec<FeatureImportance>,
    pub residuals: Option<ResidualSummary>,
    pub diagnostics: Option<TraceSummary>,
}

impl InterpretationReport {
    pub fn from_trace(trace: &PosteriorTrace) -> SvResult<Self> {
        let observed = &trace.observed;
        if observed.is_empty() {
            return Err(SvError::DegenerateData("trace has no observations".into()));
        }
        let means = trace.posterior_means();
        let coef: Vec<f64> = means.beta.iter().chain(&means.gamma).copied().collect();
        let rows: Vec<Vec<f64>> = observed
            .morph
            .iter()
            .zip(&observed.stim)
            .map(|(m, s)| m.iter().chain(s).copied().collect())
            .collect();

        let predicted: Vec<f64> = rows
            .iter()
            .map(|x| means.alpha + dot(x, &coef))
            .collect();
        let best = argmax(&predicted);

        let attributions = rows[best]
            .iter()
            .zip(&coef)
            .zip(&trace.feature_names)
            .map(|((x, c), name)| Attribution {
                feature: name.clone(),
                value: *x,
                contribution: x * c,
            })
            .filter(|a| a.contribution.abs() > ATTRIBUTION_THRESHOLD)
            .collect();

        let best_film = BestFilm {
            row: best,
            source_index: observed.source_index.get(best).copied().unwrap_or(best),
            predicted_normalized: predicted[best],
            predicted: trace.target.denormalize(predicted[best]),
            observed: trace.target.denormalize(observed.y[best]),
            labels: observed.labels.get(best).cloned().unwrap_or_default(),
            attributions,
        };

        let n = rows.len() as f64;
        let mut global_importance: Vec<FeatureImportance> = trace
            .feature_names
            .iter()
            .enumerate()
            .map(|(j, name)| FeatureImportance {
                feature: name.clone(),
                mean_abs_attribution: rows.iter().map(|x| (x[j] * coef[j]).abs()).sum::<f64>()
                    / n,
            })
            .collect();
        global_importance.sort_by(|a, b| b.mean_abs_attribution.total_cmp(&a.mean_abs_attribution));

        Ok(Self {
            generated_at: Utc::now(),
            alpha: means.alpha,
            coefficients: trace
                .feature_names
                .iter()
                .cloned()
                .zip(coef.iter().copied())
                .collect(),
            best_film,
            global_importance,
            residuals: None,
            diagnostics: None,
        })
    }

    pub fn with_residuals(mut self, residuals: ResidualSummary) -> Self {
        self.residuals = Some(residuals);
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: TraceSummary) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn write(&self, dir: impl AsRef<Path>) -> SvResult<PathBuf> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(INTERPRETATION_FILE);
        fs::write(&path, serde_json::to_vec_pretty(self)?)?;
        Ok(path)
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Index of the first maximum.
fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(bi, bv), (i, v)| {
            if *v > bv {
                (i, *v)
            } else {
                (bi, bv)
            }
        })
        .0
}
