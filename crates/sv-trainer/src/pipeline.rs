use anyhow::Context;
use std::path::{Path, PathBuf};

use bayes_model::{posterior_predictive, PosteriorTrace, ResidualSummary, TraceSummary};
use feature_prep::{load_table, FeaturePreprocessor, PreparedFeatures};
use nuts_sampler::{CancelFlag, SamplerConfig};

use crate::interpretation::InterpretationReport;

/// Seed for posterior predictive replicates.
pub const PPC_SEED: u64 = 42;

pub fn prepare(preprocessor: &FeaturePreprocessor, data: &Path) -> anyhow::Result<PreparedFeatures> {
    let table = load_table(data).with_context(|| format!("loading {}", data.display()))?;
    let prepared = preprocessor
        .prepare(&table)
        .with_context(|| format!("preparing features from {}", data.display()))?;
    Ok(prepared)
}

/// Fit the model and persist the trace. Sampler warnings are logged but do
/// not fail the run.
pub fn train(
    prepared: &PreparedFeatures,
    preprocessor: &FeaturePreprocessor,
    config: &SamplerConfig,
    trace_path: &Path,
    cancel: &CancelFlag,
) -> anyhow::Result<TraceSummary> {
    let trace = bayes_model::fit(prepared, preprocessor.predictor_columns(), config, cancel)
        .context("sampling the posterior")?;
    trace
        .save(trace_path)
        .with_context(|| format!("writing trace to {}", trace_path.display()))?;

    let summary = TraceSummary::from_trace(&trace);
    summary.log();
    Ok(summary)
}

/// Load a trace, check it against the current table and report diagnostics.
pub fn load(prepared: &PreparedFeatures, trace_path: &Path) -> anyhow::Result<TraceSummary> {
    let trace = PosteriorTrace::load(trace_path)?;
    check_consistency(prepared, &trace);
    let summary = TraceSummary::from_trace(&trace);
    summary.log();
    Ok(summary)
}

/// Posterior predictive check at the trace's stored design, then write the
/// interpretation report.
pub fn ppc(
    prepared: &PreparedFeatures,
    trace_path: &Path,
    artifacts_dir: &Path,
) -> anyhow::Result<PathBuf> {
    let trace = PosteriorTrace::load(trace_path)?;
    check_consistency(prepared, &trace);

    let replicates = posterior_predictive(&trace, PPC_SEED)?;
    let residuals = ResidualSummary::compute(&trace.observed.y, &replicates.mean())?;
    tracing::info!(
        "PPC residuals (normalized): mean {:.4}, sd {:.4}, mae {:.4}, max |r| {:.4}",
        residuals.mean,
        residuals.std,
        residuals.mean_abs,
        residuals.max_abs
    );

    let summary = TraceSummary::from_trace(&trace);
    summary.log();

    let report = InterpretationReport::from_trace(&trace)?
        .with_residuals(residuals)
        .with_diagnostics(summary);
    let best = &report.best_film;
    tracing::info!(
        "Best-performing film: row {} {:?}, predicted normalized S/V {:.4}",
        best.source_index,
        best.labels,
        best.predicted_normalized
    );
    let path = report
        .write(artifacts_dir)
        .with_context(|| format!("writing report to {}", artifacts_dir.display()))?;
    tracing::info!("Interpretation report written to {}", path.display());
    Ok(path)
}

/// The trace carries its own design; a differing table only earns a warning.
fn check_consistency(prepared: &PreparedFeatures, trace: &PosteriorTrace) {
    if prepared.matrix.n_rows() != trace.observed.len() {
        tracing::warn!(
            "Table has {} usable rows but the trace was fit on {}",
            prepared.matrix.n_rows(),
            trace.observed.len()
        );
    }
    if prepared.scaler != trace.scaler || prepared.target != trace.target {
        tracing::warn!("Standardization of the table differs from the trace's");
    }
}
