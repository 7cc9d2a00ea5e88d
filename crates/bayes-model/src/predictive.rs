use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use statrs::distribution::Laplace;
use statrs::statistics::Statistics;

use sv_core::{SvError, SvResult};

use crate::trace::PosteriorTrace;

/// Replicated targets, indexed `[draw][row]` on the normalized scale.
#[derive(Debug, Clone)]
pub struct PredictiveDraws {
    pub draws: Vec<Vec<f64>>,
}

impl PredictiveDraws {
    pub fn n_rows(&self) -> usize {
        self.draws.first().map_or(0, Vec::len)
    }

    /// Mean replicate per observation.
    pub fn mean(&self) -> Vec<f64> {
        (0..self.n_rows())
            .map(|i| self.draws.iter().map(|d| d[i]).mean())
            .collect()
    }
}

/// One Laplace replicate of every observation per posterior draw, at the
/// design stored in the trace.
pub fn posterior_predictive(trace: &PosteriorTrace, seed: u64) -> SvResult<PredictiveDraws> {
    let model = trace.model()?;
    let unit = Laplace::new(0.0, 1.0)
        .map_err(|e| SvError::InvalidArtifact(format!("laplace sampler: {e}")))?;
    let mut rng = StdRng::seed_from_u64(seed);

    let draws = trace
        .iter_params()
        .map(|p| {
            let mu = model.linear_predictor(p.alpha, &p.beta, &p.gamma);
            mu.iter().map(|m| m + p.b * rng.sample(unit)).collect()
        })
        .collect();

    tracing::info!(
        "Posterior predictive: {} draws x {} observations",
        trace.total_draws(),
        model.n_obs()
    );
    Ok(PredictiveDraws { draws })
}

/// Residuals of observed minus predicted, on the normalized scale.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResidualSummary {
    pub n: usize,
    pub mean: f64,
    pub std: f64,
    pub mean_abs: f64,
    pub max_abs: f64,
    pub rmse: f64,
}

impl ResidualSummary {
    pub fn compute(observed: &[f64], predicted: &[f64]) -> SvResult<Self> {
        if observed.len() != predicted.len() {
            return Err(SvError::FeatureShape {
                expected: observed.len(),
                actual: predicted.len(),
            });
        }
        if observed.is_empty() {
            return Err(SvError::DegenerateData("no residuals to summarize".into()));
        }
        let resid: Vec<f64> = observed.iter().zip(predicted).map(|(o, p)| o - p).collect();
        let n = resid.len();
        Ok(Self {
            n,
            mean: resid.iter().mean(),
            std: if n > 1 { resid.iter().std_dev() } else { 0.0 },
            mean_abs: resid.iter().map(|r| r.abs()).sum::<f64>() / n as f64,
            max_abs: resid.iter().fold(0.0, |m, r| m.max(r.abs())),
            rmse: (resid.iter().map(|r| r * r).sum::<f64>() / n as f64).sqrt(),
        })
    }
}
