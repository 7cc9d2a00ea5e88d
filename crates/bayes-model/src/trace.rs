//! Persisted posterior trace.
//!
//! A trace is a single JSON document carrying everything downstream steps
//! need without re-running MCMC: the named draws of every chain, per-draw
//! sampler statistics, the sampler configuration, and the exact standardized
//! design the model was conditioned on (so the posterior predictive and the
//! pointwise log likelihood never refit the scaler).

use chrono::{DateTime, Utc};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use feature_prep::PreparedFeatures;
use nuts_sampler::{Chain, DrawStats, SampleOutput, SamplerConfig, SamplerWarning};
use sv_core::{PosteriorMeans, ScalerParams, SvError, SvResult, TargetStats};

use crate::model::{ModelParameters, Priors, RegressionModel};

pub const TRACE_FORMAT: &str = "sv-posterior-trace/1";

/// Named draws of one chain, in draw order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainDraws {
    pub chain: usize,
    pub alpha: Vec<f64>,
    pub beta: Vec<Vec<f64>>,
    pub gamma: Vec<Vec<f64>>,
    pub b: Vec<f64>,
    pub stats: Vec<DrawStats>,
    pub step_size: f64,
    pub inv_mass: Vec<f64>,
}

impl ChainDraws {
    fn from_chain(chain: &Chain, n_morph: usize, n_stim: usize) -> Self {
        let params: Vec<ModelParameters> = chain
            .draws
            .iter()
            .map(|theta| ModelParameters::from_unconstrained(theta, n_morph, n_stim))
            .collect();
        Self {
            chain: chain.chain_id,
            alpha: params.iter().map(|p| p.alpha).collect(),
            beta: params.iter().map(|p| p.beta.clone()).collect(),
            gamma: params.iter().map(|p| p.gamma.clone()).collect(),
            b: params.iter().map(|p| p.b).collect(),
            stats: chain.stats.clone(),
            step_size: chain.step_size,
            inv_mass: chain.inv_mass.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.alpha.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alpha.is_empty()
    }

    pub fn params(&self, draw: usize) -> ModelParameters {
        ModelParameters {
            alpha: self.alpha[draw],
            beta: self.beta[draw].clone(),
            gamma: self.gamma[draw].clone(),
            b: self.b[draw],
        }
    }

    pub fn divergences(&self) -> usize {
        self.stats.iter().filter(|s| s.divergent).count()
    }
}

/// The standardized design and normalized target the model was fit on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedData {
    pub morph: Vec<Vec<f64>>,
    pub stim: Vec<Vec<f64>>,
    pub y: Vec<f64>,
    /// Source row index and free-text labels per row, for reporting.
    pub source_index: Vec<usize>,
    pub labels: Vec<BTreeMap<String, String>>,
}

impl ObservedData {
    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PosteriorTrace {
    pub format: String,
    pub created_at: DateTime<Utc>,
    pub sampler: SamplerConfig,
    pub priors: Priors,
    pub feature_names: Vec<String>,
    pub n_morph: usize,
    pub n_stim: usize,
    /// Transform fit at training time. The freezer refits its own and only
    /// uses this to flag drift in the source table.
    pub scaler: ScalerParams,
    pub target: TargetStats,
    pub observed: ObservedData,
    pub chains: Vec<ChainDraws>,
    pub warnings: Vec<SamplerWarning>,
}

impl PosteriorTrace {
    pub fn from_sample(
        output: &SampleOutput,
        model: &RegressionModel,
        prepared: &PreparedFeatures,
        feature_names: Vec<String>,
        sampler: &SamplerConfig,
    ) -> Self {
        let n_morph = model.n_morph();
        let n_stim = model.n_stim();
        let rows = |m: &DMatrix<f64>| -> Vec<Vec<f64>> {
            m.row_iter().map(|r| r.iter().copied().collect()).collect()
        };
        let observed = ObservedData {
            morph: rows(model.morph()),
            stim: rows(model.stim()),
            y: model.observed().iter().copied().collect(),
            source_index: prepared.dataset.rows.iter().map(|r| r.source_index).collect(),
            labels: prepared.dataset.rows.iter().map(|r| r.labels.clone()).collect(),
        };

        Self {
            format: TRACE_FORMAT.to_string(),
            created_at: Utc::now(),
            sampler: sampler.clone(),
            priors: *model.priors(),
            feature_names,
            n_morph,
            n_stim,
            scaler: prepared.scaler.clone(),
            target: prepared.target,
            observed,
            chains: output
                .chains
                .iter()
                .map(|c| ChainDraws::from_chain(c, n_morph, n_stim))
                .collect(),
            warnings: output.warnings.clone(),
        }
    }

    /// Write atomically: serialize to a sibling temp file, then rename.
    pub fn save(&self, path: impl AsRef<Path>) -> SvResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(self)?)?;
        fs::rename(&tmp, path)?;
        tracing::info!("Trace saved to {}", path.display());
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> SvResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(SvError::TraceNotFound(path.to_path_buf()));
        }
        let trace: Self = serde_json::from_slice(&fs::read(path)?)?;
        trace.validate()?;
        tracing::info!(
            "Loaded trace {}: {} chains x {} draws",
            path.display(),
            trace.chains.len(),
            trace.draws_per_chain()
        );
        Ok(trace)
    }

    fn validate(&self) -> SvResult<()> {
        if self.format != TRACE_FORMAT {
            return Err(SvError::InvalidArtifact(format!(
                "unsupported trace format '{}'",
                self.format
            )));
        }
        if self.chains.is_empty() || self.chains.iter().any(|c| c.is_empty()) {
            return Err(SvError::InvalidArtifact("trace has no draws".into()));
        }
        if self.feature_names.len() != self.n_morph + self.n_stim {
            return Err(SvError::InvalidArtifact(format!(
                "{} feature names for {} coefficients",
                self.feature_names.len(),
                self.n_morph + self.n_stim
            )));
        }
        for chain in &self.chains {
            let shapes_ok = chain.beta.iter().all(|b| b.len() == self.n_morph)
                && chain.gamma.iter().all(|g| g.len() == self.n_stim)
                && chain.beta.len() == chain.len()
                && chain.gamma.len() == chain.len()
                && chain.b.len() == chain.len();
            if !shapes_ok {
                return Err(SvError::InvalidArtifact(format!(
                    "chain {} has inconsistent draw shapes",
                    chain.chain
                )));
            }
            if chain.b.iter().any(|b| !(*b > 0.0)) {
                return Err(SvError::InvalidArtifact(format!(
                    "chain {} has a non-positive scale draw",
                    chain.chain
                )));
            }
        }
        let n = self.observed.len();
        if self.observed.morph.len() != n || self.observed.stim.len() != n {
            return Err(SvError::InvalidArtifact(
                "observed design and target lengths differ".into(),
            ));
        }
        Ok(())
    }

    pub fn draws_per_chain(&self) -> usize {
        self.chains.iter().map(ChainDraws::len).min().unwrap_or(0)
    }

    pub fn total_draws(&self) -> usize {
        self.chains.iter().map(ChainDraws::len).sum()
    }

    pub fn total_divergences(&self) -> usize {
        self.chains.iter().map(ChainDraws::divergences).sum()
    }

    /// Every draw across chains, chain-major.
    pub fn iter_params(&self) -> impl Iterator<Item = ModelParameters> + '_ {
        self.chains
            .iter()
            .flat_map(|c| (0..c.len()).map(move |d| c.params(d)))
    }

    /// Parameter names in flat order: `alpha`, `beta[..]`, `gamma[..]`, `b`.
    pub fn parameter_names(&self) -> Vec<String> {
        let mut names = vec!["alpha".to_string()];
        let (morph, stim) = self.feature_names.split_at(self.n_morph);
        names.extend(morph.iter().map(|f| format!("beta[{f}]")));
        names.extend(stim.iter().map(|f| format!("gamma[{f}]")));
        names.push("b".to_string());
        names
    }

    /// Draws of flat parameter `index` (see [`Self::parameter_names`]),
    /// one vector per chain.
    pub fn parameter_chains(&self, index: usize) -> Vec<Vec<f64>> {
        let n_morph = self.n_morph;
        let n_stim = self.n_stim;
        self.chains
            .iter()
            .map(|c| match index {
                0 => c.alpha.clone(),
                i if i <= n_morph => c.beta.iter().map(|b| b[i - 1]).collect(),
                i if i <= n_morph + n_stim => {
                    c.gamma.iter().map(|g| g[i - 1 - n_morph]).collect()
                }
                _ => c.b.clone(),
            })
            .collect()
    }

    /// Arithmetic means over the flattened chain x draw ensemble.
    pub fn posterior_means(&self) -> PosteriorMeans {
        let flat_mean = |index: usize| -> f64 {
            self.parameter_chains(index)
                .iter()
                .flatten()
                .mean()
        };
        PosteriorMeans {
            alpha: flat_mean(0),
            beta: (1..=self.n_morph).map(flat_mean).collect(),
            gamma: (1..=self.n_stim).map(|k| flat_mean(self.n_morph + k)).collect(),
        }
    }

    /// Rebuild the model over the stored design.
    pub fn model(&self) -> SvResult<RegressionModel> {
        let n = self.observed.len();
        let to_matrix = |rows: &[Vec<f64>], ncols: usize| -> SvResult<DMatrix<f64>> {
            if rows.iter().any(|r| r.len() != ncols) {
                return Err(SvError::InvalidArtifact(
                    "observed design has ragged rows".into(),
                ));
            }
            Ok(DMatrix::from_fn(n, ncols, |i, j| rows[i][j]))
        };
        let morph = to_matrix(&self.observed.morph, self.n_morph)?;
        let stim = to_matrix(&self.observed.stim, self.n_stim)?;
        let y = DVector::from_column_slice(&self.observed.y);
        Ok(RegressionModel::new(morph, stim, y)?.with_priors(self.priors))
    }

    /// Laplace log likelihood of every observation under every draw,
    /// indexed `[draw][row]` with draws chain-major.
    pub fn pointwise_log_likelihood(&self) -> SvResult<Vec<Vec<f64>>> {
        let model = self.model()?;
        Ok(self
            .iter_params()
            .map(|p| model.pointwise_log_likelihood(&p))
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use feature_prep::FeaturePreprocessor;
    use sv_core::{RawRecord, RawTable};

    pub(crate) fn toy_prepared() -> PreparedFeatures {
        let columns = vec!["m1", "m2", "s1", "y", "system"];
        let values = [
            (0.1, 1.0, 0.0, 2.0),
            (0.4, 0.5, 1.0, 2.6),
            (0.9, 0.2, 0.0, 3.1),
            (1.3, -0.1, 1.0, 3.3),
            (1.8, -0.4, 0.0, 4.2),
            (2.2, -0.9, 1.0, 4.4),
        ];
        let records = values
            .iter()
            .enumerate()
            .map(|(i, (m1, m2, s1, y))| {
                RawRecord::new(i)
                    .with_cell("m1", Some(&m1.to_string()))
                    .with_cell("m2", Some(&m2.to_string()))
                    .with_cell("s1", Some(&s1.to_string()))
                    .with_cell("y", Some(&y.to_string()))
                    .with_cell("system", Some(&format!("film-{i}")))
            })
            .collect();
        let table = RawTable {
            columns: columns.into_iter().map(String::from).collect(),
            records,
        };
        FeaturePreprocessor::with_columns(&["m1", "m2"], &["s1"], "y", None)
            .prepare(&table)
            .unwrap()
    }

    /// A trace with hand-written draws over [`toy_prepared`].
    pub(crate) fn toy_trace() -> PosteriorTrace {
        let prepared = toy_prepared();
        let model = RegressionModel::from_features(&prepared.matrix).unwrap();
        let stats = DrawStats {
            divergent: false,
            accept_stat: 0.9,
            tree_depth: 2,
            n_leapfrog: 3,
            energy: 1.0,
            log_density: -1.0,
        };
        let chain = |id: usize, draws: Vec<Vec<f64>>| Chain {
            chain_id: id,
            stats: vec![stats; draws.len()],
            draws,
            step_size: 0.1,
            inv_mass: vec![1.0; 4],
        };
        let output = SampleOutput {
            chains: vec![
                chain(0, vec![vec![0.1, 1.0, -0.5, 0.2, 0.0], vec![0.3, 1.2, -0.3, 0.0, -1.0]]),
                chain(1, vec![vec![-0.2, 0.8, -0.4, 0.1, 0.5], vec![0.2, 1.0, -0.6, 0.1, 0.2]]),
            ],
            warnings: Vec::new(),
        };
        PosteriorTrace::from_sample(
            &output,
            &model,
            &prepared,
            vec!["m1".into(), "m2".into(), "s1".into()],
            &SamplerConfig::default(),
        )
    }

    #[test]
    fn test_names_and_layout() {
        let trace = toy_trace();
        assert_eq!(
            trace.parameter_names(),
            vec!["alpha", "beta[m1]", "beta[m2]", "gamma[s1]", "b"]
        );
        assert_eq!(trace.total_draws(), 4);
        assert_eq!(trace.draws_per_chain(), 2);
        assert_eq!(trace.parameter_chains(3), vec![vec![0.2, 0.0], vec![0.1, 0.1]]);
        assert_eq!(trace.observed.labels[2]["system"], "film-2");
    }

    #[test]
    fn test_scale_is_constrained() {
        let trace = toy_trace();
        approx::assert_relative_eq!(trace.chains[0].b[1], (-1.0f64).exp());
        assert!(trace.iter_params().all(|p| p.b > 0.0));
    }

    #[test]
    fn test_posterior_means_flatten_chains() {
        let means = toy_trace().posterior_means();
        approx::assert_relative_eq!(means.alpha, 0.1, epsilon = 1e-12);
        approx::assert_relative_eq!(means.beta[0], 1.0, epsilon = 1e-12);
        approx::assert_relative_eq!(means.beta[1], -0.45, epsilon = 1e-12);
        approx::assert_relative_eq!(means.gamma[0], 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_save_load_preserves_draws() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("trace.json");
        let trace = toy_trace();
        trace.save(&path).unwrap();

        let loaded = PosteriorTrace::load(&path).unwrap();
        assert_eq!(loaded.chains, trace.chains);
        assert_eq!(loaded.observed, trace.observed);
        assert_eq!(loaded.scaler, trace.scaler);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_missing_trace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        assert!(matches!(
            PosteriorTrace::load(&path),
            Err(SvError::TraceNotFound(p)) if p == path
        ));
    }

    #[test]
    fn test_rejects_foreign_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.json");
        let mut trace = toy_trace();
        trace.format = "something-else".into();
        trace.save(&path).unwrap();
        assert!(matches!(
            PosteriorTrace::load(&path),
            Err(SvError::InvalidArtifact(_))
        ));
    }

    #[test]
    fn test_pointwise_log_likelihood_shape() {
        let trace = toy_trace();
        let ll = trace.pointwise_log_likelihood().unwrap();
        assert_eq!(ll.len(), 4);
        assert!(ll.iter().all(|row| row.len() == 6));
        assert!(ll.iter().flatten().all(|v| v.is_finite()));
    }

    #[test]
    fn test_stored_design_rebuilds_model() {
        let prepared = toy_prepared();
        let model = toy_trace().model().unwrap();
        assert_eq!(model.morph(), &prepared.matrix.morph);
        assert_eq!(model.stim(), &prepared.matrix.stim);
        assert_eq!(model.observed(), &prepared.matrix.y);
    }
}
