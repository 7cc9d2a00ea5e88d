//! Reduce a posterior trace to the point-estimate artifact served online.
//!
//! Freezing never re-runs MCMC: the scaler and target statistics are refit
//! from the training table and combined with the posterior means
//! of an existing trace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use bayes_model::PosteriorTrace;
use feature_prep::{load_table, FeaturePreprocessor};
use sv_core::{FrozenArtifact, RawTable, SvError, SvResult};

pub const PROVENANCE_FILE: &str = "provenance.json";

/// Where a frozen artifact came from. Informational only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub trace_path: PathBuf,
    pub trace_sha256: String,
    pub data_path: PathBuf,
    pub frozen_at: DateTime<Utc>,
    pub chains: usize,
    pub draws: usize,
    pub divergences: usize,
}

#[derive(Debug, Clone)]
pub struct FreezeReport {
    pub artifact: FrozenArtifact,
    pub provenance: Provenance,
    pub written: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct PosteriorFreezer {
    preprocessor: FeaturePreprocessor,
}

impl PosteriorFreezer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_preprocessor(preprocessor: FeaturePreprocessor) -> Self {
        Self { preprocessor }
    }

    /// Combine refit standardization with the trace's posterior means.
    pub fn freeze_from_trace(
        &self,
        trace: &PosteriorTrace,
        table: &RawTable,
    ) -> SvResult<FrozenArtifact> {
        let expected = self.preprocessor.predictor_columns();
        if trace.feature_names != expected {
            return Err(SvError::InvalidArtifact(format!(
                "trace was fit on features {:?}, expected {:?}",
                trace.feature_names, expected
            )));
        }

        let dataset = self.preprocessor.clean(table)?;
        let scaler = self.preprocessor.fit_scaler(&dataset)?;
        let target = self.preprocessor.fit_target_stats(&dataset)?;
        if scaler != trace.scaler || target != trace.target {
            tracing::warn!(
                "Standardization refit from the table differs from the one stored in the trace"
            );
        }

        let posterior = trace.posterior_means();
        tracing::info!(
            "Posterior means over {} draws: alpha={:.4}",
            trace.total_draws(),
            posterior.alpha
        );
        FrozenArtifact::new(scaler, target, posterior)
    }

    /// Load the trace and table, freeze, and write the artifact plus
    /// provenance into `out_dir`. Nothing is written if any step fails.
    pub fn freeze(
        &self,
        trace_path: impl AsRef<Path>,
        data_path: impl AsRef<Path>,
        out_dir: impl AsRef<Path>,
    ) -> SvResult<FreezeReport> {
        let trace_path = trace_path.as_ref();
        let data_path = data_path.as_ref();
        let out_dir = out_dir.as_ref();

        let trace = PosteriorTrace::load(trace_path)?;
        let table = load_table(data_path)?;
        let artifact = self.freeze_from_trace(&trace, &table)?;

        let provenance = Provenance {
            trace_path: trace_path.to_path_buf(),
            trace_sha256: file_sha256(trace_path)?,
            data_path: data_path.to_path_buf(),
            frozen_at: Utc::now(),
            chains: trace.chains.len(),
            draws: trace.total_draws(),
            divergences: trace.total_divergences(),
        };

        let mut written = artifact.save_to_dir(out_dir)?;
        let provenance_path = out_dir.join(PROVENANCE_FILE);
        let tmp = provenance_path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&provenance)?)?;
        fs::rename(&tmp, &provenance_path)?;
        written.push(provenance_path);

        tracing::info!("Frozen artifact written to {}", out_dir.display());
        Ok(FreezeReport {
            artifact,
            provenance,
            written,
        })
    }
}

fn file_sha256(path: &Path) -> SvResult<String> {
    let bytes = fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nuts_sampler::{CancelFlag, SamplerConfig};
    use std::fmt::Write as _;
    use sv_core::Predictor;
    use tempfile::TempDir;

    fn preprocessor() -> FeaturePreprocessor {
        FeaturePreprocessor::with_columns(&["m1", "m2"], &["s1", "flag"], "y", Some("flag"))
    }

    /// Writes a small table and a short trace fit on it.
    fn fixture() -> (TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let mut csv = String::from("m1,m2,s1,flag,y,system\n");
        for i in 0..24 {
            let m1 = (i as f64 * 0.37).sin() * 2.0;
            let m2 = (i as f64 * 0.91).cos();
            let s1 = (i % 4) as f64;
            let flag = if i % 6 == 5 { 1 } else { 0 };
            let y = 10.0 + 3.0 * m1 - m2 + 0.2 * s1 + ((i * 7) % 5) as f64 * 0.05;
            writeln!(csv, "{m1},{m2},{s1},{flag},{y},film{i}").unwrap();
        }
        // An incomplete row that cleaning drops.
        csv.push_str("1.0,,0,0,12.0,broken\n");
        let data_path = dir.path().join("films.csv");
        fs::write(&data_path, csv).unwrap();

        let prepared = preprocessor()
            .prepare(&load_table(&data_path).unwrap())
            .unwrap();
        let config = SamplerConfig {
            num_chains: 2,
            num_draws: 50,
            num_warmup: 50,
            target_accept: 0.8,
            ..SamplerConfig::default()
        };
        let trace = bayes_model::fit(
            &prepared,
            preprocessor().predictor_columns(),
            &config,
            &CancelFlag::new(),
        )
        .unwrap();
        let trace_path = dir.path().join("trace.json");
        trace.save(&trace_path).unwrap();
        (dir, trace_path, data_path)
    }

    #[test]
    fn test_freeze_writes_loadable_artifact() {
        let (dir, trace_path, data_path) = fixture();
        let out = dir.path().join("artifacts");
        let freezer = PosteriorFreezer::with_preprocessor(preprocessor());
        let report = freezer.freeze(&trace_path, &data_path, &out).unwrap();

        assert_eq!(report.written.len(), 4);
        assert!(out.join(PROVENANCE_FILE).is_file());
        assert_eq!(report.provenance.chains, 2);
        assert_eq!(report.provenance.draws, 100);
        assert_eq!(report.provenance.trace_sha256.len(), 64);

        let loaded = FrozenArtifact::load_from_dir(&out).unwrap();
        assert_eq!(loaded, report.artifact);
        assert_eq!(loaded.posterior.beta.len(), 2);
        assert_eq!(loaded.posterior.gamma.len(), 2);

        // The flag column is constant after filtering.
        assert_eq!(loaded.scaler.scale[3], 1.0);
        assert_eq!(loaded.scaler.mean[3], 0.0);

        let predictor = Predictor::new(loaded).unwrap();
        let prediction = predictor.predict(&[1.0, 0.0, 1.0, 0.0]).unwrap();
        assert!(prediction.is_finite());
    }

    #[test]
    fn test_freeze_matches_trace_means() {
        let (_dir, trace_path, data_path) = fixture();
        let trace = PosteriorTrace::load(&trace_path).unwrap();
        let table = load_table(&data_path).unwrap();
        let artifact = PosteriorFreezer::with_preprocessor(preprocessor())
            .freeze_from_trace(&trace, &table)
            .unwrap();

        let flat: Vec<f64> = trace.chains.iter().flat_map(|c| c.alpha.clone()).collect();
        let mean = flat.iter().sum::<f64>() / flat.len() as f64;
        assert_relative_eq!(artifact.posterior.alpha, mean, epsilon = 1e-12);
        assert_eq!(artifact.scaler, trace.scaler);
        assert_eq!(artifact.target, trace.target);
    }

    #[test]
    fn test_freezing_twice_is_idempotent() {
        let (dir, trace_path, data_path) = fixture();
        let freezer = PosteriorFreezer::with_preprocessor(preprocessor());
        let first = freezer
            .freeze(&trace_path, &data_path, dir.path().join("a"))
            .unwrap();
        let second = freezer
            .freeze(&trace_path, &data_path, dir.path().join("b"))
            .unwrap();
        assert_eq!(first.artifact, second.artifact);
        assert_eq!(
            first.provenance.trace_sha256,
            second.provenance.trace_sha256
        );
    }

    #[test]
    fn test_missing_trace_writes_nothing() {
        let (dir, _trace_path, data_path) = fixture();
        let out = dir.path().join("out");
        let missing = dir.path().join("nope.json");
        let err = PosteriorFreezer::with_preprocessor(preprocessor())
            .freeze(&missing, &data_path, &out)
            .unwrap_err();
        assert!(matches!(err, SvError::TraceNotFound(p) if p == missing));
        assert!(!out.exists());
    }

    #[test]
    fn test_feature_layout_mismatch() {
        let (_dir, trace_path, data_path) = fixture();
        let trace = PosteriorTrace::load(&trace_path).unwrap();
        let table = load_table(&data_path).unwrap();
        let other = FeaturePreprocessor::with_columns(&["m1"], &["m2", "s1", "flag"], "y", Some("flag"));
        let err = PosteriorFreezer::with_preprocessor(other)
            .freeze_from_trace(&trace, &table)
            .unwrap_err();
        assert!(matches!(err, SvError::InvalidArtifact(_)));
    }
}
