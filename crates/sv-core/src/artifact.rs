//! Frozen serving artifact: scaler, target normalization and posterior means.
//!
//! Persisted as three independently loadable JSON documents in one
//! directory. An artifact is only valid when all three load and agree on the
//! feature count.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{SvError, SvResult};

pub const SCALER_FILE: &str = "scaler.json";
pub const TARGET_STATS_FILE: &str = "target_stats.json";
pub const POSTERIOR_FILE: &str = "posterior.json";

/// Per-column affine standardization `(x - mean) / scale`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerParams {
    pub columns: Vec<String>,
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl ScalerParams {
    /// Mean 0, scale 1 for every column.
    pub fn identity(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            mean: vec![0.0; columns.len()],
            scale: vec![1.0; columns.len()],
        }
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, raw: &[f64]) -> SvResult<Vec<f64>> {
        if raw.len() != self.n_features() {
            return Err(SvError::FeatureShape {
                expected: self.n_features(),
                actual: raw.len(),
            });
        }
        Ok(raw
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (m, s))| (x - m) / s)
            .collect())
    }

    fn validate(&self) -> SvResult<()> {
        if self.mean.len() != self.scale.len() || self.mean.len() != self.columns.len() {
            return Err(SvError::InvalidArtifact(format!(
                "scaler has {} columns, {} means and {} scales",
                self.columns.len(),
                self.mean.len(),
                self.scale.len()
            )));
        }
        if let Some(j) = self
            .scale
            .iter()
            .position(|s| !s.is_finite() || *s == 0.0)
        {
            return Err(SvError::InvalidArtifact(format!(
                "scaler column '{}' has unusable scale {}",
                self.columns[j], self.scale[j]
            )));
        }
        if self.mean.iter().any(|m| !m.is_finite()) {
            return Err(SvError::InvalidArtifact("scaler mean is not finite".into()));
        }
        Ok(())
    }
}

/// Target normalization: `normalized = (raw - mean) / std`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetStats {
    pub mean: f64,
    pub std: f64,
}

impl TargetStats {
    pub fn normalize(&self, raw: f64) -> f64 {
        (raw - self.mean) / self.std
    }

    pub fn denormalize(&self, normalized: f64) -> f64 {
        normalized * self.std + self.mean
    }
}

/// Posterior means of the regression coefficients (normalized units).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosteriorMeans {
    pub alpha: f64,
    pub beta: Vec<f64>,
    pub gamma: Vec<f64>,
}

impl PosteriorMeans {
    pub fn n_features(&self) -> usize {
        self.beta.len() + self.gamma.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrozenArtifact {
    pub scaler: ScalerParams,
    pub target: TargetStats,
    pub posterior: PosteriorMeans,
}

impl FrozenArtifact {
    pub fn new(
        scaler: ScalerParams,
        target: TargetStats,
        posterior: PosteriorMeans,
    ) -> SvResult<Self> {
        let artifact = Self {
            scaler,
            target,
            posterior,
        };
        artifact.validate()?;
        Ok(artifact)
    }

    pub fn validate(&self) -> SvResult<()> {
        self.scaler.validate()?;
        if !self.target.std.is_finite() || self.target.std <= 0.0 || !self.target.mean.is_finite()
        {
            return Err(SvError::InvalidArtifact(format!(
                "target normalization is unusable (mean {}, std {})",
                self.target.mean, self.target.std
            )));
        }
        if self.posterior.n_features() != self.scaler.n_features() {
            return Err(SvError::InvalidArtifact(format!(
                "posterior has {} coefficients but scaler has {} columns",
                self.posterior.n_features(),
                self.scaler.n_features()
            )));
        }
        let coefficients = std::iter::once(&self.posterior.alpha)
            .chain(&self.posterior.beta)
            .chain(&self.posterior.gamma);
        if coefficients.into_iter().any(|c| !c.is_finite()) {
            return Err(SvError::InvalidArtifact(
                "posterior means contain non-finite values".into(),
            ));
        }
        Ok(())
    }

    /// Load all three components; fails if any is missing or they disagree.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> SvResult<Self> {
        let dir = dir.as_ref();
        let scaler: ScalerParams = read_json(&dir.join(SCALER_FILE))?;
        let target: TargetStats = read_json(&dir.join(TARGET_STATS_FILE))?;
        let posterior: PosteriorMeans = read_json(&dir.join(POSTERIOR_FILE))?;
        let artifact = Self::new(scaler, target, posterior)?;
        tracing::info!(
            "Loaded frozen artifact from {} ({} features)",
            dir.display(),
            artifact.scaler.n_features()
        );
        Ok(artifact)
    }

    /// Write the three components. Every component is serialized to a
    /// temporary file first; nothing is renamed into place unless all three
    /// were written.
    ///
    /// The files are then renamed into place one after another. If a rename
    /// fails, the components already renamed stay replaced and the remaining
    /// temporary files are removed, so a reader may see a mix of old and new
    /// components until the next successful save.
    pub fn save_to_dir(&self, dir: impl AsRef<Path>) -> SvResult<Vec<PathBuf>> {
        self.validate()?;
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let staged = [
            (SCALER_FILE, serde_json::to_vec_pretty(&self.scaler)?),
            (TARGET_STATS_FILE, serde_json::to_vec_pretty(&self.target)?),
            (POSTERIOR_FILE, serde_json::to_vec_pretty(&self.posterior)?),
        ];

        let mut pending = Vec::with_capacity(staged.len());
        for (name, bytes) in &staged {
            let tmp = dir.join(format!("{name}.tmp"));
            if let Err(e) = fs::write(&tmp, bytes) {
                for (written, _) in &pending {
                    let _ = fs::remove_file(written);
                }
                return Err(e.into());
            }
            pending.push((tmp, dir.join(name)));
        }

        let mut finals = Vec::with_capacity(pending.len());
        for (i, (tmp, target)) in pending.iter().enumerate() {
            if let Err(e) = fs::rename(tmp, target) {
                for (leftover, _) in &pending[i..] {
                    let _ = fs::remove_file(leftover);
                }
                tracing::error!(
                    "Artifact save to {} stopped after {} of {} components: {}",
                    dir.display(),
                    i,
                    pending.len(),
                    e
                );
                return Err(e.into());
            }
            finals.push(target.clone());
        }
        Ok(finals)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> SvResult<T> {
    let bytes = fs::read(path).map_err(|e| {
        SvError::InvalidArtifact(format!("cannot read {}: {e}", path.display()))
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{predictor_columns, N_MORPH, N_STIM};

    fn sample_artifact() -> FrozenArtifact {
        FrozenArtifact::new(
            ScalerParams {
                columns: predictor_columns().iter().map(|c| c.to_string()).collect(),
                mean: (0..N_MORPH + N_STIM).map(|j| j as f64).collect(),
                scale: vec![2.0; N_MORPH + N_STIM],
            },
            TargetStats {
                mean: 50.0,
                std: 10.0,
            },
            PosteriorMeans {
                alpha: 0.2,
                beta: vec![0.1; N_MORPH],
                gamma: vec![-0.3; N_STIM],
            },
        )
        .unwrap()
    }

    #[test]
    fn test_save_then_load_restores_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = sample_artifact();

        let written = artifact.save_to_dir(dir.path()).unwrap();
        assert_eq!(written.len(), 3);
        assert!(dir.path().join(SCALER_FILE).exists());
        assert!(!dir.path().join(format!("{SCALER_FILE}.tmp")).exists());

        let loaded = FrozenArtifact::load_from_dir(dir.path()).unwrap();
        assert_eq!(loaded, artifact);
    }

    #[test]
    fn test_failed_rename_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        // A non-empty directory where the last component should land.
        let blocker = dir.path().join(POSTERIOR_FILE);
        fs::create_dir(&blocker).unwrap();
        fs::write(blocker.join("keep"), b"x").unwrap();

        assert!(sample_artifact().save_to_dir(dir.path()).is_err());
        for name in [SCALER_FILE, TARGET_STATS_FILE, POSTERIOR_FILE] {
            assert!(!dir.path().join(format!("{name}.tmp")).exists());
        }
        assert!(blocker.is_dir());
        assert!(FrozenArtifact::load_from_dir(dir.path()).is_err());
    }

    #[test]
    fn test_load_fails_when_component_missing() {
        let dir = tempfile::tempdir().unwrap();
        sample_artifact().save_to_dir(dir.path()).unwrap();
        fs::remove_file(dir.path().join(POSTERIOR_FILE)).unwrap();

        let err = FrozenArtifact::load_from_dir(dir.path()).unwrap_err();
        assert!(matches!(err, SvError::InvalidArtifact(_)));
    }

    #[test]
    fn test_coefficient_count_must_match_scaler() {
        let mut artifact = sample_artifact();
        artifact.posterior.gamma.pop();
        assert!(matches!(
            artifact.validate(),
            Err(SvError::InvalidArtifact(_))
        ));
    }

    #[test]
    fn test_zero_scale_rejected() {
        let mut artifact = sample_artifact();
        artifact.scaler.scale[3] = 0.0;
        assert!(artifact.validate().is_err());
    }

    #[test]
    fn test_target_stats_denormalize_inverts_normalize() {
        let stats = TargetStats {
            mean: 12.5,
            std: 3.0,
        };
        let raw = 17.25;
        approx::assert_relative_eq!(stats.denormalize(stats.normalize(raw)), raw);
    }
}
