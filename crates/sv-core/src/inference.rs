use crate::artifact::FrozenArtifact;
use crate::error::{SvError, SvResult};

/// Point predictions from a frozen posterior summary.
///
/// Holds the artifact immutably; `predict` is a pure function of the artifact
/// and the input vector, so a single instance can be shared across threads.
#[derive(Debug, Clone)]
pub struct Predictor {
    artifact: FrozenArtifact,
}

impl Predictor {
    pub fn new(artifact: FrozenArtifact) -> SvResult<Self> {
        artifact.validate()?;
        Ok(Self { artifact })
    }

    pub fn artifact(&self) -> &FrozenArtifact {
        &self.artifact
    }

    /// Number of raw features a request must carry.
    pub fn n_features(&self) -> usize {
        self.artifact.scaler.n_features()
    }

    /// Normalized prediction for an already standardized vector.
    pub fn predict_standardized(&self, x: &[f64]) -> SvResult<f64> {
        let posterior = &self.artifact.posterior;
        if x.len() != posterior.n_features() {
            return Err(SvError::FeatureShape {
                expected: posterior.n_features(),
                actual: x.len(),
            });
        }
        let (morph, stim) = x.split_at(posterior.beta.len());
        let morph_term: f64 = morph.iter().zip(&posterior.beta).map(|(x, b)| x * b).sum();
        let stim_term: f64 = stim.iter().zip(&posterior.gamma).map(|(x, g)| x * g).sum();
        Ok(posterior.alpha + morph_term + stim_term)
    }

    /// Prediction in physical target units for a raw feature vector
    /// (morphology values followed by stimulus values).
    pub fn predict(&self, raw: &[f64]) -> SvResult<f64> {
        let standardized = self.artifact.scaler.transform(raw)?;
        let normalized = self.predict_standardized(&standardized)?;
        Ok(self.artifact.target.denormalize(normalized))
    }
}
