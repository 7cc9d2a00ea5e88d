use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use feature_prep::FeatureMatrix;
use nuts_sampler::LogDensity;
use sv_core::{SvError, SvResult};

use crate::distributions::{
    half_cauchy_lpdf, half_cauchy_lpdf_dx, laplace_lpdf, laplace_lpdf_dmu, normal_lpdf,
    normal_lpdf_dx,
};

/// Prior hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Priors {
    pub alpha_sd: f64,
    pub beta_sd: f64,
    pub gamma_sd: f64,
    /// Scale of the HalfCauchy prior on the Laplace scale `b`.
    pub b_scale: f64,
}

impl Default for Priors {
    fn default() -> Self {
        Self {
            alpha_sd: 1.0,
            beta_sd: 0.5,
            gamma_sd: 0.5,
            b_scale: 0.7,
        }
    }
}

/// One point in constrained parameter space.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParameters {
    pub alpha: f64,
    pub beta: Vec<f64>,
    pub gamma: Vec<f64>,
    pub b: f64,
}

impl ModelParameters {
    /// Unpack `[alpha, beta.., gamma.., ln b]`.
    pub fn from_unconstrained(theta: &[f64], n_morph: usize, n_stim: usize) -> Self {
        let beta_end = 1 + n_morph;
        let gamma_end = beta_end + n_stim;
        Self {
            alpha: theta[0],
            beta: theta[1..beta_end].to_vec(),
            gamma: theta[beta_end..gamma_end].to_vec(),
            b: theta[gamma_end].exp(),
        }
    }

    pub fn to_unconstrained(&self) -> Vec<f64> {
        let mut theta = Vec::with_capacity(2 + self.beta.len() + self.gamma.len());
        theta.push(self.alpha);
        theta.extend_from_slice(&self.beta);
        theta.extend_from_slice(&self.gamma);
        theta.push(self.b.ln());
        theta
    }
}

/// Bayesian linear regression with a Laplace likelihood:
///
/// ```text
/// alpha ~ Normal(0, 1)
/// beta_j ~ Normal(0, 0.5)          j = 1..n_morph
/// gamma_k ~ Normal(0, 0.5)         k = 1..n_stim
/// b ~ HalfCauchy(0.7)
/// y_i ~ Laplace(alpha + Morph_i . beta + Stim_i . gamma, b)
/// ```
///
/// The sampler sees `u = ln b`, so the log density includes the Jacobian
/// term `+u` and `b > 0` holds for every draw.
#[derive(Debug, Clone)]
pub struct RegressionModel {
    morph: DMatrix<f64>,
    stim: DMatrix<f64>,
    y: DVector<f64>,
    priors: Priors,
}

impl RegressionModel {
    pub fn new(morph: DMatrix<f64>, stim: DMatrix<f64>, y: DVector<f64>) -> SvResult<Self> {
        let n = y.len();
        if n == 0 {
            return Err(SvError::DegenerateData("no observations".into()));
        }
        if morph.nrows() != n || stim.nrows() != n {
            return Err(SvError::DegenerateData(format!(
                "design has {} / {} rows but target has {}",
                morph.nrows(),
                stim.nrows(),
                n
            )));
        }
        Ok(Self {
            morph,
            stim,
            y,
            priors: Priors::default(),
        })
    }

    pub fn from_features(features: &FeatureMatrix) -> SvResult<Self> {
        Self::new(
            features.morph.clone(),
            features.stim.clone(),
            features.y.clone(),
        )
    }

    pub fn with_priors(mut self, priors: Priors) -> Self {
        self.priors = priors;
        self
    }

    pub fn priors(&self) -> &Priors {
        &self.priors
    }

    pub fn n_obs(&self) -> usize {
        self.y.len()
    }

    pub fn n_morph(&self) -> usize {
        self.morph.ncols()
    }

    pub fn n_stim(&self) -> usize {
        self.stim.ncols()
    }

    pub fn observed(&self) -> &DVector<f64> {
        &self.y
    }

    pub fn morph(&self) -> &DMatrix<f64> {
        &self.morph
    }

    pub fn stim(&self) -> &DMatrix<f64> {
        &self.stim
    }

    /// `mu = alpha + Morph beta + Stim gamma`, one entry per row.
    pub fn linear_predictor(&self, alpha: f64, beta: &[f64], gamma: &[f64]) -> DVector<f64> {
        let beta = DVector::from_column_slice(beta);
        let gamma = DVector::from_column_slice(gamma);
        (&self.morph * beta + &self.stim * gamma).add_scalar(alpha)
    }

    pub fn unpack(&self, theta: &[f64]) -> ModelParameters {
        ModelParameters::from_unconstrained(theta, self.n_morph(), self.n_stim())
    }

    /// Laplace log likelihood of each observation under `params`.
    pub fn pointwise_log_likelihood(&self, params: &ModelParameters) -> Vec<f64> {
        let mu = self.linear_predictor(params.alpha, &params.beta, &params.gamma);
        self.y
            .iter()
            .zip(mu.iter())
            .map(|(y, m)| laplace_lpdf(*y, *m, params.b))
            .collect()
    }
}

impl LogDensity for RegressionModel {
    fn dim(&self) -> usize {
        2 + self.n_morph() + self.n_stim()
    }

    fn log_density_and_gradient(&self, theta: &[f64], grad: &mut [f64]) -> f64 {
        let n_morph = self.n_morph();
        let n_stim = self.n_stim();
        let params = self.unpack(theta);
        let u = theta[1 + n_morph + n_stim];
        let b = params.b;
        let pr = &self.priors;

        let mut lp = normal_lpdf(params.alpha, 0.0, pr.alpha_sd);
        lp += params
            .beta
            .iter()
            .map(|v| normal_lpdf(*v, 0.0, pr.beta_sd))
            .sum::<f64>();
        lp += params
            .gamma
            .iter()
            .map(|v| normal_lpdf(*v, 0.0, pr.gamma_sd))
            .sum::<f64>();
        lp += half_cauchy_lpdf(b, pr.b_scale) + u;

        let mu = self.linear_predictor(params.alpha, &params.beta, &params.gamma);
        let mut dmu = DVector::zeros(self.n_obs());
        let mut abs_resid = 0.0;
        for i in 0..self.n_obs() {
            lp += laplace_lpdf(self.y[i], mu[i], b);
            dmu[i] = laplace_lpdf_dmu(self.y[i], mu[i], b);
            abs_resid += (self.y[i] - mu[i]).abs();
        }

        grad[0] = normal_lpdf_dx(params.alpha, 0.0, pr.alpha_sd) + dmu.sum();
        let morph_grad = self.morph.tr_mul(&dmu);
        for j in 0..n_morph {
            grad[1 + j] = normal_lpdf_dx(params.beta[j], 0.0, pr.beta_sd) + morph_grad[j];
        }
        let stim_grad = self.stim.tr_mul(&dmu);
        for k in 0..n_stim {
            grad[1 + n_morph + k] =
                normal_lpdf_dx(params.gamma[k], 0.0, pr.gamma_sd) + stim_grad[k];
        }
        // Chain rule through b = exp(u), plus the Jacobian's constant 1.
        let n = self.n_obs() as f64;
        grad[1 + n_morph + n_stim] =
            b * half_cauchy_lpdf_dx(b, pr.b_scale) + 1.0 - n + abs_resid / b;

        if lp.is_nan() {
            f64::NEG_INFINITY
        } else {
            lp
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn toy_model() -> RegressionModel {
        let morph = DMatrix::from_row_slice(5, 2, &[
            0.5, -1.0, //
            -0.3, 0.2, //
            1.2, 0.4, //
            -1.4, 0.9, //
            0.0, -0.5,
        ]);
        let stim = DMatrix::from_row_slice(5, 1, &[1.0, -1.0, 0.5, -0.5, 0.0]);
        let y = DVector::from_vec(vec![0.3, -0.8, 1.1, -0.2, 0.05]);
        RegressionModel::new(morph, stim, y).unwrap()
    }

    #[test]
    fn test_dim() {
        let model = toy_model();
        assert_eq!(model.dim(), 5);
        assert_eq!(model.n_obs(), 5);
    }

    #[test]
    fn test_log_density_matches_direct_sum() {
        let model = toy_model();
        let theta = [0.1, 0.4, -0.2, 0.3, (0.6f64).ln()];
        let mut grad = [0.0; 5];
        let lp = model.log_density_and_gradient(&theta, &mut grad);

        let params = model.unpack(&theta);
        let expected = normal_lpdf(0.1, 0.0, 1.0)
            + normal_lpdf(0.4, 0.0, 0.5)
            + normal_lpdf(-0.2, 0.0, 0.5)
            + normal_lpdf(0.3, 0.0, 0.5)
            + half_cauchy_lpdf(0.6, 0.7)
            + 0.6f64.ln()
            + model.pointwise_log_likelihood(&params).iter().sum::<f64>();
        assert_relative_eq!(lp, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_gradient_matches_finite_differences() {
        let model = toy_model();
        let theta = vec![0.15, 0.35, -0.25, 0.2, -0.4];
        let mut grad = vec![0.0; 5];
        model.log_density_and_gradient(&theta, &mut grad);

        let h = 1e-6;
        let mut scratch = vec![0.0; 5];
        for i in 0..theta.len() {
            let mut plus = theta.clone();
            let mut minus = theta.clone();
            plus[i] += h;
            minus[i] -= h;
            let fd = (model.log_density_and_gradient(&plus, &mut scratch)
                - model.log_density_and_gradient(&minus, &mut scratch))
                / (2.0 * h);
            assert_relative_eq!(grad[i], fd, epsilon = 1e-5, max_relative = 1e-5);
        }
    }

    #[test]
    fn test_unconstrained_round_trip_keeps_b_positive() {
        let params = ModelParameters {
            alpha: 0.2,
            beta: vec![1.0, 2.0],
            gamma: vec![-1.0],
            b: 0.05,
        };
        let theta = params.to_unconstrained();
        assert!(theta[4] < 0.0);
        let back = ModelParameters::from_unconstrained(&theta, 2, 1);
        assert_relative_eq!(back.b, 0.05, epsilon = 1e-15);
        assert_eq!(back.beta, params.beta);

        let extreme = ModelParameters::from_unconstrained(&[0.0, 0.0, 0.0, 0.0, -40.0], 2, 1);
        assert!(extreme.b > 0.0);
    }

    #[test]
    fn test_linear_predictor() {
        let model = toy_model();
        let mu = model.linear_predictor(1.0, &[2.0, 0.0], &[0.5]);
        assert_relative_eq!(mu[0], 1.0 + 2.0 * 0.5 + 0.5 * 1.0);
        assert_relative_eq!(mu[4], 1.0);
    }

    #[test]
    fn test_row_mismatch_rejected() {
        let morph = DMatrix::zeros(3, 2);
        let stim = DMatrix::zeros(2, 1);
        let y = DVector::zeros(3);
        assert!(matches!(
            RegressionModel::new(morph, stim, y),
            Err(SvError::DegenerateData(_))
        ));
    }
}
