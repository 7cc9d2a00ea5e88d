/// A differentiable log density over an unconstrained real vector.
///
/// Constrained parameters must be mapped to the real line by the implementor,
/// including the log-Jacobian of that map in the returned value.
pub trait LogDensity: Sync {
    fn dim(&self) -> usize;

    /// Log density (up to an additive constant) at `theta`; the gradient is
    /// written into `grad`, which has length `dim()`. Non-finite values are
    /// allowed and are treated as divergent by the sampler.
    fn log_density_and_gradient(&self, theta: &[f64], grad: &mut [f64]) -> f64;

    fn log_density(&self, theta: &[f64]) -> f64 {
        let mut grad = vec![0.0; self.dim()];
        self.log_density_and_gradient(theta, &mut grad)
    }
}
