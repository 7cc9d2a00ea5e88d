//! Log-densities used by the regression model, written out explicitly so
//! their gradients can be taken by hand.
//!
//! Parameterizations:
//! - `Normal(mu, sigma)`: `-0.5 ((x - mu) / sigma)^2 - ln(sigma) - 0.5 ln(2 pi)`
//! - `HalfCauchy(s)` on `x >= 0`: `ln 2 - ln(pi s) - ln(1 + (x / s)^2)`
//! - `Laplace(mu, b)`: `-ln(2 b) - |x - mu| / b`

use std::f64::consts::{LN_2, PI};

const HALF_LN_2PI: f64 = 0.918_938_533_204_672_8;

pub fn normal_lpdf(x: f64, mu: f64, sigma: f64) -> f64 {
    let z = (x - mu) / sigma;
    -0.5 * z * z - sigma.ln() - HALF_LN_2PI
}

/// d/dx of [`normal_lpdf`].
pub fn normal_lpdf_dx(x: f64, mu: f64, sigma: f64) -> f64 {
    -(x - mu) / (sigma * sigma)
}

/// Zero outside the support, so `-inf` for negative `x`.
pub fn half_cauchy_lpdf(x: f64, scale: f64) -> f64 {
    if x < 0.0 {
        return f64::NEG_INFINITY;
    }
    let z = x / scale;
    LN_2 - (PI * scale).ln() - (z * z).ln_1p()
}

/// d/dx of [`half_cauchy_lpdf`] for `x >= 0`.
pub fn half_cauchy_lpdf_dx(x: f64, scale: f64) -> f64 {
    -2.0 * x / (scale * scale + x * x)
}

pub fn laplace_lpdf(x: f64, mu: f64, scale: f64) -> f64 {
    -(2.0 * scale).ln() - (x - mu).abs() / scale
}

/// d/dmu of [`laplace_lpdf`]. The kink at `x == mu` takes subgradient 0.
pub fn laplace_lpdf_dmu(x: f64, mu: f64, scale: f64) -> f64 {
    let r = x - mu;
    if r > 0.0 {
        1.0 / scale
    } else if r < 0.0 {
        -1.0 / scale
    } else {
        0.0
    }
}
