//! Warm-up tuning: dual-averaging step size and windowed diagonal metric.
//!
//! Schedule follows the usual three-phase layout: a fast initial buffer
//! (step size only), a series of doubling slow windows that estimate the
//! posterior variance, and a fast terminal buffer.

use rand::Rng;
use statrs::distribution::Normal;

use crate::density::LogDensity;
use crate::hamiltonian::{Leapfrog, PhasePoint};

const INIT_BUFFER: usize = 75;
const TERM_BUFFER: usize = 50;
const BASE_WINDOW: usize = 25;

/// Nesterov dual averaging of log step size toward a target acceptance.
#[derive(Debug, Clone)]
pub struct DualAveraging {
    target_accept: f64,
    gamma: f64,
    t0: f64,
    kappa: f64,
    mu: f64,
    log_step: f64,
    log_step_avg: f64,
    h_avg: f64,
    counter: f64,
}

impl DualAveraging {
    pub fn new(target_accept: f64, initial_step: f64) -> Self {
        let mut da = Self {
            target_accept,
            gamma: 0.05,
            t0: 10.0,
            kappa: 0.75,
            mu: 0.0,
            log_step: 0.0,
            log_step_avg: 0.0,
            h_avg: 0.0,
            counter: 0.0,
        };
        da.restart(initial_step);
        da
    }

    pub fn restart(&mut self, step_size: f64) {
        self.mu = (10.0 * step_size).ln();
        self.log_step = step_size.ln();
        self.log_step_avg = 0.0;
        self.h_avg = 0.0;
        self.counter = 0.0;
    }

    pub fn update(&mut self, accept_stat: f64) {
        let accept = if accept_stat.is_finite() {
            accept_stat.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.counter += 1.0;
        let eta = 1.0 / (self.counter + self.t0);
        self.h_avg = (1.0 - eta) * self.h_avg + eta * (self.target_accept - accept);
        self.log_step = self.mu - self.counter.sqrt() / self.gamma * self.h_avg;
        let w = self.counter.powf(-self.kappa);
        self.log_step_avg = w * self.log_step + (1.0 - w) * self.log_step_avg;
    }

    pub fn current_step_size(&self) -> f64 {
        self.log_step.exp()
    }

    /// Averaged iterate, used once warm-up ends.
    pub fn final_step_size(&self) -> f64 {
        if self.counter == 0.0 {
            self.current_step_size()
        } else {
            self.log_step_avg.exp()
        }
    }
}

/// Streaming per-coordinate variance.
#[derive(Debug, Clone)]
struct Welford {
    n: usize,
    mean: Vec<f64>,
    m2: Vec<f64>,
}

impl Welford {
    fn new(dim: usize) -> Self {
        Self {
            n: 0,
            mean: vec![0.0; dim],
            m2: vec![0.0; dim],
        }
    }

    fn add(&mut self, x: &[f64]) {
        self.n += 1;
        let n = self.n as f64;
        for ((m, s), &v) in self.mean.iter_mut().zip(self.m2.iter_mut()).zip(x) {
            let delta = v - *m;
            *m += delta / n;
            *s += delta * (v - *m);
        }
    }

    /// Sample variance shrunk toward 1e-3 for small windows.
    fn regularized_variance(&self) -> Vec<f64> {
        let n = self.n as f64;
        self.m2
            .iter()
            .map(|s| {
                let var = if self.n > 1 { s / (n - 1.0) } else { 1.0 };
                (n / (n + 5.0)) * var + 1e-3 * (5.0 / (n + 5.0))
            })
            .collect()
    }

    fn reset(&mut self) {
        self.n = 0;
        self.mean.iter_mut().for_each(|m| *m = 0.0);
        self.m2.iter_mut().for_each(|s| *s = 0.0);
    }
}

#[derive(Debug, Clone)]
pub struct WindowedAdaptation {
    num_warmup: usize,
    init_buffer: usize,
    slow_end: usize,
    window_size: usize,
    window_end: usize,
    step: DualAveraging,
    variance: Welford,
    inv_mass: Vec<f64>,
}

impl WindowedAdaptation {
    pub fn new(dim: usize, num_warmup: usize, target_accept: f64, initial_step: f64) -> Self {
        let (init_buffer, term_buffer, base_window) =
            if INIT_BUFFER + TERM_BUFFER + BASE_WINDOW > num_warmup {
                let init = (0.15 * num_warmup as f64) as usize;
                let term = (0.1 * num_warmup as f64) as usize;
                (init, term, num_warmup.saturating_sub(init + term))
            } else {
                (INIT_BUFFER, TERM_BUFFER, BASE_WINDOW)
            };
        // Too short for a metric estimate: adapt the step size only.
        let metric_enabled = num_warmup >= 20 && base_window > 0;
        let slow_end = if metric_enabled {
            num_warmup - term_buffer
        } else {
            0
        };

        let mut adaptation = Self {
            num_warmup,
            init_buffer,
            slow_end,
            window_size: base_window,
            window_end: 0,
            step: DualAveraging::new(target_accept, initial_step),
            variance: Welford::new(dim),
            inv_mass: vec![1.0; dim],
        };
        adaptation.window_end = adaptation.clamp_window_end(init_buffer + base_window);
        adaptation
    }

    /// Stretch the window to the end of the slow phase when the following
    /// window would not fit.
    fn clamp_window_end(&self, end: usize) -> usize {
        if end + 2 * self.window_size > self.slow_end {
            self.slow_end
        } else {
            end
        }
    }

    pub fn inv_mass(&self) -> &[f64] {
        &self.inv_mass
    }

    pub fn step_size(&self) -> f64 {
        self.step.current_step_size()
    }

    pub fn final_step_size(&self) -> f64 {
        self.step.final_step_size()
    }

    pub fn restart_step_size(&mut self, step_size: f64) {
        self.step.restart(step_size);
    }

    /// Record warm-up iteration `iteration` (0-based). Returns `true` when the
    /// metric changed, in which case the caller should re-seed the step size.
    pub fn learn(&mut self, iteration: usize, q: &[f64], accept_stat: f64) -> bool {
        if iteration >= self.num_warmup {
            return false;
        }
        self.step.update(accept_stat);

        if iteration < self.init_buffer || iteration >= self.slow_end {
            return false;
        }
        self.variance.add(q);
        if iteration + 1 < self.window_end {
            return false;
        }

        self.inv_mass = self.variance.regularized_variance();
        self.variance.reset();
        self.window_size *= 2;
        let next_end = self.window_end + self.window_size;
        self.window_end = self.clamp_window_end(next_end);
        true
    }
}

/// Heuristic initial step size: double or halve until a single leapfrog step
/// crosses an acceptance probability of 0.8.
pub(crate) fn find_reasonable_step_size<M: LogDensity + ?Sized, R: Rng>(
    model: &M,
    position: &[f64],
    inv_mass: &[f64],
    initial: f64,
    momentum_dist: &Normal,
    rng: &mut R,
) -> f64 {
    let mut start = PhasePoint::at(model, position.to_vec());
    if !start.is_finite() {
        return initial;
    }
    for (p, m) in start.p.iter_mut().zip(inv_mass) {
        *p = rng.sample(momentum_dist) / m.sqrt();
    }
    let h0 = start.hamiltonian(inv_mass);
    let threshold = 0.8f64.ln();

    let log_accept = |eps: f64| -> f64 {
        let next = Leapfrog::new(model, eps, inv_mass).step(&start, 1.0);
        let delta = h0 - next.hamiltonian(inv_mass);
        if delta.is_finite() {
            delta
        } else {
            f64::NEG_INFINITY
        }
    };

    let mut eps = initial;
    let direction = if log_accept(eps) > threshold { 1.0 } else { -1.0 };
    for _ in 0..100 {
        let candidate = eps * 2f64.powf(direction);
        if !(1e-10..=1e7).contains(&candidate) {
            break;
        }
        let la = log_accept(candidate);
        let keep_going = if direction > 0.0 {
            la > threshold
        } else {
            la <= threshold
        };
        eps = candidate;
        if !keep_going {
            break;
        }
    }
    eps
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_dual_averaging_shrinks_step_on_low_acceptance() {
        let mut da = DualAveraging::new(0.8, 1.0);
        for _ in 0..50 {
            da.update(0.1);
        }
        assert!(da.current_step_size() < 1.0);
        assert!(da.final_step_size() < 1.0);
    }

    #[test]
    fn test_dual_averaging_grows_step_on_high_acceptance() {
        let mut da = DualAveraging::new(0.6, 0.01);
        for _ in 0..50 {
            da.update(1.0);
        }
        assert!(da.final_step_size() > 0.01);
    }

    #[test]
    fn test_welford_matches_two_pass_variance() {
        let xs = [1.0, 4.0, 2.0, 8.0, 5.0];
        let mut w = Welford::new(1);
        for x in xs {
            w.add(&[x]);
        }
        let mean = xs.iter().sum::<f64>() / 5.0;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / 4.0;
        let expected = (5.0 / 10.0) * var + 1e-3 * 0.5;
        assert_relative_eq!(w.regularized_variance()[0], expected, epsilon = 1e-12);
    }

    #[test]
    fn test_windows_cover_slow_phase() {
        let num_warmup = 1000;
        let mut adaptation = WindowedAdaptation::new(1, num_warmup, 0.8, 0.1);
        let mut updates = Vec::new();
        for i in 0..num_warmup {
            if adaptation.learn(i, &[i as f64 * 0.001], 0.8) {
                updates.push(i + 1);
            }
        }
        // 75 + 25, 50, 100, 200, then stretched to 950.
        assert_eq!(updates, vec![100, 150, 250, 450, 950]);
    }

    #[test]
    fn test_short_warmup_only_tunes_step_size() {
        let mut adaptation = WindowedAdaptation::new(2, 10, 0.8, 0.1);
        for i in 0..10 {
            assert!(!adaptation.learn(i, &[0.0, 0.0], 0.5));
        }
        assert_eq!(adaptation.inv_mass(), &[1.0, 1.0]);
    }
}
