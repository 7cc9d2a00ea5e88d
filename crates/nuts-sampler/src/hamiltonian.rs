use crate::density::LogDensity;

/// Position, momentum and cached log density / gradient at the position.
#[derive(Debug, Clone)]
pub(crate) struct PhasePoint {
    pub q: Vec<f64>,
    pub p: Vec<f64>,
    pub log_density: f64,
    pub grad: Vec<f64>,
}

impl PhasePoint {
    pub fn at<M: LogDensity + ?Sized>(model: &M, q: Vec<f64>) -> Self {
        let mut grad = vec![0.0; q.len()];
        let log_density = model.log_density_and_gradient(&q, &mut grad);
        Self {
            p: vec![0.0; q.len()],
            q,
            log_density,
            grad,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.log_density.is_finite() && self.grad.iter().all(|g| g.is_finite())
    }

    /// Kinetic energy for a diagonal metric given its inverse.
    pub fn kinetic_energy(&self, inv_mass: &[f64]) -> f64 {
        0.5 * self
            .p
            .iter()
            .zip(inv_mass)
            .map(|(p, m)| p * p * m)
            .sum::<f64>()
    }

    pub fn hamiltonian(&self, inv_mass: &[f64]) -> f64 {
        -self.log_density + self.kinetic_energy(inv_mass)
    }
}

/// Velocity-Verlet integrator with a diagonal inverse mass matrix.
pub(crate) struct Leapfrog<'a, M: LogDensity + ?Sized> {
    pub model: &'a M,
    pub step_size: f64,
    pub inv_mass: &'a [f64],
}

impl<'a, M: LogDensity + ?Sized> Leapfrog<'a, M> {
    pub fn new(model: &'a M, step_size: f64, inv_mass: &'a [f64]) -> Self {
        Self {
            model,
            step_size,
            inv_mass,
        }
    }

    /// One step forward (`direction = 1.0`) or backward (`-1.0`) in time.
    pub fn step(&self, from: &PhasePoint, direction: f64) -> PhasePoint {
        let eps = direction * self.step_size;
        let mut next = from.clone();

        for (p, g) in next.p.iter_mut().zip(&from.grad) {
            *p += 0.5 * eps * g;
        }
        for ((q, p), m) in next.q.iter_mut().zip(&next.p).zip(self.inv_mass) {
            *q += eps * m * p;
        }
        next.log_density = self
            .model
            .log_density_and_gradient(&next.q, &mut next.grad);
        for (p, g) in next.p.iter_mut().zip(&next.grad) {
            *p += 0.5 * eps * g;
        }
        next
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Independent Gaussians with the given standard deviations.
    pub struct DiagGaussian {
        pub sd: Vec<f64>,
    }

    impl LogDensity for DiagGaussian {
        fn dim(&self) -> usize {
            self.sd.len()
        }

        fn log_density_and_gradient(&self, theta: &[f64], grad: &mut [f64]) -> f64 {
            let mut lp = 0.0;
            for ((g, x), s) in grad.iter_mut().zip(theta).zip(&self.sd) {
                lp -= 0.5 * (x / s).powi(2);
                *g = -x / (s * s);
            }
            lp
        }
    }

    #[test]
    fn test_leapfrog_nearly_conserves_energy() {
        let model = DiagGaussian { sd: vec![1.0, 2.0] };
        let inv_mass = vec![1.0, 1.0];
        let mut point = PhasePoint::at(&model, vec![0.5, -1.0]);
        point.p = vec![0.3, 0.8];
        let h0 = point.hamiltonian(&inv_mass);

        let lf = Leapfrog::new(&model, 0.05, &inv_mass);
        let mut state = point;
        for _ in 0..200 {
            state = lf.step(&state, 1.0);
        }
        assert_abs_diff_eq!(state.hamiltonian(&inv_mass), h0, epsilon = 1e-2);
    }

    #[test]
    fn test_leapfrog_is_reversible() {
        let model = DiagGaussian { sd: vec![1.0, 0.5, 3.0] };
        let inv_mass = vec![1.0, 0.25, 4.0];
        let mut start = PhasePoint::at(&model, vec![0.1, 0.2, -0.3]);
        start.p = vec![1.0, -0.5, 0.25];

        let lf = Leapfrog::new(&model, 0.1, &inv_mass);
        let mut state = start.clone();
        for _ in 0..10 {
            state = lf.step(&state, 1.0);
        }
        for _ in 0..10 {
            state = lf.step(&state, -1.0);
        }
        for (a, b) in state.q.iter().zip(&start.q) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-10);
        }
    }
}
