//! No-U-Turn transition with multinomial proposal selection.
//!
//! Trajectories are doubled in a random direction until the no-U-turn
//! criterion fires across the full trajectory or a sub-trajectory, a
//! divergence is hit, or the maximum depth is reached. Within a subtree the
//! proposal is drawn proportionally to `exp(-H)`; at the top level the
//! new subtree is favoured (biased progressive sampling).

use rand::Rng;
use statrs::distribution::Normal;

use crate::density::LogDensity;
use crate::hamiltonian::{Leapfrog, PhasePoint};

/// Energy error beyond which a trajectory is declared divergent.
pub const MAX_ENERGY_ERROR: f64 = 1000.0;

#[derive(Debug, Clone)]
pub(crate) struct Transition {
    pub point: PhasePoint,
    pub accept_stat: f64,
    pub tree_depth: usize,
    pub n_leapfrog: usize,
    pub divergent: bool,
    pub energy: f64,
}

struct Subtree {
    left: PhasePoint,
    right: PhasePoint,
    proposal: PhasePoint,
    log_weight: f64,
    n_leapfrog: usize,
    sum_accept: f64,
    divergent: bool,
    turning: bool,
}

fn log_sum_exp(a: f64, b: f64) -> f64 {
    let max = a.max(b);
    if max == f64::NEG_INFINITY {
        f64::NEG_INFINITY
    } else {
        max + ((a - max).exp() + (b - max).exp()).ln()
    }
}

fn is_turning(left: &PhasePoint, right: &PhasePoint, inv_mass: &[f64]) -> bool {
    let mut dot_left = 0.0;
    let mut dot_right = 0.0;
    for i in 0..left.q.len() {
        let dq = right.q[i] - left.q[i];
        dot_left += dq * inv_mass[i] * left.p[i];
        dot_right += dq * inv_mass[i] * right.p[i];
    }
    dot_left < 0.0 || dot_right < 0.0
}

fn build_leaf<M: LogDensity + ?Sized>(
    leapfrog: &Leapfrog<'_, M>,
    from: &PhasePoint,
    direction: f64,
    h0: f64,
) -> Subtree {
    let next = leapfrog.step(from, direction);
    let h = next.hamiltonian(leapfrog.inv_mass);
    let energy_error = if h.is_finite() { h - h0 } else { f64::INFINITY };
    let divergent = energy_error > MAX_ENERGY_ERROR;
    let accept = if energy_error.is_finite() {
        (-energy_error).exp().min(1.0)
    } else {
        0.0
    };

    Subtree {
        left: next.clone(),
        right: next.clone(),
        proposal: next,
        log_weight: -energy_error,
        n_leapfrog: 1,
        sum_accept: accept,
        divergent,
        turning: false,
    }
}

fn build_tree<M: LogDensity + ?Sized, R: Rng>(
    leapfrog: &Leapfrog<'_, M>,
    from: &PhasePoint,
    depth: usize,
    direction: f64,
    h0: f64,
    rng: &mut R,
) -> Subtree {
    if depth == 0 {
        return build_leaf(leapfrog, from, direction, h0);
    }

    let mut inner = build_tree(leapfrog, from, depth - 1, direction, h0, rng);
    if inner.divergent || inner.turning {
        return inner;
    }

    let edge = if direction > 0.0 {
        &inner.right
    } else {
        &inner.left
    };
    let outer = build_tree(leapfrog, edge, depth - 1, direction, h0, rng);

    inner.n_leapfrog += outer.n_leapfrog;
    inner.sum_accept += outer.sum_accept;
    if outer.divergent || outer.turning {
        inner.divergent |= outer.divergent;
        inner.turning |= outer.turning;
        return inner;
    }

    let total = log_sum_exp(inner.log_weight, outer.log_weight);
    if rng.gen::<f64>() < (outer.log_weight - total).exp() {
        inner.proposal = outer.proposal;
    }
    inner.log_weight = total;

    if direction > 0.0 {
        inner.right = outer.right;
    } else {
        inner.left = outer.left;
    }
    inner.turning = is_turning(&inner.left, &inner.right, leapfrog.inv_mass);
    inner
}

/// One NUTS transition from `current` (whose momentum is resampled).
pub(crate) fn transition<M: LogDensity + ?Sized, R: Rng>(
    leapfrog: &Leapfrog<'_, M>,
    current: &PhasePoint,
    max_tree_depth: usize,
    momentum_dist: &Normal,
    rng: &mut R,
) -> Transition {
    let mut start = current.clone();
    for (p, m) in start.p.iter_mut().zip(leapfrog.inv_mass) {
        *p = rng.sample(momentum_dist) / m.sqrt();
    }
    let h0 = start.hamiltonian(leapfrog.inv_mass);

    let mut left = start.clone();
    let mut right = start.clone();
    let mut proposal = start;
    let mut log_weight = 0.0;
    let mut n_leapfrog = 0;
    let mut sum_accept = 0.0;
    let mut divergent = false;
    let mut depth = 0;

    while depth < max_tree_depth {
        let direction = if rng.gen::<bool>() { 1.0 } else { -1.0 };
        let edge = if direction > 0.0 { &right } else { &left };
        let subtree = build_tree(leapfrog, edge, depth, direction, h0, rng);
        depth += 1;

        n_leapfrog += subtree.n_leapfrog;
        sum_accept += subtree.sum_accept;
        if subtree.divergent {
            divergent = true;
            break;
        }
        if subtree.turning {
            break;
        }

        if rng.gen::<f64>() < (subtree.log_weight - log_weight).exp() {
            proposal = subtree.proposal;
        }
        log_weight = log_sum_exp(log_weight, subtree.log_weight);

        if direction > 0.0 {
            right = subtree.right;
        } else {
            left = subtree.left;
        }
        if is_turning(&left, &right, leapfrog.inv_mass) {
            break;
        }
    }

    Transition {
        point: proposal,
        accept_stat: sum_accept / n_leapfrog.max(1) as f64,
        tree_depth: depth,
        n_leapfrog,
        divergent,
        energy: h0,
    }
}
