//! Convergence diagnostics over per-chain scalar draws.

use statrs::statistics::Statistics;

/// Split R-hat. Each chain is halved, then the classic between/within
/// variance ratio is computed across the `2 * chains` halves.
///
/// Returns `NaN` when there are fewer than four draws per chain or the
/// within-chain variance is zero.
pub fn split_rhat(chains: &[Vec<f64>]) -> f64 {
    let halves = split_chains(chains);
    if halves.len() < 2 {
        return f64::NAN;
    }
    let n = halves[0].len() as f64;
    let m = halves.len() as f64;

    let means: Vec<f64> = halves.iter().map(|h| h.iter().mean()).collect();
    let within = halves.iter().map(|h| h.iter().variance()).sum::<f64>() / m;
    let between = n * means.iter().variance();
    if !(within > 0.0) {
        return f64::NAN;
    }
    let var_plus = (n - 1.0) / n * within + between / n;
    (var_plus / within).sqrt()
}

fn split_chains(chains: &[Vec<f64>]) -> Vec<&[f64]> {
    let min_len = chains.iter().map(Vec::len).min().unwrap_or(0);
    let half = min_len / 2;
    if half < 2 {
        return Vec::new();
    }
    chains
        .iter()
        .flat_map(|c| [&c[..half], &c[half..2 * half]])
        .collect()
}

fn autocovariance(x: &[f64], max_lag: usize) -> Vec<f64> {
    let n = x.len();
    let mean = x.iter().mean();
    (0..=max_lag.min(n.saturating_sub(1)))
        .map(|lag| {
            (0..n - lag)
                .map(|i| (x[i] - mean) * (x[i + lag] - mean))
                .sum::<f64>()
                / n as f64
        })
        .collect()
}

/// Effective sample size across chains using Geyer's initial monotone
/// sequence estimator on the combined autocorrelation. Draws are not
/// rank-normalized.
pub fn effective_sample_size(chains: &[Vec<f64>]) -> f64 {
    let m = chains.len();
    let n = chains.iter().map(Vec::len).min().unwrap_or(0);
    if m == 0 || n < 4 {
        return f64::NAN;
    }
    let chains: Vec<&[f64]> = chains.iter().map(|c| &c[..n]).collect();
    let total = (m * n) as f64;

    let acov: Vec<Vec<f64>> = chains.iter().map(|c| autocovariance(c, n - 1)).collect();
    let chain_means: Vec<f64> = chains.iter().map(|c| c.iter().mean()).collect();
    let nf = n as f64;
    let mean_var = acov.iter().map(|a| a[0]).sum::<f64>() / m as f64 * nf / (nf - 1.0);
    let between = if m > 1 {
        chain_means.iter().variance()
    } else {
        0.0
    };
    let var_plus = mean_var * (nf - 1.0) / nf + between;
    if !(var_plus > 0.0) {
        return f64::NAN;
    }

    let rho = |lag: usize| -> f64 {
        let mean_acov = acov.iter().map(|a| a[lag]).sum::<f64>() / m as f64;
        1.0 - (mean_var - mean_acov) / var_plus
    };

    // Sum consecutive pairs while positive, enforcing monotone decrease.
    let mut tau = -1.0;
    let mut prev_pair = f64::INFINITY;
    let mut lag = 0;
    while lag + 1 < n {
        let mut pair = rho(lag) + rho(lag + 1);
        if pair <= 0.0 {
            break;
        }
        if pair > prev_pair {
            pair = prev_pair;
        }
        tau += 2.0 * pair;
        prev_pair = pair;
        lag += 2;
    }
    let tau = tau.max(1.0 / total.log10());
    total / tau
}

/// Energy Bayesian fraction of missing information for one chain.
/// Values below about 0.3 suggest poor exploration of the energy
/// distribution.
pub fn ebfmi(energies: &[f64]) -> f64 {
    if energies.len() < 2 {
        return f64::NAN;
    }
    let numerator: f64 = energies.windows(2).map(|w| (w[1] - w[0]).powi(2)).sum();
    let mean = energies.iter().mean();
    let denominator: f64 = energies.iter().map(|e| (e - mean).powi(2)).sum();
    if denominator == 0.0 {
        return f64::NAN;
    }
    numerator / denominator
}
