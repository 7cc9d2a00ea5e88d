use serde::Serialize;
use statrs::statistics::Statistics;

use nuts_sampler::diagnostics::{ebfmi, effective_sample_size, split_rhat};

use crate::trace::PosteriorTrace;

const RHAT_WARN: f64 = 1.01;
const EBFMI_WARN: f64 = 0.3;

#[derive(Debug, Clone, Serialize)]
pub struct ParameterSummary {
    pub name: String,
    pub mean: f64,
    pub sd: f64,
    pub rhat: f64,
    pub ess: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainSummary {
    pub chain: usize,
    pub divergences: usize,
    pub mean_accept: f64,
    pub ebfmi: f64,
    pub step_size: f64,
    pub mean_tree_depth: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceSummary {
    pub parameters: Vec<ParameterSummary>,
    pub chains: Vec<ChainSummary>,
    pub total_divergences: usize,
    pub total_draws: usize,
}

impl TraceSummary {
    pub fn from_trace(trace: &PosteriorTrace) -> Self {
        let parameters = trace
            .parameter_names()
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let chains = trace.parameter_chains(i);
                let flat: Vec<f64> = chains.iter().flatten().copied().collect();
                ParameterSummary {
                    name,
                    mean: flat.iter().mean(),
                    sd: flat.iter().std_dev(),
                    rhat: split_rhat(&chains),
                    ess: effective_sample_size(&chains),
                }
            })
            .collect();

        let chains = trace
            .chains
            .iter()
            .map(|c| {
                let energies: Vec<f64> = c.stats.iter().map(|s| s.energy).collect();
                ChainSummary {
                    chain: c.chain,
                    divergences: c.divergences(),
                    mean_accept: c.stats.iter().map(|s| s.accept_stat).mean(),
                    ebfmi: ebfmi(&energies),
                    step_size: c.step_size,
                    mean_tree_depth: c.stats.iter().map(|s| s.tree_depth as f64).mean(),
                }
            })
            .collect();

        Self {
            parameters,
            chains,
            total_divergences: trace.total_divergences(),
            total_draws: trace.total_draws(),
        }
    }

    /// Emit the summary through `tracing`, warning on poor convergence.
    pub fn log(&self) {
        for chain in &self.chains {
            tracing::info!(
                "chain {}: accept {:.3}, step {:.2e}, depth {:.1}, E-BFMI {:.2}, {} divergences",
                chain.chain,
                chain.mean_accept,
                chain.step_size,
                chain.mean_tree_depth,
                chain.ebfmi,
                chain.divergences
            );
            if chain.ebfmi < EBFMI_WARN {
                tracing::warn!("chain {}: low E-BFMI {:.2}", chain.chain, chain.ebfmi);
            }
        }
        for p in &self.parameters {
            tracing::info!(
                "{:<28} mean {:>8.4}  sd {:>7.4}  r_hat {:.3}  ess {:>7.0}",
                p.name,
                p.mean,
                p.sd,
                p.rhat,
                p.ess
            );
            if p.rhat > RHAT_WARN {
                tracing::warn!("{}: r_hat {:.3} exceeds {}", p.name, p.rhat, RHAT_WARN);
            }
        }
        if self.total_divergences > 0 {
            tracing::warn!(
                "{} divergent transitions in {} draws",
                self.total_divergences,
                self.total_draws
            );
        }
    }
}
