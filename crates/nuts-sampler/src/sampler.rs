use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::adaptation::{find_reasonable_step_size, WindowedAdaptation};
use crate::density::LogDensity;
use crate::error::{SamplerError, SamplerResult};
use crate::hamiltonian::{Leapfrog, PhasePoint};
use crate::nuts;

const MAX_INIT_ATTEMPTS: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerConfig {
    pub num_chains: usize,
    /// Retained draws per chain.
    pub num_draws: usize,
    /// Warm-up iterations per chain, discarded.
    pub num_warmup: usize,
    /// Acceptance statistic the step size is tuned toward.
    pub target_accept: f64,
    pub max_tree_depth: usize,
    pub seed: u64,
    /// Starting points are drawn uniformly from `(-init_radius, init_radius)`
    /// in unconstrained space.
    pub init_radius: f64,
    /// Chains whose mean acceptance statistic falls below this are reported.
    pub min_accept_rate: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            num_chains: 4,
            num_draws: 3000,
            num_warmup: 2000,
            target_accept: 0.999,
            max_tree_depth: 10,
            seed: 42,
            init_radius: 2.0,
            min_accept_rate: 0.5,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> SamplerResult<()> {
        if self.num_chains == 0 {
            return Err(SamplerError::InvalidConfig("num_chains must be > 0".into()));
        }
        if self.num_draws == 0 {
            return Err(SamplerError::InvalidConfig("num_draws must be > 0".into()));
        }
        if !(self.target_accept > 0.0 && self.target_accept < 1.0) {
            return Err(SamplerError::InvalidConfig(format!(
                "target_accept must be in (0, 1), got {}",
                self.target_accept
            )));
        }
        if self.max_tree_depth == 0 {
            return Err(SamplerError::InvalidConfig(
                "max_tree_depth must be > 0".into(),
            ));
        }
        if !(self.init_radius.is_finite() && self.init_radius > 0.0) {
            return Err(SamplerError::InvalidConfig(
                "init_radius must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Cooperative cancellation, checked before every warm-up and sampling
/// iteration of every chain.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-draw sampler statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrawStats {
    pub divergent: bool,
    pub accept_stat: f64,
    pub tree_depth: usize,
    pub n_leapfrog: usize,
    pub energy: f64,
    pub log_density: f64,
}

/// Post-warm-up output of one chain, positions in unconstrained space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chain {
    pub chain_id: usize,
    pub draws: Vec<Vec<f64>>,
    pub stats: Vec<DrawStats>,
    pub step_size: f64,
    pub inv_mass: Vec<f64>,
}

impl Chain {
    pub fn divergences(&self) -> usize {
        self.stats.iter().filter(|s| s.divergent).count()
    }

    pub fn mean_accept_stat(&self) -> f64 {
        if self.stats.is_empty() {
            return 0.0;
        }
        self.stats.iter().map(|s| s.accept_stat).sum::<f64>() / self.stats.len() as f64
    }

    pub fn energies(&self) -> Vec<f64> {
        self.stats.iter().map(|s| s.energy).collect()
    }
}

/// Non-fatal sampling problems. Draws remain usable but should be inspected.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum SamplerWarning {
    #[error("chain {chain}: {count} divergent transitions after warm-up")]
    Divergences { chain: usize, count: usize },

    #[error("chain {chain}: mean acceptance {mean_accept:.3} below usable threshold {threshold}")]
    LowAcceptance {
        chain: usize,
        mean_accept: f64,
        threshold: f64,
    },
}

#[derive(Debug, Clone)]
pub struct SampleOutput {
    pub chains: Vec<Chain>,
    pub warnings: Vec<SamplerWarning>,
}

impl SampleOutput {
    pub fn total_divergences(&self) -> usize {
        self.chains.iter().map(Chain::divergences).sum()
    }
}

/// Run `config.num_chains` independent chains in parallel.
///
/// Each chain owns its RNG (seeded from `config.seed` and its index), step
/// size and metric, so output does not depend on thread scheduling. A trace
/// is only returned once every chain has completed.
pub fn sample<M: LogDensity>(
    model: &M,
    config: &SamplerConfig,
    cancel: &CancelFlag,
) -> SamplerResult<SampleOutput> {
    config.validate()?;
    tracing::info!(
        "Sampling {} chains: {} warm-up + {} draws, target_accept={}, max_tree_depth={}",
        config.num_chains,
        config.num_warmup,
        config.num_draws,
        config.target_accept,
        config.max_tree_depth
    );

    let chains = (0..config.num_chains)
        .into_par_iter()
        .map(|chain_id| run_chain(model, config, chain_id, cancel))
        .collect::<SamplerResult<Vec<_>>>()?;

    let warnings = collect_warnings(&chains, config.min_accept_rate);
    for warning in &warnings {
        tracing::warn!("{}", warning);
    }

    Ok(SampleOutput { chains, warnings })
}

fn collect_warnings(chains: &[Chain], min_accept_rate: f64) -> Vec<SamplerWarning> {
    let mut warnings = Vec::new();
    for chain in chains {
        let count = chain.divergences();
        if count > 0 {
            warnings.push(SamplerWarning::Divergences {
                chain: chain.chain_id,
                count,
            });
        }
        let mean_accept = chain.mean_accept_stat();
        if mean_accept < min_accept_rate {
            warnings.push(SamplerWarning::LowAcceptance {
                chain: chain.chain_id,
                mean_accept,
                threshold: min_accept_rate,
            });
        }
    }
    warnings
}

fn chain_seed(seed: u64, chain_id: usize) -> u64 {
    seed.wrapping_add(chain_id as u64)
}

fn initial_point<M: LogDensity + ?Sized>(
    model: &M,
    radius: f64,
    chain_id: usize,
    rng: &mut StdRng,
) -> SamplerResult<PhasePoint> {
    for _ in 0..MAX_INIT_ATTEMPTS {
        let q: Vec<f64> = (0..model.dim())
            .map(|_| rng.gen_range(-radius..radius))
            .collect();
        let point = PhasePoint::at(model, q);
        if point.is_finite() {
            return Ok(point);
        }
    }
    Err(SamplerError::InitializationFailed {
        chain: chain_id,
        attempts: MAX_INIT_ATTEMPTS,
    })
}

/// Warm-up then sampling for a single chain.
pub fn run_chain<M: LogDensity + ?Sized>(
    model: &M,
    config: &SamplerConfig,
    chain_id: usize,
    cancel: &CancelFlag,
) -> SamplerResult<Chain> {
    if cancel.is_cancelled() {
        return Err(SamplerError::Cancelled(chain_id));
    }
    let started = Instant::now();
    let mut rng = StdRng::seed_from_u64(chain_seed(config.seed, chain_id));
    let momentum = Normal::new(0.0, 1.0)
        .map_err(|e| SamplerError::InvalidConfig(format!("momentum distribution: {e}")))?;

    let mut state = initial_point(model, config.init_radius, chain_id, &mut rng)?;
    let dim = model.dim();

    let unit_metric = vec![1.0; dim];
    let initial_step =
        find_reasonable_step_size(model, &state.q, &unit_metric, 1.0, &momentum, &mut rng);
    let mut adaptation =
        WindowedAdaptation::new(dim, config.num_warmup, config.target_accept, initial_step);

    let mut warmup_divergences = 0usize;
    for i in 0..config.num_warmup {
        if cancel.is_cancelled() {
            return Err(SamplerError::Cancelled(chain_id));
        }
        let inv_mass = adaptation.inv_mass().to_vec();
        let leapfrog = Leapfrog::new(model, adaptation.step_size(), &inv_mass);
        let t = nuts::transition(&leapfrog, &state, config.max_tree_depth, &momentum, &mut rng);
        warmup_divergences += t.divergent as usize;
        state = t.point;

        if adaptation.learn(i, &state.q, t.accept_stat) {
            let eps = find_reasonable_step_size(
                model,
                &state.q,
                adaptation.inv_mass(),
                adaptation.step_size(),
                &momentum,
                &mut rng,
            );
            adaptation.restart_step_size(eps);
        }
    }

    let step_size = if config.num_warmup > 0 {
        adaptation.final_step_size()
    } else {
        initial_step
    };
    let inv_mass = adaptation.inv_mass().to_vec();
    tracing::debug!(
        "Chain {} warm-up done: step_size={:.3e}, {} warm-up divergences",
        chain_id,
        step_size,
        warmup_divergences
    );

    let leapfrog = Leapfrog::new(model, step_size, &inv_mass);
    let mut draws = Vec::with_capacity(config.num_draws);
    let mut stats = Vec::with_capacity(config.num_draws);
    for _ in 0..config.num_draws {
        if cancel.is_cancelled() {
            return Err(SamplerError::Cancelled(chain_id));
        }
        let t = nuts::transition(&leapfrog, &state, config.max_tree_depth, &momentum, &mut rng);
        state = t.point;
        draws.push(state.q.clone());
        stats.push(DrawStats {
            divergent: t.divergent,
            accept_stat: t.accept_stat,
            tree_depth: t.tree_depth,
            n_leapfrog: t.n_leapfrog,
            energy: t.energy,
            log_density: state.log_density,
        });
    }

    let chain = Chain {
        chain_id,
        draws,
        stats,
        step_size,
        inv_mass,
    };
    tracing::info!(
        "Chain {} finished in {:.1}s: mean accept {:.3}, {} divergences",
        chain_id,
        started.elapsed().as_secs_f64(),
        chain.mean_accept_stat(),
        chain.divergences()
    );
    Ok(chain)
}
