use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use nuts_sampler::{SamplerConfig, SamplerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Fit the model and write the posterior trace.
    Train,
    /// Load an existing trace and report convergence diagnostics.
    Load,
    /// Posterior predictive check plus interpretation report.
    Ppc,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "sv-trainer", about = "Bayesian S/V regression: train, inspect, check")]
pub struct TrainerArgs {
    /// Training table (CSV with a header row).
    #[arg(long)]
    pub data: PathBuf,

    #[arg(long, value_enum)]
    pub mode: Mode,

    #[arg(long, env = "SV_TRACE_PATH", default_value = "artifacts/trace.json")]
    pub trace: PathBuf,

    #[arg(long, env = "SV_ARTIFACTS_DIR", default_value = "artifacts")]
    pub artifacts_dir: PathBuf,

    #[arg(long, env = "SV_CHAINS", default_value_t = 4)]
    pub chains: usize,

    /// Retained draws per chain.
    #[arg(long, env = "SV_DRAWS", default_value_t = 3000)]
    pub draws: usize,

    #[arg(long, env = "SV_WARMUP", default_value_t = 2000)]
    pub warmup: usize,

    #[arg(long, env = "SV_TARGET_ACCEPT", default_value_t = 0.999)]
    pub target_accept: f64,

    #[arg(long, env = "SV_MAX_TREE_DEPTH", default_value_t = 10)]
    pub max_tree_depth: usize,

    #[arg(long, env = "SV_SEED", default_value_t = 42)]
    pub seed: u64,
}

impl TrainerArgs {
    pub fn sampler_config(&self) -> SamplerResult<SamplerConfig> {
        let config = SamplerConfig {
            num_chains: self.chains,
            num_draws: self.draws,
            num_warmup: self.warmup,
            target_accept: self.target_accept,
            max_tree_depth: self.max_tree_depth,
            seed: self.seed,
            ..SamplerConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}
