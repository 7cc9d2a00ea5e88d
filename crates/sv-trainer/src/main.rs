//! sv-trainer: fit the Bayesian S/V regression and inspect its posterior.
//!
//! Usage:
//!   cargo run --release -p sv-trainer -- --data data/films.csv --mode train
//!   cargo run --release -p sv-trainer -- --data data/films.csv --mode load
//!   cargo run --release -p sv-trainer -- --data data/films.csv --mode ppc

use anyhow::Context;
use clap::Parser;

use feature_prep::FeaturePreprocessor;
use nuts_sampler::CancelFlag;
use sv_trainer::pipeline;
use sv_trainer::{Mode, TrainerArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = TrainerArgs::parse();
    let preprocessor = FeaturePreprocessor::new();
    let prepared = pipeline::prepare(&preprocessor, &args.data)?;

    match args.mode {
        Mode::Train => {
            let config = args.sampler_config()?;
            let cancel = CancelFlag::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                tracing::warn!("Interrupt received, stopping chains; press Ctrl-C again to exit now");
                on_signal.cancel();
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Second interrupt, exiting without a trace");
                    std::process::exit(130);
                }
            });

            let trace_path = args.trace.clone();
            let summary = tokio::task::spawn_blocking(move || {
                pipeline::train(&prepared, &preprocessor, &config, &trace_path, &cancel)
            })
            .await
            .context("training task panicked")??;
            tracing::info!(
                "Training complete: {} draws, {} divergences, trace at {}",
                summary.total_draws,
                summary.total_divergences,
                args.trace.display()
            );
        }
        Mode::Load => {
            pipeline::load(&prepared, &args.trace)?;
        }
        Mode::Ppc => {
            pipeline::ppc(&prepared, &args.trace, &args.artifacts_dir)?;
        }
    }
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(
            "sv_trainer=info,bayes_model=info,nuts_sampler=info,feature_prep=info",
        )
    });
    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
