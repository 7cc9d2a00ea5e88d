//! freeze-model: collapse a posterior trace into the serving artifact.
//!
//! Usage:
//!   cargo run -p posterior-freezer --bin freeze-model -- \
//!       --trace artifacts/trace.json --data data/films.csv --out-dir artifacts

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;

use posterior_freezer::PosteriorFreezer;

#[derive(Debug, Parser)]
#[command(name = "freeze-model", about = "Freeze posterior means and standardization for serving")]
struct Args {
    /// Posterior trace produced by `sv-trainer --mode train`.
    #[arg(long)]
    trace: PathBuf,

    /// Training table the trace was fit on.
    #[arg(long)]
    data: PathBuf,

    #[arg(long, env = "SV_ARTIFACTS_DIR", default_value = "artifacts")]
    out_dir: PathBuf,
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let report = PosteriorFreezer::new()
        .freeze(&args.trace, &args.data, &args.out_dir)
        .with_context(|| format!("freezing {}", args.trace.display()))?;

    for path in &report.written {
        tracing::info!("wrote {}", path.display());
    }
    if report.provenance.divergences > 0 {
        tracing::warn!(
            "trace contains {} divergent transitions",
            report.provenance.divergences
        );
    }
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("freeze_model=info,posterior_freezer=info,info"));
    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
