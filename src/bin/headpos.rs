//! `headpos`: estimate head positions from a cHPI MEG recording.
//!
//! ```text
//! headpos [--config config.json] [--out-dir out_dir] [--product product.json]
//! ```
//!
//! Always writes `product.json`; exits 1 when the run failed.
use std::path::PathBuf;
use std::process::ExitCode;
use clap::Parser;
use headpos::{run_from_config_file, Product};

#[derive(Parser, Debug)]
#[command(name = "headpos", about = "Head position estimation from cHPI MEG recordings")]
struct Args {
    /// Run configuration (flat JSON from the workflow platform)
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Directory receiving headshape.pos and side-car copies
    #[arg(long, default_value = "out_dir")]
    out_dir: PathBuf,

    /// Status report path
    #[arg(long, default_value = "product.json")]
    product: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let outcome = run_from_config_file(&args.config, &args.out_dir);
    match &outcome {
        Ok(s) => tracing::info!(n_positions = s.n_positions, path = %s.pos_file.display(), "done"),
        Err(e) => tracing::error!("{e:#}"),
    }

    let product = Product::from_outcome(&outcome);
    if let Err(e) = product.write(&args.product) {
        tracing::error!("{e:#}");
        return ExitCode::FAILURE;
    }
    if product.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
