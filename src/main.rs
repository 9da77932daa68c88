use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use aranea_runtime::config::{ControlConfig, DEFAULT_CALIBRATION_FILE};
use aranea_runtime::runtime::{self, RuntimeOptions};

#[derive(Parser)]
#[command(about = "Hexapod motion runtime over Zenoh")]
struct Args {
    /// Calibration point file
    #[arg(long, default_value = DEFAULT_CALIBRATION_FILE)]
    calibration: PathBuf,

    /// Relax servos after a period without commands
    #[arg(long)]
    auto_relax: bool,

    /// Seconds without a command before relaxing
    #[arg(long, default_value_t = 10)]
    relax_after: u64,

    /// Repeat a Move command until something replaces it
    #[arg(long)]
    continuous_gait: bool,

    /// Log servo writes instead of publishing them
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let options = RuntimeOptions {
        control: ControlConfig {
            auto_relax: args.auto_relax,
            auto_relax_after: Duration::from_secs(args.relax_after),
            retain_move: args.continuous_gait,
            calibration_path: args.calibration,
            ..ControlConfig::default()
        },
        dry_run: args.dry_run,
    };

    if let Err(e) = runtime::run(options).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
