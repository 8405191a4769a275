//! camlink — entry point.
//!
//! ```text
//! camlink                    Stream using camlink.toml
//! camlink --config <path>    Load a custom config TOML
//! camlink --gen-config       Write default config to stdout
//! camlink --dry-run          Capture and pace frames without a server
//! camlink --clear-recovery   Clear the force recovery flag and exit
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use camlink_device::config::{ConfigStore, DeviceConfig};
use camlink_device::service::UplinkService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "camlink", about = "Camera uplink: streams frames to a multipart HTTP endpoint")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "camlink.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Discard frames instead of connecting to the server.
    #[arg(long)]
    dry_run: bool,

    /// Clear the force recovery flag and exit.
    #[arg(long)]
    clear_recovery: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&DeviceConfig::default())?;
        println!("{text}");
        return Ok(ExitCode::SUCCESS);
    }

    // Load config.
    let mut store = ConfigStore::load(&cli.config);

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&store.config().logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if cli.clear_recovery {
        store.clear_recovery()?;
        println!("Recovery flag cleared in {}.", store.path().display());
        return Ok(ExitCode::SUCCESS);
    }

    info!("camlink v{}", env!("CARGO_PKG_VERSION"));
    info!("server: {}", store.config().stream_url());
    info!("frame size: {}", store.config().camera.frame_size);
    info!("max fps: {}", store.config().stream.max_fps);

    let mut service = UplinkService::new(store).dry_run(cli.dry_run);

    // Ctrl-C handler.
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        on_signal.cancel();
    });

    let exit = service.run(cancel).await?;
    Ok(ExitCode::from(exit.code()))
}
