//! Admission gate binary.
//!
//! ```text
//!  client ──▶ /healthz /livez /readyz
//!         └─▶ panic ─▶ request info ─▶ shutdown gate ─▶ deadline
//!               ─▶ authentication ─▶ impersonation ─▶ audit ─▶ authorization ─▶ api
//!                       │                                 │            │
//!                token webhook                      log / webhook   SAR webhook
//! ```

use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;

use admission_gate::authn::builder::CredentialStores;
use admission_gate::config::load_config;
use admission_gate::lifecycle::termination;
use admission_gate::observability::{logging, metrics};
use admission_gate::{api, Components, GateConfig, GateServer};

#[derive(Parser)]
#[command(name = "admission-gate")]
#[command(about = "Authenticating, authorizing and auditing front for API servers", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GateConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "admission-gate starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let components = Components::from_config(&config, &CredentialStores::default())?;
    let listener = TcpListener::bind(&config.server.bind_address).await?;
    let server = GateServer::new(&config, components, api::router());
    server.run(listener, termination()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
