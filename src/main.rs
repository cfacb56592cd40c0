//! Standalone intercepting proxy.
//!
//! Runs the proxy until Ctrl+C or SIGTERM. Point a browser's HTTP proxy
//! setting at the printed address.
//!
//! ```text
//! intercepting-proxy --port 8888 --basic-auth admin:admin
//! intercepting-proxy --config proxy.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use intercepting_proxy::config::{load_config, InterceptorConfig};
use intercepting_proxy::hooks::builtin::BasicAuth;
use intercepting_proxy::lifecycle::{shutdown_signal, ProxyController};
use intercepting_proxy::observability::{init_logging, init_metrics};

#[derive(Parser)]
#[command(name = "intercepting-proxy")]
#[command(about = "Local HTTP proxy with request/response interception hooks", long_about = None)]
struct Args {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on. Overrides the configured port; 0 picks a free one.
    #[arg(short, long)]
    port: Option<u16>,

    /// Add `Authorization: Basic` to every request, given as user:pass.
    #[arg(long, value_name = "USER:PASS")]
    basic_auth: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => InterceptorConfig::default(),
    };

    init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "intercepting-proxy starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let port = args.port.unwrap_or(config.listener.port);
    let proxy = ProxyController::init(config)?;

    if let Some(credentials) = &args.basic_auth {
        let hook = BasicAuth::from_credentials(credentials)
            .ok_or("--basic-auth expects user:pass")?;
        proxy.hooks().register_before_request(Arc::new(hook));
        tracing::info!("Basic auth hook registered");
    }

    let port = proxy.start(port).await?;
    let address = proxy.proxy_address().await?;
    tracing::info!(port, address = %address, "Proxy ready");

    shutdown_signal().await;
    proxy.stop().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
