use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use udfall_gateway::BACKEND_PROXY_PREFIX;
use udfall_gateway::config::{AppConfig, CONFIG_PATH};
use udfall_gateway::identity::SupabaseIdentity;
use udfall_gateway::server::{self, AppState};

#[derive(Parser)]
#[command(name = "gateway", about = "Backend proxy, waitlist gate and auth callbacks for udfall")]
struct Args {
    /// TOML config file. Loaded if present; environment variables override it.
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Listen address (overrides BIND_ADDR and the config file)
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = if args.config.exists() {
        let config = AppConfig::load(&args.config)?;
        info!("Loaded config from {}", args.config.display());
        config
    } else {
        AppConfig::default()
    };
    config.apply_env()?;
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }

    info!(
        "Starting gateway ({:?}), waitlist gate {}",
        config.environment,
        if config.waitlist.access_code.is_some() && config.waitlist.cookie_secret.is_some() {
            "enabled"
        } else {
            "disabled"
        },
    );

    // One provider client for the whole process, shared through AppState.
    let identity = Arc::new(SupabaseIdentity::from_config(&config.identity)?);
    let state = AppState::new(&config, identity)?;
    match state.proxy.base_url() {
        Some(base) => info!("Proxying {BACKEND_PROXY_PREFIX}/* to {base}"),
        None => warn!("No backend URL configured; {BACKEND_PROXY_PREFIX}/* will answer 500"),
    }

    let listener = TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_addr))?;

    server::serve(state, listener).await
}
