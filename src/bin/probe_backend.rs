//! Probe: call a backend route through the gateway proxy and print the reply.
//!
//! Uses GATEWAY_URL (default http://localhost:3000) and, if set,
//! GATEWAY_ACCESS_TOKEN as the bearer token.

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;

use udfall_gateway::DEV_APP_ORIGIN;
use udfall_gateway::client::{ApiClient, ApiError};

#[derive(Parser)]
#[command(name = "probe_backend", about = "Call /api/backend/<path> through the gateway")]
struct Args {
    /// Backend path, e.g. `markets?cat=sports`
    path: String,

    /// JSON body; sends a POST instead of a GET
    #[arg(long)]
    data: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let gateway = std::env::var("GATEWAY_URL").unwrap_or_else(|_| DEV_APP_ORIGIN.to_string());
    let mut client = ApiClient::new(&gateway)?;
    if let Ok(token) = std::env::var("GATEWAY_ACCESS_TOKEN") {
        client = client.with_access_token(token);
    }

    let method = if args.data.is_some() { "POST" } else { "GET" };
    println!("{method} {}\n", client.backend_url(&args.path));

    let result = match &args.data {
        Some(raw) => {
            let body: Value = serde_json::from_str(raw).context("--data is not valid JSON")?;
            client.post(&args.path, &body).await
        }
        None => client.get(&args.path).await,
    };

    match result {
        Ok(payload) => {
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(())
        }
        Err(ApiError::Http {
            status,
            message,
            details,
        }) => {
            println!("HTTP {status}: {message}");
            if !details.is_null() {
                println!("{}", serde_json::to_string_pretty(&details)?);
            }
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}
