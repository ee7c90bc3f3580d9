//! Probe: submit the waitlist access code for a signed-in user.
//!
//! Requires GATEWAY_ACCESS_TOKEN (the user's identity-provider access token).
//! Reads the code interactively with hidden input unless `--code` is given.

use anyhow::{Context, Result, bail};
use clap::Parser;

use udfall_gateway::DEV_APP_ORIGIN;
use udfall_gateway::client::ApiClient;

#[derive(Parser)]
#[command(name = "probe_unlock", about = "POST /api/waitlist/unlock through the gateway")]
struct Args {
    /// Access code. If omitted, reads interactively (recommended).
    #[arg(long)]
    code: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let gateway = std::env::var("GATEWAY_URL").unwrap_or_else(|_| DEV_APP_ORIGIN.to_string());
    let token = std::env::var("GATEWAY_ACCESS_TOKEN").context("GATEWAY_ACCESS_TOKEN not set")?;

    let code = match args.code {
        Some(code) => code,
        None => {
            let code = rpassword::prompt_password("Waitlist access code: ")
                .context("failed to read access code")?;
            if code.trim().is_empty() {
                bail!("access code cannot be empty");
            }
            code
        }
    };

    let client = ApiClient::new(&gateway)?.with_access_token(token);
    match client.unlock_waitlist(&code).await {
        Ok(_) => println!("Unlocked: {gateway} issued the waitlist access cookie"),
        Err(e) => bail!("unlock failed (status {:?}): {e}", e.status()),
    }

    Ok(())
}
