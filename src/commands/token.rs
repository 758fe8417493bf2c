use anyhow::Result;
use chrono::Utc;
use clap::Args;

use crate::args::BaseArgs;
use crate::auth;
use crate::config;
use crate::login::credentials;
use crate::ui::with_spinner;

#[derive(Debug, Clone, Args)]
pub struct TokenArgs {
    /// Show full token (default: masked)
    #[arg(long)]
    pub show: bool,
}

pub async fn run(base: BaseArgs, args: TokenArgs) -> Result<()> {
    let file = config::load_global().unwrap_or_default();
    let credentials = credentials(&base, &file)?;
    let token = with_spinner("Requesting token...", auth::acquire_token(&credentials)).await?;

    let token_value = if args.show {
        token.secret().to_string()
    } else {
        token.masked()
    };
    let ttl_seconds = token
        .expires_at()
        .map(|exp| (exp - Utc::now()).num_seconds());

    if base.json {
        let output = serde_json::json!({
            "token": token_value,
            "expires_at": token.expires_at(),
            "ttl_seconds": ttl_seconds,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Token: {token_value}");
        match (token.expires_at(), ttl_seconds) {
            (Some(expires_at), Some(ttl)) => {
                println!("Expires: {expires_at} (in {ttl} seconds)")
            }
            _ => println!("Expires: unknown"),
        }
    }
    Ok(())
}
