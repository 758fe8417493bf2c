use std::path::PathBuf;

use clap::Args;

use crate::config::DEFAULT_SCOPE;

#[derive(Debug, Clone, Args)]
pub struct BaseArgs {
    /// Output as JSON
    #[arg(short = 'j', long, global = true)]
    pub json: bool,

    /// Application Insights application id (or via APPLICATION_INSIGHTS_ID)
    #[arg(long, env = "APPLICATION_INSIGHTS_ID", global = true)]
    pub app_id: Option<String>,

    /// Override the query API base URL (or via APPINSIGHTS_API_URL)
    #[arg(long, env = "APPINSIGHTS_API_URL", hide_env_values = true, global = true)]
    pub api_url: Option<String>,

    /// Use a pre-acquired bearer token instead of the client-credential grant
    #[arg(long, env = "APPINSIGHTS_TOKEN", hide_env_values = true, global = true)]
    pub token: Option<String>,

    /// Directory (tenant) id of the identity provider (or via MICROSOFT_AUTHORITY_ID)
    #[arg(long, env = "MICROSOFT_AUTHORITY_ID", global = true)]
    pub authority_id: Option<String>,

    /// Identity provider host, for sovereign clouds (or via AZURE_AUTHORITY_HOST)
    #[arg(long, env = "AZURE_AUTHORITY_HOST", global = true)]
    pub authority_host: Option<String>,

    /// Application (client) id used for the token grant (or via AAD_ID)
    #[arg(long, env = "AAD_ID", global = true)]
    pub client_id: Option<String>,

    /// Client secret used for the token grant (or via AAD_SECRET)
    #[arg(long, env = "AAD_SECRET", hide_env_values = true, global = true)]
    pub client_secret: Option<String>,

    /// Comma separated OAuth scopes (or via SCOPES)
    #[arg(long, env = "SCOPES", global = true)]
    pub scopes: Option<String>,

    /// Per-request timeout in seconds (or via APPINSIGHTS_TIMEOUT_SECS)
    #[arg(long, env = "APPINSIGHTS_TIMEOUT_SECS", global = true)]
    pub timeout_secs: Option<u64>,

    /// Path to a .env file to load before running commands.
    #[arg(long, env = "INSIGHTS_ENV_FILE", hide_env_values = true)]
    pub env_file: Option<PathBuf>,
}

impl BaseArgs {
    pub fn scope_list(&self, fallback: Option<&[String]>) -> Vec<String> {
        match self.scopes.as_deref() {
            Some(raw) => crate::config::parse_scopes(raw),
            None => fallback
                .map(<[String]>::to_vec)
                .unwrap_or_else(|| vec![DEFAULT_SCOPE.to_string()]),
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct CLIArgs<T: Args> {
    #[command(flatten)]
    pub base: BaseArgs,

    #[command(flatten)]
    pub args: T,
}
