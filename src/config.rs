use std::{
    env, fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::anyhow;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::QueryError;
use crate::ui::{print_command_status, CommandStatus};

pub const DEFAULT_API_ROOT: &str = "https://api.applicationinsights.io/v1/apps";
pub const DEFAULT_SCOPE: &str = "https://api.applicationinsights.io/.default";
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Endpoint settings for one client. Constructed once and validated up
/// front; there are no setters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    app_id: String,
    base_url: String,
    timeout: Duration,
}

impl ClientConfig {
    /// `base_url` defaults to `{DEFAULT_API_ROOT}/{app_id}`.
    pub fn new(
        app_id: &str,
        base_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, QueryError> {
        let app_id = app_id.trim();
        if app_id.is_empty() {
            return Err(QueryError::Config(
                "application id must not be empty".to_string(),
            ));
        }
        if timeout.is_zero() {
            return Err(QueryError::Config("timeout must be positive".to_string()));
        }

        let base_url = match base_url.map(str::trim).filter(|s| !s.is_empty()) {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("{DEFAULT_API_ROOT}/{}", urlencoding::encode(app_id)),
        };
        let parsed = Url::parse(&base_url)
            .map_err(|err| QueryError::Config(format!("invalid API URL '{base_url}': {err}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(QueryError::Config(format!(
                "API URL must be http(s), got '{}'",
                parsed.scheme()
            )));
        }

        Ok(Self {
            app_id: app_id.to_string(),
            base_url,
            timeout,
        })
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn query_url(&self) -> String {
        format!("{}/query", self.base_url)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Client-credential grant inputs for the identity provider.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    authority_id: String,
    client_id: String,
    client_secret: String,
    scopes: Vec<String>,
    authority_host: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("authority_id", &self.authority_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("scopes", &self.scopes)
            .field("authority_host", &self.authority_host)
            .finish()
    }
}

impl Credentials {
    pub fn new(
        authority_id: &str,
        client_id: &str,
        client_secret: &str,
        scopes: Vec<String>,
    ) -> Result<Self, QueryError> {
        for (label, value) in [
            ("authority id", authority_id),
            ("client id", client_id),
            ("client secret", client_secret),
        ] {
            if value.trim().is_empty() {
                return Err(QueryError::Config(format!("{label} must not be empty")));
            }
        }
        if scopes.is_empty() {
            return Err(QueryError::Config(
                "at least one scope is required".to_string(),
            ));
        }
        if let Some(index) = scopes.iter().position(|s| s.trim().is_empty()) {
            return Err(QueryError::Config(format!("scope #{index} is blank")));
        }

        Ok(Self {
            authority_id: authority_id.trim().to_string(),
            client_id: client_id.trim().to_string(),
            client_secret: client_secret.to_string(),
            scopes: scopes.into_iter().map(|s| s.trim().to_string()).collect(),
            authority_host: DEFAULT_AUTHORITY_HOST.to_string(),
        })
    }

    /// Points the grant at a different identity host (sovereign clouds,
    /// tests).
    pub fn with_authority_host(mut self, host: &str) -> Self {
        self.authority_host = host.trim_end_matches('/').to_string();
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    pub fn authority_url(&self) -> String {
        format!("{}/{}", self.authority_host, self.authority_id)
    }

    pub fn token_url(&self) -> String {
        format!("{}/oauth2/v2.0/token", self.authority_url())
    }

    pub fn authorize_url(&self) -> String {
        format!("{}/oauth2/v2.0/authorize", self.authority_url())
    }
}

/// Splits a comma separated scope list, dropping empty entries.
pub fn parse_scopes(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Persisted defaults, lowest precedence under flags and environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub app_id: Option<String>,
    pub api_url: Option<String>,
    pub authority_id: Option<String>,
    pub client_id: Option<String>,
    pub scopes: Option<Vec<String>>,
    pub timeout_secs: Option<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

pub fn global_config_dir() -> anyhow::Result<PathBuf> {
    if let Some(xdg) = env::var_os("XDG_CONFIG_HOME") {
        return Ok(PathBuf::from(xdg).join("insights-etl"));
    }
    dirs::home_dir()
        .map(|path| path.join(".config").join("insights-etl"))
        .ok_or_else(|| anyhow!("$HOME not configured."))
}

pub fn global_path() -> anyhow::Result<PathBuf> {
    if let Some(path) = env::var_os("INSIGHTS_ETL_CONFIG") {
        return Ok(PathBuf::from(path));
    }
    Ok(global_config_dir()?.join("config.json"))
}

/// Reads a config file. A missing file is an empty config; an unreadable or
/// invalid one is reported and ignored.
pub fn load_file(path: &Path) -> FileConfig {
    let file_contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return FileConfig::default(),
        Err(e) => {
            print_command_status(
                CommandStatus::Warning,
                &format!("could not read {}: {e}", path.display()),
            );
            return FileConfig::default();
        }
    };

    let config: FileConfig = match serde_json::from_str(&file_contents) {
        Ok(c) => c,
        Err(e) => {
            print_command_status(
                CommandStatus::Warning,
                &format!("could not parse {}: {e}", path.display()),
            );
            return FileConfig::default();
        }
    };

    for key in config.extra.keys() {
        print_command_status(
            CommandStatus::Warning,
            &format!("unknown config key {} in {}", key, path.display()),
        );
    }
    tracing::debug!(path = %path.display(), "loaded config file");

    config
}

pub fn load_global() -> anyhow::Result<FileConfig> {
    Ok(load_file(&global_path()?))
}
