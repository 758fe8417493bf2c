use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::args::BaseArgs;
use crate::auth::{self, AccessToken};
use crate::client::InsightsClient;
use crate::config::{self, ClientConfig, Credentials, FileConfig, DEFAULT_TIMEOUT_SECS};

/// Resolved endpoint settings and credentials for API calls
pub struct LoginContext {
    pub config: ClientConfig,
    pub token: AccessToken,
}

impl LoginContext {
    pub fn client(&self) -> Result<InsightsClient> {
        InsightsClient::connect(&self.config, self.token.secret())
            .context("failed to build HTTP client")
    }
}

/// Flags and environment first, then the config file.
pub fn client_config(base: &BaseArgs, file: &FileConfig) -> Result<ClientConfig> {
    let app_id = base
        .app_id
        .clone()
        .or_else(|| file.app_id.clone())
        .context("application id required. Use --app-id or APPLICATION_INSIGHTS_ID")?;
    let api_url = base.api_url.clone().or_else(|| file.api_url.clone());
    let timeout = base
        .timeout_secs
        .or(file.timeout_secs)
        .unwrap_or(DEFAULT_TIMEOUT_SECS);

    Ok(ClientConfig::new(
        &app_id,
        api_url.as_deref(),
        Duration::from_secs(timeout),
    )?)
}

pub fn credentials(base: &BaseArgs, file: &FileConfig) -> Result<Credentials> {
    let authority_id = base.authority_id.clone().or_else(|| file.authority_id.clone());
    let client_id = base.client_id.clone().or_else(|| file.client_id.clone());
    let (Some(authority_id), Some(client_id), Some(client_secret)) =
        (authority_id, client_id, base.client_secret.clone())
    else {
        bail!(
            "no credentials available. Set APPINSIGHTS_TOKEN, or MICROSOFT_AUTHORITY_ID, AAD_ID and AAD_SECRET"
        );
    };
    let scopes = base.scope_list(file.scopes.as_deref());
    let credentials = Credentials::new(&authority_id, &client_id, &client_secret, scopes)?;
    Ok(match base.authority_host.as_deref().map(str::trim) {
        Some(host) if !host.is_empty() => credentials.with_authority_host(host),
        _ => credentials,
    })
}

pub async fn login(base: &BaseArgs) -> Result<LoginContext> {
    let file = config::load_global().unwrap_or_default();
    let config = client_config(base, &file)?;

    // Priority 1: explicit bearer token
    if let Some(token) = base.token.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        return Ok(LoginContext {
            config,
            token: AccessToken::from_raw(token),
        });
    }

    // Priority 2: client-credential grant
    let credentials = credentials(base, &file)?;
    let token = auth::acquire_token(&credentials)
        .await
        .context("failed to authenticate with the identity provider")?;
    Ok(LoginContext { config, token })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> BaseArgs {
        BaseArgs {
            json: false,
            app_id: None,
            api_url: None,
            token: None,
            authority_id: None,
            authority_host: None,
            client_id: None,
            client_secret: None,
            scopes: None,
            timeout_secs: None,
            env_file: None,
        }
    }

    #[test]
    fn flags_override_file_config() {
        let mut args = base();
        args.app_id = Some("flag-app".into());
        let file = FileConfig {
            app_id: Some("file-app".into()),
            timeout_secs: Some(15),
            ..Default::default()
        };
        let config = client_config(&args, &file).unwrap();
        assert_eq!(config.app_id(), "flag-app");
        assert_eq!(config.timeout(), Duration::from_secs(15));
    }

    #[test]
    fn missing_app_id_is_reported() {
        let err = client_config(&base(), &FileConfig::default()).unwrap_err();
        assert!(err.to_string().contains("--app-id"));
    }

    #[test]
    fn credentials_need_secret_from_flags() {
        let mut args = base();
        let file = FileConfig {
            authority_id: Some("tenant".into()),
            client_id: Some("client".into()),
            scopes: Some(vec!["s1".into()]),
            ..Default::default()
        };
        assert!(credentials(&args, &file).is_err());

        args.client_secret = Some("secret".into());
        let creds = credentials(&args, &file).unwrap();
        assert_eq!(creds.scopes(), &["s1".to_string()]);
        assert_eq!(creds.client_id(), "client");
    }

    #[test]
    fn authority_host_flag_redirects_token_endpoint() {
        let mut args = base();
        args.authority_id = Some("tenant".into());
        args.client_id = Some("client".into());
        args.client_secret = Some("secret".into());
        let default = credentials(&args, &FileConfig::default()).unwrap();
        assert_eq!(
            default.token_url(),
            format!("{}/tenant/oauth2/v2.0/token", config::DEFAULT_AUTHORITY_HOST)
        );

        args.authority_host = Some("https://login.microsoftonline.us/".into());
        let sovereign = credentials(&args, &FileConfig::default()).unwrap();
        assert_eq!(
            sovereign.token_url(),
            "https://login.microsoftonline.us/tenant/oauth2/v2.0/token"
        );
    }

    #[test]
    fn scope_flag_wins_over_file() {
        let mut args = base();
        args.scopes = Some("a,b".into());
        assert_eq!(
            args.scope_list(Some(&["file".to_string()])),
            vec!["a".to_string(), "b".to_string()]
        );
        assert_eq!(
            base().scope_list(None),
            vec![config::DEFAULT_SCOPE.to_string()]
        );
    }

    #[tokio::test]
    async fn explicit_token_skips_identity_provider() {
        let mut args = base();
        args.app_id = Some("app".into());
        args.token = Some("  raw-token  ".into());
        let ctx = login(&args).await.unwrap();
        assert_eq!(ctx.token.secret(), "raw-token");
        assert!(ctx.client().is_ok());
    }
}
