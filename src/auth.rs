use chrono::{DateTime, Utc};
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{AuthType, AuthUrl, ClientId, ClientSecret, Scope, TokenResponse, TokenUrl};
use tracing::info;

use crate::config::Credentials;
use crate::error::QueryError;

/// Bearer token for the query endpoint.
#[derive(Clone)]
pub struct AccessToken {
    secret: String,
    expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &mask_token(&self.secret))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl AccessToken {
    /// Wraps a token obtained outside this process.
    pub fn from_raw(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            expires_at: None,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn masked(&self) -> String {
        mask_token(&self.secret)
    }
}

/// Client-credentials grant against the configured authority.
pub async fn acquire_token(credentials: &Credentials) -> Result<AccessToken, QueryError> {
    let auth_url = AuthUrl::new(credentials.authorize_url())
        .map_err(|err| QueryError::Config(format!("invalid authority URL: {err}")))?;
    let token_url = TokenUrl::new(credentials.token_url())
        .map_err(|err| QueryError::Config(format!("invalid token URL: {err}")))?;

    let client = BasicClient::new(
        ClientId::new(credentials.client_id().to_string()),
        Some(ClientSecret::new(credentials.client_secret().to_string())),
        auth_url,
        Some(token_url),
    )
    .set_auth_type(AuthType::RequestBody);

    let response = client
        .exchange_client_credentials()
        .add_scopes(credentials.scopes().iter().cloned().map(Scope::new))
        .request_async(async_http_client)
        .await
        .map_err(|err| QueryError::Auth(describe_token_error(&err)))?;

    let expires_at = response
        .expires_in()
        .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
        .map(|ttl| Utc::now() + ttl);
    info!(
        authority = %credentials.authority_url(),
        expires_at = ?expires_at,
        "access token acquired"
    );

    Ok(AccessToken {
        secret: response.access_token().secret().clone(),
        expires_at,
    })
}

fn describe_token_error<RE, T>(err: &oauth2::RequestTokenError<RE, T>) -> String
where
    RE: std::error::Error + 'static,
    T: oauth2::ErrorResponse + std::fmt::Display + 'static,
{
    match err {
        oauth2::RequestTokenError::ServerResponse(response) => response.to_string(),
        oauth2::RequestTokenError::Request(inner) => format!("request failed: {inner}"),
        oauth2::RequestTokenError::Parse(inner, _) => format!("unreadable token response: {inner}"),
        oauth2::RequestTokenError::Other(message) => message.clone(),
    }
}

pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_SCOPE;
    use crate::transport::tests::serve_once;

    #[test]
    fn test_mask_token_long() {
        assert_eq!(mask_token("eyJ0eXAiOiJKV1QiLCJhbGciOi"), "eyJ0...ciOi");
    }

    #[test]
    fn test_mask_token_short() {
        assert_eq!(mask_token("short"), "***");
        assert_eq!(mask_token("12345678"), "***");
    }

    #[test]
    fn test_mask_token_non_ascii() {
        assert_eq!(mask_token("jéton-sécurisé-àbc"), "jéto...-àbc");
        assert_eq!(mask_token("ééééééééé"), "éééé...éééé");
        let token = AccessToken::from_raw("ключ-доступа-123");
        assert!(format!("{token:?}").contains("ключ...-123"));
    }

    #[test]
    fn debug_output_never_contains_secret() {
        let token = AccessToken::from_raw("super-secret-token-value");
        let rendered = format!("{token:?}");
        assert!(!rendered.contains("super-secret-token-value"));
        assert!(rendered.contains("supe...alue"));
        assert_eq!(token.secret(), "super-secret-token-value");
        assert_eq!(token.expires_at(), None);
    }

    #[tokio::test]
    async fn client_credentials_grant_returns_token() {
        let body = r#"{"token_type":"Bearer","expires_in":3599,"access_token":"issued-token-123"}"#;
        let (base, server) = serve_once("200 OK", body.to_string()).await;
        let credentials =
            Credentials::new("tenant-1", "client-1", "secret-1", vec![DEFAULT_SCOPE.into()])
                .unwrap()
                .with_authority_host(&base);

        let token = acquire_token(&credentials).await.unwrap();
        assert_eq!(token.secret(), "issued-token-123");
        assert!(token.expires_at().unwrap() > Utc::now());

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /tenant-1/oauth2/v2.0/token"));
    }

    #[tokio::test]
    async fn rejected_grant_is_an_auth_error() {
        let body = r#"{"error":"invalid_client","error_description":"AADSTS7000215: Invalid client secret provided."}"#;
        let (base, server) = serve_once("401 Unauthorized", body.to_string()).await;
        let credentials =
            Credentials::new("tenant-1", "client-1", "wrong", vec![DEFAULT_SCOPE.into()])
                .unwrap()
                .with_authority_host(&base);

        let err = acquire_token(&credentials).await.unwrap_err();
        assert!(matches!(err, QueryError::Auth(_)));
        assert!(err.to_string().contains("invalid_client"));
        server.await.unwrap();
    }
}
