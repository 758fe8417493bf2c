use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::QueryError;

/// Status and body exactly as the endpoint sent them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReply {
    pub status: u16,
    pub body: String,
}

/// Sends one rendered query to the analytics endpoint.
///
/// Implementations must be usable from concurrent bisection branches.
pub trait Transport: Send + Sync {
    fn execute(&self, query: &str) -> impl Future<Output = Result<RawReply, QueryError>> + Send;
}

/// `GET {base_url}/query?query=...` with a bearer token on every request.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: Client,
    query_url: String,
    token: String,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig, token: impl Into<String>) -> Result<Self, QueryError> {
        debug!(
            app_id = config.app_id(),
            base_url = config.base_url(),
            timeout_secs = config.timeout().as_secs(),
            "configuring query transport"
        );
        let http = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.timeout().min(Duration::from_secs(30)))
            .build()?;
        Ok(Self {
            http,
            query_url: config.query_url(),
            token: token.into(),
        })
    }
}

impl Transport for HttpTransport {
    async fn execute(&self, query: &str) -> Result<RawReply, QueryError> {
        let response = self
            .http
            .get(&self.query_url)
            .bearer_auth(&self.token)
            .header("content-type", "application/json")
            .query(&[("query", query)])
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!(status, bytes = body.len(), "query reply received");
        Ok(RawReply { status, body })
    }
}
