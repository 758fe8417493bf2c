use tracing::debug;

use crate::config::ClientConfig;
use crate::error::QueryError;
use crate::fetch::{check_status, FetchOptions, FetchStats, IncrementalFetcher};
use crate::response::{normalize, ResultSet, ResultTable};
use crate::template::{QueryParams, QueryTemplate};
use crate::transport::{HttpTransport, Transport};

/// Query client for one analytics application.
pub struct InsightsClient<T: Transport = HttpTransport> {
    transport: T,
    options: FetchOptions,
}

impl InsightsClient<HttpTransport> {
    /// Client over HTTP using an already acquired bearer token.
    pub fn connect(config: &ClientConfig, token: &str) -> Result<Self, QueryError> {
        Ok(Self::with_transport(HttpTransport::new(config, token)?))
    }
}

impl<T: Transport> InsightsClient<T> {
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport,
            options: FetchOptions::default(),
        }
    }

    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    /// Runs a literal query once and returns every table it produced.
    pub async fn query(&self, query: &str) -> Result<ResultSet, QueryError> {
        debug!(query, "running one-shot query");
        let reply = self.transport.execute(query).await?;
        normalize(&check_status(reply)?)
    }

    pub async fn query_primary(&self, query: &str) -> Result<ResultTable, QueryError> {
        self.query(query).await?.into_primary()
    }

    /// Fetches the `PrimaryResult` of `template` over the range in `params`,
    /// bisecting the range whenever the service reports the result as too
    /// large.
    pub async fn fetch_incremental(
        &self,
        template: &QueryTemplate,
        params: &QueryParams,
    ) -> Result<ResultTable, QueryError> {
        self.fetch_incremental_with_stats(template, params)
            .await
            .map(|(table, _)| table)
    }

    pub async fn fetch_incremental_with_stats(
        &self,
        template: &QueryTemplate,
        params: &QueryParams,
    ) -> Result<(ResultTable, FetchStats), QueryError> {
        let fetcher = IncrementalFetcher::new(&self.transport, template, &self.options);
        let table = fetcher.run(params).await?;
        Ok((table, fetcher.stats()))
    }
}
