//! Error taxonomy for the query client.

use thiserror::Error;

use crate::range::TimeRange;
use crate::template::TemplateError;

/// Why a range could not be bisected any further.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitLimit {
    /// No 100 ns tick boundary lies strictly inside the range.
    TooNarrow,
    /// The recursion hit the configured depth cap.
    MaxDepth(u32),
}

impl std::fmt::Display for SplitLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SplitLimit::TooNarrow => write!(f, "range cannot be narrowed further"),
            SplitLimit::MaxDepth(depth) => write!(f, "bisection depth limit {depth} reached"),
        }
    }
}

/// Errors surfaced by rendering, transport, decoding and bisection.
///
/// Every variant is fatal for the fetch that produced it; nothing is
/// retried at this layer.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    #[error("invalid time range: start {start} is after end {end}")]
    InvalidRange { start: String, end: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("bad query (HTTP 400): {body}")]
    BadQuery { body: String },

    #[error("authorization failed (HTTP 403): the access token is invalid or expired")]
    Authorization,

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("response has no PrimaryResult table")]
    NoPrimaryResult,

    #[error("query failed on the service side ({code}): {message}")]
    Service { code: String, message: String },

    #[error("result for {range} is still too large: {limit}")]
    UnsplittableRange { range: TimeRange, limit: SplitLimit },

    #[error("cannot concatenate tables with different columns: {left:?} vs {right:?}")]
    SchemaMismatch {
        left: Vec<String>,
        right: Vec<String>,
    },

    #[error("fetch cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("token acquisition failed: {0}")]
    Auth(String),
}

impl QueryError {
    /// True for the errors that originate in the transport layer.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            QueryError::Transport(_) | QueryError::UnexpectedStatus { .. }
        )
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        QueryError::MalformedResponse(err.to_string())
    }
}
