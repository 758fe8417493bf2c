//! Incremental fetching: run a range-bounded query and, whenever the service
//! refuses because the result is too large, bisect the range and stitch the
//! halves back together in chronological order.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::{try_join, BoxFuture, FutureExt};
use tracing::{debug, info};

use crate::error::{QueryError, SplitLimit};
use crate::response::{is_result_too_large, normalize, ResultSet, ResultTable};
use crate::template::{QueryParams, QueryTemplate, TemplateError, END_DATE, START_DATE};
use crate::transport::{RawReply, Transport};

/// 2^32 leaves of a one-year window are already a few milliseconds wide.
pub const DEFAULT_MAX_DEPTH: u32 = 32;

#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Run the two halves of a split concurrently instead of one after the
    /// other. Output order is left-then-right either way.
    pub concurrent: bool,
    /// Deepest bisection level allowed before giving up on a range.
    pub max_depth: u32,
    /// Checked before every request; once set, no new request is issued.
    pub cancel: Arc<AtomicBool>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            concurrent: false,
            max_depth: DEFAULT_MAX_DEPTH,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Counters for one incremental fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    pub requests: usize,
    pub splits: usize,
    pub deepest: u32,
}

pub struct IncrementalFetcher<'a, T: Transport> {
    transport: &'a T,
    template: &'a QueryTemplate,
    options: &'a FetchOptions,
    requests: AtomicUsize,
    splits: AtomicUsize,
    deepest: AtomicU32,
}

impl<'a, T: Transport> IncrementalFetcher<'a, T> {
    pub fn new(transport: &'a T, template: &'a QueryTemplate, options: &'a FetchOptions) -> Self {
        Self {
            transport,
            template,
            options,
            requests: AtomicUsize::new(0),
            splits: AtomicUsize::new(0),
            deepest: AtomicU32::new(0),
        }
    }

    pub fn stats(&self) -> FetchStats {
        FetchStats {
            requests: self.requests.load(Ordering::Relaxed),
            splits: self.splits.load(Ordering::Relaxed),
            deepest: self.deepest.load(Ordering::Relaxed),
        }
    }

    /// Fetches the `PrimaryResult` rows for the whole range in `params`.
    pub async fn run(&self, params: &QueryParams) -> Result<ResultTable, QueryError> {
        if !self.template.references(START_DATE) || !self.template.references(END_DATE) {
            return Err(TemplateError::UnboundRange.into());
        }
        let table = self.fetch_range(params.clone(), 0).await?;
        let stats = self.stats();
        info!(
            range = %params.range(),
            rows = table.len(),
            requests = stats.requests,
            splits = stats.splits,
            depth = stats.deepest,
            "incremental fetch complete"
        );
        Ok(table)
    }

    fn fetch_range<'s>(
        &'s self,
        params: QueryParams,
        depth: u32,
    ) -> BoxFuture<'s, Result<ResultTable, QueryError>> {
        async move {
            self.deepest.fetch_max(depth, Ordering::Relaxed);
            let range = params.range();
            let query = self.template.render(&params)?;

            if self.options.cancel.load(Ordering::SeqCst) {
                return Err(QueryError::Cancelled);
            }
            self.requests.fetch_add(1, Ordering::Relaxed);
            debug!(%range, depth, "querying range");
            let reply = self.transport.execute(&query).await?;
            let set = match classify_reply(reply)? {
                ReplyKind::Tables(set) => set,
                ReplyKind::TooLarge => {
                    return self.split_and_fetch(params, depth).await;
                }
            };
            let table = set.into_primary()?;
            debug!(%range, depth, rows = table.len(), "range fetched");
            Ok(table)
        }
        .boxed()
    }

    async fn split_and_fetch(
        &self,
        params: QueryParams,
        depth: u32,
    ) -> Result<ResultTable, QueryError> {
        let range = params.range();
        if depth >= self.options.max_depth {
            return Err(QueryError::UnsplittableRange {
                range,
                limit: SplitLimit::MaxDepth(self.options.max_depth),
            });
        }
        let Some((left, right)) = range.split() else {
            return Err(QueryError::UnsplittableRange {
                range,
                limit: SplitLimit::TooNarrow,
            });
        };

        self.splits.fetch_add(1, Ordering::Relaxed);
        info!(%range, middle = %left.end(), depth, "result too large, splitting range");
        let left_params = params.with_range(left);
        let right_params = params.with_range(right);

        let (mut head, tail) = if self.options.concurrent {
            try_join(
                self.fetch_range(left_params, depth + 1),
                self.fetch_range(right_params, depth + 1),
            )
            .await?
        } else {
            let head = self.fetch_range(left_params, depth + 1).await?;
            let tail = self.fetch_range(right_params, depth + 1).await?;
            (head, tail)
        };
        head.append(tail)?;
        Ok(head)
    }

}

/// What a reply means for the bisection.
#[derive(Debug)]
pub enum ReplyKind {
    Tables(ResultSet),
    TooLarge,
}

/// Maps the HTTP status onto the error taxonomy and hands back the body of
/// a 200 reply.
pub fn check_status(reply: RawReply) -> Result<String, QueryError> {
    match reply.status {
        200 => Ok(reply.body),
        400 => Err(QueryError::BadQuery { body: reply.body }),
        403 => Err(QueryError::Authorization),
        status => Err(QueryError::UnexpectedStatus {
            status,
            body: reply.body,
        }),
    }
}

/// Sorts a reply into tables, a size-limit refusal, or a fatal error.
pub fn classify_reply(reply: RawReply) -> Result<ReplyKind, QueryError> {
    let body = check_status(reply)?;
    match normalize(&body) {
        Ok(set) => Ok(ReplyKind::Tables(set)),
        Err(QueryError::Service { .. }) if is_result_too_large(&body) => Ok(ReplyKind::TooLarge),
        Err(err) => Err(err),
    }
}
