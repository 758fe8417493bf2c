use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;

use crate::args::BaseArgs;
use crate::fetch::{FetchOptions, DEFAULT_MAX_DEPTH};
use crate::login::login;
use crate::pipeline::{NdjsonSink, RowSink};
use crate::range::{parse_timestamp, TimeRange};
use crate::template::{QueryParams, QueryTemplate};
use crate::ui::{print_command_status, with_spinner, CommandStatus};

use super::{cancel_on_ctrl_c, parse_params, print_table};

#[derive(Debug, Clone, Args)]
pub struct FetchArgs {
    /// Query template file with {{ StartDate }} and {{ EndDate }} placeholders
    #[arg(long)]
    pub template: PathBuf,

    /// Inclusive start of the window (RFC 3339 or YYYY-MM-DDTHH:MM:SS, UTC)
    #[arg(long, value_parser = parse_timestamp)]
    pub start: DateTime<Utc>,

    /// Exclusive end of the window; defaults to now
    #[arg(long, value_parser = parse_timestamp)]
    pub end: Option<DateTime<Utc>>,

    /// Extra template parameter as KEY=VALUE (repeatable)
    #[arg(long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// Query both halves of a split at the same time
    #[arg(long)]
    pub concurrent: bool,

    /// Deepest bisection level before giving up on a range
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
    pub max_depth: u32,

    /// Append rows as NDJSON to this file instead of printing them
    #[arg(long)]
    pub out: Option<PathBuf>,
}

pub async fn run(base: BaseArgs, args: FetchArgs) -> Result<()> {
    let text = fs::read_to_string(&args.template)
        .with_context(|| format!("failed to read template {}", args.template.display()))?;
    let template = QueryTemplate::parse(&text)
        .with_context(|| format!("invalid template {}", args.template.display()))?;
    tracing::debug!(placeholders = ?template.placeholders(), "template loaded");

    let range = TimeRange::new(args.start, args.end.unwrap_or_else(Utc::now))?;
    if range.is_empty() {
        print_command_status(
            CommandStatus::Warning,
            &format!("{range} is empty; the query will match no rows"),
        );
    }
    let params = parse_params(&args.params)?
        .into_iter()
        .try_fold(QueryParams::new(range), |params, (key, value)| {
            params.with(&key, value)
        })?;

    let ctx = login(&base).await?;
    let client = ctx.client()?.with_options(FetchOptions {
        concurrent: args.concurrent,
        max_depth: args.max_depth,
        cancel: cancel_on_ctrl_c(),
    });

    let fetched = with_spinner(
        &format!("Fetching {range}..."),
        client.fetch_incremental_with_stats(&template, &params),
    )
    .await;
    let (table, stats) = match fetched {
        Ok(done) => done,
        Err(err) if err.is_transport() => {
            return Err(anyhow::Error::new(err)
                .context("fetch aborted by a transport failure; rerun to retry"));
        }
        Err(err) => return Err(err.into()),
    };

    if table.is_empty() {
        print_command_status(CommandStatus::Warning, &format!("no rows in {range}"));
    }
    match &args.out {
        Some(path) => {
            NdjsonSink::new(path).load(&table.name, &table)?;
        }
        None => print_table(&table, base.json)?,
    }
    print_command_status(
        CommandStatus::Success,
        &format!(
            "{} rows fetched with {} requests ({} splits)",
            table.len(),
            stats.requests,
            stats.splits
        ),
    );
    Ok(())
}
