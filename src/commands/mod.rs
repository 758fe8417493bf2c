use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::response::ResultTable;
use crate::ui::{print_with_pager, render_result_table};

pub mod fetch;
pub mod query;
pub mod run;
pub mod token;

/// Flag flipped by the first Ctrl-C. In-flight requests finish; no new ones
/// are issued.
pub(crate) fn cancel_on_ctrl_c() -> Arc<AtomicBool> {
    let cancelled = Arc::new(AtomicBool::new(false));
    let signal = Arc::clone(&cancelled);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after in-flight requests");
            signal.store(true, Ordering::SeqCst);
        }
    });
    cancelled
}

pub(crate) fn print_table(table: &ResultTable, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(&table.to_records())?);
    } else {
        print_with_pager(&render_result_table(table)).context("failed to write output")?;
    }
    Ok(())
}

pub(crate) fn parse_params(raw: &[String]) -> Result<Vec<(String, String)>> {
    raw.iter()
        .map(|p| crate::template::parse_param(p).map_err(anyhow::Error::msg))
        .collect()
}
