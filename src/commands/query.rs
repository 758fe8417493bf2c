use anyhow::Result;
use clap::Args;

use crate::args::BaseArgs;
use crate::login::login;
use crate::ui::{print_with_pager, render_result_table, with_spinner};

use super::print_table;

#[derive(Debug, Clone, Args)]
pub struct QueryArgs {
    /// Literal query text
    pub query: String,

    /// Print every returned table instead of only PrimaryResult
    #[arg(long)]
    pub all_tables: bool,
}

pub async fn run(base: BaseArgs, args: QueryArgs) -> Result<()> {
    let ctx = login(&base).await?;
    let client = ctx.client()?;
    if !args.all_tables {
        let table = with_spinner("Running query...", client.query_primary(&args.query)).await?;
        return print_table(&table, base.json);
    }

    let set = with_spinner("Running query...", client.query(&args.query)).await?;

    if base.json {
        println!("{}", serde_json::to_string(&set)?);
        return Ok(());
    }
    let mut output = String::new();
    for table in &set.tables {
        output.push_str(&format!("{} ({} rows)\n", table.name, table.len()));
        output.push_str(&render_result_table(table));
        output.push_str("\n\n");
    }
    print_with_pager(output.trim_end())?;
    Ok(())
}
