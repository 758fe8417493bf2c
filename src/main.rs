use anyhow::Result;
use clap::{Parser, Subcommand};
use std::ffi::OsString;
use tracing_subscriber::EnvFilter;

mod args;
mod auth;
mod client;
mod commands;
mod config;
mod env;
mod error;
mod fetch;
mod login;
mod pipeline;
mod range;
mod response;
mod template;
mod transport;
mod ui;

use crate::args::CLIArgs;
use crate::commands::{fetch as fetch_cmd, query, run, token};

const DEFAULT_DEV_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-dev");
const CLI_VERSION: &str = match option_env!("INSIGHTS_ETL_VERSION_STRING") {
    Some(version) => version,
    None => DEFAULT_DEV_VERSION,
};

#[derive(Debug, Parser)]
#[command(
    name = "insights-etl",
    about = "Incremental extraction from Application Insights",
    version = CLI_VERSION
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a single query and print its results
    Query(CLIArgs<query::QueryArgs>),
    /// Fetch a time window, splitting it when the result is too large
    Fetch(CLIArgs<fetch_cmd::FetchArgs>),
    /// Acquire an access token with the client-credential grant
    Token(CLIArgs<token::TokenArgs>),
    /// Extract everything since the last watermark and append it to a file
    Run(CLIArgs<run::RunArgs>),
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("insights_etl=info,warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let argv: Vec<OsString> = std::env::args_os().collect();
    env::bootstrap_from_args(&argv)?;
    init_tracing();
    let cli = Cli::parse_from(argv);

    match cli.command {
        Commands::Query(cmd) => query::run(cmd.base, cmd.args).await?,
        Commands::Fetch(cmd) => fetch_cmd::run(cmd.base, cmd.args).await?,
        Commands::Token(cmd) => token::run(cmd.base, cmd.args).await?,
        Commands::Run(cmd) => run::run(cmd.base, cmd.args).await?,
    }

    Ok(())
}
