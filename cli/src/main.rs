mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
  let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pushmux=info,info"));
  tracing_subscriber::fmt().with_env_filter(env_filter).with_target(true).init();

  let cli_args = Cli::parse();

  match cli_args.command {
    Commands::Serve(serve_args) => commands::serve::run(serve_args).await,
    Commands::Dial(dial_args) => commands::dial::run(dial_args).await,
  }
}
