#![recursion_limit = "256"]

mod cli;
mod application;
mod domain;
mod data;
mod ml;
mod infra;

use anyhow::Result;
use cli::Cli;

fn main() -> Result<()> {
    let cli = Cli::from_env()?;
    cli.run()
}
