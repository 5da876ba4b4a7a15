//! textsift CLI: batch text enrichment for search dashboards.
//!
//! Reads JSON Lines records, runs them through regex, sentiment and
//! linguistic stages, and loads the result into Elasticsearch with a
//! matching Kibana dashboard.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use crate::commands::Cli;

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    commands::init_tracing(&cli);

    commands::run(cli)
}
