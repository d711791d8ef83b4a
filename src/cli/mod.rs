//! CLI module for Content Gateway
//!
//! Provides subcommands:
//! - `serve`: run the gateway (and the periodic warmer when enabled)
//! - `warm`: run one cache warming pass and exit

pub mod serve;
pub mod warm;

use clap::{Parser, Subcommand};

/// Content Gateway - caching, rate limiting and circuit breaking for a content API
#[derive(Parser)]
#[command(name = "content-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the gateway server
    Serve,

    /// Run a single cache warming pass against the configured store
    Warm(warm::WarmArgs),
}
