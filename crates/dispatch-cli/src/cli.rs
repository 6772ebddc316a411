//! Command-line surface for the demonstration binary.

use std::thread::available_parallelism;

use clap::Parser;

fn default_claimers() -> u32 {
    available_parallelism().map(|n| n.get() as u32).unwrap_or(4)
}

/// Publishes a handful of demo tasks onto an in-process `Platform`, spawns
/// claimers against it on real OS threads, and prints a summary once every
/// task has settled.
#[derive(Debug, Clone, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Number of claimers to spawn.
    #[arg(long, env = "DISPATCH_CLAIMERS", default_value_t = default_claimers())]
    pub claimers: u32,

    /// Number of demo tasks to publish.
    #[arg(long, env = "DISPATCH_TASKS", default_value_t = 20)]
    pub tasks: u32,

    /// Maximum number of tasks the platform's registry will hold.
    #[arg(long, env = "DISPATCH_MAX_QUEUE_SIZE", default_value_t = 10_000)]
    pub max_queue_size: usize,

    /// Vary published task priorities across the full range instead of
    /// publishing everything at the default priority.
    #[arg(long)]
    pub seed_priority_spread: bool,
}
