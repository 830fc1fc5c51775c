use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "tollgate", version, about = "Resource governor for rate-limited, memory-bound work")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file to use instead of ~/.tollgate/config.toml or ./tollgate.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print machine readable JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessMode {
    Batch,
    Stream,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct StoreArgs {
    #[command(subcommand)]
    pub command: StoreCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum StoreCommand {
    /// Print the value stored under KEY.
    Get { key: String },
    /// Store VALUE under KEY, cleaning up first if the quota is short.
    Set {
        key: String,
        value: String,
        /// Fail with an error instead of reporting a refused write.
        #[arg(long)]
        strict: bool,
    },
    Remove { key: String },
    /// Show used / free bytes against the quota.
    Usage,
    /// Run the eviction rules now.
    Cleanup,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct SimulateArgs {
    /// Channel the simulated calls go through.
    #[arg(long, default_value = "youtube")]
    pub channel: String,

    #[arg(long, default_value_t = 10)]
    pub calls: usize,

    /// Distinct request keys; calls sharing a key are coalesced.
    #[arg(long)]
    pub distinct: Option<usize>,

    /// Probability that one attempt fails (0.0 - 1.0).
    #[arg(long, default_value_t = 0.3)]
    pub fail_rate: f64,

    #[arg(long, default_value_t = 200)]
    pub latency_ms: u64,

    /// Attempts per call; defaults to retry.max_attempts.
    #[arg(long)]
    pub retries: Option<u32>,

    /// Bound each call (queueing, attempts and backoff).
    #[arg(long)]
    pub deadline_ms: Option<u64>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct MonitorArgs {
    /// Sampling period; defaults to memory.monitor_interval_ms.
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long)]
    pub duration_secs: Option<u64>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ProcessArgs {
    #[arg(long, value_enum, default_value_t = ProcessMode::Stream)]
    pub mode: ProcessMode,

    #[arg(long, default_value_t = 20)]
    pub items: usize,

    /// Simulated work per item.
    #[arg(long, default_value_t = 100)]
    pub work_ms: u64,

    /// Items in flight (stream) or per chunk (batch); defaults to config.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Fail the item at this input index.
    #[arg(long)]
    pub fail_at: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show channel, memory, storage, cache and breaker state.
    Status,
    Store(StoreArgs),
    /// Fire synthetic flaky calls through the rate-limited facade.
    Simulate(SimulateArgs),
    /// Watch memory health transitions.
    Monitor(MonitorArgs),
    /// Run synthetic work through the memory-aware runner.
    Process(ProcessArgs),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_store_set() {
        let args = Args::try_parse_from(["tollgate", "--json", "store", "set", "k", "v", "--strict"]).unwrap();
        assert!(args.json);
        match args.command {
            Commands::Store(StoreArgs {
                command: StoreCommand::Set { key, value, strict },
            }) => {
                assert_eq!((key.as_str(), value.as_str(), strict), ("k", "v", true));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn process_defaults() {
        let args = Args::try_parse_from(["tollgate", "process", "--mode", "batch"]).unwrap();
        let Commands::Process(p) = args.command else {
            panic!("expected process");
        };
        assert_eq!(p.mode, ProcessMode::Batch);
        assert_eq!(p.items, 20);
        assert_eq!(p.concurrency, None);
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
