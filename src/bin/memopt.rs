use clap::{Parser, Subcommand};
use memopt::probe::{HeapUsage, ManualHeapProbe};
use memopt::{MemoryOptimizer, OptimizerConfig, OptimizerError, logger};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "memopt", version, about = "Memory optimizer toolkit", long_about = None)]
struct Cli {
    #[arg(long, global = true, help = "Path to a config file (TOML). If omitted, discovery and defaults are used.")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "log4rs YAML file; otherwise MEMOPT_LOG_DIR enables file logging")]
    log_config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Print the effective configuration as TOML")]
    Config,
    #[command(about = "Mount an optimizer with in-memory collaborators and run a cyclic cache workload")]
    Simulate {
        #[arg(long, default_value_t = 200, help = "Distinct keys in the workload")]
        keys: usize,
        #[arg(long, default_value_t = 10_000, help = "Cache lookups to perform")]
        ops: usize,
        #[arg(long, default_value_t = 60_000, help = "TTL per entry in milliseconds")]
        ttl_ms: u64,
    },
}

fn init_logging(cli: &Cli) -> Result<(), OptimizerError> {
    match &cli.log_config {
        Some(p) => logger::init_path(p),
        None if std::env::var_os("MEMOPT_LOG_DIR").is_some() => logger::configure_from_env(),
        None => Ok(()),
    }
}

fn simulate(cfg: OptimizerConfig, keys: usize, ops: usize, ttl: Duration) -> Result<serde_json::Value, OptimizerError> {
    let probe = Arc::new(ManualHeapProbe::new(HeapUsage::new(16 << 20, 32 << 20, 256 << 20)));
    let optimizer = MemoryOptimizer::builder(cfg).probe(probe).mount()?;
    let keys = keys.max(1);
    for i in 0..ops {
        let key = format!("k{}", i % keys);
        optimizer.cache().get_or_insert_with(&key, ttl, || json!({ "key": key, "built_at_op": i }));
    }
    let sweep = optimizer.force_gc();
    let metrics = optimizer.metrics();
    let out = json!({
        "keys": keys,
        "ops": ops,
        "hit_ratio": metrics.cache.hit_ratio(),
        "metrics": serde_json::to_value(metrics)?,
        "final_sweep": serde_json::to_value(sweep)?,
    });
    optimizer.unmount();
    Ok(out)
}

fn run(cli: Cli) -> Result<(), OptimizerError> {
    init_logging(&cli)?;
    let cfg = OptimizerConfig::discover(cli.config.as_deref())?;
    match cli.command {
        Commands::Config => print!("{}", cfg.to_toml_string()?),
        Commands::Simulate { keys, ops, ttl_ms } => {
            let report = simulate(cfg, keys, ops, Duration::from_millis(ttl_ms))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

fn main() {
    if let Err(e) = run(Cli::parse()) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
