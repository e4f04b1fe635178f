//! log4rs setup. Library code only ever uses the `log` facade; binaries and embedders pick
//! one of these initializers.

use crate::errors::OptimizerError;
use log::LevelFilter;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::append::rolling_file::policy::compound::{
    CompoundPolicy, roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger,
};
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::{Path, PathBuf};

const PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}";
const ROLL_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_RETENTION: u32 = 7;

/// Initializes from `log4rs.yaml` in the working directory.
pub fn init() -> Result<(), OptimizerError> {
    init_path(Path::new("log4rs.yaml"))
}

pub fn init_path(path: &Path) -> Result<(), OptimizerError> {
    log4rs::init_file(path, log4rs::config::Deserializers::default())
        .map_err(|e| OptimizerError::Io(format!("logger config {}: {e}", path.display())))
}

fn parse_level(level: Option<&str>) -> LevelFilter {
    match level.unwrap_or("info").to_ascii_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

fn rolling(base: &Path, stem: &str, keep: u32) -> Result<RollingFileAppender, OptimizerError> {
    let roller = FixedWindowRoller::builder()
        .build(&base.join(format!("{stem}.{{}}.log")).display().to_string(), keep)
        .map_err(|e| OptimizerError::Io(format!("roller for {stem}: {e}")))?;
    let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(ROLL_SIZE_BYTES)), Box::new(roller));
    RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build(base.join(format!("{stem}.log")), Box::new(policy))
        .map_err(|e| OptimizerError::Io(format!("{stem}.log: {e}")))
}

/// Builds the rolling `app.log` / `metrics.log` config without installing it.
pub fn build_config(dir: &Path, level: Option<&str>, retention: Option<u32>) -> Result<Config, OptimizerError> {
    std::fs::create_dir_all(dir).map_err(|e| OptimizerError::Io(format!("{}: {e}", dir.display())))?;
    let lvl = parse_level(level);
    let keep = retention.unwrap_or(DEFAULT_RETENTION).max(1);
    Config::builder()
        .appender(Appender::builder().build("app", Box::new(rolling(dir, "app", keep)?)))
        .appender(Appender::builder().build("metrics", Box::new(rolling(dir, "metrics", keep)?)))
        .logger(Logger::builder().appender("metrics").additive(false).build(crate::gc::METRICS_TARGET, lvl))
        // dev events stay off the files unless explicitly asked for
        .logger(Logger::builder().additive(false).build(crate::utils::devlog::DEV_TARGET, LevelFilter::Off))
        .build(Root::builder().appender("app").build(lvl))
        .map_err(|e| OptimizerError::InvalidConfig(format!("logger: {e}")))
}

/// Writes rolling logs under `dir` (default: working directory).
///
/// A logger that is already installed is left in place.
pub fn configure_logging(dir: Option<&Path>, level: Option<&str>, retention: Option<u32>) -> Result<(), OptimizerError> {
    let base = dir
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let config = build_config(&base, level, retention)?;
    if log4rs::init_config(config).is_err() {
        log::debug!("logger already initialized, keeping existing configuration");
    }
    Ok(())
}

/// Reads `MEMOPT_LOG_DIR`, `MEMOPT_LOG_LEVEL` and `MEMOPT_LOG_RETENTION`.
pub fn configure_from_env() -> Result<(), OptimizerError> {
    let dir = std::env::var("MEMOPT_LOG_DIR").ok().map(PathBuf::from);
    let level = std::env::var("MEMOPT_LOG_LEVEL").ok();
    let retention = std::env::var("MEMOPT_LOG_RETENTION").ok().and_then(|s| s.parse::<u32>().ok());
    configure_logging(dir.as_deref(), level.as_deref(), retention)
}
