mod cache;
mod commands;
mod config;
mod network;
mod worker;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::cache::{MemoryStore, SqliteStore};
use crate::worker::WorkerVersion;

#[derive(Parser, Debug)]
#[command(name = "kc-offline")]
#[command(about = "Offline cache for the scheme page and its PDF documents")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/kc-offline/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Worker policy version to run
  #[arg(long, value_enum, global = true)]
  version_policy: Option<WorkerVersion>,

  /// Origin serving the assets
  #[arg(long, global = true)]
  origin: Option<String>,

  /// Cache database path
  #[arg(long, global = true)]
  database: Option<PathBuf>,

  /// Keep the cache in memory only
  #[arg(long, global = true)]
  ephemeral: bool,

  /// Write logs to this file instead of stderr
  #[arg(long, global = true)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: commands::Command,
}

fn init_logging(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kc_offline=info"));

  let Some(path) = log_file else {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .init();
    return Ok(None);
  };

  let file_name = path
    .file_name()
    .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
  let dir = path
    .parent()
    .filter(|p| !p.as_os_str().is_empty())
    .unwrap_or_else(|| Path::new("."));

  let appender = tracing_appender::rolling::never(dir, file_name);
  let (writer, guard) = tracing_appender::non_blocking(appender);
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_ansi(false)
    .with_writer(writer)
    .init();

  Ok(Some(guard))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging(args.log_file.as_deref())?;

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref())?;

  // Command-line flags override the file
  if let Some(policy) = args.version_policy {
    config.version = policy;
  }
  if let Some(origin) = args.origin {
    config.origin = origin;
  }
  if let Some(database) = args.database {
    config.database = Some(database);
  }

  if args.ephemeral {
    commands::run(args.command, &config, Arc::new(MemoryStore::new())).await
  } else {
    let store = SqliteStore::open(config.database.as_deref())?;
    commands::run(args.command, &config, Arc::new(store)).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_version_policy_flag() {
    let args =
      Args::try_parse_from(["kc-offline", "--version-policy", "v1", "generations"]).unwrap();
    assert_eq!(args.version_policy, Some(WorkerVersion::V1));

    let args = Args::try_parse_from(["kc-offline", "fetch", "/scheme", "--version-policy", "v2"])
      .unwrap();
    assert_eq!(args.version_policy, Some(WorkerVersion::V2));
    assert!(Args::try_parse_from(["kc-offline", "--policy", "v1", "generations"]).is_err());
  }
}
