//! CLI subcommands.

use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::{CacheStore, FetchResponse, GenerationSummary, ResponseSource};
use crate::config::Config;
use crate::network::HttpFetcher;
use crate::worker::{
  dispatch, CacheController, EventOutcome, WorkerEvent, WorkerRuntime, WorkerState,
};

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
  /// Fetch every asset of the current generation into the cache
  Install,
  /// Delete every cache generation except the current one
  Activate,
  /// Install, then activate as the hosting runtime would
  Deploy,
  /// Answer a request the way the worker would
  Fetch {
    /// Path (or absolute URL) to request
    path: String,
    /// Write the response body to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// List stored cache generations
  Generations,
}

fn load_controller<S: CacheStore>(
  config: &Config,
  store: Arc<S>,
) -> Result<CacheController<S, HttpFetcher>> {
  let manifest = config.manifest()?;
  let origin = config.origin_url()?;
  let fetcher = HttpFetcher::new(config.timeout())?;
  let controller = CacheController::new(manifest, origin, store, fetcher)?;
  info!(
    cache = %controller.manifest().cache_name,
    version = ?controller.manifest().version,
    "Worker loaded"
  );
  Ok(controller)
}

/// Run a subcommand against the given store.
pub async fn run<S: CacheStore>(command: Command, config: &Config, store: Arc<S>) -> Result<()> {
  match command {
    Command::Generations => {
      print_generations(&store.summaries()?);
    }
    Command::Install => {
      let controller = load_controller(config, store)?;
      dispatch(&controller, WorkerEvent::Install).await?;
      println!("Installed {}", controller.manifest().cache_name);
    }
    Command::Activate => {
      let controller = load_controller(config, store)?;
      if let EventOutcome::Activated { deleted } =
        dispatch(&controller, WorkerEvent::Activate).await?
      {
        print_deleted(&deleted);
      }
    }
    Command::Deploy => {
      let mut runtime = WorkerRuntime::new(load_controller(config, store)?);
      let report = runtime.deploy().await?;
      println!(
        "{} is {}{}",
        runtime.controller().manifest().cache_name,
        report.state,
        if report.clients_claimed {
          " and controls open clients"
        } else {
          ""
        }
      );
      print_deleted(&report.deleted);
    }
    Command::Fetch { path, output } => {
      let runtime = WorkerRuntime::resume(load_controller(config, store)?)?;
      let request = runtime.controller().request(&path)?;
      if runtime.state() != WorkerState::Activated {
        warn!(state = %runtime.state(), "Worker is not active, request goes straight to the network");
      }

      let response = runtime.fetch(request).await?;
      if response.source == ResponseSource::OfflineFallback {
        warn!(path = %path, "Network unavailable, served the offline page");
      }
      print_response(&response);
      if let Some(output) = output {
        std::fs::write(&output, &response.response.body)
          .map_err(|e| eyre!("Failed to write {}: {}", output.display(), e))?;
      }
    }
  }

  Ok(())
}

fn print_deleted(deleted: &[String]) {
  if deleted.is_empty() {
    println!("No stale caches");
  }
  for name in deleted {
    println!("Deleted {}", name);
  }
}

fn print_response(response: &FetchResponse) {
  println!(
    "{} {} from {}{} ({})",
    response.response.status,
    response.response.url,
    response.source,
    response
      .generation
      .as_ref()
      .map(|g| format!(" [{}]", g))
      .unwrap_or_default(),
    format_bytes(response.response.body.len() as u64)
  );

  if let (Some(cached_at), Some(digest)) = (&response.cached_at, &response.digest) {
    println!(
      "  cached {}  sha256 {}",
      cached_at.format("%Y-%m-%d %H:%M:%S"),
      digest
    );
  }
}

fn print_generations(summaries: &[GenerationSummary]) {
  if summaries.is_empty() {
    println!("No caches");
    return;
  }

  for summary in summaries {
    println!(
      "{:<24} {:>4} entries {:>10}  created {}",
      summary.name,
      summary.entries,
      format_bytes(summary.bytes),
      summary.created_at.format("%Y-%m-%d %H:%M:%S")
    );
  }
}

/// Human-readable byte count.
fn format_bytes(bytes: u64) -> String {
  const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];

  let mut value = bytes as f64;
  let mut unit = 0;
  while value >= 1024.0 && unit < UNITS.len() - 1 {
    value /= 1024.0;
    unit += 1;
  }

  if unit == 0 {
    format!("{} {}", bytes, UNITS[0])
  } else {
    format!("{:.1} {}", value, UNITS[unit])
  }
}
