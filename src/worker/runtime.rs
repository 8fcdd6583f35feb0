//! Hosting runtime: drives a controller through the worker lifecycle.

use color_eyre::{eyre::eyre, Result};
use std::fmt;
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, FetchResponse, Request};
use crate::network::Fetcher;

use super::controller::CacheController;
use super::event::{dispatch, EventOutcome, WorkerEvent};

/// Lifecycle state of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Parsed,
  Installing,
  /// Installed and waiting for the previous worker to let go
  Installed,
  Activating,
  Activated,
  /// Failed to install, or replaced
  Redundant,
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Parsed => "parsed",
      Self::Installing => "installing",
      Self::Installed => "installed",
      Self::Activating => "activating",
      Self::Activated => "activated",
      Self::Redundant => "redundant",
    };
    f.write_str(name)
  }
}

fn is_valid_transition(from: WorkerState, to: WorkerState) -> bool {
  use WorkerState::*;

  matches!(
    (from, to),
    (Parsed, Installing)
      | (Installing, Installed)
      | (Installing, Redundant)
      | (Installed, Activating)
      | (Installed, Redundant)
      | (Activating, Activated)
      | (Activating, Redundant)
      | (Activated, Redundant)
  )
}

/// Result of a deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployReport {
  pub state: WorkerState,
  /// Generations removed by activation
  pub deleted: Vec<String>,
  pub clients_claimed: bool,
}

/// Plays the host side of the lifecycle for a single worker.
pub struct WorkerRuntime<S: CacheStore, F: Fetcher> {
  controller: CacheController<S, F>,
  state: WorkerState,
}

impl<S: CacheStore, F: Fetcher> WorkerRuntime<S, F> {
  pub fn new(controller: CacheController<S, F>) -> Self {
    Self {
      controller,
      state: WorkerState::Parsed,
    }
  }

  /// Pick up a worker that an earlier run may already have installed.
  ///
  /// The state is read back from the store: a populated current generation
  /// is activated, unless this version prunes on activate and stale
  /// generations are still present, in which case it is still waiting.
  /// Without a populated current generation the worker was never installed.
  pub fn resume(controller: CacheController<S, F>) -> Result<Self> {
    let current = controller.manifest().cache_name.clone();
    let summaries = controller.store().summaries()?;

    let installed = summaries
      .iter()
      .any(|s| s.name == current && s.entries > 0);
    let stale = summaries.iter().any(|s| s.name != current);

    let state = if !installed {
      WorkerState::Parsed
    } else if stale && controller.manifest().version.prunes_on_activate() {
      WorkerState::Installed
    } else {
      WorkerState::Activated
    };
    debug!(cache = %current, state = %state, "Resumed worker");

    Ok(Self { controller, state })
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  pub fn controller(&self) -> &CacheController<S, F> {
    &self.controller
  }

  fn transition(&mut self, to: WorkerState) -> Result<()> {
    if !is_valid_transition(self.state, to) {
      return Err(eyre!(
        "Invalid worker state transition: {} -> {}",
        self.state,
        to
      ));
    }
    info!(from = %self.state, to = %to, "Worker state change");
    self.state = to;
    Ok(())
  }

  /// Dispatch install and wait for it to finish.
  ///
  /// A failed install makes the worker redundant; whatever generation was
  /// serving before stays in place.
  pub async fn install(&mut self) -> Result<()> {
    self.transition(WorkerState::Installing)?;

    match dispatch(&self.controller, WorkerEvent::Install).await {
      Ok(_) => self.transition(WorkerState::Installed),
      Err(err) => {
        warn!(error = %err, "Install failed, keeping previous worker");
        self.transition(WorkerState::Redundant)?;
        Err(err)
      }
    }
  }

  /// Dispatch activate and wait for it to finish.
  pub async fn activate(&mut self) -> Result<Vec<String>> {
    self.transition(WorkerState::Activating)?;

    match dispatch(&self.controller, WorkerEvent::Activate).await {
      Ok(EventOutcome::Activated { deleted }) => {
        self.transition(WorkerState::Activated)?;
        Ok(deleted)
      }
      Ok(other) => Err(eyre!("Unexpected outcome for activate: {:?}", other)),
      Err(err) => {
        self.transition(WorkerState::Redundant)?;
        Err(err)
      }
    }
  }

  /// Install, then activate unless an older generation still holds clients.
  ///
  /// The worker activates right away when it asked to skip waiting or when
  /// no other generation exists; otherwise it stays installed and waiting.
  pub async fn deploy(&mut self) -> Result<DeployReport> {
    let current = self.controller.manifest().cache_name.clone();
    let predecessors: Vec<String> = self
      .controller
      .store()
      .keys()?
      .into_iter()
      .filter(|name| name != &current)
      .collect();

    self.install().await?;

    let mut deleted = Vec::new();
    if self.controller.scope().skip_waiting_requested() || predecessors.is_empty() {
      deleted = self.activate().await?;
    } else {
      info!(
        cache = %current,
        waiting_on = ?predecessors,
        "Worker installed, waiting for previous worker to release its clients"
      );
    }

    Ok(DeployReport {
      state: self.state,
      deleted,
      clients_claimed: self.controller.scope().clients_claimed(),
    })
  }

  /// Deliver a fetch event, or fall through to the network if this worker
  /// does not control clients yet.
  pub async fn fetch(&self, request: Request) -> Result<FetchResponse> {
    if self.state != WorkerState::Activated {
      return self.controller.passthrough(&request).await;
    }

    match dispatch(&self.controller, WorkerEvent::Fetch(request)).await? {
      EventOutcome::Responded(response) => Ok(response),
      other => Err(eyre!("Unexpected outcome for fetch: {:?}", other)),
    }
  }
}
