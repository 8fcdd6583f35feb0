use std::sync::atomic::{AtomicBool, Ordering};

use crate::cache::{CacheStore, FetchResponse, Request};
use crate::network::Fetcher;
use color_eyre::Result;

use super::controller::CacheController;

/// Lifecycle and fetch events delivered by the hosting runtime
#[derive(Debug, Clone)]
pub enum WorkerEvent {
  /// Worker is being installed
  Install,
  /// Worker is taking over from its predecessor
  Activate,
  /// An outgoing request was intercepted
  Fetch(Request),
}

/// What a handled event produced
#[derive(Debug)]
pub enum EventOutcome {
  Installed,
  /// Generations deleted during activation
  Activated { deleted: Vec<String> },
  Responded(FetchResponse),
}

/// Signals a worker raises towards its hosting runtime
#[derive(Debug, Default)]
pub struct WorkerScope {
  skip_waiting: AtomicBool,
  claim_clients: AtomicBool,
}

impl WorkerScope {
  /// Ask the runtime to activate without waiting for old clients to close
  pub fn skip_waiting(&self) {
    self.skip_waiting.store(true, Ordering::SeqCst);
  }

  /// Ask the runtime to take control of already-open clients
  pub fn claim_clients(&self) {
    self.claim_clients.store(true, Ordering::SeqCst);
  }

  pub fn skip_waiting_requested(&self) -> bool {
    self.skip_waiting.load(Ordering::SeqCst)
  }

  pub fn clients_claimed(&self) -> bool {
    self.claim_clients.load(Ordering::SeqCst)
  }
}

/// Route an event to its handler.
///
/// The returned future completes only once the handler's work is done, so
/// awaiting it is the runtime's "wait until" for install and activate.
pub async fn dispatch<S, F>(controller: &CacheController<S, F>, event: WorkerEvent) -> Result<EventOutcome>
where
  S: CacheStore,
  F: Fetcher,
{
  match event {
    WorkerEvent::Install => {
      controller.handle_install().await?;
      Ok(EventOutcome::Installed)
    }
    WorkerEvent::Activate => {
      let deleted = controller.handle_activate().await?;
      Ok(EventOutcome::Activated { deleted })
    }
    WorkerEvent::Fetch(request) => {
      let response = controller.handle_fetch(&request).await?;
      Ok(EventOutcome::Responded(response))
    }
  }
}
