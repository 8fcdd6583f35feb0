//! The cache worker: manifests, event handlers and the lifecycle that drives them.

mod controller;
mod event;
mod manifest;
mod runtime;

pub use controller::CacheController;
pub use event::{dispatch, EventOutcome, WorkerEvent};
pub use manifest::{Manifest, WorkerVersion};
pub use runtime::{WorkerRuntime, WorkerState};
