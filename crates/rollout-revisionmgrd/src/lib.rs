//! Revision controller daemon
//!
//! Watches a set of ConfigMaps and Secrets and, when any of them drifts from
//! the latest published revision, writes a new numbered snapshot set for
//! consumers that only read configuration at startup.

mod config;
mod controller;
mod creator;
mod divergence;
mod error;
mod events;
mod logging;
mod state;
mod status;
mod types;

pub use config::*;
pub use controller::RevisionController;
pub use creator::create_revision;
pub use divergence::is_latest_revision_current;
pub use error::{ControllerError, ControllerResult};
pub use events::{EventRecorder, EventType, InMemoryRecorder, RecordedEvent, TracingRecorder};
pub use logging::init_logging;
pub use state::{SyncEvent, SyncState, SyncTrace};
pub use status::*;
pub use types::*;
