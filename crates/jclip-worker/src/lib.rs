//! Transcode job orchestrator.
//!
//! Jobs are tracked through marker files in a per-job scratch directory
//! (see [`sentinel`]); running encoders are tracked in memory only for
//! cancellation (see [`registry`]).

pub mod config;
pub mod error;
pub mod history;
mod launcher;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod registry;
pub mod runner;
pub mod sentinel;

pub use config::OrchestratorConfig;
pub use error::{JobError, JobResult};
pub use history::{HistoryEntry, HistoryIndex};
pub use logging::JobLogger;
pub use orchestrator::{CancelReport, ClearReport, Orchestrator, PreviewInfo, StatusReport};
pub use registry::{ProcessRegistry, Termination};
pub use runner::RunOutcome;
pub use sentinel::JobDirectory;
