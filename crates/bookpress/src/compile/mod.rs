//! Compilation jobs: state machine, persistence and the controller that
//! drives validation, rendering and assembly.

pub mod controller;
pub mod events;
pub mod fanout;
pub mod fingerprint;
pub mod job;
pub mod repository;

pub use controller::{
    check_page_ids, CompilationController, CompileError, CompileOutcome, CompileRequest,
    CompileSettings, JobStatusView,
};
pub use events::{JobEvent, JobEventBroadcaster};
pub use fanout::{FanOutError, RenderFanOut};
pub use fingerprint::fingerprint;
pub use job::{progress_percent, CompilationJob, InvalidTransition, JobStatus, JobUpdate, Transition};
pub use repository::{InMemoryJobRepository, JobRepository, SqliteJobRepository};
