//! Candidate thread monitoring.
//!
//! - [`RequestQueue`] paces every outbound fetch.
//! - [`CandidateMonitor`] polls one candidate until it settles.
//! - [`MonitorRegistry`] keeps at most one monitor per candidate.

mod candidate;
mod events;
mod registry;
mod request_queue;
mod source;

pub use candidate::{
    CandidateMonitor, DropReason, FoundCallback, MonitorHandle, MonitorSettings, MonitorState,
    MonitorStatus,
};
pub use events::{MonitorEvent, MonitorEventBroadcaster};
pub use registry::{MonitorRegistry, MonitorTaskResult, RegistryError};
pub use request_queue::{QueueTask, RequestQueue, Ticket};
pub use source::{FetchFailure, FetchOutcome, ThreadSource};
