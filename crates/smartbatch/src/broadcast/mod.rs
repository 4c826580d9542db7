//! Job status persistence and live event streaming.

pub mod job_events;
pub mod job_store;

pub use job_events::{JobEvent, JobEventBroadcaster, JobEventKind, JobTracker};
pub use job_store::{JobListResponse, JobQueryParams, JobStore};
