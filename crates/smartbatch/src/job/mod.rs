//! Generation jobs: identifiers, statuses, per-document tasks and the
//! controller that drives them in batch or stepwise mode.

pub mod controller;
pub mod model;
pub mod recovery;
pub mod state;
pub mod step;
pub mod task;

pub use crate::coherence::StepEdits;
pub use controller::{JobController, RunUntil};
pub use model::{terminal_status_for, GenerationJob, JobStatusSnapshot, TaskCounts};
pub use recovery::{settle_orphan, ABANDONED_KIND};
pub use state::{GenerationId, JobStatus, ParseStatusError, TaskStatus};
pub use step::StepOutcome;
pub use task::{DocumentTask, TaskError};
