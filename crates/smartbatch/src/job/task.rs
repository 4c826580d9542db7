//! Per-document task record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::TaskStatus;
use crate::error::StateError;
use crate::generation::GenerationError;
use crate::storage::Artifact;

/// Error detail recorded on a failed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: String,
    pub message: String,
    pub retryable: bool,
}

impl From<&GenerationError> for TaskError {
    fn from(err: &GenerationError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

/// One planned document. The index is fixed at creation; an artifact is only
/// ever attached while the status is `Succeeded`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentTask {
    index: usize,
    status: TaskStatus,
    attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    artifact: Option<Artifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<TaskError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    finished_at: Option<DateTime<Utc>>,
}

impl DocumentTask {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            status: TaskStatus::Pending,
            attempts: 0,
            artifact: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Rebuilds a task from persisted fields.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restore(
        index: usize,
        status: TaskStatus,
        attempts: u32,
        artifact: Option<Artifact>,
        error: Option<TaskError>,
        started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
    ) -> Self {
        let artifact = if status == TaskStatus::Succeeded {
            artifact
        } else {
            None
        };
        Self {
            index,
            status,
            attempts,
            artifact,
            error,
            started_at,
            finished_at,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        self.artifact.as_ref()
    }

    pub fn error(&self) -> Option<&TaskError> {
        self.error.as_ref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    fn transition(&mut self, next: TaskStatus) -> Result<(), StateError> {
        if !self.status.can_transition_to(next) {
            return Err(StateError::InvalidTaskTransition {
                index: self.index,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// `pending -> running`. Returns the number of the attempt just started.
    pub fn begin_attempt(&mut self) -> Result<u32, StateError> {
        self.transition(TaskStatus::Running)?;
        self.attempts += 1;
        self.error = None;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        Ok(self.attempts)
    }

    /// `running -> succeeded`, attaching the artifact.
    pub fn succeed(&mut self, artifact: Artifact) -> Result<(), StateError> {
        self.transition(TaskStatus::Succeeded)?;
        self.artifact = Some(artifact);
        self.error = None;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// `running -> failed`, recording the error detail.
    pub fn fail(&mut self, error: TaskError) -> Result<(), StateError> {
        self.transition(TaskStatus::Failed)?;
        self.error = Some(error);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// `failed -> pending`, ahead of a retry. The last error stays visible
    /// until the next attempt starts.
    pub fn requeue(&mut self) -> Result<(), StateError> {
        self.transition(TaskStatus::Pending)?;
        self.finished_at = None;
        Ok(())
    }

    /// `pending -> skipped`, used when a job stops dispatching.
    pub fn skip(&mut self) -> Result<(), StateError> {
        self.transition(TaskStatus::Skipped)?;
        self.finished_at = Some(Utc::now());
        Ok(())
    }
}
