//! Operator-gated execution of stepwise jobs.

use super::controller::{JobController, RunUntil};
use super::model::JobStatusSnapshot;
use super::state::JobStatus;
use super::task::DocumentTask;
use crate::coherence::StepEdits;
use crate::config::InteractionMode;
use crate::error::{Result, StepError};

/// What confirming a step produced.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// The next document settled and awaits confirmation.
    Task(DocumentTask),
    /// No documents were left; the job is terminal.
    JobComplete(JobStatusSnapshot),
}

impl JobController {
    fn require_stepwise(&self) -> Result<()> {
        if self.mode() != InteractionMode::Stepwise {
            return Err(StepError::NotStepwise(self.generation_id().clone()).into());
        }
        Ok(())
    }

    fn settled_task(&self) -> Option<DocumentTask> {
        self.last_settled
            .and_then(|index| self.job.task(index))
            .cloned()
    }

    fn busy_error(&self) -> StepError {
        let status = self.status();
        if status.is_terminal() {
            return StepError::AlreadyFinished {
                generation_id: self.generation_id().clone(),
                status,
            };
        }
        match (status, self.last_settled) {
            (JobStatus::Paused, Some(index)) => StepError::AwaitingConfirmation {
                generation_id: self.generation_id().clone(),
                index,
            },
            _ => StepError::NotPaused {
                generation_id: self.generation_id().clone(),
                status,
            },
        }
    }

    /// Runs the first document and pauses. Only valid on a job that has not
    /// started yet.
    pub fn start_step(&mut self) -> Result<DocumentTask> {
        self.require_stepwise()?;
        if self.status() != JobStatus::Created {
            return Err(self.busy_error().into());
        }

        self.run(RunUntil::NextSettled)?;
        self.settled_task().ok_or_else(|| {
            StepError::AlreadyFinished {
                generation_id: self.generation_id().clone(),
                status: self.status(),
            }
            .into()
        })
    }

    /// Applies optional operator edits to the coherence context, then either
    /// runs the next document or, if none are left, completes the job.
    pub fn confirm_step(&mut self, edits: Option<StepEdits>) -> Result<StepOutcome> {
        self.require_stepwise()?;
        let status = self.status();
        if status.is_terminal() {
            return Err(StepError::AlreadyFinished {
                generation_id: self.generation_id().clone(),
                status,
            }
            .into());
        }
        if status != JobStatus::Paused {
            return Err(StepError::NotPaused {
                generation_id: self.generation_id().clone(),
                status,
            }
            .into());
        }

        if let Some(edits) = edits.filter(|e| !e.is_empty()) {
            let version = self.work.context.apply_edits(&edits);
            log::info!(
                "Applied operator edits to {} ({} fact(s), {} term(s)), context version {}",
                self.generation_id().short(),
                edits.facts.len(),
                edits.terms.len(),
                version
            );
        }

        if self.queue.is_empty() {
            self.finish()?;
            return Ok(StepOutcome::JobComplete(self.snapshot()));
        }

        let status = self.run(RunUntil::NextSettled)?;
        if status.is_terminal() {
            return Ok(StepOutcome::JobComplete(self.snapshot()));
        }
        match self.settled_task() {
            Some(task) => Ok(StepOutcome::Task(task)),
            None => Ok(StepOutcome::JobComplete(self.snapshot())),
        }
    }

    /// The document awaiting confirmation, if the job is paused on one.
    pub fn current_step(&self) -> Option<&DocumentTask> {
        if self.status() != JobStatus::Paused {
            return None;
        }
        self.last_settled.and_then(|index| self.job.task(index))
    }
}
