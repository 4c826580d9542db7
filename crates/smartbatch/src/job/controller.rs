//! The generation job state machine.
//!
//! One controller drives both interaction modes. The mode only changes how
//! many documents may be in flight (the concurrency limit in batch mode, one
//! in stepwise mode) and whether the job pauses after a document settles.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::info_span;

use super::model::{GenerationJob, JobStatusSnapshot};
use super::state::{GenerationId, JobStatus, TaskStatus};
use super::task::TaskError;
use crate::broadcast::JobTracker;
use crate::config::{BatchProcessingConfig, InteractionMode};
use crate::error::Result;
use crate::worker::{WorkContext, WorkItem, WorkOutcome, WorkerPool};

/// How far a call to `JobController::run` goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunUntil {
    /// Until every document has settled.
    AllSettled,
    /// Until exactly one more document has settled (retries included).
    NextSettled,
}

pub struct JobController {
    pub(super) job: GenerationJob,
    config: Arc<BatchProcessingConfig>,
    pub(super) work: Arc<WorkContext>,
    tracker: JobTracker,
    cancel: Arc<AtomicBool>,
    deadline: Option<Instant>,
    pub(super) queue: VecDeque<usize>,
    pool: Option<WorkerPool>,
    in_flight: usize,
    pub(super) last_settled: Option<usize>,
}

impl JobController {
    /// `job` must be freshly created and already registered with `tracker`.
    pub fn new(
        job: GenerationJob,
        config: Arc<BatchProcessingConfig>,
        work: Arc<WorkContext>,
        tracker: JobTracker,
    ) -> Self {
        let queue = (0..job.tasks().len()).collect();
        Self {
            job,
            config,
            work,
            tracker,
            cancel: Arc::new(AtomicBool::new(false)),
            deadline: None,
            queue,
            pool: None,
            in_flight: 0,
            last_settled: None,
        }
    }

    pub fn generation_id(&self) -> &GenerationId {
        self.job.id()
    }

    pub fn status(&self) -> JobStatus {
        self.job.status()
    }

    pub fn mode(&self) -> InteractionMode {
        self.job.mode()
    }

    pub fn snapshot(&self) -> JobStatusSnapshot {
        self.job.snapshot()
    }

    /// Shared flag; setting it stops dispatching at the next opportunity.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn dispatch_limit(&self) -> usize {
        match self.job.mode() {
            InteractionMode::Batch => self.config.concurrency().max(1),
            InteractionMode::Stepwise => 1,
        }
    }

    fn is_stopping(&self) -> bool {
        if self.cancel.load(Ordering::Relaxed) {
            return true;
        }
        matches!(self.deadline, Some(deadline) if Instant::now() >= deadline)
    }

    fn transition(&mut self, next: JobStatus) -> Result<()> {
        self.job.transition(next)?;
        self.tracker.job_changed(&self.job);
        Ok(())
    }

    fn ensure_pool(&mut self) -> Result<&WorkerPool> {
        if self.pool.is_none() {
            self.pool = Some(WorkerPool::new(
                Arc::clone(&self.work),
                self.dispatch_limit(),
            )?);
        }
        match &self.pool {
            Some(pool) => Ok(pool),
            None => unreachable!("pool was just created"),
        }
    }

    /// Drives the job. Returns the job status when the call stops, which is
    /// terminal unless a stepwise job paused.
    pub fn run(&mut self, until: RunUntil) -> Result<JobStatus> {
        let status = self.job.status();
        if status.is_terminal() {
            return Ok(status);
        }

        let _job_span = info_span!("generation_job",
            generation_id = %self.job.id().short(),
            mode = %self.job.mode(),
        )
        .entered();

        if matches!(status, JobStatus::Created | JobStatus::Paused) {
            if status == JobStatus::Created {
                log::info!(
                    "Starting generation {} ({} documents, mode {}, concurrency {})",
                    self.job.id(),
                    self.job.tasks().len(),
                    self.job.mode(),
                    self.dispatch_limit()
                );
                self.deadline = self.config.job_timeout().map(|t| Instant::now() + t);
            }
            self.transition(JobStatus::Running)?;
        }
        self.ensure_pool()?;

        let mut settled = 0usize;
        loop {
            if self.is_stopping() {
                self.skip_pending()?;
            } else {
                while self.in_flight < self.dispatch_limit() {
                    if until == RunUntil::NextSettled && settled > 0 {
                        break;
                    }
                    let Some(index) = self.queue.pop_front() else {
                        break;
                    };
                    self.dispatch(index)?;
                }
            }

            if self.in_flight == 0 {
                break;
            }

            let received = match &self.pool {
                Some(pool) => pool.recv_outcome(),
                None => unreachable!("pool exists while documents are in flight"),
            };
            match received {
                Ok(outcome) => {
                    self.in_flight -= 1;
                    if self.settle(outcome)? {
                        settled += 1;
                    }
                }
                Err(e) => {
                    log::error!("Worker pool of {} stopped: {}", self.job.id(), e);
                    self.abandon_in_flight(&e.to_string())?;
                }
            }
        }

        let stopping = self.is_stopping();
        if until == RunUntil::NextSettled
            && self.job.mode() == InteractionMode::Stepwise
            && !stopping
        {
            self.transition(JobStatus::Paused)?;
            return Ok(JobStatus::Paused);
        }

        self.finish()
    }

    fn dispatch(&mut self, index: usize) -> Result<()> {
        let attempt = self.job.task_mut(index)?.begin_attempt()?;
        self.tracker.task_changed(&self.job, index);

        let submitted = self.ensure_pool()?.submit(WorkItem { index, attempt });
        match submitted {
            Ok(()) => {
                self.in_flight += 1;
            }
            Err(e) => {
                log::error!("Could not dispatch document {}: {}", index, e);
                self.job.task_mut(index)?.fail(TaskError {
                    kind: "worker".to_string(),
                    message: e.to_string(),
                    retryable: false,
                })?;
                self.tracker.task_changed(&self.job, index);
                self.last_settled = Some(index);
            }
        }
        Ok(())
    }

    /// Applies one outcome. Returns true if the task reached a terminal
    /// status, false if it was queued again for another attempt.
    fn settle(&mut self, outcome: WorkOutcome) -> Result<bool> {
        let index = outcome.index;
        match outcome.result {
            Ok(artifact) => {
                self.job.task_mut(index)?.succeed(artifact)?;
                self.tracker.task_changed(&self.job, index);
                log::debug!(
                    "Document {} of {} succeeded on attempt {}",
                    index,
                    self.job.id().short(),
                    outcome.attempt
                );
                self.last_settled = Some(index);
                Ok(true)
            }
            Err(err) => {
                let task = self.job.task_mut(index)?;
                task.fail(TaskError::from(&err))?;
                let attempts = task.attempts();
                self.tracker.task_changed(&self.job, index);

                if err.is_retryable() && attempts <= self.config.max_retries() && !self.is_stopping()
                {
                    log::warn!(
                        "Document {} of {} failed on attempt {}, retrying: {}",
                        index,
                        self.job.id().short(),
                        attempts,
                        err
                    );
                    self.job.task_mut(index)?.requeue()?;
                    self.tracker.task_changed(&self.job, index);
                    self.queue.push_front(index);
                    Ok(false)
                } else {
                    log::warn!(
                        "Document {} of {} failed after {} attempt(s): {}",
                        index,
                        self.job.id().short(),
                        attempts,
                        err
                    );
                    self.last_settled = Some(index);
                    Ok(true)
                }
            }
        }
    }

    fn skip_pending(&mut self) -> Result<()> {
        if self.queue.is_empty() {
            return Ok(());
        }
        log::info!(
            "Generation {} stopping, skipping {} pending document(s)",
            self.job.id(),
            self.queue.len()
        );
        while let Some(index) = self.queue.pop_front() {
            self.job.task_mut(index)?.skip()?;
            self.tracker.task_changed(&self.job, index);
        }
        Ok(())
    }

    fn abandon_in_flight(&mut self, reason: &str) -> Result<()> {
        let running: Vec<usize> = self
            .job
            .tasks()
            .iter()
            .filter(|t| t.status() == TaskStatus::Running)
            .map(|t| t.index())
            .collect();
        for index in running {
            self.job.task_mut(index)?.fail(TaskError {
                kind: "worker".to_string(),
                message: reason.to_string(),
                retryable: false,
            })?;
            self.tracker.task_changed(&self.job, index);
        }
        self.in_flight = 0;
        self.cancel.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Settles the job in its derived terminal status. Pending tasks are
    /// skipped first; must not be called while documents are in flight.
    pub(super) fn finish(&mut self) -> Result<JobStatus> {
        self.skip_pending()?;

        let status = self.job.settle()?;
        self.tracker.job_changed(&self.job);

        if let Some(pool) = self.pool.take() {
            pool.wait();
        }

        let counts = self.job.snapshot().counts();
        log::info!(
            "Generation {} finished: {} ({} succeeded, {} failed, {} skipped)",
            self.job.id(),
            status,
            counts.succeeded,
            counts.failed,
            counts.skipped
        );
        Ok(status)
    }

    /// Cancels a job that is not currently running (created or paused):
    /// pending documents are skipped and the job settles immediately. For a
    /// job running on another thread, set `cancel_flag` instead.
    pub fn cancel(&mut self) -> Result<JobStatus> {
        self.cancel.store(true, Ordering::Relaxed);
        match self.job.status() {
            status if status.is_terminal() => Ok(status),
            JobStatus::Created | JobStatus::Paused => {
                self.transition(JobStatus::Running)?;
                self.finish()
            }
            status => Ok(status),
        }
    }
}

impl Drop for JobController {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
    }
}
