//! Caller-facing entry points: submit, observe, step through and download.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::broadcast;

use crate::broadcast::{JobEvent, JobEventBroadcaster, JobListResponse, JobQueryParams, JobStore};
use crate::coherence::{CoherenceContext, StepEdits};
use crate::config::{BatchProcessingConfig, InteractionMode};
use crate::dataset::{validate, Dataset};
use crate::db::Database;
use crate::error::{Result, SmartBatchError, StepError, StorageError, WorkerError};
use crate::generation::DocumentGenerator;
use crate::job::{
    settle_orphan, DocumentTask, GenerationId, GenerationJob, JobController, JobStatusSnapshot,
    RunUntil, StepOutcome,
};
use crate::resolver::{AllowAll, ArtifactHandle, ArtifactResolver, Authorizer, Caller};
use crate::storage::{checksum, ArtifactStore};
use crate::template::{PlaceholderRenderer, TemplateRenderer};
use crate::worker::WorkContext;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

type Handles = Arc<Mutex<HashMap<GenerationId, JobHandle>>>;

enum JobHandle {
    Batch {
        cancel: Arc<AtomicBool>,
        thread: Option<JoinHandle<()>>,
    },
    Stepwise {
        controller: Arc<Mutex<JobController>>,
    },
}

pub struct EngineBuilder {
    store: Arc<dyn ArtifactStore>,
    renderer: Arc<dyn TemplateRenderer>,
    authorizer: Arc<dyn Authorizer>,
    database: Option<Database>,
    event_capacity: usize,
}

impl EngineBuilder {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            renderer: Arc::new(PlaceholderRenderer::default()),
            authorizer: Arc::new(AllowAll),
            database: None,
            event_capacity: 100,
        }
    }

    pub fn renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    /// Persist jobs and tasks to this database in addition to the cache.
    pub fn database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn build(self) -> Engine {
        let jobs = Arc::new(match self.database {
            Some(db) => {
                let store = JobStore::with_database(db);
                store.load_from_database();
                store
            }
            None => JobStore::new(),
        });

        Engine {
            resolver: ArtifactResolver::new(Arc::clone(&jobs), self.authorizer),
            renderer: self.renderer,
            store: self.store,
            jobs,
            events: JobEventBroadcaster::new(self.event_capacity),
            handles: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

pub struct Engine {
    renderer: Arc<dyn TemplateRenderer>,
    store: Arc<dyn ArtifactStore>,
    jobs: Arc<JobStore>,
    events: JobEventBroadcaster,
    resolver: ArtifactResolver,
    handles: Handles,
}

fn lock_recover<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        log::warn!("{} lock was poisoned, recovering", what);
        poisoned.into_inner()
    })
}

impl Engine {
    pub fn builder(store: Arc<dyn ArtifactStore>) -> EngineBuilder {
        EngineBuilder::new(store)
    }

    pub fn jobs(&self) -> &Arc<JobStore> {
        &self.jobs
    }

    /// Validates the dataset, builds the coherence context and registers a
    /// new job in `Created`. Nothing is persisted if validation fails.
    fn prepare(
        &self,
        dataset: Dataset,
        config: &BatchProcessingConfig,
        mode: InteractionMode,
        owner: Option<&str>,
    ) -> Result<JobController> {
        let valid = validate(dataset, config.schema())?;
        let config = config.with_mode(mode).bind_to(&valid);
        let context = Arc::new(CoherenceContext::build(&valid, &config)?);

        let id = GenerationId::new();
        let generator = Arc::new(DocumentGenerator::new(
            Arc::clone(&self.renderer),
            Arc::clone(&self.store),
            Arc::clone(&config),
        ));
        let job = GenerationJob::new(id.clone(), mode, valid.len(), owner.map(str::to_string));
        let work = Arc::new(WorkContext {
            generation_id: id,
            generator,
            context,
            dataset: valid,
            retry_delay: config.retry_delay(),
        });

        let tracker = self.events.start_job(&job, Arc::clone(&self.jobs));
        Ok(JobController::new(job, config, work, tracker))
    }

    pub fn submit_batch(
        &self,
        dataset: Dataset,
        config: &BatchProcessingConfig,
    ) -> Result<GenerationId> {
        self.submit(dataset, config, None)
    }

    /// Like `submit_batch`, recording `owner` for authorization.
    pub fn submit_batch_as(
        &self,
        owner: &str,
        dataset: Dataset,
        config: &BatchProcessingConfig,
    ) -> Result<GenerationId> {
        self.submit(dataset, config, Some(owner))
    }

    fn submit(
        &self,
        dataset: Dataset,
        config: &BatchProcessingConfig,
        owner: Option<&str>,
    ) -> Result<GenerationId> {
        let mut controller = self.prepare(dataset, config, InteractionMode::Batch, owner)?;
        let id = controller.generation_id().clone();
        let cancel = controller.cancel_flag();

        // Held across the spawn so the thread's own removal comes after the insert.
        let mut handles = lock_recover(&self.handles, "Job handles");
        let finished = Arc::clone(&self.handles);
        let thread = thread::Builder::new()
            .name(format!("smartbatch-job-{}", id.short()))
            .spawn(move || {
                if let Err(e) = controller.run(RunUntil::AllSettled) {
                    log::error!("Generation {} aborted: {}", controller.generation_id(), e);
                }
                let id = controller.generation_id().clone();
                drop(controller);
                lock_recover(&finished, "Job handles").remove(&id);
            })
            .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

        handles.insert(
            id.clone(),
            JobHandle::Batch {
                cancel,
                thread: Some(thread),
            },
        );
        Ok(id)
    }

    pub fn job_status(&self, generation_id: &GenerationId) -> Result<JobStatusSnapshot> {
        self.jobs
            .get_with_fallback(generation_id)
            .ok_or_else(|| SmartBatchError::UnknownJob(generation_id.clone()))
    }

    /// Jobs with a runner in this process: batch jobs whose thread has not
    /// finished and stepwise jobs not yet settled.
    pub fn active_jobs(&self) -> Vec<GenerationId> {
        lock_recover(&self.handles, "Job handles")
            .keys()
            .cloned()
            .collect()
    }

    fn has_handle(&self, generation_id: &GenerationId) -> bool {
        lock_recover(&self.handles, "Job handles").contains_key(generation_id)
    }

    /// Blocks until a batch job is terminal and returns its final snapshot.
    /// For a stepwise job this returns the current snapshot. A non-terminal
    /// job with no runner in this process fails with `Orphaned`.
    pub fn wait_for(&self, generation_id: &GenerationId) -> Result<JobStatusSnapshot> {
        let thread = match lock_recover(&self.handles, "Job handles").get_mut(generation_id) {
            Some(JobHandle::Batch { thread, .. }) => thread.take(),
            _ => None,
        };

        if let Some(thread) = thread {
            if thread.join().is_err() {
                log::error!("Job thread of {} panicked", generation_id);
            }
            lock_recover(&self.handles, "Job handles").remove(generation_id);
            let snapshot = self.job_status(generation_id)?;
            if !snapshot.is_terminal() {
                return Err(SmartBatchError::Orphaned(generation_id.clone()));
            }
            return Ok(snapshot);
        }

        // Another caller holds the thread, or the job is not ours. The
        // handle is checked first: it only disappears after the job settled.
        loop {
            let running_here = self.has_handle(generation_id);
            let snapshot = self.job_status(generation_id)?;
            if snapshot.is_terminal() {
                return Ok(snapshot);
            }
            if !running_here {
                return Err(SmartBatchError::Orphaned(generation_id.clone()));
            }
            if snapshot.mode == InteractionMode::Stepwise {
                return Ok(snapshot);
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// Settles a non-terminal job that has no runner in this process.
    fn settle_if_orphaned(&self, generation_id: &GenerationId) -> Result<JobStatusSnapshot> {
        if self.has_handle(generation_id) {
            return self.job_status(generation_id);
        }
        let snapshot = self.job_status(generation_id)?;
        if snapshot.is_terminal() {
            return Ok(snapshot);
        }
        let tracker = self.events.resume_job(Arc::clone(&self.jobs));
        Ok(settle_orphan(snapshot, &tracker)?)
    }

    /// Stops dispatching new documents. In-flight documents finish; pending
    /// ones are skipped. A running batch job settles on its own thread. A job
    /// left behind by another process settles immediately, its in-flight
    /// documents failing as abandoned.
    pub fn cancel(&self, generation_id: &GenerationId) -> Result<JobStatusSnapshot> {
        let (found, controller) = {
            let handles = lock_recover(&self.handles, "Job handles");
            match handles.get(generation_id) {
                Some(JobHandle::Batch { cancel, .. }) => {
                    log::info!("Cancelling generation {}", generation_id);
                    cancel.store(true, Ordering::Relaxed);
                    (true, None)
                }
                Some(JobHandle::Stepwise { controller }) => (true, Some(Arc::clone(controller))),
                None => (false, None),
            }
        };
        if !found {
            return self.settle_if_orphaned(generation_id);
        }

        if let Some(controller) = controller {
            log::info!("Cancelling stepwise generation {}", generation_id);
            lock_recover(&controller, "Step controller").cancel()?;
            lock_recover(&self.handles, "Job handles").remove(generation_id);
        }
        self.job_status(generation_id)
    }

    /// Registers a stepwise job in `Created`. Call `start_step` to run the
    /// first document.
    pub fn start_stepwise(
        &self,
        dataset: Dataset,
        config: &BatchProcessingConfig,
    ) -> Result<GenerationId> {
        self.register_stepwise(dataset, config, None)
    }

    pub fn start_stepwise_as(
        &self,
        owner: &str,
        dataset: Dataset,
        config: &BatchProcessingConfig,
    ) -> Result<GenerationId> {
        self.register_stepwise(dataset, config, Some(owner))
    }

    fn register_stepwise(
        &self,
        dataset: Dataset,
        config: &BatchProcessingConfig,
        owner: Option<&str>,
    ) -> Result<GenerationId> {
        let controller = self.prepare(dataset, config, InteractionMode::Stepwise, owner)?;
        let id = controller.generation_id().clone();
        lock_recover(&self.handles, "Job handles").insert(
            id.clone(),
            JobHandle::Stepwise {
                controller: Arc::new(Mutex::new(controller)),
            },
        );
        Ok(id)
    }

    fn stepwise_controller(
        &self,
        generation_id: &GenerationId,
    ) -> Result<Arc<Mutex<JobController>>> {
        match lock_recover(&self.handles, "Job handles").get(generation_id) {
            Some(JobHandle::Stepwise { controller }) => return Ok(Arc::clone(controller)),
            Some(JobHandle::Batch { .. }) => {
                return Err(StepError::NotStepwise(generation_id.clone()).into())
            }
            None => {}
        }

        let snapshot = self.job_status(generation_id)?;
        if snapshot.mode != InteractionMode::Stepwise {
            return Err(StepError::NotStepwise(generation_id.clone()).into());
        }
        if !snapshot.is_terminal() {
            return Err(SmartBatchError::Orphaned(generation_id.clone()));
        }
        Err(StepError::AlreadyFinished {
            generation_id: generation_id.clone(),
            status: snapshot.status,
        }
        .into())
    }

    pub fn start_step(&self, generation_id: &GenerationId) -> Result<DocumentTask> {
        let controller = self.stepwise_controller(generation_id)?;
        let task = lock_recover(&controller, "Step controller").start_step()?;
        Ok(task)
    }

    pub fn confirm_step(
        &self,
        generation_id: &GenerationId,
        edits: Option<StepEdits>,
    ) -> Result<StepOutcome> {
        let controller = self.stepwise_controller(generation_id)?;
        let outcome = lock_recover(&controller, "Step controller").confirm_step(edits)?;
        if let StepOutcome::JobComplete(_) = outcome {
            lock_recover(&self.handles, "Job handles").remove(generation_id);
        }
        Ok(outcome)
    }

    pub fn current_step(&self, generation_id: &GenerationId) -> Result<Option<DocumentTask>> {
        let controller = match self.stepwise_controller(generation_id) {
            Ok(controller) => controller,
            Err(SmartBatchError::Step(StepError::AlreadyFinished { .. })) => return Ok(None),
            Err(e) => return Err(e),
        };
        let guard = lock_recover(&controller, "Step controller");
        Ok(guard.current_step().cloned())
    }

    pub fn resolve(
        &self,
        caller: &Caller,
        generation_id: &GenerationId,
        index: usize,
    ) -> Result<ArtifactHandle> {
        Ok(self.resolver.resolve(caller, generation_id, index)?)
    }

    /// Resolves and reads one document, verifying its checksum.
    pub fn download_document(
        &self,
        caller: &Caller,
        generation_id: &GenerationId,
        index: usize,
    ) -> Result<Vec<u8>> {
        let handle = self.resolve(caller, generation_id, index)?;
        let bytes = self.store.read(&handle.location)?;

        let actual = checksum(&bytes);
        if actual != handle.checksum {
            return Err(StorageError::ChecksumMismatch {
                path: PathBuf::from(&handle.location),
                expected: handle.checksum,
                actual,
            }
            .into());
        }
        Ok(bytes)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    pub fn list_jobs(&self, params: &JobQueryParams) -> Result<JobListResponse> {
        Ok(self.jobs.query(params)?)
    }

    /// Jobs the database knows as non-terminal. Read before submitting
    /// anything, these are the runs a previous process left unfinished.
    pub fn incomplete_jobs(&self) -> Result<Vec<JobStatusSnapshot>> {
        Ok(self.jobs.incomplete_jobs()?)
    }

    /// Removes a terminal job, its task records and its stored artifacts.
    /// An orphaned job is settled first. Returns false if the job is unknown
    /// or still active.
    pub fn purge(&self, generation_id: &GenerationId) -> Result<bool> {
        if self.jobs.get_with_fallback(generation_id).is_none() {
            return Ok(false);
        }
        let snapshot = self.settle_if_orphaned(generation_id)?;
        if !snapshot.is_terminal() {
            log::warn!(
                "Refusing to purge generation {} while it is {}",
                generation_id,
                snapshot.status
            );
            return Ok(false);
        }

        self.store.purge(generation_id)?;
        let removed = self.jobs.purge(generation_id)?;
        lock_recover(&self.handles, "Job handles").remove(generation_id);
        log::info!("Purged generation {}", generation_id);
        Ok(removed)
    }
}
