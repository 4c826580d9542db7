//! Generation job store: in-memory snapshots backed by an optional database.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::InteractionMode;
use crate::db::job_repo::{self, JobFilter, JobRow};
use crate::db::task_repo::{self, TaskRow};
use crate::db::{Database, DatabaseError};
use crate::job::{DocumentTask, GenerationId, GenerationJob, JobStatus, JobStatusSnapshot, TaskError, TaskStatus};
use crate::storage::Artifact;
use crate::template::DocumentFormat;

// ─── Helpers ────────────────────────────────────────────────────────────────

fn parse_job_status(s: &str, job_id: &str) -> JobStatus {
    s.parse().unwrap_or_else(|_| {
        log::warn!(
            "Unknown job status '{}' for generation {}, defaulting to Running",
            s,
            job_id
        );
        JobStatus::Running
    })
}

fn parse_task_status(s: &str, job_id: &str, index: usize) -> TaskStatus {
    s.parse().unwrap_or_else(|_| {
        log::warn!(
            "Unknown task status '{}' for document {} of {}, defaulting to Pending",
            s,
            index,
            job_id
        );
        TaskStatus::Pending
    })
}

fn parse_mode(s: &str, job_id: &str) -> InteractionMode {
    s.parse().unwrap_or_else(|_| {
        log::warn!(
            "Unknown mode '{}' for generation {}, defaulting to batch",
            s,
            job_id
        );
        InteractionMode::Batch
    })
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            log::warn!("parse_timestamp: failed to parse '{}': {}", s, e);
            Utc::now()
        })
}

fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn job_row(job: &GenerationJob) -> JobRow {
    JobRow {
        id: job.id().to_string(),
        mode: job.mode().as_str().to_string(),
        status: job.status().as_str().to_string(),
        owner: job.owner().map(str::to_string),
        record_count: job.tasks().len() as i64,
        created_at: format_timestamp(job.created_at()),
        started_at: job.started_at().map(format_timestamp),
        completed_at: job.completed_at().map(format_timestamp),
        updated_at: format_timestamp(Utc::now()),
    }
}

fn task_row(generation_id: &GenerationId, task: &DocumentTask) -> TaskRow {
    let artifact = task.artifact();
    let error = task.error();
    TaskRow {
        generation_id: generation_id.to_string(),
        idx: task.index() as i64,
        status: task.status().as_str().to_string(),
        attempts: i64::from(task.attempts()),
        artifact_location: artifact.map(|a| a.location.clone()),
        artifact_size: artifact.map(|a| a.size as i64),
        artifact_format: artifact.map(|a| a.format.as_str().to_string()),
        artifact_checksum: artifact.map(|a| a.checksum.clone()),
        error_kind: error.map(|e| e.kind.clone()),
        error_message: error.map(|e| e.message.clone()),
        error_retryable: error.map(|e| e.retryable),
        started_at: task.started_at().map(format_timestamp),
        finished_at: task.finished_at().map(format_timestamp),
    }
}

fn task_from_row(row: &TaskRow) -> DocumentTask {
    let index = row.idx.max(0) as usize;
    let status = parse_task_status(&row.status, &row.generation_id, index);

    let artifact = match (&row.artifact_location, &row.artifact_checksum) {
        (Some(location), Some(checksum)) => Some(Artifact {
            location: location.clone(),
            size: row.artifact_size.unwrap_or(0).max(0) as u64,
            format: row
                .artifact_format
                .as_deref()
                .and_then(|f| f.parse::<DocumentFormat>().ok())
                .unwrap_or_default(),
            checksum: checksum.clone(),
        }),
        _ => None,
    };

    let error = match (&row.error_kind, &row.error_message) {
        (Some(kind), Some(message)) => Some(TaskError {
            kind: kind.clone(),
            message: message.clone(),
            retryable: row.error_retryable.unwrap_or(false),
        }),
        _ => None,
    };

    DocumentTask::restore(
        index,
        status,
        row.attempts.max(0) as u32,
        artifact,
        error,
        row.started_at.as_deref().map(parse_timestamp),
        row.finished_at.as_deref().map(parse_timestamp),
    )
}

fn snapshot_from_rows(row: &JobRow, tasks: &[TaskRow]) -> JobStatusSnapshot {
    JobStatusSnapshot {
        generation_id: GenerationId::from(row.id.as_str()),
        mode: parse_mode(&row.mode, &row.id),
        status: parse_job_status(&row.status, &row.id),
        owner: row.owner.clone(),
        created_at: parse_timestamp(&row.created_at),
        started_at: row.started_at.as_deref().map(parse_timestamp),
        completed_at: row.completed_at.as_deref().map(parse_timestamp),
        tasks: tasks.iter().map(task_from_row).collect(),
    }
}

const TERMINAL_STATUSES: [&str; 3] = ["completed", "partially_completed", "failed"];

// ─── Query types ────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobQueryParams {
    pub status: Option<JobStatus>,
    pub owner: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobListResponse {
    pub jobs: Vec<JobStatusSnapshot>,
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

// ─── JobStore ───────────────────────────────────────────────────────────────

/// Latest known state of every generation job.
///
/// The cache is always updated; the database, when set, receives the same
/// change. Database failures are logged and never interrupt a running job.
pub struct JobStore {
    db: RwLock<Option<Database>>,
    cache: RwLock<HashMap<GenerationId, JobStatusSnapshot>>,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            db: RwLock::new(None),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_database(db: Database) -> Self {
        let store = Self::new();
        store.set_database(db);
        store
    }

    pub fn set_database(&self, db: Database) {
        let mut guard = match self.db.write() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Job store DB lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        *guard = Some(db);
    }

    pub fn get_database(&self) -> Option<Database> {
        let guard = match self.db.read() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Job store DB lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard.clone()
    }

    fn read_cache(&self) -> RwLockReadGuard<'_, HashMap<GenerationId, JobStatusSnapshot>> {
        match self.cache.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job store cache lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_cache(&self) -> RwLockWriteGuard<'_, HashMap<GenerationId, JobStatusSnapshot>> {
        match self.cache.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job store cache lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Registers a new job with all its tasks.
    pub fn record_created(&self, job: &GenerationJob) {
        self.write_cache().insert(job.id().clone(), job.snapshot());

        if let Some(db) = self.get_database() {
            let rows: Vec<TaskRow> = job.tasks().iter().map(|t| task_row(job.id(), t)).collect();
            let result =
                job_repo::insert(&db, &job_row(job)).and_then(|_| task_repo::insert_all(&db, &rows));
            if let Err(e) = result {
                log::error!("Failed to persist generation {}: {}", job.id(), e);
            }
        }
    }

    /// Records a job-level change (status, timestamps).
    pub fn record_job(&self, job: &GenerationJob) {
        {
            let mut cache = self.write_cache();
            match cache.get_mut(job.id()) {
                Some(snapshot) => {
                    snapshot.status = job.status();
                    snapshot.started_at = job.started_at();
                    snapshot.completed_at = job.completed_at();
                }
                None => {
                    cache.insert(job.id().clone(), job.snapshot());
                }
            }
        }

        if let Some(db) = self.get_database() {
            if let Err(e) = job_repo::update(&db, &job_row(job)) {
                log::error!("Failed to persist status of generation {}: {}", job.id(), e);
            }
        }
    }

    /// Records a change to one task.
    pub fn record_task(&self, job: &GenerationJob, index: usize) {
        let Some(task) = job.task(index) else {
            log::warn!("record_task: generation {} has no document {}", job.id(), index);
            return;
        };

        {
            let mut cache = self.write_cache();
            match cache.get_mut(job.id()) {
                Some(snapshot) if index < snapshot.tasks.len() => {
                    snapshot.tasks[index] = task.clone();
                }
                _ => {
                    cache.insert(job.id().clone(), job.snapshot());
                }
            }
        }

        if let Some(db) = self.get_database() {
            if let Err(e) = task_repo::update(&db, &task_row(job.id(), task)) {
                log::error!(
                    "Failed to persist document {} of generation {}: {}",
                    index,
                    job.id(),
                    e
                );
            }
        }
    }

    /// Cached snapshot only.
    pub fn get(&self, generation_id: &GenerationId) -> Option<JobStatusSnapshot> {
        self.read_cache().get(generation_id).cloned()
    }

    /// Cached snapshot, or the persisted one for jobs from earlier processes.
    pub fn get_with_fallback(&self, generation_id: &GenerationId) -> Option<JobStatusSnapshot> {
        if let Some(snapshot) = self.get(generation_id) {
            return Some(snapshot);
        }
        let db = self.get_database()?;
        match self.load_snapshot(&db, generation_id.as_str()) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::error!("Failed to load generation {}: {}", generation_id, e);
                None
            }
        }
    }

    fn load_snapshot(
        &self,
        db: &Database,
        id: &str,
    ) -> Result<Option<JobStatusSnapshot>, DatabaseError> {
        let Some(row) = job_repo::find_by_id(db, id)? else {
            return Ok(None);
        };
        let tasks = task_repo::find_by_generation(db, id)?;
        Ok(Some(snapshot_from_rows(&row, &tasks)))
    }

    fn load_snapshots(
        &self,
        db: &Database,
        rows: &[JobRow],
    ) -> Result<Vec<JobStatusSnapshot>, DatabaseError> {
        rows.iter()
            .map(|row| {
                let tasks = task_repo::find_by_generation(db, &row.id)?;
                Ok(snapshot_from_rows(row, &tasks))
            })
            .collect()
    }

    /// Lists jobs newest first, from the database when available.
    pub fn query(&self, params: &JobQueryParams) -> Result<JobListResponse, DatabaseError> {
        if let Some(db) = self.get_database() {
            let filter = JobFilter {
                status: params.status.map(|s| s.as_str().to_string()),
                owner: params.owner.clone(),
                limit: params.limit,
                offset: params.offset,
                ..Default::default()
            };
            let (rows, total) = job_repo::query(&db, &filter)?;
            Ok(JobListResponse {
                jobs: self.load_snapshots(&db, &rows)?,
                total,
                limit: params.limit,
                offset: params.offset,
            })
        } else {
            Ok(self.query_cache(params))
        }
    }

    fn query_cache(&self, params: &JobQueryParams) -> JobListResponse {
        let mut jobs: Vec<JobStatusSnapshot> = self.read_cache().values().cloned().collect();

        if let Some(status) = params.status {
            jobs.retain(|j| j.status == status);
        }
        if let Some(ref owner) = params.owner {
            jobs.retain(|j| j.owner.as_deref() == Some(owner.as_str()));
        }

        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = jobs.len() as u64;
        let offset = params.offset.unwrap_or(0) as usize;
        let limit = params.limit.unwrap_or(100) as usize;
        let jobs = jobs.into_iter().skip(offset).take(limit).collect();

        JobListResponse {
            jobs,
            total,
            limit: params.limit,
            offset: params.offset,
        }
    }

    /// Jobs that have not reached a terminal status. With a database this
    /// includes jobs left behind by a process that stopped mid-run.
    pub fn incomplete_jobs(&self) -> Result<Vec<JobStatusSnapshot>, DatabaseError> {
        if let Some(db) = self.get_database() {
            let rows = job_repo::find_incomplete(&db, &TERMINAL_STATUSES)?;
            return self.load_snapshots(&db, &rows);
        }
        let mut jobs: Vec<JobStatusSnapshot> = self
            .read_cache()
            .values()
            .filter(|j| !j.is_terminal())
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }

    /// Forgets a job. Returns whether it was known.
    pub fn purge(&self, generation_id: &GenerationId) -> Result<bool, DatabaseError> {
        let cached = self.write_cache().remove(generation_id).is_some();
        let persisted = match self.get_database() {
            Some(db) => job_repo::delete(&db, generation_id.as_str())?,
            None => false,
        };
        Ok(cached || persisted)
    }

    /// Fills the cache with unfinished jobs and the 100 most recent ones.
    pub fn load_from_database(&self) {
        let Some(db) = self.get_database() else {
            return;
        };

        let incomplete = job_repo::find_incomplete(&db, &TERMINAL_STATUSES);
        let recent = job_repo::query(
            &db,
            &JobFilter {
                limit: Some(100),
                ..Default::default()
            },
        );

        let mut rows = Vec::new();
        match incomplete {
            Ok(found) => rows.extend(found),
            Err(e) => log::error!("Failed to load unfinished jobs: {}", e),
        }
        match recent {
            Ok((found, _)) => rows.extend(found),
            Err(e) => log::error!("Failed to load recent jobs: {}", e),
        }

        let mut loaded = 0;
        for row in &rows {
            let id = GenerationId::from(row.id.as_str());
            if self.read_cache().contains_key(&id) {
                continue;
            }
            match task_repo::find_by_generation(&db, &row.id) {
                Ok(tasks) => {
                    self.write_cache().insert(id, snapshot_from_rows(row, &tasks));
                    loaded += 1;
                }
                Err(e) => log::error!("Failed to load tasks of generation {}: {}", row.id, e),
            }
        }

        log::info!("Loaded {} generation jobs from database", loaded);
    }
}
