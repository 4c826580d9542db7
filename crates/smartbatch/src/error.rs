use std::path::PathBuf;
use thiserror::Error;

use crate::dataset::ColumnType;
use crate::job::{GenerationId, JobStatus, TaskStatus};

#[derive(Error, Debug)]
pub enum SmartBatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Step error: {0}")]
    Step(#[from] StepError),

    #[error("Resolution error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Unknown generation job: {0}")]
    UnknownJob(GenerationId),

    #[error("Generation {0} has no runner in this process; cancel it to settle")]
    Orphaned(GenerationId),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Settings validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid rule #{index}: {reason}")]
    InvalidRule { index: usize, reason: String },

    #[error("Logging setup failed: {message}")]
    Logging { message: String },
}

/// Dataset shape violations. Raised before a job exists; nothing is persisted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Dataset contains no records")]
    Empty,

    #[error("Dataset is not valid JSON: {reason}")]
    InvalidJson { reason: String },

    #[error("Record {row} is not a JSON object")]
    NotAnObject { row: usize },

    #[error("Record {row} column '{column}' holds a non-scalar value")]
    NonScalarValue { row: usize, column: String },

    #[error("Record {row} has columns {found:?}, expected {expected:?}")]
    ColumnSetMismatch {
        row: usize,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("Required column '{column}' is missing")]
    MissingColumn { column: String },

    #[error("Record {row} column '{column}' expected {expected}, found {found}")]
    TypeMismatch {
        row: usize,
        column: String,
        expected: ColumnType,
        found: &'static str,
    },

    #[error("Record {row} column '{column}' is null but the column is not nullable")]
    NullValue { row: usize, column: String },

    #[error("Aggregate '{aggregate}' over column '{column}': {reason}")]
    Aggregate {
        aggregate: String,
        column: String,
        reason: String,
    },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move file from '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checksum mismatch for '{path}': expected {expected}, found {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Artifact location is outside the store: {0}")]
    OutsideStore(PathBuf),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Job cannot move from {from} to {to}")]
    InvalidJobTransition { from: JobStatus, to: JobStatus },

    #[error("Document {index} cannot move from {from} to {to}")]
    InvalidTaskTransition {
        index: usize,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Document {index} does not exist in this job")]
    UnknownTask { index: usize },

    #[error("Job cannot settle while {unsettled} document(s) are pending or running")]
    UnsettledTasks { unsettled: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    #[error("Generation {0} is not a stepwise job")]
    NotStepwise(GenerationId),

    #[error("Generation {generation_id} is waiting for confirmation of document {index}")]
    AwaitingConfirmation {
        generation_id: GenerationId,
        index: usize,
    },

    #[error("Generation {generation_id} is not paused (status: {status})")]
    NotPaused {
        generation_id: GenerationId,
        status: JobStatus,
    },

    #[error("Generation {generation_id} already finished with status {status}")]
    AlreadyFinished {
        generation_id: GenerationId,
        status: JobStatus,
    },
}

/// Resolution-time failures. Local to one request; job state is never touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Not found: {}", not_found_target(.generation_id, .index))]
    NotFound {
        generation_id: GenerationId,
        index: Option<usize>,
    },

    #[error("Document {index} of generation {generation_id} is not ready (status: {status})")]
    NotReady {
        generation_id: GenerationId,
        index: usize,
        status: TaskStatus,
    },

    #[error("Caller is not allowed to access generation {generation_id}")]
    Forbidden { generation_id: GenerationId },
}

fn not_found_target(generation_id: &GenerationId, index: &Option<usize>) -> String {
    match index {
        Some(index) => format!("document {} of generation {}", index, generation_id),
        None => format!("generation {}", generation_id),
    }
}

pub type Result<T> = std::result::Result<T, SmartBatchError>;
