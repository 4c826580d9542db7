//! Coherent batch generation of related documents from one tabular dataset.
//!
//! A dataset is validated against a schema, then each record becomes one
//! document. Documents share a coherence context (canonical terms, dataset
//! aggregates, facts published by earlier documents) so the set reads as one
//! body of work. Jobs run either as a bounded concurrent batch or one
//! document at a time with operator confirmation in between.

pub mod broadcast;
pub mod coherence;
pub mod config;
pub mod dataset;
pub mod db;
pub mod engine;
pub mod error;
pub mod generation;
pub mod job;
pub mod logging;
pub mod resolver;
pub mod sanitize;
pub mod storage;
pub mod template;
pub mod worker;

pub use broadcast::{JobEvent, JobEventBroadcaster, JobEventKind, JobStore};
pub use coherence::{CoherenceContext, CoherenceRule, ContextSnapshot, StepEdits};
pub use config::{load_settings, BatchProcessingConfig, BatchSettings, InteractionMode};
pub use dataset::{Dataset, DatasetSchema, ValidDataset};
pub use engine::{Engine, EngineBuilder};
pub use error::{
    ConfigError, ResolveError, Result, SmartBatchError, StateError, StepError, StorageError,
    ValidationError, WorkerError,
};
pub use generation::GenerationError;
pub use job::{
    DocumentTask, GenerationId, JobStatus, JobStatusSnapshot, StepOutcome, TaskStatus,
};
pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use resolver::{AllowAll, ArtifactHandle, Authorizer, Caller, OwnerOnly};
pub use storage::{Artifact, ArtifactStore, FileArtifactStore};
pub use template::{DocumentFormat, PlaceholderRenderer, TemplateBinding, TemplateRenderer};
