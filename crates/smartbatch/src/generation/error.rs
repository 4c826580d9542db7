use thiserror::Error;

use crate::coherence::CoherenceViolation;
use crate::error::StorageError;

/// Failure of one document attempt. Recorded on the task, never propagated
/// to sibling documents.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Template '{template}' references unknown placeholder '{name}'")]
    UnresolvedPlaceholder { template: String, name: String },

    #[error("Rendering failed: {message}")]
    Render { message: String },

    #[error(transparent)]
    Coherence(#[from] CoherenceViolation),

    #[error("Storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Generation unit panicked: {message}")]
    Panicked { message: String },
}

impl GenerationError {
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::UnresolvedPlaceholder { .. } => "unresolved_placeholder",
            GenerationError::Render { .. } => "render",
            GenerationError::Coherence(_) => "coherence_violation",
            GenerationError::Storage(_) => "storage",
            GenerationError::Panicked { .. } => "panicked",
        }
    }

    /// A missing record column or aggregate is a template defect and fails
    /// the same way on every attempt. Facts arrive in completion order, so a
    /// missing `fact.` entry may be present on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerationError::UnresolvedPlaceholder { name, .. } => name.starts_with("fact."),
            _ => true,
        }
    }
}
