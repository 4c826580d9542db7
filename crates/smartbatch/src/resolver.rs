//! Locates stored artifacts for callers.
//!
//! The resolver authorizes and locates; it never reads artifact bytes.

use std::sync::Arc;

use serde::Serialize;

use crate::broadcast::JobStore;
use crate::error::ResolveError;
use crate::job::{GenerationId, JobStatusSnapshot, TaskStatus};
use crate::template::DocumentFormat;

/// Who is asking. `principal` is `None` for anonymous callers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caller {
    pub principal: Option<String>,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self { principal: None }
    }

    pub fn user(principal: &str) -> Self {
        Self {
            principal: Some(principal.to_string()),
        }
    }
}

/// Decides whether a caller may read the artifacts of a job.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, caller: &Caller, job: &JobStatusSnapshot) -> bool;
}

pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _caller: &Caller, _job: &JobStatusSnapshot) -> bool {
        true
    }
}

/// Only the submitting principal may read a job's artifacts. Jobs submitted
/// without an owner are readable by anyone.
pub struct OwnerOnly;

impl Authorizer for OwnerOnly {
    fn authorize(&self, caller: &Caller, job: &JobStatusSnapshot) -> bool {
        match &job.owner {
            None => true,
            Some(owner) => caller.principal.as_deref() == Some(owner.as_str()),
        }
    }
}

/// Enough to stream one artifact from the artifact store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactHandle {
    pub generation_id: GenerationId,
    pub index: usize,
    pub location: String,
    pub size: u64,
    pub format: DocumentFormat,
    pub content_type: String,
    pub checksum: String,
}

pub struct ArtifactResolver {
    jobs: Arc<JobStore>,
    authorizer: Arc<dyn Authorizer>,
}

impl ArtifactResolver {
    pub fn new(jobs: Arc<JobStore>, authorizer: Arc<dyn Authorizer>) -> Self {
        Self { jobs, authorizer }
    }

    pub fn resolve(
        &self,
        caller: &Caller,
        generation_id: &GenerationId,
        index: usize,
    ) -> Result<ArtifactHandle, ResolveError> {
        let job = self
            .jobs
            .get_with_fallback(generation_id)
            .ok_or_else(|| ResolveError::NotFound {
                generation_id: generation_id.clone(),
                index: None,
            })?;

        if !self.authorizer.authorize(caller, &job) {
            log::warn!(
                "Denied artifact access to {} for {}",
                generation_id.short(),
                caller.principal.as_deref().unwrap_or("<anonymous>")
            );
            return Err(ResolveError::Forbidden {
                generation_id: generation_id.clone(),
            });
        }

        let task = job.task(index).ok_or_else(|| ResolveError::NotFound {
            generation_id: generation_id.clone(),
            index: Some(index),
        })?;

        let artifact = match (task.status(), task.artifact()) {
            (TaskStatus::Succeeded, Some(artifact)) => artifact,
            (status, _) => {
                return Err(ResolveError::NotReady {
                    generation_id: generation_id.clone(),
                    index,
                    status,
                })
            }
        };

        Ok(ArtifactHandle {
            generation_id: generation_id.clone(),
            index,
            location: artifact.location.clone(),
            size: artifact.size,
            format: artifact.format,
            content_type: artifact.format.content_type(),
            checksum: artifact.checksum.clone(),
        })
    }
}
