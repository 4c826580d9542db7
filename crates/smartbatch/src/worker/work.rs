use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crate::coherence::CoherenceContext;
use crate::dataset::ValidDataset;
use crate::generation::{DocumentGenerator, GenerationError, UnitRequest};
use crate::job::GenerationId;
use crate::storage::Artifact;

/// One attempt at one document. `attempt` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItem {
    pub index: usize,
    pub attempt: u32,
}

#[derive(Debug)]
pub struct WorkOutcome {
    pub index: usize,
    pub attempt: u32,
    pub result: Result<Artifact, GenerationError>,
}

/// Everything a worker needs to run items of one job.
pub struct WorkContext {
    pub generation_id: GenerationId,
    pub generator: Arc<DocumentGenerator>,
    pub context: Arc<CoherenceContext>,
    pub dataset: ValidDataset,
    pub retry_delay: Duration,
}

impl WorkContext {
    /// Runs one item. A panic inside the generator becomes
    /// `GenerationError::Panicked` on that item only.
    pub fn execute(&self, item: WorkItem) -> WorkOutcome {
        if item.attempt > 1 && !self.retry_delay.is_zero() {
            std::thread::sleep(self.retry_delay);
        }

        let result = match self.dataset.record(item.index) {
            Some(record) => {
                let request = UnitRequest {
                    generation_id: &self.generation_id,
                    index: item.index,
                    attempt: item.attempt,
                    record,
                    total: self.dataset.len(),
                };
                panic::catch_unwind(AssertUnwindSafe(|| {
                    self.generator.generate(&request, &self.context)
                }))
                .unwrap_or_else(|payload| {
                    Err(GenerationError::Panicked {
                        message: panic_message(payload.as_ref()),
                    })
                })
            }
            None => Err(GenerationError::Render {
                message: format!("no record at index {}", item.index),
            }),
        };

        WorkOutcome {
            index: item.index,
            attempt: item.attempt,
            result,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
