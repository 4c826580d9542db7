//! Shared per-job coherence state.
//!
//! Readers take a `ContextSnapshot` (an `Arc` clone of the current state).
//! Writers build a new state and swap it in under the write lock, so a publish
//! is either fully visible to a later snapshot or not at all.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::config::{AggregateFunction, BatchProcessingConfig};
use crate::dataset::ValidDataset;
use crate::error::ValidationError;

/// Who wrote a fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "index")]
pub enum FactSource {
    Document(usize),
    Operator,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fact {
    pub key: String,
    pub value: String,
    pub source: FactSource,
    /// 1 when first published, bumped by every operator overwrite.
    pub revision: u32,
}

/// Operator corrections supplied when confirming a stepwise step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepEdits {
    /// Facts to set or overwrite.
    #[serde(default)]
    pub facts: BTreeMap<String, String>,
    /// Canonical terms to set or override, keyed by term key.
    #[serde(default)]
    pub terms: BTreeMap<String, String>,
}

impl StepEdits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fact(mut self, key: &str, value: &str) -> Self {
        self.facts.insert(key.to_string(), value.to_string());
        self
    }

    pub fn term(mut self, key: &str, canonical: &str) -> Self {
        self.terms.insert(key.to_string(), canonical.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty() && self.terms.is_empty()
    }
}

/// Result of a publish: which keys were added and which already existed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub added: Vec<String>,
    pub ignored: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct ContextState {
    version: u64,
    terms: BTreeMap<String, String>,
    aggregates: BTreeMap<String, f64>,
    facts: BTreeMap<String, Fact>,
}

/// Immutable view of the context at one version.
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    state: Arc<ContextState>,
}

impl ContextSnapshot {
    pub fn version(&self) -> u64 {
        self.state.version
    }

    /// Canonical form of a term.
    pub fn term(&self, key: &str) -> Option<&str> {
        self.state.terms.get(key).map(String::as_str)
    }

    pub fn terms(&self) -> impl Iterator<Item = (&str, &str)> {
        self.state
            .terms
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn aggregate(&self, name: &str) -> Option<f64> {
        self.state.aggregates.get(name).copied()
    }

    pub fn aggregates(&self) -> impl Iterator<Item = (&str, f64)> {
        self.state.aggregates.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn fact(&self, key: &str) -> Option<&Fact> {
        self.state.facts.get(key)
    }

    pub fn facts(&self) -> impl Iterator<Item = &Fact> {
        self.state.facts.values()
    }
}

pub struct CoherenceContext {
    state: RwLock<Arc<ContextState>>,
}

impl CoherenceContext {
    /// Seeds terminology and computes every configured aggregate once.
    pub fn build(
        dataset: &ValidDataset,
        config: &BatchProcessingConfig,
    ) -> Result<Self, ValidationError> {
        let terms = config
            .terminology()
            .iter()
            .map(|(key, def)| (key.clone(), def.canonical.clone()))
            .collect();

        let mut aggregates = BTreeMap::new();
        for def in config.aggregates() {
            let value = compute_aggregate(dataset, &def.name, &def.column, def.function)?;
            log::debug!("Aggregate {} = {}", def.name, value);
            aggregates.insert(def.name.clone(), value);
        }

        Ok(Self::seeded(terms, aggregates))
    }

    /// A context with the given terms and aggregates and no facts.
    pub fn seeded(terms: BTreeMap<String, String>, aggregates: BTreeMap<String, f64>) -> Self {
        Self {
            state: RwLock::new(Arc::new(ContextState {
                version: 0,
                terms,
                aggregates,
                facts: BTreeMap::new(),
            })),
        }
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            state: Arc::clone(&self.read_state()),
        }
    }

    /// Appends facts discovered by a document. Existing keys are never
    /// overwritten, so the first publisher of a key wins.
    pub fn publish(&self, source_index: usize, facts: Vec<(String, String)>) -> PublishReport {
        let mut report = PublishReport::default();
        if facts.is_empty() {
            return report;
        }

        let mut guard = self.write_state();
        let mut next = ContextState::clone(&guard);
        for (key, value) in facts {
            if next.facts.contains_key(&key) {
                report.ignored.push(key);
                continue;
            }
            next.facts.insert(
                key.clone(),
                Fact {
                    key: key.clone(),
                    value,
                    source: FactSource::Document(source_index),
                    revision: 1,
                },
            );
            report.added.push(key);
        }

        if !report.added.is_empty() {
            next.version += 1;
            *guard = Arc::new(next);
        }
        report
    }

    /// Applies operator corrections. Unlike `publish`, edits overwrite.
    /// Returns the new context version.
    pub fn apply_edits(&self, edits: &StepEdits) -> u64 {
        let mut guard = self.write_state();
        if edits.is_empty() {
            return guard.version;
        }

        let mut next = ContextState::clone(&guard);
        for (key, value) in &edits.facts {
            let revision = next.facts.get(key).map(|f| f.revision + 1).unwrap_or(1);
            next.facts.insert(
                key.clone(),
                Fact {
                    key: key.clone(),
                    value: value.clone(),
                    source: FactSource::Operator,
                    revision,
                },
            );
        }
        for (key, canonical) in &edits.terms {
            next.terms.insert(key.clone(), canonical.clone());
        }
        next.version += 1;

        let version = next.version;
        *guard = Arc::new(next);
        log::info!(
            "Applied operator edits ({} facts, {} terms), context version {}",
            edits.facts.len(),
            edits.terms.len(),
            version
        );
        version
    }

    fn read_state(&self) -> RwLockReadGuard<'_, Arc<ContextState>> {
        match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Coherence context lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, Arc<ContextState>> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Coherence context lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

fn compute_aggregate(
    dataset: &ValidDataset,
    name: &str,
    column: &str,
    function: AggregateFunction,
) -> Result<f64, ValidationError> {
    let error = |reason: &str| ValidationError::Aggregate {
        aggregate: name.to_string(),
        column: column.to_string(),
        reason: reason.to_string(),
    };

    if !dataset.has_column(column) {
        return Err(error("column is not present in the dataset"));
    }

    if function == AggregateFunction::Count {
        let count = dataset
            .records()
            .iter()
            .filter(|r| r.get(column).is_some_and(|v| !v.is_null()))
            .count();
        return Ok(count as f64);
    }

    let values = dataset
        .numeric_values(column)
        .ok_or_else(|| error("column holds non-numeric values"))?;
    function
        .apply(&values)
        .ok_or_else(|| error("column has no values"))
}
