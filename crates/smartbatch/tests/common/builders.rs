//! Builders for datasets, configs and rules used across integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use smartbatch::coherence::{CoherenceRule, CoherenceViolation, RuleInput};
use smartbatch::config::BatchConfigBuilder;
use smartbatch::dataset::{Record, ScalarValue};
use smartbatch::template::{BindingScope, RenderedDocument};
use smartbatch::{
    BatchProcessingConfig, Dataset, GenerationError, TemplateBinding, TemplateRenderer,
};

/// Builds a dataset one row at a time.
#[derive(Default)]
pub struct DatasetBuilder {
    records: Vec<Record>,
}

impl DatasetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row(mut self, pairs: &[(&str, ScalarValue)]) -> Self {
        self.records.push(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        );
        self
    }

    pub fn build(self) -> Dataset {
        Dataset::from_records(self.records)
    }
}

pub fn text(s: &str) -> ScalarValue {
    ScalarValue::Text(s.to_string())
}

pub fn int(i: i64) -> ScalarValue {
    ScalarValue::Integer(i)
}

/// `n` regional sales rows: region-0.., revenue 100, 200, ...
pub fn sales_dataset(n: usize) -> Dataset {
    let mut builder = DatasetBuilder::new();
    for i in 0..n {
        builder = builder.row(&[
            ("region", text(&format!("region-{}", i))),
            ("revenue", int((i as i64 + 1) * 100)),
        ]);
    }
    builder.build()
}

/// A plain-text report template over `sales_dataset`.
pub fn sales_template() -> TemplateBinding {
    TemplateBinding::new(
        "sales",
        "Report $doc.number of $doc.count\nRegion: $region\nRevenue: $revenue\n",
    )
}

/// Config builder with test-friendly defaults: concurrency 2, no retry
/// delay, one retry.
pub fn sales_config() -> BatchConfigBuilder {
    BatchProcessingConfig::builder(sales_template())
        .concurrency(2)
        .max_retries(1)
}

/// Rejects document `index` on its first attempt only.
pub struct FailOnce {
    pub index: usize,
}

impl CoherenceRule for FailOnce {
    fn name(&self) -> &str {
        "fail_once"
    }

    fn apply(
        &self,
        _document: &mut RenderedDocument,
        input: &RuleInput<'_>,
    ) -> Result<(), CoherenceViolation> {
        if input.index == self.index && input.attempt == 1 {
            return Err(CoherenceViolation::new(self.name(), "first attempt rejected"));
        }
        Ok(())
    }
}

/// Rejects the listed documents on every attempt.
pub struct AlwaysFail {
    pub indices: Vec<usize>,
}

impl CoherenceRule for AlwaysFail {
    fn name(&self) -> &str {
        "always_fail"
    }

    fn apply(
        &self,
        _document: &mut RenderedDocument,
        input: &RuleInput<'_>,
    ) -> Result<(), CoherenceViolation> {
        if self.indices.contains(&input.index) {
            return Err(CoherenceViolation::new(self.name(), "rejected"));
        }
        Ok(())
    }
}

/// Sleeps inside the rule step and records the highest number of documents
/// that were inside it at once.
#[derive(Default)]
pub struct ConcurrencyGauge {
    pub delay: Duration,
    current: AtomicUsize,
    max_seen: AtomicUsize,
}

impl ConcurrencyGauge {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Default::default()
        })
    }

    pub fn max_seen(&self) -> usize {
        self.max_seen.load(Ordering::SeqCst)
    }
}

impl CoherenceRule for ConcurrencyGauge {
    fn name(&self) -> &str {
        "concurrency_gauge"
    }

    fn apply(
        &self,
        _document: &mut RenderedDocument,
        _input: &RuleInput<'_>,
    ) -> Result<(), CoherenceViolation> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        thread::sleep(self.delay);
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Renders one line per bound context fact, so tests can see exactly which
/// facts a document was generated with.
pub struct FactEchoRenderer;

impl TemplateRenderer for FactEchoRenderer {
    fn render(
        &self,
        template: &TemplateBinding,
        scope: &BindingScope,
    ) -> Result<String, GenerationError> {
        // Fact key/value templates are rendered through the renderer too.
        if template.name.starts_with("fact:") {
            let name = template.body.trim_start_matches('$');
            return Ok(scope.get(name).unwrap_or(&template.body).to_string());
        }

        let mut out = format!("document {}\n", scope.get("doc.index").unwrap_or("?"));
        for name in scope.names().filter(|n| n.starts_with("fact.")) {
            out.push_str(&format!("{}={}\n", name, scope.get(name).unwrap_or("")));
        }
        Ok(out)
    }
}
