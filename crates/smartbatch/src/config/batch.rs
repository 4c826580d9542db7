use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::coherence::{AggregateMatchRule, CoherenceRule, RequiredPhraseRule, TerminologyRule};
use crate::config::schema::{
    AggregateDefinition, AggregateFunction, BatchSettings, FactDefinition, InteractionMode,
    RuleSettings, TermDefinition,
};
use crate::dataset::{ColumnSpec, DatasetSchema, ValidDataset};
use crate::error::ConfigError;
use crate::template::{PlaceholderRenderer, TemplateBinding};

/// Rejects `agg.` and `term.` placeholders naming entries the settings never
/// declare. Such a template would fail on every document.
fn check_context_references(settings: &BatchSettings, body: &str) -> Result<(), ConfigError> {
    for name in PlaceholderRenderer::new().placeholders(body) {
        let known = if let Some(aggregate) = name.strip_prefix("agg.") {
            settings.aggregates.iter().any(|a| a.name == aggregate)
        } else if let Some(term) = name.strip_prefix("term.") {
            settings.terminology.contains_key(term)
        } else {
            true
        };
        if !known {
            return Err(ConfigError::Validation {
                message: format!(
                    "Template '{}' references undeclared '{}'",
                    settings.template.name, name
                ),
            });
        }
    }
    Ok(())
}

/// Resolved options for one run. Immutable once a job starts; shared as
/// `Arc<BatchProcessingConfig>`.
#[derive(Clone)]
pub struct BatchProcessingConfig {
    concurrency: usize,
    max_retries: u32,
    retry_delay: Duration,
    rules: Vec<Arc<dyn CoherenceRule>>,
    mode: InteractionMode,
    schema: DatasetSchema,
    template: TemplateBinding,
    terminology: BTreeMap<String, TermDefinition>,
    aggregates: Vec<AggregateDefinition>,
    facts: Vec<FactDefinition>,
    job_timeout: Option<Duration>,
}

impl fmt::Debug for BatchProcessingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchProcessingConfig")
            .field("concurrency", &self.concurrency)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field(
                "rules",
                &self.rules.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .field("mode", &self.mode)
            .field("template", &self.template.name)
            .field("aggregates", &self.aggregates.len())
            .field("facts", &self.facts.len())
            .field("job_timeout", &self.job_timeout)
            .finish()
    }
}

impl BatchProcessingConfig {
    pub fn builder(template: TemplateBinding) -> BatchConfigBuilder {
        BatchConfigBuilder::new(template)
    }

    /// Resolves file settings. A relative template `path` is read from
    /// `base_dir`; rules are compiled in the order they are listed.
    pub fn from_settings(settings: &BatchSettings, base_dir: &Path) -> Result<Self, ConfigError> {
        let body = match (&settings.template.body, &settings.template.path) {
            (Some(body), _) => body.clone(),
            (None, Some(path)) => {
                let full = base_dir.join(path);
                std::fs::read_to_string(&full).map_err(|e| ConfigError::ReadFile {
                    path: full.clone(),
                    source: e,
                })?
            }
            (None, None) => {
                return Err(ConfigError::Validation {
                    message: format!("Template '{}' has no body", settings.template.name),
                })
            }
        };

        check_context_references(settings, &body)?;
        let template = TemplateBinding::new(&settings.template.name, &body)
            .with_format(settings.template.resolved_format());

        let mut builder = Self::builder(template)
            .concurrency(settings.concurrency)
            .max_retries(settings.retry.max_retries)
            .retry_delay(Duration::from_millis(settings.retry.retry_delay_ms))
            .mode(settings.mode)
            .schema(DatasetSchema::new(settings.columns.clone()));

        for (key, def) in &settings.terminology {
            builder = builder.term(key, def.clone());
        }
        for aggregate in &settings.aggregates {
            builder = builder.aggregate(&aggregate.name, &aggregate.column, aggregate.function);
        }
        for fact in &settings.facts {
            builder = builder.fact(&fact.key, &fact.value);
        }
        if let Some(secs) = settings.job_timeout_secs {
            builder = builder.job_timeout(Duration::from_secs(secs));
        }

        for (index, rule) in settings.rules.iter().enumerate() {
            let compiled: Arc<dyn CoherenceRule> = match rule {
                RuleSettings::Terminology => Arc::new(
                    TerminologyRule::new(&settings.terminology).map_err(|e| {
                        ConfigError::InvalidRule {
                            index,
                            reason: e.to_string(),
                        }
                    })?,
                ),
                RuleSettings::AggregateMatch {
                    aggregate,
                    label,
                    tolerance,
                } => Arc::new(
                    AggregateMatchRule::new(aggregate, label, *tolerance).map_err(|e| {
                        ConfigError::InvalidRule {
                            index,
                            reason: e.to_string(),
                        }
                    })?,
                ),
                RuleSettings::RequiredPhrase { phrase } => Arc::new(RequiredPhraseRule::new(phrase)),
            };
            builder = builder.rule(compiled);
        }

        builder.build()
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn rules(&self) -> &[Arc<dyn CoherenceRule>] {
        &self.rules
    }

    pub fn mode(&self) -> InteractionMode {
        self.mode
    }

    pub fn schema(&self) -> &DatasetSchema {
        &self.schema
    }

    pub fn template(&self) -> &TemplateBinding {
        &self.template
    }

    pub fn terminology(&self) -> &BTreeMap<String, TermDefinition> {
        &self.terminology
    }

    pub fn aggregates(&self) -> &[AggregateDefinition] {
        &self.aggregates
    }

    pub fn facts(&self) -> &[FactDefinition] {
        &self.facts
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout
    }

    /// Copy of this config in `mode`. Entry points use it so that
    /// `start_stepwise` always runs stepwise whatever the settings say.
    pub fn with_mode(&self, mode: InteractionMode) -> Self {
        let mut config = self.clone();
        config.mode = mode;
        config
    }

    /// Freezes the config for a job over `dataset`. The concurrency limit
    /// never exceeds the number of documents.
    pub fn bind_to(&self, dataset: &ValidDataset) -> Arc<Self> {
        let mut config = self.clone();
        let documents = dataset.len().max(1);
        if config.concurrency > documents {
            log::debug!(
                "Clamping concurrency from {} to {} (documents in dataset)",
                config.concurrency,
                documents
            );
            config.concurrency = documents;
        }
        Arc::new(config)
    }
}

pub struct BatchConfigBuilder {
    concurrency: usize,
    max_retries: u32,
    retry_delay: Duration,
    rules: Vec<Arc<dyn CoherenceRule>>,
    mode: InteractionMode,
    schema: DatasetSchema,
    template: TemplateBinding,
    terminology: BTreeMap<String, TermDefinition>,
    aggregates: Vec<AggregateDefinition>,
    facts: Vec<FactDefinition>,
    job_timeout: Option<Duration>,
}

impl BatchConfigBuilder {
    fn new(template: TemplateBinding) -> Self {
        Self {
            concurrency: num_cpus::get(),
            max_retries: 2,
            retry_delay: Duration::ZERO,
            rules: Vec::new(),
            mode: InteractionMode::Batch,
            schema: DatasetSchema::default(),
            template,
            terminology: BTreeMap::new(),
            aggregates: Vec::new(),
            facts: Vec::new(),
            job_timeout: None,
        }
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn mode(mut self, mode: InteractionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.schema.columns.push(column);
        self
    }

    pub fn schema(mut self, schema: DatasetSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn term(mut self, key: &str, definition: TermDefinition) -> Self {
        self.terminology.insert(key.to_string(), definition);
        self
    }

    pub fn aggregate(mut self, name: &str, column: &str, function: AggregateFunction) -> Self {
        self.aggregates.push(AggregateDefinition {
            name: name.to_string(),
            column: column.to_string(),
            function,
        });
        self
    }

    pub fn fact(mut self, key: &str, value: &str) -> Self {
        self.facts.push(FactDefinition {
            key: key.to_string(),
            value: value.to_string(),
        });
        self
    }

    /// Appends a rule. Rules run in the order they were added.
    pub fn rule(mut self, rule: Arc<dyn CoherenceRule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<BatchProcessingConfig, ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Validation {
                message: "concurrency must be at least 1".to_string(),
            });
        }
        if self.template.name.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "template name must not be empty".to_string(),
            });
        }
        for (i, aggregate) in self.aggregates.iter().enumerate() {
            if self.aggregates[..i].iter().any(|a| a.name == aggregate.name) {
                return Err(ConfigError::Validation {
                    message: format!("Duplicate aggregate '{}'", aggregate.name),
                });
            }
        }
        if self.job_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::Validation {
                message: "job timeout must be positive".to_string(),
            });
        }

        Ok(BatchProcessingConfig {
            concurrency: self.concurrency,
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            rules: self.rules,
            mode: self.mode,
            schema: self.schema,
            template: self.template,
            terminology: self.terminology,
            aggregates: self.aggregates,
            facts: self.facts,
            job_timeout: self.job_timeout,
        })
    }
}
