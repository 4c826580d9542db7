use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dataset::ColumnSpec;
use crate::template::DocumentFormat;

/// Settings file as written by users (`version: "1.0"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSettings {
    pub version: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub mode: InteractionMode,
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
    pub template: TemplateSettings,
    #[serde(default)]
    pub terminology: BTreeMap<String, TermDefinition>,
    #[serde(default)]
    pub aggregates: Vec<AggregateDefinition>,
    #[serde(default)]
    pub facts: Vec<FactDefinition>,
    #[serde(default)]
    pub rules: Vec<RuleSettings>,
    #[serde(default)]
    pub job_timeout_secs: Option<u64>,
}

fn default_concurrency() -> usize {
    num_cpus::get()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub retry_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    2
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: 0,
        }
    }
}

/// Fire-and-forget batch or one document at a time with operator review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionMode {
    #[default]
    Batch,
    Stepwise,
}

impl InteractionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionMode::Batch => "batch",
            InteractionMode::Stepwise => "stepwise",
        }
    }
}

impl fmt::Display for InteractionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InteractionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "batch" => Ok(InteractionMode::Batch),
            "stepwise" => Ok(InteractionMode::Stepwise),
            other => Err(format!("Unknown interaction mode '{}'", other)),
        }
    }
}

/// Template source. Exactly one of `body` and `path` must be set; a relative
/// `path` is resolved against the settings file's directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSettings {
    pub name: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub format: Option<DocumentFormat>,
}

impl TemplateSettings {
    /// Explicit `format`, else the one named by the `path` extension, else text.
    pub fn resolved_format(&self) -> DocumentFormat {
        self.format
            .or_else(|| {
                let path = self.path.as_deref()?;
                let ext = std::path::Path::new(path).extension()?.to_str()?;
                DocumentFormat::from_extension(ext)
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermDefinition {
    pub canonical: String,
    #[serde(default)]
    pub variants: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateDefinition {
    pub name: String,
    pub column: String,
    pub function: AggregateFunction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    Sum,
    Mean,
    Min,
    Max,
    Count,
}

impl AggregateFunction {
    /// `None` when the function is undefined for an empty input.
    pub fn apply(&self, values: &[f64]) -> Option<f64> {
        match self {
            AggregateFunction::Sum => Some(values.iter().sum()),
            AggregateFunction::Count => Some(values.len() as f64),
            AggregateFunction::Mean => {
                if values.is_empty() {
                    None
                } else {
                    Some(values.iter().sum::<f64>() / values.len() as f64)
                }
            }
            AggregateFunction::Min => values.iter().copied().reduce(f64::min),
            AggregateFunction::Max => values.iter().copied().reduce(f64::max),
        }
    }
}

/// A fact every successful document publishes. Both key and value are
/// templates rendered with the document's binding scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactDefinition {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleSettings {
    /// Rewrites term variants to their canonical form.
    Terminology,
    AggregateMatch {
        aggregate: String,
        label: String,
        #[serde(default)]
        tolerance: f64,
    },
    RequiredPhrase {
        phrase: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_settings_defaults() {
        let settings: BatchSettings = serde_json::from_str(
            r#"{"version": "1.0", "template": {"name": "report", "body": "Hi $name"}}"#,
        )
        .unwrap();

        assert_eq!(settings.concurrency, num_cpus::get());
        assert_eq!(settings.retry.max_retries, 2);
        assert_eq!(settings.retry.retry_delay_ms, 0);
        assert_eq!(settings.mode, InteractionMode::Batch);
        assert_eq!(settings.template.resolved_format(), DocumentFormat::Text);
        assert!(settings.rules.is_empty());
        assert!(settings.job_timeout_secs.is_none());
    }

    #[test]
    fn test_template_format_follows_path_extension() {
        let template = |json: &str| serde_json::from_str::<TemplateSettings>(json).unwrap();

        let by_path = template(r#"{"name": "t", "path": "letters/intro.MD"}"#);
        assert_eq!(by_path.resolved_format(), DocumentFormat::Markdown);

        let explicit = template(r#"{"name": "t", "path": "intro.md", "format": "html"}"#);
        assert_eq!(explicit.resolved_format(), DocumentFormat::Html);

        let unknown = template(r#"{"name": "t", "path": "intro.tpl"}"#);
        assert_eq!(unknown.resolved_format(), DocumentFormat::Text);
    }

    #[test]
    fn test_rule_settings_tagged_by_kind() {
        let rules: Vec<RuleSettings> = serde_json::from_str(
            r#"[
                {"kind": "terminology"},
                {"kind": "aggregate_match", "aggregate": "total", "label": "Total"},
                {"kind": "required_phrase", "phrase": "Summary"}
            ]"#,
        )
        .unwrap();

        assert_eq!(rules[0], RuleSettings::Terminology);
        assert_eq!(
            rules[1],
            RuleSettings::AggregateMatch {
                aggregate: "total".to_string(),
                label: "Total".to_string(),
                tolerance: 0.0,
            }
        );
        assert!(matches!(rules[2], RuleSettings::RequiredPhrase { .. }));
    }

    #[test]
    fn test_aggregate_functions() {
        let values = [4.0, 1.0, 7.0];
        assert_eq!(AggregateFunction::Sum.apply(&values), Some(12.0));
        assert_eq!(AggregateFunction::Mean.apply(&values), Some(4.0));
        assert_eq!(AggregateFunction::Min.apply(&values), Some(1.0));
        assert_eq!(AggregateFunction::Max.apply(&values), Some(7.0));
        assert_eq!(AggregateFunction::Count.apply(&values), Some(3.0));
        assert_eq!(AggregateFunction::Mean.apply(&[]), None);
        assert_eq!(AggregateFunction::Sum.apply(&[]), Some(0.0));
    }

    #[test]
    fn test_interaction_mode_parse() {
        assert_eq!("stepwise".parse::<InteractionMode>(), Ok(InteractionMode::Stepwise));
        assert!("auto".parse::<InteractionMode>().is_err());
    }
}
