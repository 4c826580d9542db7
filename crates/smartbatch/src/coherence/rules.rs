//! Coherence rules: ordered check/transform steps run on every rendered
//! document before it is stored.

use std::collections::BTreeMap;

use regex::{NoExpand, Regex};
use thiserror::Error;

use super::context::ContextSnapshot;
use crate::config::TermDefinition;
use crate::dataset::Record;
use crate::template::{format_number, RenderedDocument};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Coherence rule '{rule}' violated: {message}")]
pub struct CoherenceViolation {
    pub rule: String,
    pub message: String,
}

impl CoherenceViolation {
    pub fn new(rule: &str, message: impl Into<String>) -> Self {
        Self {
            rule: rule.to_string(),
            message: message.into(),
        }
    }
}

/// What a rule sees besides the document itself.
#[derive(Debug, Clone, Copy)]
pub struct RuleInput<'a> {
    pub index: usize,
    pub attempt: u32,
    pub record: &'a Record,
    pub context: &'a ContextSnapshot,
}

/// One step of the ordered rule set. A rule may rewrite the document or
/// reject it; rejection fails the attempt and is retried like any other
/// generation failure.
pub trait CoherenceRule: Send + Sync {
    fn name(&self) -> &str;

    fn apply(
        &self,
        document: &mut RenderedDocument,
        input: &RuleInput<'_>,
    ) -> Result<(), CoherenceViolation>;
}

struct CompiledTerm {
    key: String,
    default_canonical: String,
    pattern: Regex,
}

/// Rewrites configured variants to the canonical term (whole word,
/// case-insensitive). The canonical form is read from the context snapshot,
/// so operator overrides apply to later documents.
pub struct TerminologyRule {
    terms: Vec<CompiledTerm>,
}

impl TerminologyRule {
    pub fn new(terminology: &BTreeMap<String, TermDefinition>) -> Result<Self, regex::Error> {
        let mut terms = Vec::new();
        for (key, def) in terminology {
            let mut variants: Vec<&String> =
                def.variants.iter().filter(|v| !v.trim().is_empty()).collect();
            if variants.is_empty() {
                continue;
            }
            // Longest first so "customer base" wins over "customer".
            variants.sort_by_key(|v| std::cmp::Reverse(v.len()));
            let alternation = variants
                .iter()
                .map(|v| regex::escape(v))
                .collect::<Vec<_>>()
                .join("|");
            terms.push(CompiledTerm {
                key: key.clone(),
                default_canonical: def.canonical.clone(),
                pattern: Regex::new(&format!(r"(?i)\b(?:{})\b", alternation))?,
            });
        }
        Ok(Self { terms })
    }
}

impl CoherenceRule for TerminologyRule {
    fn name(&self) -> &str {
        "terminology"
    }

    fn apply(
        &self,
        document: &mut RenderedDocument,
        input: &RuleInput<'_>,
    ) -> Result<(), CoherenceViolation> {
        for term in &self.terms {
            let canonical = input
                .context
                .term(&term.key)
                .unwrap_or(term.default_canonical.as_str());
            if term.pattern.is_match(&document.body) {
                document.body = term
                    .pattern
                    .replace_all(&document.body, NoExpand(canonical))
                    .into_owned();
            }
        }
        Ok(())
    }
}

/// Every number following `label` must equal the named aggregate within
/// `tolerance`. Documents that never mention the label pass.
pub struct AggregateMatchRule {
    aggregate: String,
    label: String,
    tolerance: f64,
    pattern: Regex,
}

impl AggregateMatchRule {
    pub fn new(aggregate: &str, label: &str, tolerance: f64) -> Result<Self, regex::Error> {
        let pattern = Regex::new(&format!(
            r"(?i){}[^0-9\-\n]{{0,16}}?(-?\d[\d,]*(?:\.\d+)?)",
            regex::escape(label)
        ))?;
        Ok(Self {
            aggregate: aggregate.to_string(),
            label: label.to_string(),
            tolerance: tolerance.abs(),
            pattern,
        })
    }
}

impl CoherenceRule for AggregateMatchRule {
    fn name(&self) -> &str {
        "aggregate_match"
    }

    fn apply(
        &self,
        document: &mut RenderedDocument,
        input: &RuleInput<'_>,
    ) -> Result<(), CoherenceViolation> {
        let expected = input.context.aggregate(&self.aggregate).ok_or_else(|| {
            CoherenceViolation::new(
                self.name(),
                format!("aggregate '{}' is not in the context", self.aggregate),
            )
        })?;

        for caps in self.pattern.captures_iter(&document.body) {
            let Some(raw) = caps.get(1) else {
                continue;
            };
            let cleaned = raw.as_str().replace(',', "");
            let found: f64 = cleaned.parse().map_err(|_| {
                CoherenceViolation::new(
                    self.name(),
                    format!("'{}' after '{}' is not a number", raw.as_str(), self.label),
                )
            })?;
            if (found - expected).abs() > self.tolerance + f64::EPSILON {
                return Err(CoherenceViolation::new(
                    self.name(),
                    format!(
                        "'{}' states {} but aggregate '{}' is {}",
                        self.label,
                        raw.as_str(),
                        self.aggregate,
                        format_number(expected)
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// The document must contain `phrase` (case-insensitive).
pub struct RequiredPhraseRule {
    phrase: String,
}

impl RequiredPhraseRule {
    pub fn new(phrase: &str) -> Self {
        Self {
            phrase: phrase.to_string(),
        }
    }
}

impl CoherenceRule for RequiredPhraseRule {
    fn name(&self) -> &str {
        "required_phrase"
    }

    fn apply(
        &self,
        document: &mut RenderedDocument,
        _input: &RuleInput<'_>,
    ) -> Result<(), CoherenceViolation> {
        if document
            .body
            .to_lowercase()
            .contains(&self.phrase.to_lowercase())
        {
            Ok(())
        } else {
            Err(CoherenceViolation::new(
                self.name(),
                format!("missing required phrase '{}'", self.phrase),
            ))
        }
    }
}
