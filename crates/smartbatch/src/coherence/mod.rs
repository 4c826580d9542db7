//! Coherence context and rule set.

pub mod context;
pub mod rules;

pub use context::{
    CoherenceContext, ContextSnapshot, Fact, FactSource, PublishReport, StepEdits,
};
pub use rules::{
    AggregateMatchRule, CoherenceRule, CoherenceViolation, RequiredPhraseRule, RuleInput,
    TerminologyRule,
};
