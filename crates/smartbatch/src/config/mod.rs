pub mod batch;
pub mod loader;
pub mod schema;

pub use batch::{BatchConfigBuilder, BatchProcessingConfig};
pub use loader::{load_settings, load_settings_from_str};
pub use schema::{
    AggregateDefinition, AggregateFunction, BatchSettings, FactDefinition, InteractionMode,
    RetrySettings, RuleSettings, TemplateSettings, TermDefinition,
};
