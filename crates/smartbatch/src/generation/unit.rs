use std::sync::Arc;

use tracing::{debug, info_span};

use super::error::GenerationError;
use crate::coherence::{CoherenceContext, RuleInput};
use crate::config::BatchProcessingConfig;
use crate::dataset::Record;
use crate::job::GenerationId;
use crate::storage::{Artifact, ArtifactStore};
use crate::template::{BindingScope, RenderedDocument, TemplateBinding, TemplateRenderer};

/// Inputs for one attempt at one document.
#[derive(Debug, Clone, Copy)]
pub struct UnitRequest<'a> {
    pub generation_id: &'a GenerationId,
    pub index: usize,
    pub attempt: u32,
    pub record: &'a Record,
    /// Number of documents in the job, bound as `doc.count`.
    pub total: usize,
}

/// Produces one document from one record and the shared context.
///
/// Output depends only on the record and the context snapshot taken at the
/// start of the attempt, so a retry over the same inputs writes an
/// equivalent artifact to the same location.
pub struct DocumentGenerator {
    renderer: Arc<dyn TemplateRenderer>,
    store: Arc<dyn ArtifactStore>,
    config: Arc<BatchProcessingConfig>,
}

impl DocumentGenerator {
    pub fn new(
        renderer: Arc<dyn TemplateRenderer>,
        store: Arc<dyn ArtifactStore>,
        config: Arc<BatchProcessingConfig>,
    ) -> Self {
        Self {
            renderer,
            store,
            config,
        }
    }

    pub fn generate(
        &self,
        request: &UnitRequest<'_>,
        context: &CoherenceContext,
    ) -> Result<Artifact, GenerationError> {
        let _unit_span = info_span!("generate_document",
            generation_id = %request.generation_id.short(),
            index = request.index,
            attempt = request.attempt,
        )
        .entered();

        let snapshot = context.snapshot();

        let scope = {
            let _step = info_span!("bind").entered();
            BindingScope::bind(request.record, request.index, request.total, &snapshot)
        };

        let mut document = {
            let _step = info_span!("render").entered();
            let template = self.config.template();
            RenderedDocument {
                body: self.renderer.render(template, &scope)?,
                format: template.format,
            }
        };

        {
            let _step = info_span!("apply_rules").entered();
            let input = RuleInput {
                index: request.index,
                attempt: request.attempt,
                record: request.record,
                context: &snapshot,
            };
            for rule in self.config.rules() {
                rule.apply(&mut document, &input)?;
                debug!("Rule {} passed", rule.name());
            }
        }

        let facts = {
            let _step = info_span!("render_facts").entered();
            self.render_facts(&scope)?
        };

        let artifact = {
            let _step = info_span!("store").entered();
            self.store.write(
                request.generation_id,
                request.index,
                document.format,
                document.body.as_bytes(),
            )?
        };

        {
            let _step = info_span!("publish_facts").entered();
            let report = context.publish(request.index, facts);
            if !report.ignored.is_empty() {
                debug!("Facts already published by another document: {:?}", report.ignored);
            }
        }

        Ok(artifact)
    }

    fn render_facts(&self, scope: &BindingScope) -> Result<Vec<(String, String)>, GenerationError> {
        let mut facts = Vec::with_capacity(self.config.facts().len());
        for def in self.config.facts() {
            let name = format!("fact:{}", def.key);
            let key = self
                .renderer
                .render(&TemplateBinding::new(&name, &def.key), scope)?;
            let value = self
                .renderer
                .render(&TemplateBinding::new(&name, &def.value), scope)?;
            facts.push((key, value));
        }
        Ok(facts)
    }
}
