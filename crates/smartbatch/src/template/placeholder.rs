use regex::Regex;

use super::{BindingScope, TemplateBinding, TemplateRenderer};
use crate::generation::GenerationError;

/// Default renderer: substitutes `$name` and `${name}` placeholders.
///
/// Bare names may contain dotted segments (`$term.customer`). Braces allow
/// any name without `}` (`${Total Revenue}`). `$$` renders a literal `$`.
pub struct PlaceholderRenderer {
    pattern: Regex,
}

impl PlaceholderRenderer {
    pub fn new() -> Self {
        // Literal pattern, covered by tests.
        let pattern = Regex::new(
            r"\$\$|\$\{([^}]+)\}|\$([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)",
        )
        .unwrap_or_else(|e| unreachable!("placeholder pattern is valid: {}", e));
        Self { pattern }
    }

    /// Placeholder names referenced by a template body, in order of first use.
    pub fn placeholders(&self, body: &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for caps in self.pattern.captures_iter(body) {
            if let Some(name) = caps.get(1).or_else(|| caps.get(2)) {
                let name = name.as_str().trim().to_string();
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }
}

impl Default for PlaceholderRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer for PlaceholderRenderer {
    fn render(
        &self,
        template: &TemplateBinding,
        scope: &BindingScope,
    ) -> Result<String, GenerationError> {
        let body = &template.body;
        let mut output = String::with_capacity(body.len());
        let mut last = 0;

        for caps in self.pattern.captures_iter(body) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            output.push_str(&body[last..whole.start()]);
            last = whole.end();

            let Some(name) = caps.get(1).or_else(|| caps.get(2)) else {
                output.push('$');
                continue;
            };
            let name = name.as_str().trim();
            match scope.get(name) {
                Some(value) => output.push_str(value),
                None => {
                    return Err(GenerationError::UnresolvedPlaceholder {
                        template: template.name.clone(),
                        name: name.to_string(),
                    })
                }
            }
        }

        output.push_str(&body[last..]);
        Ok(output)
    }
}
