use crate::{
    caller::CallOutcome,
    error::{Error, Result},
};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use tera::{Context, Tera, Value};

const BUILTIN_TEMPLATE: &str = "document.md";
const CUSTOM_TEMPLATE: &str = "custom";

/// Built-in layout: `\n## Chunk {i}\n{body}` sections joined by a newline.
const DOCUMENT_TEMPLATE: &str = "{% for section in ctx.sections %}{% if not loop.first %}\n{% endif %}\n## Chunk {{ section.index }}\n{{ section.body }}{% endfor %}";

/// One chunk's section of the output document.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct Section {
    /// 1-based chunk index
    pub(crate) index: usize,

    /// Generated text or placeholder
    pub(crate) body: String,

    /// Outcome label (`success`, `empty`, `rejected`, `exhausted`)
    pub(crate) outcome: &'static str,
}

impl Section {
    pub(crate) fn new(index: usize, outcome: &CallOutcome) -> Self {
        Self {
            index,
            body: outcome.section_body(),
            outcome: outcome.label(),
        }
    }
}

#[derive(Serialize)]
struct TemplateContext<'a> {
    sections: &'a [Section],
    total_chunks: usize,
    metadata: &'a DocumentMetadata,
}

/// Run details available to custom templates as `ctx.metadata`.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct DocumentMetadata {
    pub(crate) input: String,
    pub(crate) model: String,
    pub(crate) backend: String,
    pub(crate) generated_at: String,
}

/// Renders the output document from per-chunk sections.
pub(crate) struct TemplateEngine {
    tera: Tera,
    template_name: &'static str,
}

impl TemplateEngine {
    /// Creates an engine using the built-in layout, or the Tera template at
    /// `custom` when given.
    ///
    /// # Errors
    ///
    /// Returns an error if a template fails to parse.
    pub(crate) fn new(custom: Option<&Path>) -> Result<Self> {
        let mut tera = Tera::default();

        tera.add_raw_template(BUILTIN_TEMPLATE, DOCUMENT_TEMPLATE)
            .map_err(|e| Error::template(BUILTIN_TEMPLATE, e))?;

        tera.register_filter("truncate_lines", truncate_lines_filter);

        let template_name = match custom {
            Some(path) => {
                tera.add_template_file(path, Some(CUSTOM_TEMPLATE))
                    .map_err(|e| Error::template(path.display().to_string(), e))?;
                CUSTOM_TEMPLATE
            }
            None => BUILTIN_TEMPLATE,
        };

        Ok(Self {
            tera,
            template_name,
        })
    }

    /// Renders all sections into one document.
    ///
    /// # Errors
    ///
    /// Returns an error if template rendering fails.
    pub(crate) fn render(&self, sections: &[Section], metadata: &DocumentMetadata) -> Result<String> {
        let context = TemplateContext {
            sections,
            total_chunks: sections.len(),
            metadata,
        };

        let mut tera_context = Context::new();
        tera_context.insert("ctx", &context);

        self.tera
            .render(self.template_name, &tera_context)
            .map_err(|e| Error::template(self.template_name, e))
    }
}

/// Keeps the first `max` lines (default 1000) of a string.
fn truncate_lines_filter(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let max_lines = args
        .get("max")
        .and_then(Value::as_u64)
        .map_or(1000, |v| usize::try_from(v).unwrap_or(usize::MAX));

    let Some(s) = value.as_str() else {
        return Ok(value.clone());
    };

    let lines: Vec<&str> = s.lines().collect();
    if lines.len() <= max_lines {
        return Ok(value.clone());
    }

    Ok(Value::String(format!(
        "{}\n... ({} more lines omitted)",
        lines[..max_lines].join("\n"),
        lines.len() - max_lines
    )))
}
