//! Prompt templates wrapped around each chunk before it is sent to a backend.

use crate::error::{Error, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Placeholder replaced by the current chunk's content.
pub const CONTENT_PLACEHOLDER: &str = "<<<FILE_CONTENT>>>";

const DEFAULT_PROMPT: &str = "\
You are an expert technical writer specializing in documentation for software projects.
Write clean, Markdown-formatted technical documentation for the source code below.

<src>
<<<FILE_CONTENT>>>
</src>

Guidelines:
- Describe every function and endpoint, including HTTP methods and request/response formats
- Keep paragraphs short and the tone friendly and educational
- Put code in fenced blocks with the correct language tag
";

/// Which chunks get wrapped in the prompt template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptMode {
    /// Every chunk is wrapped
    #[default]
    Every,
    /// Only the first chunk is wrapped; later chunks are sent as-is
    First,
}

/// Prompt text with an optional [`CONTENT_PLACEHOLDER`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    text: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_PROMPT)
    }
}

impl PromptTemplate {
    /// Creates a template from raw text.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Loads a template from a UTF-8 file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is empty.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::read(path, e))?;
        if text.trim().is_empty() {
            return Err(Error::config(format!(
                "Prompt file is empty: {}",
                path.display()
            )));
        }
        Ok(Self::new(text))
    }

    /// Returns the raw template text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Returns true if the template contains the content placeholder.
    #[must_use]
    pub fn has_placeholder(&self) -> bool {
        self.text.contains(CONTENT_PLACEHOLDER)
    }

    /// Builds the message for a chunk.
    ///
    /// The placeholder is substituted when present; otherwise the content is
    /// appended after a blank line.
    #[must_use]
    pub fn render(&self, content: &str) -> String {
        if self.has_placeholder() {
            self.text.replace(CONTENT_PLACEHOLDER, content)
        } else {
            format!("{}\n\n{}", self.text, content)
        }
    }

    /// Builds the message for the chunk at `index` (1-based) under `mode`.
    #[must_use]
    pub fn render_for(&self, mode: PromptMode, index: usize, content: &str) -> String {
        match mode {
            PromptMode::First if index > 1 => content.to_string(),
            _ => self.render(content),
        }
    }
}
