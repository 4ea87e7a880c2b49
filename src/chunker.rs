use crate::error::{Error, Result};
use crate::token::TokenEstimator;
use tracing::{debug, trace};

const PARAGRAPH_BREAK: &str = "\n\n";

/// A bounded slice of the input document, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Sequential chunk index (1-based)
    pub index: usize,

    /// Chunk payload
    pub text: String,
}

impl Chunk {
    /// Creates a new chunk.
    #[must_use]
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
        }
    }

    /// Returns the length of the payload in characters.
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// Returns true if the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Returns the estimated token count of the payload.
    #[must_use]
    pub fn estimated_tokens(&self, estimator: &dyn TokenEstimator) -> usize {
        estimator.estimate(&self.text)
    }
}

/// Splits a document into chunks of at most `max_chars` characters,
/// preferring to cut at paragraph breaks.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    max_chars: usize,
}

impl Chunker {
    /// Creates a new chunker.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_chars` is zero.
    pub fn new(max_chars: usize) -> Result<Self> {
        if max_chars == 0 {
            return Err(Error::config("max_chars must be greater than 0"));
        }
        Ok(Self { max_chars })
    }

    /// Returns the configured chunk size limit in characters.
    #[must_use]
    pub const fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Splits `text` into chunks.
    ///
    /// # Algorithm
    ///
    /// 1. While the remaining text is longer than the limit, look for the last
    ///    `"\n\n"` that lies entirely inside the first `max_chars` characters
    /// 2. Cut right before that break; the break stays with the next chunk
    /// 3. Without a usable break, hard-cut at exactly `max_chars` characters
    /// 4. Emit whatever remains as the final chunk, even if it is empty
    ///
    /// Concatenating the returned payloads reproduces `text` exactly.
    #[must_use]
    pub fn split(&self, text: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut rest = text;

        while let Some(limit) = byte_offset_of_char(rest, self.max_chars) {
            let cut = match rest[..limit].rfind(PARAGRAPH_BREAK) {
                // A break at the very start would emit an empty chunk forever.
                Some(p) if p > 0 => p,
                _ => limit,
            };

            trace!(
                "Cutting chunk {} at byte {} ({})",
                chunks.len() + 1,
                cut,
                if cut == limit { "hard cut" } else { "paragraph break" }
            );

            chunks.push(Chunk::new(chunks.len() + 1, &rest[..cut]));
            rest = &rest[cut..];
        }

        chunks.push(Chunk::new(chunks.len() + 1, rest));

        debug!(
            "Split {} characters into {} chunks (limit {} characters)",
            text.chars().count(),
            chunks.len(),
            self.max_chars
        );

        chunks
    }
}

/// Splits `text` into chunks of at most `max_chars` characters.
///
/// # Errors
///
/// Returns an error if `max_chars` is zero.
pub fn split_text(text: &str, max_chars: usize) -> Result<Vec<Chunk>> {
    Ok(Chunker::new(max_chars)?.split(text))
}

/// Returns the byte offset of the `n`-th character, or `None` when `text`
/// has `n` characters or fewer (nothing needs cutting).
fn byte_offset_of_char(text: &str, n: usize) -> Option<usize> {
    text.char_indices().nth(n).map(|(offset, _)| offset)
}
