use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

static BINARY_EXTENSIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "exe", "dll", "so", "dylib", "a", "o", "obj", "png", "jpg", "jpeg", "gif", "bmp", "ico",
        "webp", "mp3", "mp4", "avi", "mkv", "mov", "wav", "flac", "pdf", "doc", "docx", "xls",
        "xlsx", "ppt", "pptx", "zip", "tar", "gz", "bz2", "xz", "7z", "rar", "wasm", "pyc",
        "class", "jar", "woff", "woff2", "ttf", "otf", "sqlite", "db",
    ]
    .into_iter()
    .collect()
});

/// A file picked up by the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path relative to the collected root, `/`-separated
    pub relative_path: String,

    /// File text, or the reason it could not be read
    pub body: FileBody,
}

/// Contents of a collected file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileBody {
    /// UTF-8 text
    Text(String),

    /// The read failed; the header records why
    Unreadable(String),
}

impl SourceFile {
    /// Creates a readable file entry.
    #[must_use]
    pub fn text(relative_path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            body: FileBody::Text(content.into()),
        }
    }

    /// Creates an entry for a file whose read failed.
    #[must_use]
    pub fn unreadable(relative_path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            body: FileBody::Unreadable(reason.into()),
        }
    }

    /// Returns true if the file was read successfully.
    #[must_use]
    pub const fn is_text(&self) -> bool {
        matches!(self.body, FileBody::Text(_))
    }

    /// Renders the entry as it appears in the concatenated output: a
    /// `=== ./path ===` header, a separating newline, then the content.
    #[must_use]
    pub fn render(&self) -> String {
        match &self.body {
            FileBody::Text(content) => {
                format!("\n=== ./{} ===\n\n{}", self.relative_path, content)
            }
            FileBody::Unreadable(reason) => {
                format!("\n=== ./{} (Failed to read: {}) ===\n", self.relative_path, reason)
            }
        }
    }
}

/// Determines if a file is likely binary by analyzing its content.
///
/// # Algorithm
///
/// 1. Reads the first 8KB of the file
/// 2. Checks for null bytes (binary indicator)
/// 3. Calculates the ratio of ASCII characters
/// 4. Files with null bytes or low ASCII ratio are considered binary
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub(crate) fn is_likely_binary(path: &Path) -> Result<bool> {
    const BUFFER_SIZE: usize = 8192;
    const ASCII_THRESHOLD: f64 = 0.70;

    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
    let mut buffer = [0u8; BUFFER_SIZE];

    let bytes_read = reader.read(&mut buffer).map_err(|e| Error::io(path, e))?;

    if bytes_read == 0 {
        return Ok(false);
    }

    let sample = &buffer[..bytes_read];

    if memchr::memchr(0, sample).is_some() {
        return Ok(true);
    }

    // Valid UTF-8 is text regardless of script; a sample cut mid-character
    // still counts.
    match std::str::from_utf8(sample) {
        Ok(_) => return Ok(false),
        Err(e) if e.error_len().is_none() => return Ok(false),
        Err(_) => {}
    }

    let ascii_count = sample.iter().filter(|&&b| b < 128).count();
    let ascii_ratio = ascii_count as f64 / bytes_read as f64;

    Ok(ascii_ratio < ASCII_THRESHOLD)
}

/// Checks if a file extension suggests a binary file.
#[must_use]
pub(crate) fn has_binary_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| BINARY_EXTENSIONS.contains(ext.to_ascii_lowercase().as_str()))
}
