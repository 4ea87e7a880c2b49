//! Glob-based include/exclude rules applied while collecting a source tree.

use crate::error::{Error, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;

/// Configuration for file filtering with glob patterns.
///
/// Patterns are matched against paths relative to the collected root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileFilterConfig {
    exclude_files: Vec<String>,
    include_only: Vec<String>,
    exclude_directories: Vec<String>,
}

impl FileFilterConfig {
    /// Creates an empty configuration that accepts every file.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets file patterns that are never collected.
    #[must_use]
    pub fn exclude_files(mut self, patterns: Vec<String>) -> Self {
        self.exclude_files = patterns;
        self
    }

    /// Sets directory patterns whose contents are never collected.
    #[must_use]
    pub fn exclude_directories(mut self, patterns: Vec<String>) -> Self {
        self.exclude_directories = patterns;
        self
    }

    /// Restricts collection to files matching at least one pattern.
    #[must_use]
    pub fn include_only(mut self, patterns: Vec<String>) -> Self {
        self.include_only = patterns;
        self
    }

    /// Returns true when no rule is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exclude_files.is_empty()
            && self.include_only.is_empty()
            && self.exclude_directories.is_empty()
    }

    /// Checks that every pattern compiles.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first invalid pattern.
    pub fn validate(&self) -> Result<()> {
        FileFilter::new(self).map(|_| ())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FileFilter {
    exclude_files: GlobSet,
    include_files: Option<GlobSet>,
    exclude_directories: GlobSet,
}

impl FileFilter {
    pub(crate) fn new(config: &FileFilterConfig) -> Result<Self> {
        let include_files = if config.include_only.is_empty() {
            None
        } else {
            Some(build_globset(&config.include_only)?)
        };

        Ok(Self {
            exclude_files: build_globset(&config.exclude_files)?,
            include_files,
            exclude_directories: build_globset(&config.exclude_directories)?,
        })
    }

    /// Returns true if the file at `path` (relative to the root) is collected.
    pub(crate) fn should_process(&self, path: &Path) -> bool {
        if let Some(ref include) = self.include_files {
            if !include.is_match(path) {
                return false;
            }
        }

        if path
            .ancestors()
            .skip(1)
            .any(|ancestor| self.exclude_directories.is_match(ancestor))
        {
            return false;
        }

        !self.exclude_files.is_match(path)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();

    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::config(format!("Invalid glob pattern '{pattern}': {e}")))?;
        builder.add(glob);
    }

    builder
        .build()
        .map_err(|e| Error::config(format!("Failed to build glob set: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(patterns: &[&str]) -> Vec<String> {
        patterns.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_empty_filter_accepts_everything() {
        let filter = FileFilter::new(&FileFilterConfig::new()).unwrap();
        assert!(filter.should_process(Path::new("src/main.rs")));
        assert!(filter.should_process(Path::new("README.md")));
    }

    #[test]
    fn test_exclude_files() {
        let config = FileFilterConfig::new().exclude_files(strings(&["*.lock", "**/*.min.js"]));
        let filter = FileFilter::new(&config).unwrap();

        assert!(!filter.should_process(Path::new("Cargo.lock")));
        assert!(!filter.should_process(Path::new("web/dist/app.min.js")));
        assert!(filter.should_process(Path::new("web/app.js")));
    }

    #[test]
    fn test_exclude_directories_covers_descendants() {
        let config = FileFilterConfig::new().exclude_directories(strings(&["vendor", "**/fixtures"]));
        let filter = FileFilter::new(&config).unwrap();

        assert!(!filter.should_process(Path::new("vendor/lib/a.c")));
        assert!(!filter.should_process(Path::new("tests/fixtures/data.json")));
        assert!(filter.should_process(Path::new("src/vendor.rs")));
    }

    #[test]
    fn test_include_only() {
        let config = FileFilterConfig::new().include_only(strings(&["**/*.rs", "*.toml"]));
        let filter = FileFilter::new(&config).unwrap();

        assert!(filter.should_process(Path::new("src/lib.rs")));
        assert!(filter.should_process(Path::new("Cargo.toml")));
        assert!(!filter.should_process(Path::new("docs/guide.md")));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let config = FileFilterConfig::new().exclude_files(strings(&["src/[unclosed"]));

        assert!(config.validate().unwrap_err().is_config());
        assert!(!config.is_empty());
    }
}
