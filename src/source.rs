//! Resolves the `collect` input to a local directory, cloning GitHub URLs
//! into a temporary checkout.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;
use tracing::{debug, info};

const GITHUB_PREFIXES: [&str; 2] = ["https://github.com/", "git@github.com:"];

/// Returns true for `https://github.com/…` and `git@github.com:…` URLs.
#[must_use]
pub fn is_github_url(source: &str) -> bool {
    GITHUB_PREFIXES.iter().any(|prefix| source.starts_with(prefix))
}

/// A directory ready to be scanned.
///
/// For cloned repositories the checkout lives in a temporary directory that
/// is removed when this value is dropped.
#[derive(Debug)]
pub struct SourceRoot {
    path: PathBuf,
    checkout: Option<TempDir>,
}

impl SourceRoot {
    /// Returns the directory to scan.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the root is a temporary clone.
    #[must_use]
    pub const fn is_cloned(&self) -> bool {
        self.checkout.is_some()
    }
}

/// Resolves `source` to a directory, cloning it first if it is a GitHub URL.
///
/// # Errors
///
/// Returns an error if the local directory does not exist, the temporary
/// directory cannot be created, or `git clone` fails.
pub fn resolve(source: &str) -> Result<SourceRoot> {
    if is_github_url(source) {
        let checkout = TempDir::new().map_err(|e| Error::io(std::env::temp_dir(), e))?;
        clone_repository(source, checkout.path())?;

        return Ok(SourceRoot {
            path: checkout.path().to_path_buf(),
            checkout: Some(checkout),
        });
    }

    let path = PathBuf::from(source);
    if !path.is_dir() {
        return Err(Error::config(format!("Source directory does not exist: {source}")));
    }

    Ok(SourceRoot {
        path,
        checkout: None,
    })
}

fn clone_repository(url: &str, dest: &Path) -> Result<()> {
    info!("Cloning {}...", url);

    let output = Command::new("git")
        .args(["clone", "--depth", "1", "--quiet", url])
        .arg(dest)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| Error::clone_failed(url, format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::clone_failed(
            url,
            format!("{}: {}", output.status, stderr.trim()),
        ));
    }

    debug!("Cloned {} into {}", url, dest.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_github_urls() {
        assert!(is_github_url("https://github.com/acme/app"));
        assert!(is_github_url("https://github.com/acme/app.git"));
        assert!(is_github_url("git@github.com:acme/app.git"));

        assert!(!is_github_url("https://gitlab.com/acme/app"));
        assert!(!is_github_url("http://github.com/acme/app"));
        assert!(!is_github_url("./github.com/acme"));
        assert!(!is_github_url("/home/dev/app"));
    }

    #[test]
    fn test_local_directory_resolves_in_place() {
        let temp = assert_fs::TempDir::new().unwrap();
        let root = resolve(&temp.path().to_string_lossy()).unwrap();

        assert_eq!(root.path(), temp.path());
        assert!(!root.is_cloned());
    }

    #[test]
    fn test_missing_local_directory() {
        let err = resolve("/nonexistent/checkout").unwrap_err();
        assert!(err.is_config());
    }
}
