use crate::{
    error::{Error, Result},
    template::{DocumentMetadata, Section, TemplateEngine},
};
use serde::Serialize;
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    time::SystemTime,
};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Writes the output document and its run summary.
pub(crate) struct Writer {
    path: PathBuf,
    backup_existing: bool,
    template_engine: TemplateEngine,
}

impl Writer {
    /// Creates a writer for the document at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if template engine initialization fails or the
    /// output directory cannot be created or written to.
    pub(crate) fn new(path: PathBuf, template: Option<&Path>, backup_existing: bool) -> Result<Self> {
        let template_engine = TemplateEngine::new(template)?;

        let dir = prepare_dir(&path)?;
        NamedTempFile::new_in(&dir).map_err(|e| Error::io(&dir, e))?;
        debug!("Output directory {} is writable", dir.display());

        Ok(Self {
            path,
            backup_existing,
            template_engine,
        })
    }

    /// Returns the document path.
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the run summary path: `<stem>.summary.json` next to the document.
    pub(crate) fn summary_path(&self) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .map_or_else(|| "output".into(), |s| s.to_string_lossy());
        self.path.with_file_name(format!("{stem}.summary.json"))
    }

    /// Renders the sections and writes the document.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Output directory cannot be created
    /// - Template rendering fails
    /// - File write operations fail
    pub(crate) fn write_document(
        &self,
        sections: &[Section],
        metadata: &DocumentMetadata,
    ) -> Result<usize> {
        let content = self.template_engine.render(sections, metadata)?;
        write_file_atomic(&self.path, &content, self.backup_existing)?;

        info!(
            "Wrote {} sections ({} bytes) to {}",
            sections.len(),
            content.len(),
            self.path.display()
        );
        Ok(content.len())
    }

    /// Writes a summary JSON file next to the document.
    ///
    /// # Errors
    ///
    /// Returns an error if the summary cannot be serialized or written.
    pub(crate) fn write_summary<T: Serialize>(&self, summary: &T) -> Result<PathBuf> {
        let summary_path = self.summary_path();
        let json = serde_json::to_string_pretty(summary)?;

        write_file_atomic(&summary_path, &json, false)?;

        info!("Wrote summary to {}", summary_path.display());
        Ok(summary_path)
    }
}

/// Writes a file atomically with optional backup.
///
/// # Process
///
/// 1. Creates the parent directory if needed
/// 2. Creates backup if file exists and backup is enabled
/// 3. Writes content to a temporary file in the same directory
/// 4. Syncs the temporary file to disk
/// 5. Atomically renames it over the target path
///
/// An interrupted write never leaves a truncated target.
///
/// # Errors
///
/// Returns an error if any filesystem operation fails.
pub(crate) fn write_file_atomic(path: &Path, content: &str, backup_existing: bool) -> Result<()> {
    let dir = prepare_dir(path)?;

    if path.exists() && backup_existing {
        backup_file(path)?;
    }

    let mut temp_file = NamedTempFile::new_in(&dir).map_err(|e| Error::io(&dir, e))?;

    temp_file
        .write_all(content.as_bytes())
        .map_err(|e| Error::io(temp_file.path(), e))?;

    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| Error::io(temp_file.path(), e))?;

    temp_file
        .persist(path)
        .map_err(|e| Error::io(path, e.error))?;

    debug!("Wrote {}", path.display());
    Ok(())
}

/// Creates the parent directory of `path` and returns it (`.` for bare names).
fn prepare_dir(path: &Path) -> Result<PathBuf> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
    Ok(dir)
}

/// Creates a timestamped backup of an existing file.
fn backup_file(path: &Path) -> Result<PathBuf> {
    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)?
        .as_nanos();

    let filename = path
        .file_name()
        .ok_or_else(|| Error::config(format!("Invalid file path: {}", path.display())))?
        .to_string_lossy();

    let backup_path = path.with_file_name(format!("{filename}.backup.{timestamp}"));

    fs::copy(path, &backup_path).map_err(|e| Error::io(&backup_path, e))?;

    debug!("Created backup: {}", backup_path.display());
    Ok(backup_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caller::CallOutcome;
    use assert_fs::prelude::*;

    fn metadata() -> DocumentMetadata {
        DocumentMetadata {
            input: "in.txt".to_string(),
            model: "m".to_string(),
            backend: "scripted".to_string(),
            generated_at: "2025-07-01 09:05:03".to_string(),
        }
    }

    fn entries(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_writer_rejects_unusable_output_directory() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("blocker").write_str("not a directory").unwrap();

        let result = Writer::new(temp.path().join("blocker/doc.md"), None, true);

        assert!(matches!(result, Err(Error::Io { .. })));
    }

    #[test]
    fn test_writer_leaves_no_files_behind_when_created() {
        let temp = assert_fs::TempDir::new().unwrap();

        Writer::new(temp.path().join("out/doc.md"), None, true).unwrap();

        assert!(entries(&temp.path().join("out")).is_empty());
    }

    #[test]
    fn test_writer_creates_output_directory() {
        let temp = assert_fs::TempDir::new().unwrap();
        let output = temp.child("output/nested/doc.md");

        let writer = Writer::new(output.path().to_path_buf(), None, true).unwrap();
        writer
            .write_document(&[Section::new(1, &CallOutcome::Success("text".into()))], &metadata())
            .unwrap();

        output.assert("\n## Chunk 1\ntext");
    }

    #[test]
    fn test_writer_creates_backup() {
        let temp = assert_fs::TempDir::new().unwrap();
        let output = temp.child("doc.md");
        output.write_str("old content").unwrap();

        let writer = Writer::new(output.path().to_path_buf(), None, true).unwrap();
        writer
            .write_document(&[Section::new(1, &CallOutcome::Empty)], &metadata())
            .unwrap();

        let names = entries(temp.path());
        let backup = names.iter().find(|n| n.starts_with("doc.md.backup.")).unwrap();

        temp.child(backup).assert("old content");
        output.assert("\n## Chunk 1\n[No output]");
    }

    #[test]
    fn test_writer_without_backup_overwrites() {
        let temp = assert_fs::TempDir::new().unwrap();
        let output = temp.child("doc.md");
        output.write_str("old content").unwrap();

        write_file_atomic(output.path(), "new content", false).unwrap();

        output.assert("new content");
        assert_eq!(entries(temp.path()), vec!["doc.md"]);
    }

    #[test]
    fn test_summary_path() {
        let writer =
            Writer::new(PathBuf::from("output/processed_output_20250701_090503.md"), None, true)
                .unwrap();

        assert_eq!(writer.path(), Path::new("output/processed_output_20250701_090503.md"));
        assert_eq!(
            writer.summary_path(),
            PathBuf::from("output/processed_output_20250701_090503.summary.json")
        );
    }

    #[test]
    fn test_writer_creates_summary() {
        let temp = assert_fs::TempDir::new().unwrap();
        let writer = Writer::new(temp.path().join("doc.md"), None, true).unwrap();

        let path = writer
            .write_summary(&serde_json::json!({ "total_chunks": 2 }))
            .unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(parsed["total_chunks"], 2);
    }
}
