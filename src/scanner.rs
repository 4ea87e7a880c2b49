use crate::{
    config::{CollectConfig, CollectScope},
    error::{Error, Result},
    file::{has_binary_extension, is_likely_binary, SourceFile},
    filter::FileFilter,
    source, writer,
};
use ignore::{DirEntry, WalkBuilder, WalkState};
use serde::Serialize;
use std::{
    ffi::OsStr,
    fs,
    path::{Component, Path, PathBuf},
    sync::mpsc,
    time::{Duration, Instant},
};
use tracing::{debug, info, instrument, trace, warn};

const SRC_DIR: &str = "src";

/// Statistics collected during scanning.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ScanStats {
    /// Files written to the output, readable or not
    pub collected_files: usize,

    /// Files whose read failed
    pub unreadable_files: usize,

    /// Binary files skipped
    pub binary_files: usize,

    /// Files outside the scope or rejected by glob rules
    pub skipped_files: usize,

    /// Walk errors encountered
    pub errors: usize,
}

/// Result of a `collect` run.
#[derive(Debug, Clone, Serialize)]
pub struct CollectStats {
    /// Collected source (directory or URL)
    pub source: String,

    /// Where the concatenated text was written
    pub output: PathBuf,

    /// Size of the concatenated text in characters
    pub total_chars: usize,

    /// Scan counters
    pub scan: ScanStats,

    /// Total execution time
    pub duration: Duration,
}

impl CollectStats {
    /// Prints a human-readable summary to stdout.
    pub fn print_summary(&self) {
        println!("\n╔═══════════════════════════════════════════════════════╗");
        println!("║               Collection Summary                      ║");
        println!("╠═══════════════════════════════════════════════════════╣");
        println!("║ Files Collected:      {:>8}                        ║", self.scan.collected_files);
        println!("║   - Unreadable:       {:>8}                        ║", self.scan.unreadable_files);
        println!("║ Binary Skipped:       {:>8}                        ║", self.scan.binary_files);
        println!("║ Out of Scope:         {:>8}                        ║", self.scan.skipped_files);
        println!("║ Characters:           {:>8}                        ║", self.total_chars);
        println!("║ Duration:             {:>8.2}s                     ║", self.duration.as_secs_f64());
        println!("╚═══════════════════════════════════════════════════════╝");
        println!("Output written to {}\n", self.output.display());
    }
}

enum ScanEvent {
    File(SourceFile),
    Binary,
    Skipped,
    WalkError,
}

/// Walks a source tree and reads every file in scope.
pub(crate) struct Scanner {
    root: PathBuf,
    scope: CollectScope,
    file_filter: FileFilter,
    exclude_path: Option<PathBuf>,
}

impl Scanner {
    /// Creates a scanner for `root` using the collect configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a glob pattern is invalid.
    pub(crate) fn new(root: &Path, config: &CollectConfig) -> Result<Self> {
        Ok(Self {
            root: root.to_path_buf(),
            scope: config.scope.clone(),
            file_filter: FileFilter::new(&config.file_filter)?,
            exclude_path: None,
        })
    }

    /// Never collects `path`, typically the output file itself.
    #[must_use]
    pub(crate) fn exclude_path(mut self, path: &Path) -> Self {
        self.exclude_path = fs::canonicalize(path).ok();
        self
    }

    /// Scans the tree and returns the collected files sorted by path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The scoped sub-directory does not exist
    /// - No files are found in scope
    pub(crate) fn scan(&self) -> Result<(Vec<SourceFile>, ScanStats)> {
        let walk_root = match self.scope {
            CollectScope::Subdir(ref sub) => {
                let dir = self.root.join(sub);
                if !dir.is_dir() {
                    return Err(Error::no_files(dir));
                }
                dir
            }
            _ => self.root.clone(),
        };

        debug!("Starting parallel scan of {}", walk_root.display());

        let (tx, rx) = mpsc::channel();

        WalkBuilder::new(&walk_root)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .require_git(false)
            .hidden(true)
            .follow_links(false)
            .threads(num_cpus::get())
            .build_parallel()
            .run(|| {
                let tx = tx.clone();
                Box::new(move |result| {
                    let event = match result {
                        Ok(entry) if entry.file_type().is_some_and(|ft| ft.is_file()) => {
                            self.process_entry(&entry)
                        }
                        Ok(_) => return WalkState::Continue,
                        Err(e) => {
                            warn!("Walk error: {}", e);
                            ScanEvent::WalkError
                        }
                    };

                    if tx.send(event).is_err() {
                        return WalkState::Quit;
                    }
                    WalkState::Continue
                })
            });
        drop(tx);

        let mut stats = ScanStats::default();
        let mut files = Vec::new();

        for event in rx {
            match event {
                ScanEvent::File(file) => {
                    stats.collected_files += 1;
                    if !file.is_text() {
                        stats.unreadable_files += 1;
                    }
                    files.push(file);
                }
                ScanEvent::Binary => stats.binary_files += 1,
                ScanEvent::Skipped => stats.skipped_files += 1,
                ScanEvent::WalkError => stats.errors += 1,
            }
        }

        debug!(
            "Scan complete: {} collected, {} unreadable, {} binary, {} skipped, {} errors",
            stats.collected_files,
            stats.unreadable_files,
            stats.binary_files,
            stats.skipped_files,
            stats.errors
        );

        if files.is_empty() {
            return Err(Error::no_files(walk_root));
        }

        // Sort for deterministic ordering
        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

        Ok((files, stats))
    }

    fn process_entry(&self, entry: &DirEntry) -> ScanEvent {
        let path = entry.path();

        let relative = pathdiff::diff_paths(path, &self.root).unwrap_or_else(|| path.to_path_buf());

        if !self.in_scope(&relative) || !self.file_filter.should_process(&relative) {
            trace!("Out of scope: {}", relative.display());
            return ScanEvent::Skipped;
        }

        if let Some(ref excluded) = self.exclude_path {
            if fs::canonicalize(path).is_ok_and(|p| &p == excluded) {
                return ScanEvent::Skipped;
            }
        }

        let relative_path = to_slash(&relative);

        if has_binary_extension(path) {
            debug!("Skipping binary file (by extension): {}", relative_path);
            return ScanEvent::Binary;
        }

        match is_likely_binary(path) {
            Ok(true) => {
                debug!("Skipping binary file (by content): {}", relative_path);
                return ScanEvent::Binary;
            }
            Ok(false) => {}
            Err(e) => {
                warn!("Failed to read {}: {}", relative_path, e);
                return ScanEvent::File(SourceFile::unreadable(relative_path, e.to_string()));
            }
        }

        trace!("Reading file: {}", relative_path);
        match fs::read_to_string(path) {
            Ok(content) => ScanEvent::File(SourceFile::text(relative_path, content)),
            Err(e) => {
                warn!("Failed to read {}: {}", relative_path, e);
                ScanEvent::File(SourceFile::unreadable(relative_path, e.to_string()))
            }
        }
    }

    fn in_scope(&self, relative: &Path) -> bool {
        match self.scope {
            CollectScope::SrcDirs => relative
                .parent()
                .is_some_and(|dir| dir.components().any(|c| c.as_os_str() == OsStr::new(SRC_DIR))),
            CollectScope::All | CollectScope::Subdir(_) => true,
        }
    }
}

fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Joins collected files into one text blob, each preceded by its path header.
#[must_use]
pub fn concatenate(files: &[SourceFile]) -> String {
    files
        .iter()
        .map(SourceFile::render)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collects a local directory or GitHub repository into one text file.
///
/// A cloned checkout is removed when collection finishes, whether or not it
/// succeeded.
///
/// # Errors
///
/// Returns an error if the source cannot be resolved or cloned, no files are
/// in scope, or the output cannot be written.
#[instrument(skip(config), fields(source = %config.source))]
pub fn collect(config: &CollectConfig) -> Result<CollectStats> {
    let start = Instant::now();

    let root = source::resolve(&config.source)?;
    info!("Collecting file contents from {}...", root.path().display());

    let (files, scan) = Scanner::new(root.path(), config)?
        .exclude_path(&config.output)
        .scan()?;

    let text = concatenate(&files);
    writer::write_file_atomic(&config.output, &text, config.backup_existing)?;

    info!(
        "✓ Collected {} files into {}",
        scan.collected_files,
        config.output.display()
    );

    Ok(CollectStats {
        source: config.source.clone(),
        output: config.output.clone(),
        total_chars: text.chars().count(),
        scan,
        duration: start.elapsed(),
    })
}
