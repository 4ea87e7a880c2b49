use crate::{
    backend::{Backend, ChatRequest},
    caller::{CallOutcome, ResilientCaller},
    chunker::{Chunk, Chunker},
    config::Config,
    error::{Error, Result},
    template::{DocumentMetadata, Section},
    token::TokenEstimator,
    writer::Writer,
};
use serde::Serialize;
use std::{
    fs,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, info, instrument, warn};

/// Per-chunk record kept in the run summary.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkReport {
    /// 1-based chunk index
    pub index: usize,

    /// Chunk size in characters
    pub chars: usize,

    /// Estimated tokens sent, prompt included
    pub estimated_tokens: usize,

    /// Outcome label
    pub outcome: &'static str,

    /// Time spent on the chunk, retries included
    pub duration: Duration,
}

/// Statistics collected during a generation run.
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    /// Input file
    pub input: PathBuf,

    /// Written document, `None` for dry runs
    pub output: Option<PathBuf>,

    /// Written run summary, if any
    pub summary: Option<PathBuf>,

    /// Model identifier
    pub model: String,

    /// Backend name
    pub backend: String,

    /// Input size in characters
    pub total_chars: usize,

    /// Total number of chunks
    pub total_chunks: usize,

    /// Chunks that produced text
    pub succeeded: usize,

    /// Chunks answered without usable content
    pub empty: usize,

    /// Chunks abandoned after a hard failure
    pub rejected: usize,

    /// Chunks that ran out of retries
    pub exhausted: usize,

    /// Estimated tokens sent across all chunks
    pub total_tokens: usize,

    /// Individual chunk records
    pub chunks: Vec<ChunkReport>,

    /// Whether backend calls and writes were skipped
    pub dry_run: bool,

    /// Run start, local time
    pub started_at: String,

    /// Total execution time
    pub duration: Duration,
}

impl RunStats {
    fn new(config: &Config, backend: &str, started_at: &chrono::DateTime<chrono::Local>) -> Self {
        Self {
            input: config.input.clone(),
            output: None,
            summary: None,
            model: config.model.clone(),
            backend: backend.to_string(),
            total_chars: 0,
            total_chunks: 0,
            succeeded: 0,
            empty: 0,
            rejected: 0,
            exhausted: 0,
            total_tokens: 0,
            chunks: Vec::new(),
            dry_run: config.dry_run,
            started_at: started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            duration: Duration::ZERO,
        }
    }

    fn record(&mut self, report: ChunkReport, outcome: &CallOutcome) {
        match outcome {
            CallOutcome::Success(_) => self.succeeded += 1,
            CallOutcome::Empty => self.empty += 1,
            CallOutcome::Rejected { .. } => self.rejected += 1,
            CallOutcome::Exhausted { .. } => self.exhausted += 1,
        }
        self.total_tokens += report.estimated_tokens;
        self.chunks.push(report);
    }

    /// Returns the number of chunks that did not produce text.
    #[must_use]
    pub const fn failed(&self) -> usize {
        self.empty + self.rejected + self.exhausted
    }

    /// Returns the elapsed time as `N min M sec`.
    #[must_use]
    pub fn elapsed_display(&self) -> String {
        format_elapsed(self.duration)
    }

    /// Prints a human-readable summary to stdout.
    pub fn print_summary(&self) {
        let title = if self.dry_run {
            "Dry Run Summary"
        } else {
            "Generation Summary"
        };

        println!("\n╔═══════════════════════════════════════════════════════╗");
        println!("║ {title:<54}║");
        println!("╠═══════════════════════════════════════════════════════╣");
        println!("║ Input Characters:     {:>8}                        ║", self.total_chars);
        println!("║ Chunks:               {:>8}                        ║", self.total_chunks);
        println!("║ Estimated Tokens:     {:>8}                        ║", self.total_tokens);

        if self.dry_run {
            for chunk in &self.chunks {
                println!(
                    "║   - Chunk {:>4}: {:>7} chars, {:>7} tokens        ║",
                    chunk.index, chunk.chars, chunk.estimated_tokens
                );
            }
            println!("║                                                       ║");
            println!("║ ⚠ No backend calls or writes (dry run mode)           ║");
        } else {
            println!("║   - Succeeded:        {:>8}                        ║", self.succeeded);
            println!("║   - Empty:            {:>8}                        ║", self.empty);
            println!("║   - Rejected:         {:>8}                        ║", self.rejected);
            println!("║   - Exhausted:        {:>8}                        ║", self.exhausted);
        }

        println!("║ Elapsed:              {:>16}                ║", self.elapsed_display());
        println!("╚═══════════════════════════════════════════════════════╝");

        if let Some(ref output) = self.output {
            println!("Output written to {}", output.display());
        }
        println!();
    }
}

/// Formats a duration as whole minutes and seconds.
#[must_use]
pub fn format_elapsed(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{} min {} sec", secs / 60, secs % 60)
}

/// Generation driver: chunk the input, call the backend once per chunk,
/// write every section in order.
pub struct Pipeline {
    config: Config,
    chunker: Chunker,
    caller: ResilientCaller<Box<dyn Backend>>,
    tokenizer: Arc<dyn TokenEstimator>,
}

impl Pipeline {
    /// Creates a new pipeline with the backend selected by the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration validation fails
    /// - Backend initialization fails
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let backend = config.create_backend()?;
        Self::with_backend(config, backend)
    }

    /// Creates a new pipeline that sends chunks to `backend`.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration validation fails.
    pub fn with_backend(config: Config, backend: Box<dyn Backend>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            chunker: Chunker::new(config.max_chars)?,
            caller: ResilientCaller::new(backend, config.retry),
            tokenizer: config.tokenizer.create(),
            config,
        })
    }

    /// Executes the run and returns statistics.
    ///
    /// # Process
    ///
    /// 1. **Read**: Loads the input file
    /// 2. **Split**: Divides it into chunks of at most `max_chars` characters
    /// 3. **Generate**: Sends each chunk to the backend in order
    /// 4. **Write**: Renders every section, success or placeholder, to the document
    ///
    /// A failing chunk never aborts the run.
    ///
    /// # Errors
    ///
    /// Returns an error if the input cannot be read or the output cannot be
    /// written.
    #[instrument(skip(self), fields(input = %self.config.input.display()))]
    pub fn run(self) -> Result<RunStats> {
        let start_time = Instant::now();
        let started_at = chrono::Local::now();
        let mut stats = RunStats::new(&self.config, self.caller.backend().name(), &started_at);

        info!("Stage 1/3: Reading {}...", self.config.input.display());
        let text = fs::read_to_string(&self.config.input)
            .map_err(|e| Error::read(&self.config.input, e))?;
        stats.total_chars = text.chars().count();

        info!("Stage 2/3: Splitting into chunks...");
        let chunks = self.chunker.split(&text);
        stats.total_chunks = chunks.len();
        info!(
            "✓ Split {} characters into {} chunks (max {} chars)",
            stats.total_chars,
            chunks.len(),
            self.chunker.max_chars()
        );

        if self.config.dry_run {
            warn!("Dry run mode enabled - skipping backend calls and file writes");
            for chunk in &chunks {
                let report = self.report(chunk, &CallOutcome::Empty, Duration::ZERO);
                stats.total_tokens += report.estimated_tokens;
                stats.chunks.push(report);
            }
            stats.duration = start_time.elapsed();
            return Ok(stats);
        }

        // Template and output-directory errors surface before any backend
        // call is spent.
        let writer = Writer::new(
            self.config.output_path(&started_at),
            self.config.template_path.as_deref(),
            self.config.backup_existing,
        )?;

        info!(
            "Stage 3/3: Generating with {}...",
            self.config.describe_backend()
        );
        let mut sections = Vec::with_capacity(chunks.len());

        for chunk in &chunks {
            info!("Processing chunk {}/{}...", chunk.index, chunks.len());

            let chunk_start = Instant::now();
            let outcome = self.caller.call(&self.request(chunk));
            let elapsed = chunk_start.elapsed();

            if outcome.is_success() {
                debug!("✓ Chunk {} done in {:.2}s", chunk.index, elapsed.as_secs_f64());
            } else {
                warn!("Chunk {} produced no output ({})", chunk.index, outcome.label());
            }

            stats.record(self.report(chunk, &outcome, elapsed), &outcome);
            sections.push(Section::new(chunk.index, &outcome));
        }

        let metadata = DocumentMetadata {
            input: self.config.input.display().to_string(),
            model: self.config.model.clone(),
            backend: stats.backend.clone(),
            generated_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        };

        writer.write_document(&sections, &metadata)?;
        stats.output = Some(writer.path().to_path_buf());
        stats.duration = start_time.elapsed();

        if self.config.write_summary {
            stats.summary = Some(writer.summary_path());
            writer.write_summary(&stats)?;
        }

        info!(
            "✓ Run completed in {} ({} of {} chunks succeeded)",
            stats.elapsed_display(),
            stats.succeeded,
            stats.total_chunks
        );

        Ok(stats)
    }

    fn request(&self, chunk: &Chunk) -> ChatRequest {
        let content = self
            .config
            .prompt
            .render_for(self.config.prompt_mode, chunk.index, &chunk.text);

        ChatRequest::user(&self.config.model, content).with_temperature(self.config.http.temperature)
    }

    fn report(&self, chunk: &Chunk, outcome: &CallOutcome, duration: Duration) -> ChunkReport {
        let prompt = self
            .config
            .prompt
            .render_for(self.config.prompt_mode, chunk.index, &chunk.text);

        ChunkReport {
            index: chunk.index,
            chars: chunk.char_len(),
            estimated_tokens: self.tokenizer.estimate(&prompt),
            outcome: outcome.label(),
            duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{ScriptedBackend, text};
    use crate::backend::BackendError;
    use crate::prompt::{PromptMode, PromptTemplate};
    use assert_fs::prelude::*;

    const INPUT: &str = "aaaa\n\nbbbb\n\ncccc";

    fn config(temp: &assert_fs::TempDir) -> crate::config::ConfigBuilder {
        let input = temp.child("input.txt");
        input.write_str(INPUT).unwrap();

        Config::builder()
            .input(input.path())
            .output_file(temp.path().join("out/doc.md"))
            .model("test-model")
            .max_chars(6)
            .retry(2, Duration::ZERO)
            .prompt(PromptTemplate::new("Document:\n<<<FILE_CONTENT>>>"))
    }

    fn run(config: Config, backend: &Arc<ScriptedBackend>) -> RunStats {
        Pipeline::with_backend(config, Box::new(Arc::clone(backend)))
            .unwrap()
            .run()
            .unwrap()
    }

    #[test]
    fn test_pipeline_writes_every_section_in_order() {
        let temp = assert_fs::TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::new(vec![text("A"), text("B"), text("C")]));

        let stats = run(config(&temp).build().unwrap(), &backend);

        assert_eq!(stats.total_chunks, 3);
        assert_eq!(stats.succeeded, 3);
        assert_eq!(backend.calls(), 3);
        temp.child("out/doc.md")
            .assert("\n## Chunk 1\nA\n\n## Chunk 2\nB\n\n## Chunk 3\nC");
    }

    #[test]
    fn test_unusable_output_path_fails_before_any_call() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("blocker").write_str("not a directory").unwrap();
        let backend = Arc::new(ScriptedBackend::always(text("A")));

        let config = config(&temp)
            .output_file(temp.path().join("blocker/doc.md"))
            .build()
            .unwrap();
        let result = Pipeline::with_backend(config, Box::new(Arc::clone(&backend)))
            .unwrap()
            .run();

        assert!(matches!(result, Err(Error::Io { .. })));
        assert_eq!(backend.calls(), 0);
    }

    #[test]
    fn test_failed_chunk_does_not_abort_run() {
        let temp = assert_fs::TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::new(vec![
            text("A"),
            Err(BackendError::hard("401 Unauthorized")),
            text("C"),
        ]));

        let stats = run(config(&temp).build().unwrap(), &backend);

        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.failed(), 1);
        temp.child("out/doc.md").assert(
            "\n## Chunk 1\nA\n\n## Chunk 2\n[No output or error]\n401 Unauthorized\n\n## Chunk 3\nC",
        );
    }

    #[test]
    fn test_exhausted_chunk_gets_error_placeholder() {
        let temp = assert_fs::TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err(BackendError::transient("504 Gateway Timeout")),
            Err(BackendError::transient("504 Gateway Timeout")),
            text("B"),
            Ok(crate::backend::Reply::Empty),
        ]));

        let stats = run(config(&temp).build().unwrap(), &backend);

        assert_eq!(backend.calls(), 4);
        assert_eq!((stats.exhausted, stats.succeeded, stats.empty), (1, 1, 1));

        let doc = std::fs::read_to_string(temp.child("out/doc.md").path()).unwrap();
        assert!(doc.starts_with(
            "\n## Chunk 1\n[Error]: failed after 2 attempts: 504 Gateway Timeout\n"
        ));
        assert!(doc.ends_with("\n## Chunk 3\n[No output]"));
    }

    #[test]
    fn test_prompt_wraps_every_chunk() {
        let temp = assert_fs::TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::always(text("ok")));

        run(config(&temp).build().unwrap(), &backend);

        let prompts: Vec<String> = backend
            .requests()
            .iter()
            .map(ChatRequest::prompt_text)
            .collect();
        assert_eq!(
            prompts,
            vec!["Document:\naaaa", "Document:\n\n\nbbbb", "Document:\n\n\ncccc"]
        );
        assert!(backend.requests().iter().all(|r| r.model == "test-model"));
    }

    #[test]
    fn test_prompt_mode_first_wraps_only_first_chunk() {
        let temp = assert_fs::TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::always(text("ok")));

        let config = config(&temp).prompt_mode(PromptMode::First).build().unwrap();
        run(config, &backend);

        let prompts: Vec<String> = backend
            .requests()
            .iter()
            .map(ChatRequest::prompt_text)
            .collect();
        assert_eq!(prompts, vec!["Document:\naaaa", "\n\nbbbb", "\n\ncccc"]);
    }

    #[test]
    fn test_dry_run_makes_no_calls_and_writes_nothing() {
        let temp = assert_fs::TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::always(text("unused")));

        let stats = run(config(&temp).dry_run(true).build().unwrap(), &backend);

        assert_eq!(backend.calls(), 0);
        assert_eq!(stats.total_chunks, 3);
        assert_eq!(stats.chunks.len(), 3);
        assert!(stats.output.is_none());
        assert!(!temp.child("out").exists());
    }

    #[test]
    fn test_summary_written_next_to_document() {
        let temp = assert_fs::TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::always(text("ok")));

        let stats = run(config(&temp).build().unwrap(), &backend);

        let summary_path = stats.summary.unwrap();
        assert_eq!(summary_path, temp.path().join("out/doc.summary.json"));

        let summary: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(summary_path).unwrap()).unwrap();
        assert_eq!(summary["total_chunks"], 3);
        assert_eq!(summary["succeeded"], 3);
        assert_eq!(summary["backend"], "scripted");
        assert_eq!(summary["chunks"][1]["outcome"], "success");
    }

    #[test]
    fn test_no_summary_when_disabled() {
        let temp = assert_fs::TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::always(text("ok")));

        let stats = run(config(&temp).write_summary(false).build().unwrap(), &backend);

        assert!(stats.summary.is_none());
        assert!(!temp.child("out/doc.summary.json").exists());
    }

    #[test]
    fn test_empty_input_yields_one_section() {
        let temp = assert_fs::TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::always(text("nothing to document")));

        let config = config(&temp).build().unwrap();
        std::fs::write(&config.input, "").unwrap();

        let stats = run(config, &backend);

        assert_eq!(stats.total_chunks, 1);
        assert_eq!(backend.calls(), 1);
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "0 min 0 sec");
        assert_eq!(format_elapsed(Duration::from_millis(59_900)), "0 min 59 sec");
        assert_eq!(format_elapsed(Duration::from_secs(754)), "12 min 34 sec");
    }
}
