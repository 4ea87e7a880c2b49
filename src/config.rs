use crate::backend::Backend;
use crate::caller::RetryPolicy;
use crate::error::{Error, Result};
use crate::filter::FileFilterConfig;
use crate::http::HttpBackend;
use crate::process::{MODEL_PLACEHOLDER, ProcessBackend};
use crate::prompt::{PromptMode, PromptTemplate};
use crate::token::TokenizerKind;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_INPUT: &str = "repository_contents.txt";
const DEFAULT_OUTPUT_DIR: &str = "output";
const DEFAULT_OUTPUT_PATTERN: &str = "processed_output_{timestamp}.{ext}";
const DEFAULT_MODEL: &str = "llama3.2:latest";
const DEFAULT_ENDPOINT: &str = "http://localhost:11434/v1/chat/completions";
const DEFAULT_AUTH_HEADER: &str = "Authorization";
const DEFAULT_PROGRAM: &str = "ollama";
const DEFAULT_MAX_CHARS: usize = 8_000;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1_000);
const DEFAULT_COLLECT_OUTPUT: &str = "repository_contents.txt";

/// Timestamp format substituted for `{timestamp}` in output patterns.
pub(crate) const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Output document extension.
pub(crate) const OUTPUT_EXTENSION: &str = "md";

/// Which transport reaches the text-generation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Remote chat-completion endpoint
    #[default]
    Http,
    /// Local model runner subprocess
    Process,
}

/// Settings for the HTTP backend.
#[derive(Clone, PartialEq)]
pub struct HttpSettings {
    /// Chat-completion endpoint URL
    pub endpoint: String,

    /// Credential, sourced from the environment
    pub api_key: Option<String>,

    /// Header carrying the credential; `Authorization` sends a bearer token
    pub auth_header: String,

    /// Sampling temperature sent with each request
    pub temperature: Option<f32>,
}

impl std::fmt::Debug for HttpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSettings")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("auth_header", &self.auth_header)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            auth_header: DEFAULT_AUTH_HEADER.to_string(),
            temperature: None,
        }
    }
}

/// Settings for the local-process backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSettings {
    /// Executable to run
    pub program: String,

    /// Arguments; `{model}` is replaced by the model identifier
    pub args: Vec<String>,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            args: vec!["run".to_string(), MODEL_PLACEHOLDER.to_string()],
        }
    }
}

/// Configuration for a documentation generation run.
///
/// Use [`Config::builder()`] to construct a new configuration.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Config {
    /// Concatenated source text to document
    pub input: PathBuf,

    /// Explicit output file; overrides `output_dir` and `output_pattern`
    pub output_file: Option<PathBuf>,

    /// Directory for generated documents
    pub output_dir: PathBuf,

    /// Output filename pattern (supports {timestamp}, {ext})
    pub output_pattern: String,

    /// Transport used to reach the model
    pub backend: BackendKind,

    /// Model identifier
    pub model: String,

    /// HTTP backend settings
    pub http: HttpSettings,

    /// Local-process backend settings
    pub process: ProcessSettings,

    /// Maximum chunk size in characters
    pub max_chars: usize,

    /// Retry budget for transient failures
    pub retry: RetryPolicy,

    /// Per-call timeout
    pub timeout: Duration,

    /// Prompt wrapped around chunks
    pub prompt: PromptTemplate,

    /// Which chunks get the prompt
    pub prompt_mode: PromptMode,

    /// Tera template overriding the built-in document layout
    pub template_path: Option<PathBuf>,

    /// Estimator used for chunk statistics
    pub tokenizer: TokenizerKind,

    /// Write a JSON run summary next to the document
    pub write_summary: bool,

    /// Create backups of existing files
    pub backup_existing: bool,

    /// Dry run mode (no backend calls, no file writes)
    pub dry_run: bool,
}

impl Config {
    /// Creates a new configuration builder.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use chunkdoc::Config;
    ///
    /// let config = Config::builder()
    ///     .input("repository_contents.txt")
    ///     .model("deepseek/deepseek-r1-0528")
    ///     .max_chars(10_000)
    ///     .build()
    ///     .expect("valid configuration");
    /// ```
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Input file doesn't exist or is not a file
    /// - Chunk size or retry budget is zero
    /// - Backend settings are incomplete
    /// - Output pattern is invalid
    pub fn validate(&self) -> Result<()> {
        if !self.input.exists() {
            return Err(Error::config(format!(
                "Input file does not exist: {}",
                self.input.display()
            )));
        }

        if !self.input.is_file() {
            return Err(Error::config(format!(
                "Input path is not a file: {}",
                self.input.display()
            )));
        }

        if self.max_chars == 0 {
            return Err(Error::config("max_chars must be greater than 0"));
        }

        if self.retry.attempts == 0 {
            return Err(Error::config("retries must be at least 1"));
        }

        if self.timeout.is_zero() {
            return Err(Error::config("timeout must be greater than 0"));
        }

        if self.model.trim().is_empty() {
            return Err(Error::config("model must not be empty"));
        }

        match self.backend {
            BackendKind::Http => {
                reqwest::Url::parse(&self.http.endpoint).map_err(|e| {
                    Error::config(format!("Invalid endpoint '{}': {}", self.http.endpoint, e))
                })?;

                if let Some(t) = self.http.temperature {
                    if !(0.0..=2.0).contains(&t) {
                        return Err(Error::config(format!(
                            "temperature must be between 0 and 2, got {t}"
                        )));
                    }
                }
            }
            BackendKind::Process => {
                if self.process.program.trim().is_empty() {
                    return Err(Error::config("process program must not be empty"));
                }
            }
        }

        if self.output_file.is_none() {
            validate_pattern(&self.output_pattern)?;
        }

        if let Some(ref template_path) = self.template_path {
            if !template_path.is_file() {
                return Err(Error::config(format!(
                    "Template file does not exist: {}",
                    template_path.display()
                )));
            }
        }

        if !self.prompt.has_placeholder() {
            tracing::debug!("Prompt has no content placeholder; chunks will be appended");
        }

        Ok(())
    }

    /// Returns the output document path for a run started at `started`.
    #[must_use]
    pub fn output_path(&self, started: &chrono::DateTime<chrono::Local>) -> PathBuf {
        if let Some(ref file) = self.output_file {
            return file.clone();
        }

        let filename = self
            .output_pattern
            .replace("{timestamp}", &started.format(TIMESTAMP_FORMAT).to_string())
            .replace("{ext}", OUTPUT_EXTENSION);

        self.output_dir.join(filename)
    }

    /// Builds the backend selected by this configuration.
    ///
    /// The HTTP client is created here, once per run.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn create_backend(&self) -> Result<Box<dyn Backend>> {
        Ok(match self.backend {
            BackendKind::Http => Box::new(HttpBackend::new(&self.http, self.timeout)?),
            BackendKind::Process => Box::new(ProcessBackend::new(&self.process, self.timeout)),
        })
    }

    /// Returns a one-line description of the backend for logs.
    #[must_use]
    pub fn describe_backend(&self) -> String {
        match self.backend {
            BackendKind::Http => format!("http {} ({})", self.http.endpoint, self.model),
            BackendKind::Process => format!(
                "process {} {} ({})",
                self.process.program,
                self.process.args.join(" "),
                self.model
            ),
        }
    }
}

fn validate_pattern(pattern: &str) -> Result<()> {
    if pattern.trim().is_empty() {
        return Err(Error::invalid_pattern(pattern, "Pattern must not be empty"));
    }

    if pattern.contains('/') || pattern.contains('\\') {
        return Err(Error::invalid_pattern(
            pattern,
            "Pattern is a file name; use the output directory for paths",
        ));
    }

    if !pattern.contains("{ext}") {
        return Err(Error::invalid_pattern(
            pattern,
            "Pattern must contain {ext} placeholder",
        ));
    }

    Ok(())
}

/// Builder for creating a [`Config`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    input: Option<PathBuf>,
    output_file: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    output_pattern: Option<String>,
    backend: Option<BackendKind>,
    model: Option<String>,
    http: HttpSettings,
    process: ProcessSettings,
    max_chars: Option<usize>,
    retry: Option<RetryPolicy>,
    timeout: Option<Duration>,
    prompt: Option<PromptTemplate>,
    prompt_mode: PromptMode,
    template_path: Option<PathBuf>,
    tokenizer: TokenizerKind,
    write_summary: Option<bool>,
    backup_existing: Option<bool>,
    dry_run: bool,
}

impl ConfigBuilder {
    /// Sets the input file.
    #[must_use]
    pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
        self.input = Some(path.into());
        self
    }

    /// Sets an explicit output file.
    #[must_use]
    pub fn output_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_file = Some(path.into());
        self
    }

    /// Sets the output directory used with the output pattern.
    #[must_use]
    pub fn output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(path.into());
        self
    }

    /// Sets the output filename pattern.
    ///
    /// Pattern must contain the `{ext}` placeholder and may contain `{timestamp}`.
    #[must_use]
    pub fn output_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.output_pattern = Some(pattern.into());
        self
    }

    /// Sets the backend transport.
    #[must_use]
    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.backend = Some(kind);
        self
    }

    /// Sets the model identifier.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the chat-completion endpoint.
    #[must_use]
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.http.endpoint = url.into();
        self
    }

    /// Sets the API key.
    #[must_use]
    pub fn api_key(mut self, key: Option<String>) -> Self {
        self.http.api_key = key.filter(|k| !k.trim().is_empty());
        self
    }

    /// Sets the header carrying the API key.
    #[must_use]
    pub fn auth_header(mut self, header: impl Into<String>) -> Self {
        self.http.auth_header = header.into();
        self
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub fn temperature(mut self, temperature: Option<f32>) -> Self {
        self.http.temperature = temperature;
        self
    }

    /// Sets the local model runner executable.
    #[must_use]
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.process.program = program.into();
        self
    }

    /// Sets the local model runner arguments.
    #[must_use]
    pub fn program_args(mut self, args: Vec<String>) -> Self {
        self.process.args = args;
        self
    }

    /// Sets the maximum chunk size in characters.
    #[must_use]
    pub fn max_chars(mut self, chars: usize) -> Self {
        self.max_chars = Some(chars);
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry = Some(RetryPolicy { attempts, delay });
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the prompt template.
    #[must_use]
    pub fn prompt(mut self, prompt: PromptTemplate) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// Sets which chunks get the prompt.
    #[must_use]
    pub fn prompt_mode(mut self, mode: PromptMode) -> Self {
        self.prompt_mode = mode;
        self
    }

    /// Sets the path to a Tera template for the output document.
    #[must_use]
    pub fn template_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.template_path = Some(path.into());
        self
    }

    /// Sets the token estimator used for statistics.
    #[must_use]
    pub fn tokenizer(mut self, kind: TokenizerKind) -> Self {
        self.tokenizer = kind;
        self
    }

    /// Enables or disables the JSON run summary.
    #[must_use]
    pub fn write_summary(mut self, enabled: bool) -> Self {
        self.write_summary = Some(enabled);
        self
    }

    /// Enables or disables backup creation.
    #[must_use]
    pub fn backup_existing(mut self, enabled: bool) -> Self {
        self.backup_existing = Some(enabled);
        self
    }

    /// Enables dry run mode.
    #[must_use]
    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn build(self) -> Result<Config> {
        let config = Config {
            input: self.input.unwrap_or_else(|| PathBuf::from(DEFAULT_INPUT)),
            output_file: self.output_file,
            output_dir: self
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            output_pattern: self
                .output_pattern
                .unwrap_or_else(|| DEFAULT_OUTPUT_PATTERN.to_string()),
            backend: self.backend.unwrap_or_default(),
            model: self.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            http: self.http,
            process: self.process,
            max_chars: self.max_chars.unwrap_or(DEFAULT_MAX_CHARS),
            retry: self.retry.unwrap_or_default(),
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            prompt: self.prompt.unwrap_or_default(),
            prompt_mode: self.prompt_mode,
            template_path: self.template_path,
            tokenizer: self.tokenizer,
            write_summary: self.write_summary.unwrap_or(true),
            backup_existing: self.backup_existing.unwrap_or(true),
            dry_run: self.dry_run,
        };

        config.validate()?;
        Ok(config)
    }
}

/// Which files of the source tree are collected.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CollectScope {
    /// Every text file not excluded by ignore rules or filters
    #[default]
    All,
    /// Only files inside directories named `src`, at any depth
    SrcDirs,
    /// Only files under one relative sub-directory
    Subdir(PathBuf),
}

/// Configuration for collecting a source tree into one text file.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct CollectConfig {
    /// Local directory or GitHub URL
    pub source: String,

    /// Destination file for the concatenated contents
    pub output: PathBuf,

    /// Which files are collected
    pub scope: CollectScope,

    /// Glob include/exclude rules
    pub file_filter: FileFilterConfig,

    /// Create a backup of an existing output file
    pub backup_existing: bool,
}

impl CollectConfig {
    /// Creates a new collect configuration builder.
    #[must_use]
    pub fn builder(source: impl Into<String>) -> CollectConfigBuilder {
        CollectConfigBuilder {
            source: source.into(),
            output: None,
            scope: CollectScope::default(),
            file_filter: FileFilterConfig::default(),
            backup_existing: true,
        }
    }

    /// Validates the configuration.
    ///
    /// Local sources must be existing directories; remote sources are
    /// checked when cloned.
    ///
    /// # Errors
    ///
    /// Returns an error if the source or scope is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(Error::config("source must not be empty"));
        }

        if !crate::source::is_github_url(&self.source) {
            let root = Path::new(&self.source);
            if !root.is_dir() {
                return Err(Error::config(format!(
                    "Source is neither a GitHub URL nor a directory: {}",
                    self.source
                )));
            }
        }

        if let CollectScope::Subdir(ref sub) = self.scope {
            if sub.is_absolute() || sub.components().any(|c| c.as_os_str() == "..") {
                return Err(Error::config(format!(
                    "Sub-directory must be relative to the source root: {}",
                    sub.display()
                )));
            }
        }

        self.file_filter.validate()
    }
}

/// Builder for creating a [`CollectConfig`].
#[derive(Debug)]
pub struct CollectConfigBuilder {
    source: String,
    output: Option<PathBuf>,
    scope: CollectScope,
    file_filter: FileFilterConfig,
    backup_existing: bool,
}

impl CollectConfigBuilder {
    /// Sets the output file.
    #[must_use]
    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    /// Sets the collection scope.
    #[must_use]
    pub fn scope(mut self, scope: CollectScope) -> Self {
        self.scope = scope;
        self
    }

    /// Sets the glob filter rules.
    #[must_use]
    pub fn file_filter(mut self, filter: FileFilterConfig) -> Self {
        self.file_filter = filter;
        self
    }

    /// Enables or disables backup creation.
    #[must_use]
    pub fn backup_existing(mut self, enabled: bool) -> Self {
        self.backup_existing = enabled;
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn build(self) -> Result<CollectConfig> {
        let config = CollectConfig {
            source: self.source,
            output: self
                .output
                .unwrap_or_else(|| PathBuf::from(DEFAULT_COLLECT_OUTPUT)),
            scope: self.scope,
            file_filter: self.file_filter,
            backup_existing: self.backup_existing,
        };

        config.validate()?;
        Ok(config)
    }
}
