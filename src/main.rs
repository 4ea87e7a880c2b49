use anyhow::Context;
use chunkdoc::{
    BackendKind, CollectConfig, CollectScope, Config, FileFilterConfig, Pipeline, PromptMode,
    PromptTemplate, TokenizerKind,
};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "chunkdoc",
    version,
    author,
    about = "Generate Markdown documentation from a code repository with an LLM",
    long_about = "Generate Markdown documentation from a code repository with an LLM.\n\n\
    `collect` concatenates a local directory or GitHub repository into one text file. \
    `generate` splits that file into bounded chunks, sends each chunk to a text-generation \
    backend and writes every response, in order, to a single Markdown document.\n\n\
    USAGE EXAMPLES:\n  \
      # Collect every `src` directory of a GitHub project\n  \
      chunkdoc collect https://github.com/acme/app --scope src\n\n  \
      # Document it through an OpenAI-compatible endpoint\n  \
      CHUNKDOC_API_KEY=... chunkdoc generate --endpoint https://openrouter.ai/api/v1/chat/completions \\\n      \
      --model deepseek/deepseek-r1-0528 --max-chars 10000\n\n  \
      # Document it with a local model\n  \
      chunkdoc generate --backend process --model gemma3:latest --timeout 2000"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Concatenate source files into one text file with path headers
    Collect(CollectArgs),

    /// Document a text file chunk by chunk with a text-generation backend
    Generate(GenerateArgs),
}

#[derive(Args, Debug)]
struct CollectArgs {
    /// Local directory or GitHub URL (https://github.com/… or git@github.com:…)
    #[arg(value_name = "SOURCE")]
    source: String,

    /// Output file
    #[arg(short, long, default_value = "repository_contents.txt", value_name = "FILE")]
    out: PathBuf,

    /// Which files to collect
    #[arg(long, value_enum, default_value = "all", conflicts_with = "subdir")]
    scope: CliScope,

    /// Collect only this sub-directory (paths stay relative to the root)
    #[arg(long, value_name = "PATH")]
    subdir: Option<PathBuf>,

    /// Glob of files to skip (repeatable)
    #[arg(long, value_name = "GLOB")]
    exclude: Vec<String>,

    /// Glob of directories to skip (repeatable)
    #[arg(long, value_name = "GLOB")]
    exclude_dir: Vec<String>,

    /// Collect only files matching a glob (repeatable)
    #[arg(long, value_name = "GLOB")]
    include: Vec<String>,

    /// Overwrite the output without keeping a backup
    #[arg(long)]
    no_backup: bool,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Text file to document
    #[arg(short, long, default_value = "repository_contents.txt", value_name = "FILE")]
    input: PathBuf,

    /// Output file (overrides --output-dir)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Directory for timestamped output files
    #[arg(long, default_value = "output", value_name = "DIR")]
    output_dir: PathBuf,

    /// Output filename pattern
    #[arg(long, default_value = "processed_output_{timestamp}.{ext}")]
    pattern: String,

    /// Backend transport
    #[arg(short, long, value_enum, default_value = "http")]
    backend: CliBackend,

    /// Model identifier
    #[arg(short, long, env = "CHUNKDOC_MODEL", default_value = "llama3.2:latest")]
    model: String,

    /// Chat-completion endpoint (http backend)
    #[arg(
        long,
        env = "CHUNKDOC_ENDPOINT",
        default_value = "http://localhost:11434/v1/chat/completions",
        value_name = "URL"
    )]
    endpoint: String,

    /// Environment variable holding the API key (http backend)
    #[arg(long, default_value = "CHUNKDOC_API_KEY", value_name = "VAR")]
    api_key_env: String,

    /// Header carrying the API key; `Authorization` sends a bearer token
    #[arg(long, default_value = "Authorization", value_name = "NAME")]
    auth_header: String,

    /// Sampling temperature (http backend)
    #[arg(long)]
    temperature: Option<f32>,

    /// Local model runner (process backend)
    #[arg(long, default_value = "ollama", value_name = "PATH")]
    program: String,

    /// Runner argument, `{model}` is substituted (repeatable; default: run {model})
    #[arg(long = "program-arg", value_name = "ARG", allow_hyphen_values = true)]
    program_args: Vec<String>,

    /// Maximum chunk size in characters
    #[arg(long, default_value_t = 8_000)]
    max_chars: usize,

    /// Attempts per chunk for transient failures
    #[arg(long, default_value_t = 3)]
    retries: u32,

    /// Seconds to wait between attempts
    #[arg(long, default_value_t = 10, value_name = "SECS")]
    retry_delay: u64,

    /// Per-call timeout in seconds
    #[arg(long, default_value_t = 1_000, value_name = "SECS")]
    timeout: u64,

    /// Prompt file; `<<<FILE_CONTENT>>>` marks where each chunk goes
    #[arg(long, value_name = "FILE")]
    prompt_file: Option<PathBuf>,

    /// Which chunks get the prompt
    #[arg(long, value_enum, default_value = "every")]
    prompt_mode: CliPromptMode,

    /// Path to a custom Tera template for the output document
    #[arg(long, value_name = "FILE")]
    template: Option<PathBuf>,

    /// Tokenizer used for estimates
    #[arg(long, value_enum, default_value = "simple")]
    tokenizer: CliTokenizer,

    /// Skip the JSON run summary
    #[arg(long)]
    no_summary: bool,

    /// Overwrite the output without keeping a backup
    #[arg(long)]
    no_backup: bool,

    /// Dry run (chunk and estimate only; no backend calls, no writes)
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliScope {
    /// Whole tree
    All,
    /// Only files inside directories named `src`
    Src,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliBackend {
    Http,
    Process,
}

impl From<CliBackend> for BackendKind {
    fn from(b: CliBackend) -> Self {
        match b {
            CliBackend::Http => Self::Http,
            CliBackend::Process => Self::Process,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliPromptMode {
    Every,
    First,
}

impl From<CliPromptMode> for PromptMode {
    fn from(m: CliPromptMode) -> Self {
        match m {
            CliPromptMode::Every => Self::Every,
            CliPromptMode::First => Self::First,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliTokenizer {
    Simple,
    Enhanced,
}

impl From<CliTokenizer> for TokenizerKind {
    fn from(t: CliTokenizer) -> Self {
        match t {
            CliTokenizer::Simple => Self::Simple,
            CliTokenizer::Enhanced => Self::Enhanced,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_tracing(cli.verbose)?;

    match cli.command {
        Command::Collect(args) => collect(args),
        Command::Generate(args) => generate(args),
    }
}

fn collect(args: CollectArgs) -> anyhow::Result<()> {
    let scope = match (args.subdir, args.scope) {
        (Some(sub), _) => CollectScope::Subdir(sub),
        (None, CliScope::Src) => CollectScope::SrcDirs,
        (None, CliScope::All) => CollectScope::All,
    };

    let config = CollectConfig::builder(args.source)
        .output(args.out)
        .scope(scope)
        .file_filter(
            FileFilterConfig::new()
                .exclude_files(args.exclude)
                .exclude_directories(args.exclude_dir)
                .include_only(args.include),
        )
        .backup_existing(!args.no_backup)
        .build()
        .context("Failed to build configuration")?;

    chunkdoc::collect(&config)
        .context("Collection failed")?
        .print_summary();

    Ok(())
}

fn generate(args: GenerateArgs) -> anyhow::Result<()> {
    let api_key = std::env::var(&args.api_key_env).ok();

    let mut builder = Config::builder()
        .input(args.input)
        .output_dir(args.output_dir)
        .output_pattern(args.pattern)
        .backend(args.backend.into())
        .model(args.model)
        .endpoint(args.endpoint)
        .api_key(api_key)
        .auth_header(args.auth_header)
        .temperature(args.temperature)
        .program(args.program)
        .max_chars(args.max_chars)
        .retry(args.retries, Duration::from_secs(args.retry_delay))
        .timeout(Duration::from_secs(args.timeout))
        .prompt_mode(args.prompt_mode.into())
        .tokenizer(args.tokenizer.into())
        .write_summary(!args.no_summary)
        .backup_existing(!args.no_backup)
        .dry_run(args.dry_run);

    if let Some(output) = args.output {
        builder = builder.output_file(output);
    }

    if !args.program_args.is_empty() {
        builder = builder.program_args(args.program_args);
    }

    if let Some(prompt_file) = args.prompt_file {
        let prompt = PromptTemplate::from_file(&prompt_file)
            .with_context(|| format!("Failed to load prompt {}", prompt_file.display()))?;
        builder = builder.prompt(prompt);
    }

    if let Some(template_path) = args.template {
        builder = builder.template_path(template_path);
    }

    let config = builder.build().context("Failed to build configuration")?;

    Pipeline::new(config)
        .context("Failed to create pipeline")?
        .run()
        .context("Pipeline execution failed")?
        .print_summary();

    Ok(())
}

fn setup_tracing(verbosity: u8) -> anyhow::Result<()> {
    let filter = match verbosity {
        0 => EnvFilter::new("chunkdoc=info"),
        1 => EnvFilter::new("chunkdoc=debug"),
        _ => EnvFilter::new("chunkdoc=trace"),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}
