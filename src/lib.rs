//! # chunkdoc
//!
//! Turns a code repository into Markdown documentation by feeding bounded
//! chunks of its source to a text-generation backend.
//!
//! ## Features
//!
//! - Repository collection with `.gitignore` support and GitHub cloning
//! - Paragraph-aware chunking with an exact character bound
//! - HTTP chat-completion and local-process backends behind one trait
//! - Fixed-delay retries for transient failures; no chunk aborts a run
//! - Atomic output writes with automatic backups and a JSON run summary
//!
//! ## Quick Start
//!
//! ```no_run
//! use chunkdoc::{BackendKind, Config, Pipeline};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = Config::builder()
//!     .input("repository_contents.txt")
//!     .backend(BackendKind::Process)
//!     .model("gemma3:latest")
//!     .max_chars(8_000)
//!     .build()?;
//!
//! let stats = Pipeline::new(config)?.run()?;
//! stats.print_summary();
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! Collection and generation are two pipelines:
//! 1. **Scanner**: Walks a local or cloned tree into one text blob
//! 2. **Chunker**: Splits the blob at paragraph breaks under a size bound
//! 3. **Caller**: Sends each chunk, retrying transient failures
//! 4. **Writer**: Renders every section and persists the document

#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery
)]
#![allow(clippy::module_name_repetitions)]

mod backend;
mod caller;
mod chunker;
mod config;
mod error;
mod file;
mod filter;
mod http;
mod pipeline;
mod process;
mod prompt;
mod scanner;
mod template;
mod token;
mod writer;

pub mod source;

pub use backend::{Backend, BackendError, ChatRequest, FailureKind, Message, Reply};
pub use caller::{CallOutcome, ResilientCaller, RetryPolicy, NO_OUTPUT_PLACEHOLDER, REJECTED_PLACEHOLDER};
pub use chunker::{split_text, Chunk, Chunker};
pub use config::{
    BackendKind, CollectConfig, CollectConfigBuilder, CollectScope, Config, ConfigBuilder,
    HttpSettings, ProcessSettings,
};
pub use error::{Error, Result};
pub use file::{FileBody, SourceFile};
pub use filter::FileFilterConfig;
pub use http::HttpBackend;
pub use pipeline::{format_elapsed, ChunkReport, Pipeline, RunStats};
pub use process::{ProcessBackend, MODEL_PLACEHOLDER};
pub use prompt::{PromptMode, PromptTemplate, CONTENT_PLACEHOLDER};
pub use scanner::{collect, concatenate, CollectStats, ScanStats};
pub use token::{TokenEstimator, TokenizerKind};

/// Runs a generation pipeline with the given configuration.
///
/// # Errors
///
/// Returns an error if:
/// - Configuration is invalid
/// - The backend cannot be initialized
/// - The input cannot be read
/// - The output cannot be written
///
/// # Examples
///
/// ```no_run
/// use chunkdoc::{Config, run};
///
/// # fn main() -> anyhow::Result<()> {
/// let config = Config::builder()
///     .input("repository_contents.txt")
///     .build()?;
///
/// run(config)?;
/// # Ok(())
/// # }
/// ```
pub fn run(config: Config) -> Result<RunStats> {
    Pipeline::new(config)?.run()
}
