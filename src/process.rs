//! Local model runner invoked as a subprocess, e.g. `ollama run <model>`.

use crate::backend::{Backend, BackendError, ChatRequest, Reply};
use crate::config::ProcessSettings;
use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Placeholder in program arguments replaced by the model identifier.
pub const MODEL_PLACEHOLDER: &str = "{model}";

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Runs an external program once per attempt, feeding the prompt on stdin.
///
/// - exit 0: stdout is the reply (blank stdout is [`Reply::Empty`])
/// - non-zero exit or failure to spawn: hard failure
/// - timeout: the child is killed and the failure is transient
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessBackend {
    /// Creates a backend from process settings and a per-call timeout.
    #[must_use]
    pub fn new(settings: &ProcessSettings, timeout: Duration) -> Self {
        Self {
            program: settings.program.clone(),
            args: settings.args.clone(),
            timeout,
        }
    }

    fn command(&self, model: &str) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(self.args.iter().map(|a| a.replace(MODEL_PLACEHOLDER, model)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

impl Backend for ProcessBackend {
    fn name(&self) -> &str {
        "process"
    }

    fn send(&self, request: &ChatRequest) -> Result<Reply, BackendError> {
        let input = request.prompt_text();

        debug!(
            program = %self.program,
            model = %request.model,
            input_len = input.len(),
            "Spawning local model"
        );

        let mut child = self.command(&request.model).spawn().map_err(|e| {
            error!("Failed to run local model '{}': {}", self.program, e);
            BackendError::hard(format!("failed to spawn '{}': {e}", self.program))
        })?;

        let stdin = feed_stdin(&mut child, input);
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = wait_with_timeout(&mut child, self.timeout);

        // The writer only fails when the child stops reading, which the
        // exit status already reports. After a timeout it is left detached:
        // a grandchild may still hold the pipe open without reading it.
        if let (Ok(Some(_)), Some(handle)) = (&status, stdin) {
            let _ = handle.join();
        }

        let Some(status) = status.map_err(|e| {
            error!("Failed to run local model '{}': {}", self.program, e);
            BackendError::hard(format!("failed waiting for '{}': {e}", self.program))
        })?
        else {
            warn!(
                "Local model timed out after {:.0}s, process killed",
                self.timeout.as_secs_f64()
            );
            return Err(BackendError::transient(format!(
                "'{}' timed out after {:?}",
                self.program, self.timeout
            )));
        };

        let stdout = collect(stdout);
        let stderr = collect(stderr);

        if !status.success() {
            error!("Local model error ({}): {}", status, stderr.trim());
            return Err(BackendError::hard(format!("{status}: {}", stderr.trim())));
        }

        if stdout.trim().is_empty() {
            Ok(Reply::Empty)
        } else {
            Ok(Reply::Text(stdout))
        }
    }
}

fn feed_stdin(child: &mut Child, input: String) -> Option<JoinHandle<std::io::Result<()>>> {
    let mut stdin = child.stdin.take()?;
    Some(thread::spawn(move || {
        stdin.write_all(input.as_bytes())?;
        // Dropping stdin closes the pipe so the child sees EOF.
        drop(stdin);
        Ok(())
    }))
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    let mut pipe = pipe?;
    Some(thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf) {
            debug!("Failed to read child output: {}", e);
        }
        buf
    }))
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

/// Waits for the child to exit. Returns `Ok(None)` after killing it on timeout.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }

        if Instant::now() >= deadline {
            if let Err(e) = child.kill() {
                debug!("Failed to kill timed out process: {}", e);
            }
            child.wait()?;
            return Ok(None);
        }

        thread::sleep(POLL_INTERVAL);
    }
}
