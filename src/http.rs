//! Remote chat-completion backend over HTTP.

use crate::backend::{Backend, BackendError, ChatRequest, Reply};
use crate::config::HttpSettings;
use crate::error::{Error, Result};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Largest slice of a response body repeated in logs and errors.
const BODY_PREVIEW_CHARS: usize = 500;

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completion endpoint reached with a blocking `reqwest` client.
///
/// The client is built once per run and reused for every chunk.
pub struct HttpBackend {
    endpoint: String,
    client: Client,
}

impl HttpBackend {
    /// Creates a backend from HTTP settings and a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential is not a valid header value or
    /// the client cannot be built.
    pub fn new(settings: &HttpSettings, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();

        if let Some(ref key) = settings.api_key {
            let (name, value) = credential_header(&settings.auth_header, key)?;
            headers.insert(name, value);
        } else {
            warn!("No API key configured for {}", settings.endpoint);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            endpoint: settings.endpoint.clone(),
            client,
        })
    }
}

impl Backend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    fn send(&self, request: &ChatRequest) -> std::result::Result<Reply, BackendError> {
        debug!(
            endpoint = %self.endpoint,
            model = %request.model,
            "POST chat completion"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .map_err(|e| BackendError::transient(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| BackendError::transient(format!("failed to read response body: {e}")))?;

        interpret_response(status, &body)
    }
}

/// Maps a status and body onto the reply/failure taxonomy.
///
/// - 200: parse the completion; an unparseable body is logged and yields
///   [`Reply::Empty`]
/// - 504: transient
/// - anything else: hard
pub(crate) fn interpret_response(
    status: StatusCode,
    body: &str,
) -> std::result::Result<Reply, BackendError> {
    match status {
        StatusCode::OK => Ok(parse_completion(body)),
        StatusCode::GATEWAY_TIMEOUT => {
            warn!("504 Gateway Timeout");
            Err(BackendError::transient(format!("{status}")))
        }
        _ => {
            let preview = preview(body);
            error!("Unexpected status {}: {}", status, preview);
            Err(BackendError::hard(format!("{status}: {preview}")))
        }
    }
}

fn parse_completion(body: &str) -> Reply {
    match serde_json::from_str::<ChatCompletion>(body) {
        Ok(completion) => completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map_or(Reply::Empty, Reply::Text),
        Err(e) => {
            error!("Error parsing response: {}", e);
            error!("{}", preview(body));
            debug!(body, "Raw response body");
            Reply::Empty
        }
    }
}

/// Builds the credential header. `Authorization` gets a bearer token; any
/// other header carries the raw key.
fn credential_header(header: &str, key: &str) -> Result<(HeaderName, HeaderValue)> {
    let name = HeaderName::from_bytes(header.as_bytes())
        .map_err(|e| Error::config(format!("Invalid auth header name '{header}': {e}")))?;

    let raw = if name == AUTHORIZATION {
        format!("Bearer {key}")
    } else {
        key.to_string()
    };

    let mut value = HeaderValue::from_str(&raw)
        .map_err(|_| Error::config("API key contains characters not allowed in a header"))?;
    value.set_sensitive(true);

    Ok((name, value))
}

fn preview(body: &str) -> String {
    match body.char_indices().nth(BODY_PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}…", &body[..cut]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caller::{CallOutcome, ResilientCaller, RetryPolicy};
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    /// Serves every connection with the same status line and counts them.
    fn serve(status: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = format!("http://{}/v1/chat/completions", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                counter.fetch_add(1, Ordering::SeqCst);
                respond(stream, status);
            }
        });

        (endpoint, hits)
    }

    fn respond(stream: TcpStream, status: &str) {
        let mut reader = BufReader::new(stream);
        let mut content_length = 0;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
        }
        let mut body = vec![0; content_length];
        let _ = reader.read_exact(&mut body);

        let body = r#"{"error": "server said no"}"#;
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let mut stream = reader.into_inner();
        let _ = stream.write_all(response.as_bytes());
        let _ = stream.flush();
    }

    fn caller_for(endpoint: String, attempts: u32) -> ResilientCaller<HttpBackend> {
        let settings = HttpSettings {
            endpoint,
            api_key: Some("token".to_string()),
            auth_header: "Authorization".to_string(),
            temperature: None,
        };
        let backend = HttpBackend::new(&settings, Duration::from_secs(10)).unwrap();
        ResilientCaller::new(
            backend,
            RetryPolicy {
                attempts,
                delay: Duration::from_millis(10),
            },
        )
    }

    const COMPLETION: &str = r##"{
        "id": "cmpl-1",
        "choices": [
            {"index": 0, "message": {"role": "assistant", "content": "# API\n\nDocs"}},
            {"index": 1, "message": {"role": "assistant", "content": "ignored"}}
        ]
    }"##;

    #[test]
    fn test_ok_takes_first_choice() {
        let reply = interpret_response(StatusCode::OK, COMPLETION).unwrap();
        assert_eq!(reply, Reply::Text("# API\n\nDocs".to_string()));
    }

    #[test]
    fn test_ok_with_unparseable_body_is_empty() {
        let reply = interpret_response(StatusCode::OK, "<html>oops</html>").unwrap();
        assert_eq!(reply, Reply::Empty);
    }

    #[test]
    fn test_ok_without_choices_is_empty() {
        let reply = interpret_response(StatusCode::OK, r#"{"choices": []}"#).unwrap();
        assert_eq!(reply, Reply::Empty);

        let reply = interpret_response(StatusCode::OK, r#"{"object": "error"}"#).unwrap();
        assert_eq!(reply, Reply::Empty);
    }

    #[test]
    fn test_ok_with_null_content_is_empty() {
        let body = r#"{"choices": [{"message": {"role": "assistant", "content": null}}]}"#;
        assert_eq!(interpret_response(StatusCode::OK, body).unwrap(), Reply::Empty);
    }

    #[test]
    fn test_gateway_timeout_is_transient() {
        let err = interpret_response(StatusCode::GATEWAY_TIMEOUT, "").unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_other_statuses_are_hard() {
        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::UNAUTHORIZED,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::CREATED,
        ] {
            let err = interpret_response(status, r#"{"error": "nope"}"#).unwrap_err();
            assert!(!err.is_transient(), "{status}");
            assert!(err.message().contains("nope"));
        }
    }

    #[test]
    fn test_bearer_credential() {
        let (name, value) = credential_header("Authorization", "secret").unwrap();
        assert_eq!(name, AUTHORIZATION);
        assert_eq!(value.to_str().unwrap(), "Bearer secret");
        assert!(value.is_sensitive());
    }

    #[test]
    fn test_api_key_credential() {
        let (name, value) = credential_header("x-api-key", "secret").unwrap();
        assert_eq!(name.as_str(), "x-api-key");
        assert_eq!(value.to_str().unwrap(), "secret");
    }

    #[test]
    fn test_invalid_header_name() {
        assert!(credential_header("bad header", "k").unwrap_err().is_config());
    }

    #[test]
    fn test_preview_truncates_long_bodies() {
        let body = "x".repeat(BODY_PREVIEW_CHARS + 10);
        assert_eq!(preview(&body).chars().count(), BODY_PREVIEW_CHARS + 1);
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn test_backend_builds_from_settings() {
        let settings = HttpSettings {
            endpoint: "https://router.example.com/v1/chat/completions".to_string(),
            api_key: Some("token".to_string()),
            auth_header: "Authorization".to_string(),
            temperature: None,
        };
        let backend = HttpBackend::new(&settings, Duration::from_secs(5)).unwrap();
        assert_eq!(backend.name(), "http");
    }

    #[test]
    fn test_unreachable_endpoint_is_transient() {
        let settings = HttpSettings {
            endpoint: "http://127.0.0.1:9/v1/chat/completions".to_string(),
            api_key: None,
            auth_header: "Authorization".to_string(),
            temperature: None,
        };
        let backend = HttpBackend::new(&settings, Duration::from_secs(2)).unwrap();
        let err = backend.send(&ChatRequest::user("m", "hi")).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_gateway_timeouts_exhaust_every_attempt() {
        let (endpoint, hits) = serve("504 Gateway Timeout");
        let caller = caller_for(endpoint, 3);

        let outcome = caller.call(&ChatRequest::user("m", "chunk"));

        assert!(matches!(outcome, CallOutcome::Exhausted { attempts: 3, .. }), "{outcome:?}");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_bad_request_is_rejected_without_retry() {
        let (endpoint, hits) = serve("400 Bad Request");
        let caller = caller_for(endpoint, 3);

        let outcome = caller.call(&ChatRequest::user("m", "chunk"));

        match outcome {
            CallOutcome::Rejected { reason } => assert!(reason.contains("server said no")),
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
