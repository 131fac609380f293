//! Client for the external text-completion service.
//!
//! The completion service is treated as unreliable by contract: it may time
//! out, return non-2xx statuses, or answer with text that contains no JSON
//! at all. Every failure mode maps to a [`CompletionError`] variant, and the
//! suggestion engine degrades to rule-based-only output on any of them.
//!
//! The wire shape is a plain generate call: POST `{base}/api/generate` with
//! `{model, prompt, stream: false}`, answered by `{response}`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default request timeout. The suggestion path must never hang on the
/// completion service; anything slower degrades to rule-based output.
pub const DEFAULT_TIMEOUT_SECS: u64 = 12;

/// Errors from the completion service.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// Could not reach the service at all.
    #[error("could not connect to completion service at {0}")]
    Connection(String),

    /// The bounded request timeout elapsed.
    #[error("completion request timed out after {0}s")]
    Timeout(u64),

    /// The service answered with a non-2xx status.
    #[error("completion service returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for the log line.
        body: String,
    },

    /// The request failed in transit for some other reason.
    #[error("completion request failed: {0}")]
    Request(String),

    /// The 2xx response body did not match the expected shape.
    #[error("completion response could not be parsed: {0}")]
    Parse(String),
}

/// Request body for the generate endpoint.
#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// Response body from the generate endpoint.
#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// HTTP client for the text-completion service.
#[derive(Clone)]
pub struct CompletionClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout_secs: u64,
}

impl CompletionClient {
    /// Create a client with a bounded per-request timeout.
    pub fn new(base_url: &str, model: &str, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            timeout_secs,
        }
    }

    /// The configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a prompt and return the raw response text.
    pub async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CompletionError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    CompletionError::Connection(self.base_url.clone())
                } else {
                    CompletionError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Parse(e.to_string()))?;

        Ok(parsed.response)
    }
}

/// The first `[ ... ]` substring of a completion response, or None.
///
/// Completion output is prose-wrapped more often than not; this takes the
/// slice from the first `[` through the last `]` and leaves JSON validation
/// to the caller, which must be equally defensive.
pub fn extract_json_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_array_plain() {
        let text = r#"[{"title": "a"}]"#;
        assert_eq!(extract_json_array(text), Some(text));
    }

    #[test]
    fn test_extract_json_array_prose_wrapped() {
        let text = "Here are my suggestions:\n[{\"title\": \"a\"}]\nHope that helps!";
        assert_eq!(extract_json_array(text), Some("[{\"title\": \"a\"}]"));
    }

    #[test]
    fn test_extract_json_array_nested() {
        let text = "prefix [[1, 2], [3]] suffix";
        assert_eq!(extract_json_array(text), Some("[[1, 2], [3]]"));
    }

    #[test]
    fn test_extract_json_array_absent() {
        assert_eq!(extract_json_array("no json here"), None);
        assert_eq!(extract_json_array("only open ["), None);
        assert_eq!(extract_json_array("only close ]"), None);
        // Brackets in the wrong order are not an array
        assert_eq!(extract_json_array("] backwards ["), None);
    }

    #[test]
    fn test_client_normalizes_base_url() {
        let client = CompletionClient::new("http://localhost:11434/", "med-assist", 12);
        assert_eq!(client.base_url(), "http://localhost:11434");
    }

    #[tokio::test]
    async fn test_complete_unreachable_is_connection_error() {
        // Port 9 (discard) is not listening; the send fails fast
        let client = CompletionClient::new("http://127.0.0.1:9", "med-assist", 2);
        let err = client.complete("hello").await.unwrap_err();
        assert!(matches!(
            err,
            CompletionError::Connection(_) | CompletionError::Timeout(_) | CompletionError::Request(_)
        ));
    }
}
