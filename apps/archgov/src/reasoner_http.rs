//! # HTTP Reasoning Provider
//!
//! [`Reasoner`] backed by an OpenAI-compatible chat-completions endpoint
//! (OpenAI, Ollama, vLLM, llama.cpp server).
//!
//! The pipeline is synchronous and runs on blocking threads. Each call is
//! driven to completion on the tokio runtime captured at construction, so
//! `invoke` must never be called from an async task.

use archgov_core::{GovernanceError, Reasoner, ReasonerError, ReasoningRequest};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;

/// HTTP provider settings.
#[derive(Debug, Clone)]
pub struct HttpReasonerConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: String,
}

/// Reasoner that calls a chat-completions API.
pub struct HttpReasoner {
    client: reqwest::Client,
    runtime: Handle,
    config: HttpReasonerConfig,
}

impl std::fmt::Debug for HttpReasoner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpReasoner")
            .field("endpoint", &self.config.endpoint)
            .field("model", &self.config.model)
            .finish_non_exhaustive()
    }
}

impl HttpReasoner {
    /// Build the client. Must be called inside a tokio runtime.
    pub fn new(config: HttpReasonerConfig) -> Result<Self, GovernanceError> {
        let runtime = Handle::try_current().map_err(|e| {
            GovernanceError::Precondition(format!("HTTP reasoner needs a tokio runtime: {e}"))
        })?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| GovernanceError::Io(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            runtime,
            config,
        })
    }

    fn headers(&self) -> Result<HeaderMap, ReasonerError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.config.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| ReasonerError::InvalidRequest(e.to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    async fn complete(&self, request: &ReasoningRequest) -> Result<String, ReasonerError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt(request),
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt(request),
                },
            ],
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .headers(self.headers()?)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(map_http_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ReasonerError::Unavailable(format!("HTTP {status}: {text}")));
        }

        let parsed: ChatResponse = response.json().await.map_err(map_http_error)?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ReasonerError::Unavailable("response has no choices".to_string()))
    }
}

fn map_http_error(e: reqwest::Error) -> ReasonerError {
    if e.is_timeout() {
        ReasonerError::Timeout
    } else {
        ReasonerError::Unavailable(e.to_string())
    }
}

/// Stage instructions plus the output contract.
fn system_prompt(request: &ReasoningRequest) -> String {
    let schema = serde_json::to_string_pretty(&request.schema).unwrap_or_default();
    format!(
        "{}\n\nRespond with a single JSON document and nothing else. \
         It must conform to this JSON Schema:\n{}",
        request.instructions, schema
    )
}

/// Stage payload, plus the rejection reason on a retry.
fn user_prompt(request: &ReasoningRequest) -> String {
    let payload = serde_json::to_string_pretty(&request.payload).unwrap_or_default();
    match &request.correction {
        Some(correction) => format!(
            "Input:\n{payload}\n\nYour previous answer was rejected: {correction}\n\
             Return a corrected JSON document."
        ),
        None => format!("Input:\n{payload}"),
    }
}

impl Reasoner for HttpReasoner {
    fn invoke(&self, request: &ReasoningRequest) -> Result<String, ReasonerError> {
        tracing::debug!(
            stage = request.stage.as_str(),
            attempt = request.attempt,
            model = %self.config.model,
            "calling chat completions"
        );
        let deadline = request.timeout;
        self.runtime.block_on(async {
            tokio::time::timeout(deadline, self.complete(request))
                .await
                .unwrap_or(Err(ReasonerError::Timeout))
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

// =============================================================================
// TESTS
// =============================================================================
