pub mod openai;
pub mod stub;

use crate::transcript::{ChatMessage, TokenUsage};
use async_trait::async_trait;
use bytes::Bytes;
use futures_core::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Request body for `POST /v1/chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub stream: bool,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    pub response_format: ResponseFormat,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: ResponseFormatKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormatKind {
    Text,
    JsonObject,
}

/// Non-streaming completion response.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionChoice {
    pub message: ChatMessage,
}

/// One entry of `GET /v1/models`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub owned_by: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub strengths: Option<String>,
    #[serde(default)]
    pub price: Option<ModelPrice>,
}

/// Per-token prices, as advertised by the backend.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ModelPrice {
    #[serde(default)]
    pub prompt: f64,
    #[serde(default)]
    pub completion: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelList {
    #[serde(default)]
    pub data: Vec<ModelInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeyResponse {
    pub api_key: String,
}

/// Failure classes the callers branch on. `Auth` is caught before any
/// streaming begins and becomes a synthetic transcript entry; `Transport`
/// aborts the turn; decode failures of whole (non-streamed) bodies are
/// `Decode`. Per-frame JSON errors never surface here, the reassembler
/// skips them.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid API key")]
    Auth,

    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type ChunkStream = BoxStream<'static, Result<Bytes, ApiError>>;

/// Chat transport seam. The streaming method hands back raw body chunks;
/// reassembly into frames happens in [`crate::stream`], not behind this
/// trait, so the session logic can be tested against a scripted backend.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start a streaming completion. Errors returned here happened before
    /// any frame was delivered (connect failure, non-2xx status).
    async fn stream_chat(
        &self,
        api_key: &str,
        req: ChatCompletionRequest,
    ) -> Result<ChunkStream, ApiError>;

    /// Single-shot completion (`stream: false`).
    async fn complete(
        &self,
        api_key: &str,
        req: ChatCompletionRequest,
    ) -> Result<ChatCompletion, ApiError>;
}
