use super::{
    ApiError, ApiKeyResponse, ChatBackend, ChatCompletion, ChatCompletionRequest, ChunkStream,
    ModelList,
};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use tokio_stream::StreamExt;

/// Client for an OpenAI-compatible completion API.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    chat_url: Url,
    models_url: Url,
    keys_url: Url,
}

impl OpenAiClient {
    pub fn new(http: reqwest::Client, api_base: &str) -> anyhow::Result<Self> {
        // A trailing slash matters to Url::join.
        let normalized = if api_base.ends_with('/') {
            api_base.to_string()
        } else {
            format!("{api_base}/")
        };
        let base = Url::parse(&normalized)?;
        Ok(Self {
            http,
            chat_url: base.join("v1/chat/completions")?,
            models_url: base.join("v1/models")?,
            keys_url: base.join("v1/api_keys")?,
        })
    }

    fn headers(&self, api_key: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if !api_key.is_empty() {
            if let Ok(v) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
                h.insert(AUTHORIZATION, v);
            }
        }
        h
    }

    /// `GET /v1/models`. Failures here are page-level, not transcript-level.
    pub async fn list_models(&self, api_key: &str) -> Result<ModelList, ApiError> {
        let resp = self
            .http
            .get(self.models_url.clone())
            .headers(self.headers(api_key))
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// `POST /v1/api_keys` — issue a fresh key.
    pub async fn create_api_key(&self) -> Result<ApiKeyResponse, ApiError> {
        let resp = self.http.post(self.keys_url.clone()).send().await?;
        let resp = check_status(resp).await?;
        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Map 401 to `Auth`, other non-2xx to `Status` with the body text.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Auth);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ApiError::Status { status, body });
    }
    Ok(resp)
}

#[async_trait]
impl ChatBackend for OpenAiClient {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn stream_chat(
        &self,
        api_key: &str,
        req: ChatCompletionRequest,
    ) -> Result<ChunkStream, ApiError> {
        debug_assert!(req.stream);
        let resp = self
            .http
            .post(self.chat_url.clone())
            .headers(self.headers(api_key))
            .json(&req)
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let chunks = resp.bytes_stream().map(|item| item.map_err(ApiError::from));
        Ok(Box::pin(chunks) as ChunkStream)
    }

    async fn complete(
        &self,
        api_key: &str,
        req: ChatCompletionRequest,
    ) -> Result<ChatCompletion, ApiError> {
        debug_assert!(!req.stream);
        let resp = self
            .http
            .post(self.chat_url.clone())
            .headers(self.headers(api_key))
            .json(&req)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_keep_the_v1_prefix() {
        let client =
            OpenAiClient::new(reqwest::Client::new(), "http://localhost:5000").unwrap();
        assert_eq!(
            client.chat_url.as_str(),
            "http://localhost:5000/v1/chat/completions"
        );
        assert_eq!(client.models_url.as_str(), "http://localhost:5000/v1/models");
        assert_eq!(client.keys_url.as_str(), "http://localhost:5000/v1/api_keys");
    }

    #[test]
    fn trailing_slash_is_normalized() {
        let a = OpenAiClient::new(reqwest::Client::new(), "http://host:1/").unwrap();
        let b = OpenAiClient::new(reqwest::Client::new(), "http://host:1").unwrap();
        assert_eq!(a.chat_url, b.chat_url);
    }

    #[test]
    fn bearer_header_is_set_only_with_a_key() {
        let client =
            OpenAiClient::new(reqwest::Client::new(), "http://localhost:5000").unwrap();
        assert!(client.headers("").get(AUTHORIZATION).is_none());
        let h = client.headers("sk-123");
        assert_eq!(h.get(AUTHORIZATION).unwrap(), "Bearer sk-123");
    }
}
