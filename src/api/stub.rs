use super::{
    ApiError, ChatBackend, ChatCompletion, ChatCompletionRequest, ChunkStream, CompletionChoice,
};
use crate::transcript::{ChatMessage, TokenUsage};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Offline backend that drips a scripted SSE body. Chunk boundaries are
/// chosen to fall mid-line and mid-frame, so anything consuming this stream
/// has to reassemble properly.
#[derive(Debug, Clone)]
pub struct StubBackend {
    reply: String,
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            reply: "This is a scripted reply from the stub backend.".to_string(),
        }
    }

    pub fn with_reply(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }

    fn usage_for(&self, req: &ChatCompletionRequest) -> TokenUsage {
        // Crude whitespace "tokens"; the stub makes no accuracy claims.
        let prompt: usize = req
            .messages
            .iter()
            .map(|m| m.content.split_whitespace().count())
            .sum();
        let completion = self.reply.split_whitespace().count();
        TokenUsage {
            prompt_tokens: prompt as u32,
            completion_tokens: completion as u32,
            total_tokens: (prompt + completion) as u32,
        }
    }

    /// Render the scripted conversation turn as a full SSE body.
    fn sse_body(&self, req: &ChatCompletionRequest) -> String {
        let mut body = String::new();
        for word in self.reply.split_inclusive(' ') {
            let frame = serde_json::json!({
                "choices": [{"delta": {"content": word}}]
            });
            body.push_str(&format!("data: {frame}\n"));
        }
        let last = serde_json::json!({
            "choices": [{"delta": {"content": ""}}],
            "usage": self.usage_for(req),
        });
        body.push_str(&format!("data: {last}\n"));
        body.push_str("data: [DONE]\n");
        body
    }
}

#[async_trait]
impl ChatBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn stream_chat(
        &self,
        _api_key: &str,
        req: ChatCompletionRequest,
    ) -> Result<ChunkStream, ApiError> {
        let body = self.sse_body(&req);
        let (tx, rx) = mpsc::channel::<Result<Bytes, ApiError>>(32);

        tokio::spawn(async move {
            // 7 bytes at a time lands splits inside "data:" prefixes and
            // inside JSON payloads.
            for chunk in body.into_bytes().chunks(7) {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                if tx.send(Ok(Bytes::copy_from_slice(chunk))).await.is_err() {
                    break;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)) as ChunkStream)
    }

    async fn complete(
        &self,
        _api_key: &str,
        req: ChatCompletionRequest,
    ) -> Result<ChatCompletion, ApiError> {
        Ok(ChatCompletion {
            choices: vec![CompletionChoice {
                message: ChatMessage::assistant(self.reply.clone()),
            }],
            usage: Some(self.usage_for(&req)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ResponseFormat, ResponseFormatKind};
    use crate::stream::{StreamTurn, TurnState};
    use tokio_stream::StreamExt;

    fn request(stream: bool) -> ChatCompletionRequest {
        ChatCompletionRequest {
            messages: vec![ChatMessage::user("two words")],
            model: "stub-model".into(),
            stream,
            temperature: 0.7,
            top_p: 1.0,
            max_tokens: 64,
            response_format: ResponseFormat {
                kind: ResponseFormatKind::Text,
            },
        }
    }

    #[tokio::test]
    async fn scripted_stream_reassembles_to_the_reply() {
        let stub = StubBackend::with_reply("hello stub world");
        let mut chunks = stub.stream_chat("key", request(true)).await.unwrap();

        let mut turn = StreamTurn::new();
        while let Some(item) = chunks.next().await {
            turn.feed(&item.unwrap());
        }

        assert_eq!(turn.response(), "hello stub world");
        assert_eq!(turn.state(), TurnState::Done);
        let usage = turn.usage().unwrap();
        assert_eq!(usage.prompt_tokens, 2);
        assert_eq!(usage.completion_tokens, 3);
        assert_eq!(usage.total_tokens, 5);
    }

    #[tokio::test]
    async fn complete_returns_one_assistant_choice() {
        let stub = StubBackend::with_reply("Paris");
        let c = stub.complete("key", request(false)).await.unwrap();
        assert_eq!(c.choices[0].message.content, "Paris");
        assert_eq!(c.usage.unwrap().completion_tokens, 1);
    }
}
