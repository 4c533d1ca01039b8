use crate::api::{
    ApiError, ChatBackend, ChatCompletionRequest, ResponseFormat, ResponseFormatKind,
};
use crate::stream::{StreamEvent, StreamTurn};
use crate::transcript::{ChatMessage, TokenUsage, Transcript};
use tokio_stream::StreamExt;

/// Sampling and shaping knobs for one request. Defaults mirror the
/// playground form's initial values.
#[derive(Debug, Clone)]
pub struct Params {
    pub model: String,
    pub stream: bool,
    pub json_mode: bool,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            model: String::new(),
            stream: true,
            json_mode: false,
            temperature: 0.7,
            top_p: 1.0,
            max_tokens: 2048,
        }
    }
}

/// One conversation with its settings. `submit` takes `&mut self`, so two
/// streaming turns can never run against the same transcript.
#[derive(Debug, Default)]
pub struct Session {
    pub transcript: Transcript,
    pub system_prompt: String,
    pub usage: TokenUsage,
    pub params: Params,
}

impl Session {
    pub fn new(params: Params) -> Self {
        Self {
            params,
            ..Default::default()
        }
    }

    fn request(&self, stream: bool) -> ChatCompletionRequest {
        let mut messages = vec![ChatMessage::system(self.system_prompt.clone())];
        messages.extend(self.transcript.messages().iter().cloned());
        ChatCompletionRequest {
            messages,
            model: self.params.model.clone(),
            stream,
            temperature: self.params.temperature,
            top_p: self.params.top_p,
            max_tokens: self.params.max_tokens,
            response_format: ResponseFormat {
                kind: if self.params.json_mode {
                    ResponseFormatKind::JsonObject
                } else {
                    ResponseFormatKind::Text
                },
            },
        }
    }

    /// Send the transcript to the backend and fold the reply back in.
    ///
    /// Never returns an error: every failure becomes a transcript entry
    /// (missing key, 401, transport failure), so the caller has nothing to
    /// handle. `on_delta` fires once per streamed frame with that frame's
    /// contribution.
    pub async fn submit(
        &mut self,
        backend: &dyn ChatBackend,
        api_key: &str,
        mut on_delta: impl FnMut(&str),
    ) {
        if api_key.is_empty() {
            self.transcript.push(ChatMessage::assistant(
                "Please enter an API key to send messages.",
            ));
            return;
        }

        // JSON mode and streaming are mutually exclusive in the form; JSON
        // mode wins if both are somehow set.
        let streaming = self.params.stream && !self.params.json_mode;

        if streaming {
            self.submit_streaming(backend, api_key, &mut on_delta).await;
        } else {
            self.submit_oneshot(backend, api_key).await;
        }
    }

    async fn submit_streaming(
        &mut self,
        backend: &dyn ChatBackend,
        api_key: &str,
        on_delta: &mut impl FnMut(&str),
    ) {
        let mut chunks = match backend.stream_chat(api_key, self.request(true)).await {
            Ok(s) => s,
            Err(e) => {
                self.push_error(e);
                return;
            }
        };

        let mut turn = StreamTurn::new();
        while let Some(item) = chunks.next().await {
            let bytes = match item {
                Ok(b) => b,
                Err(e) => {
                    turn.fail();
                    self.push_error(e);
                    return;
                }
            };

            for event in turn.feed(&bytes) {
                match event {
                    StreamEvent::Delta { delta, text } => {
                        self.transcript.upsert_assistant_text(text);
                        on_delta(&delta);
                    }
                    StreamEvent::Usage(usage) => self.usage = usage,
                    StreamEvent::Done => {}
                }
            }
        }

        // Transport finished; an unterminated tail is dropped here.
        let (text, _) = turn.finish();
        tracing::debug!(chars = text.len(), "streaming turn complete");
    }

    async fn submit_oneshot(&mut self, backend: &dyn ChatBackend, api_key: &str) {
        match backend.complete(api_key, self.request(false)).await {
            Ok(completion) => {
                match completion.choices.into_iter().next() {
                    Some(choice) => self.transcript.push(ChatMessage::assistant(choice.message.content)),
                    None => self.push_error(ApiError::Status {
                        status: reqwest::StatusCode::OK,
                        body: "response carried no choices".into(),
                    }),
                }
                if let Some(usage) = completion.usage {
                    self.usage = usage;
                }
            }
            Err(e) => self.push_error(e),
        }
    }

    fn push_error(&mut self, e: ApiError) {
        tracing::debug!(error = %e, "chat turn failed");
        self.transcript
            .push(ChatMessage::assistant(format!("An error occurred: {e}")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::stub::StubBackend;
    use crate::api::{ChatCompletion, ChunkStream};
    use crate::transcript::Role;
    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio_stream::wrappers::ReceiverStream;

    fn session() -> Session {
        let mut s = Session::new(Params {
            model: "stub-model".into(),
            ..Default::default()
        });
        s.transcript.push(ChatMessage::user("say something"));
        s
    }

    #[tokio::test]
    async fn empty_key_short_circuits_with_a_synthetic_message() {
        let mut s = session();
        s.submit(&StubBackend::new(), "", |_| {}).await;

        assert_eq!(s.transcript.len(), 2);
        let last = s.transcript.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert!(last.content.contains("API key"));
        assert_eq!(s.usage, TokenUsage::default());
    }

    #[tokio::test]
    async fn streaming_turn_produces_one_assistant_message() {
        let stub = StubBackend::with_reply("streamed reply");
        let mut s = session();
        let mut deltas = Vec::new();
        s.submit(&stub, "sk-test", |d| deltas.push(d.to_string()))
            .await;

        assert_eq!(s.transcript.len(), 2);
        assert_eq!(s.transcript.last().unwrap().content, "streamed reply");
        assert_eq!(deltas.concat(), "streamed reply");
        assert_eq!(s.usage.completion_tokens, 2);
    }

    #[tokio::test]
    async fn non_streaming_turn_appends_reply_and_usage() {
        let stub = StubBackend::with_reply("Paris");
        let mut s = session();
        s.params.stream = false;
        s.submit(&stub, "sk-test", |_| {}).await;

        assert_eq!(s.transcript.len(), 2);
        assert_eq!(s.transcript.last().unwrap().content, "Paris");
        assert_eq!(s.usage.completion_tokens, 1);
    }

    #[tokio::test]
    async fn json_mode_disables_streaming() {
        let stub = StubBackend::with_reply("{\"ok\":true}");
        let mut s = session();
        s.params.json_mode = true;
        let mut saw_delta = false;
        s.submit(&stub, "sk-test", |_| saw_delta = true).await;

        assert!(!saw_delta);
        assert_eq!(s.transcript.last().unwrap().content, "{\"ok\":true}");
    }

    struct AuthRejectingBackend;

    #[async_trait]
    impl ChatBackend for AuthRejectingBackend {
        fn name(&self) -> &'static str {
            "reject"
        }

        async fn stream_chat(
            &self,
            _api_key: &str,
            _req: ChatCompletionRequest,
        ) -> Result<ChunkStream, ApiError> {
            Err(ApiError::Auth)
        }

        async fn complete(
            &self,
            _api_key: &str,
            _req: ChatCompletionRequest,
        ) -> Result<ChatCompletion, ApiError> {
            Err(ApiError::Auth)
        }
    }

    #[tokio::test]
    async fn rejected_key_becomes_a_transcript_entry() {
        let mut s = session();
        s.submit(&AuthRejectingBackend, "sk-bad", |_| {}).await;

        assert_eq!(s.transcript.len(), 2);
        let last = s.transcript.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert!(last.content.contains("invalid API key"), "{}", last.content);
    }

    /// Yields one valid frame, then fails the transport.
    struct MidStreamFailure;

    #[async_trait]
    impl ChatBackend for MidStreamFailure {
        fn name(&self) -> &'static str {
            "midfail"
        }

        async fn stream_chat(
            &self,
            _api_key: &str,
            _req: ChatCompletionRequest,
        ) -> Result<ChunkStream, ApiError> {
            let (tx, rx) = tokio::sync::mpsc::channel(4);
            tokio::spawn(async move {
                let frame = b"data: {\"choices\":[{\"delta\":{\"content\":\"part\"}}]}\n";
                let _ = tx.send(Ok(Bytes::from_static(frame))).await;
                let _ = tx
                    .send(Err(ApiError::Status {
                        status: reqwest::StatusCode::BAD_GATEWAY,
                        body: "upstream reset".into(),
                    }))
                    .await;
            });
            Ok(Box::pin(ReceiverStream::new(rx)) as ChunkStream)
        }

        async fn complete(
            &self,
            _api_key: &str,
            _req: ChatCompletionRequest,
        ) -> Result<ChatCompletion, ApiError> {
            unreachable!("streaming only")
        }
    }

    #[tokio::test]
    async fn mid_stream_transport_error_appends_terminal_message() {
        let mut s = session();
        s.submit(&MidStreamFailure, "sk-test", |_| {}).await;

        // Partial reply stays, and the error is a separate trailing entry.
        assert_eq!(s.transcript.len(), 3);
        assert_eq!(s.transcript.messages()[1].content, "part");
        assert!(s
            .transcript
            .last()
            .unwrap()
            .content
            .starts_with("An error occurred:"));
    }

    #[tokio::test]
    async fn request_includes_system_prompt_first() {
        let s = {
            let mut s = session();
            s.system_prompt = "be brief".into();
            s
        };
        let req = s.request(true);
        assert_eq!(req.messages[0].role, Role::System);
        assert_eq!(req.messages[0].content, "be brief");
        assert_eq!(req.messages[1].content, "say something");
    }
}
