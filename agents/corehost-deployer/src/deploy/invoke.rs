//! Smoke-Test Invoker
//!
//! Sends a prompt to a ready runtime and decodes the reply, which arrives
//! either as an event stream of `data:` lines or as a batch of JSON events.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::InvocationError;
use crate::runtime::adapter::{AgentRuntime, RawResponse};

/// Content type of the event-stream framing
pub const EVENT_STREAM: &str = "text/event-stream";

/// How a response body is framed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFraming {
    EventStream,
    Batch,
}

impl ResponseFraming {
    /// Pick the framing from the content type, sniffing the body when the
    /// content type is absent.
    pub fn detect(response: &RawResponse) -> Self {
        match &response.content_type {
            Some(ct) if ct.contains(EVENT_STREAM) => ResponseFraming::EventStream,
            Some(_) => ResponseFraming::Batch,
            None => {
                let first_line = response
                    .events
                    .iter()
                    .flat_map(|event| event.split(|b| *b == b'\n'))
                    .map(|line| String::from_utf8_lossy(line).trim().to_string())
                    .find(|line| !line.is_empty());
                match first_line {
                    Some(line) if line.starts_with("data:") => ResponseFraming::EventStream,
                    _ => ResponseFraming::Batch,
                }
            }
        }
    }
}

/// Incremental decoder for the event-stream framing.
///
/// Chunks may split lines anywhere; complete lines are processed as they
/// arrive and the tail is held until the next chunk or `finish`.
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buffer: Vec<u8>,
    lines: Vec<String>,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), InvocationError> {
        self.buffer.extend_from_slice(chunk);
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.push_line(&line[..line.len() - 1])?;
        }
        Ok(())
    }

    /// Flush the trailing line and join the collected data lines
    pub fn finish(mut self) -> Result<String, InvocationError> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            self.push_line(&rest)?;
        }
        if self.lines.is_empty() {
            return Err(InvocationError::Decode(
                "event stream contained no data lines".to_string(),
            ));
        }
        Ok(self.lines.join("\n"))
    }

    fn push_line(&mut self, raw: &[u8]) -> Result<(), InvocationError> {
        let line = std::str::from_utf8(raw)
            .map_err(|e| InvocationError::Decode(format!("event stream is not UTF-8: {}", e)))?;
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(data) = line.strip_prefix("data:") {
            let data = data.strip_prefix(' ').unwrap_or(data);
            self.lines.push(data.to_string());
        }
        Ok(())
    }
}

/// Decode a raw response under its framing
pub fn decode_response(response: &RawResponse) -> Result<String, InvocationError> {
    match ResponseFraming::detect(response) {
        ResponseFraming::EventStream => {
            let mut decoder = EventStreamDecoder::new();
            for chunk in &response.events {
                decoder.feed(chunk)?;
            }
            decoder.finish()
        }
        ResponseFraming::Batch => {
            let first = response
                .events
                .first()
                .ok_or_else(|| InvocationError::Decode("response contained no events".to_string()))?;
            let value: serde_json::Value = serde_json::from_slice(first)
                .map_err(|e| InvocationError::Decode(format!("first event is not JSON: {}", e)))?;
            Ok(match value {
                serde_json::Value::String(text) => text,
                other => other.to_string(),
            })
        }
    }
}

/// Sends one prompt to a running agent
pub struct SmokeTestInvoker {
    runtime: Arc<dyn AgentRuntime>,
    qualifier: String,
}

impl SmokeTestInvoker {
    pub fn new(runtime: Arc<dyn AgentRuntime>, qualifier: &str) -> Self {
        Self {
            runtime,
            qualifier: qualifier.to_string(),
        }
    }

    pub async fn invoke(&self, runtime_ref: &str, prompt: &str) -> Result<String, InvocationError> {
        info!(runtime_ref = %runtime_ref, prompt = %prompt, "Invoking agent");
        let payload = serde_json::json!({ "prompt": prompt });
        let response = self
            .runtime
            .invoke(runtime_ref, &self.qualifier, &payload)
            .await?;

        debug!(
            content_type = response.content_type.as_deref().unwrap_or("none"),
            events = response.events.len(),
            "Invocation response received"
        );
        decode_response(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(chunks: &[&str]) -> RawResponse {
        RawResponse {
            content_type: Some("text/event-stream; charset=utf-8".into()),
            events: chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
        }
    }

    fn batch(events: &[&str]) -> RawResponse {
        RawResponse {
            content_type: Some("application/json".into()),
            events: events.iter().map(|e| e.as_bytes().to_vec()).collect(),
        }
    }

    #[test]
    fn test_stream_lines_joined_in_order() {
        let response = stream(&["data: \"hello\"\n", "data: \"world\"\n"]);
        assert_eq!(decode_response(&response).unwrap(), "\"hello\"\n\"world\"");

        let response = stream(&["data: hello\ndata: world\n"]);
        assert_eq!(decode_response(&response).unwrap(), "hello\nworld");
    }

    #[test]
    fn test_stream_lines_split_across_chunks() {
        let response = stream(&["da", "ta: hel", "lo\r\n\ndata:", " world"]);
        assert_eq!(decode_response(&response).unwrap(), "hello\nworld");
    }

    #[test]
    fn test_stream_ignores_other_fields() {
        let response = stream(&["event: message\n: keep-alive\ndata: only\n\n"]);
        assert_eq!(decode_response(&response).unwrap(), "only");
    }

    #[test]
    fn test_empty_stream_is_decode_error() {
        let response = stream(&["event: ping\n\n"]);
        assert!(matches!(decode_response(&response), Err(InvocationError::Decode(_))));
    }

    #[test]
    fn test_batch_object_returned_unmodified() {
        let response = batch(&[r#"{"text":"sunny"}"#]);
        assert_eq!(decode_response(&response).unwrap(), r#"{"text":"sunny"}"#);
    }

    #[test]
    fn test_batch_uses_first_event_only() {
        let response = batch(&[r#""42""#, r#""ignored""#]);
        assert_eq!(decode_response(&response).unwrap(), "42");
    }

    #[test]
    fn test_batch_errors() {
        assert!(decode_response(&batch(&[])).is_err());
        assert!(decode_response(&batch(&["not json"])).is_err());
    }

    #[test]
    fn test_framing_sniffed_without_content_type() {
        let streamed = RawResponse {
            content_type: None,
            events: vec![b"\ndata: hi\n".to_vec()],
        };
        assert_eq!(ResponseFraming::detect(&streamed), ResponseFraming::EventStream);

        let batched = RawResponse {
            content_type: None,
            events: vec![br#"{"a":1}"#.to_vec()],
        };
        assert_eq!(ResponseFraming::detect(&batched), ResponseFraming::Batch);
    }

    #[tokio::test]
    async fn test_invoke_sends_prompt_payload() {
        use crate::runtime::adapter::{IdentityService, LaunchRequest, PolicyDocument, WorkloadService};
        use crate::runtime::memory::InMemoryControlPlane;

        let plane = Arc::new(InMemoryControlPlane::new("us-east-1"));
        let role = plane
            .create_identity("r", "", &PolicyDocument::trust("svc"))
            .await
            .unwrap();
        let launched = plane
            .launch(LaunchRequest {
                agent_name: "demo".into(),
                region: "us-east-1".into(),
                execution_role_arn: role.arn,
                entrypoint: "agent.py".into(),
                package: String::new(),
                package_digest: String::new(),
                image_tag: String::new(),
                auto_create_repository: true,
            })
            .await
            .unwrap();

        let invoker = SmokeTestInvoker::new(plane.clone(), "DEFAULT");
        let text = invoker.invoke(&launched.runtime_ref, "2+2").await.unwrap();
        assert_eq!(text, "echo: 2+2");
        assert_eq!(plane.invocations()[0].1, serde_json::json!({ "prompt": "2+2" }));

        let err = invoker.invoke("arn:missing", "2+2").await.unwrap_err();
        assert!(matches!(err, InvocationError::Service(_)));
    }
}
