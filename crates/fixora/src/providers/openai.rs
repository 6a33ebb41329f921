use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use super::base::{Provider, ProviderError, ProviderEvent, ProviderStream, Usage};
use super::configs::OpenAiProviderConfig;
use super::sse;
use super::utils::{error_from_response, messages_to_openai_format, tools_to_openai_format};
use crate::models::message::Message;
use crate::models::tool::{Tool, ToolCall};

/// Streaming client for OpenAI-compatible chat completion endpoints.
/// Also used for Groq and OpenRouter, which only differ by host.
pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

/// Tool call fragments are spread over many chunks, keyed by `index`
#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client, config })
    }

    fn get_usage(usage: &Value) -> Usage {
        let input_tokens = usage
            .get("prompt_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32);

        let output_tokens = usage
            .get("completion_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32);

        let total_tokens = usage
            .get("total_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32)
            .or_else(|| match (input_tokens, output_tokens) {
                (Some(input), Some(output)) => Some(input + output),
                _ => None,
            });

        Usage::new(input_tokens, output_tokens, total_tokens)
    }

    fn build_payload(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<Value, ProviderError> {
        let mut payload = json!({
            "model": self.config.model,
            "messages": messages_to_openai_format(system, messages),
            "stream": true,
            "stream_options": {"include_usage": true},
        });

        if !tools.is_empty() {
            payload["tools"] = json!(tools_to_openai_format(tools)?);
        }
        if let Some(temp) = self.config.temperature {
            payload["temperature"] = json!(temp);
        }
        if let Some(tokens) = self.config.max_tokens {
            payload["max_tokens"] = json!(tokens);
        }
        Ok(payload)
    }

    async fn post(&self, payload: Value) -> Result<reqwest::Response, ProviderError> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(error_from_response(status, &body))
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn stream(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<ProviderStream, ProviderError> {
        let payload = self.build_payload(system, messages, tools)?;
        let response = self.post(payload).await?;
        let events = sse::decode(response.bytes_stream());

        Ok(Box::pin(async_stream::try_stream! {
            let mut events = Box::pin(events);
            let mut calls: BTreeMap<u64, PartialToolCall> = BTreeMap::new();

            while let Some(event) = events.next().await {
                let event = event?;
                if event.data == "[DONE]" {
                    break;
                }

                let chunk: Value = serde_json::from_str(&event.data)
                    .map_err(|e| ProviderError::Decode(e.to_string()))?;

                if let Some(error) = chunk.get("error") {
                    let message = error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("provider reported an error");
                    Err::<(), _>(ProviderError::Stream(message.to_string()))?;
                }

                if let Some(usage) = chunk.get("usage").filter(|u| u.is_object()) {
                    yield ProviderEvent::Usage(Self::get_usage(usage));
                }

                let choices = chunk["choices"].as_array().cloned().unwrap_or_default();
                for choice in choices {
                    let delta = &choice["delta"];
                    if let Some(text) = delta["content"].as_str() {
                        if !text.is_empty() {
                            yield ProviderEvent::TextDelta(text.to_string());
                        }
                    }

                    for fragment in delta["tool_calls"].as_array().into_iter().flatten() {
                        let index = fragment["index"].as_u64().unwrap_or(0);
                        let call = calls.entry(index).or_default();
                        if let Some(id) = fragment["id"].as_str() {
                            call.id = Some(id.to_string());
                        }
                        if let Some(name) = fragment["function"]["name"].as_str() {
                            call.name.push_str(name);
                        }
                        if let Some(arguments) = fragment["function"]["arguments"].as_str() {
                            call.arguments.push_str(arguments);
                        }
                    }
                }
            }

            for (index, call) in std::mem::take(&mut calls) {
                let id = call.id.unwrap_or_else(|| format!("call_{}", index));
                yield ProviderEvent::ToolCall(ToolCall::new(id, call.name, call.arguments));
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use futures::TryStreamExt;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse_body(chunks: &[Value]) -> String {
        let mut body = String::new();
        for chunk in chunks {
            body.push_str(&format!("data: {}\n\n", chunk));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    async fn setup_mock_server(status: u16, body: String) -> (MockServer, OpenAiProvider) {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer test_api_key"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(
                ResponseTemplate::new(status)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&mock_server)
            .await;

        let config = OpenAiProviderConfig {
            host: mock_server.uri(),
            api_key: "test_api_key".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: Some(0.7),
            max_tokens: None,
        };

        let provider = OpenAiProvider::new(config).unwrap();
        (mock_server, provider)
    }

    #[tokio::test]
    async fn test_stream_text() -> Result<()> {
        let body = sse_body(&[
            json!({"choices": [{"index": 0, "delta": {"role": "assistant", "content": ""}}]}),
            json!({"choices": [{"index": 0, "delta": {"content": "2+2 "}}]}),
            json!({"choices": [{"index": 0, "delta": {"content": "is 4."}, "finish_reason": "stop"}]}),
            json!({"choices": [], "usage": {"prompt_tokens": 12, "completion_tokens": 4, "total_tokens": 16}}),
        ]);
        let (_server, provider) = setup_mock_server(200, body).await;

        let events: Vec<ProviderEvent> = provider
            .stream("You are a helpful assistant.", &[Message::user("2+2?")], &[])
            .await?
            .try_collect()
            .await?;

        assert_eq!(
            events,
            vec![
                ProviderEvent::TextDelta("2+2 ".to_string()),
                ProviderEvent::TextDelta("is 4.".to_string()),
                ProviderEvent::Usage(Usage::new(Some(12), Some(4), Some(16))),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_stream_tool_call_fragments() -> Result<()> {
        let body = sse_body(&[
            json!({"choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "id": "call_123", "type": "function", "function": {"name": "fetchGitHubUser", "arguments": ""}}
            ]}}]}),
            json!({"choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "{\"username\":"}}
            ]}}]}),
            json!({"choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "\"octocat\"}"}}
            ]}, "finish_reason": "tool_calls"}]}),
        ]);
        let (_server, provider) = setup_mock_server(200, body).await;

        let tool = Tool::new(
            "fetchGitHubUser",
            "Fetch a GitHub user",
            json!({"type": "object", "properties": {"username": {"type": "string"}}}),
        );
        let events: Vec<ProviderEvent> = provider
            .stream("sys", &[Message::user("who is octocat?")], &[tool])
            .await?
            .try_collect()
            .await?;

        assert_eq!(
            events,
            vec![ProviderEvent::ToolCall(ToolCall::new(
                "call_123",
                "fetchGitHubUser",
                r#"{"username":"octocat"}"#
            ))]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_error_status_is_mapped() {
        let body = json!({"error": {"message": "Incorrect API key provided: sk-***", "type": "invalid_request_error"}})
            .to_string();
        let (_server, provider) = setup_mock_server(401, body).await;

        let result = provider.stream("sys", &[Message::user("hi")], &[]).await;
        match result {
            Err(ProviderError::Authentication(message)) => {
                assert_eq!(message, "Incorrect API key provided: sk-***")
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[tokio::test]
    async fn test_error_chunk_mid_stream() -> Result<()> {
        let body = sse_body(&[
            json!({"choices": [{"index": 0, "delta": {"content": "partial"}}]}),
            json!({"error": {"message": "upstream overloaded"}}),
        ]);
        let (_server, provider) = setup_mock_server(200, body).await;

        let mut stream = provider.stream("sys", &[Message::user("hi")], &[]).await?;
        assert_eq!(
            stream.try_next().await?,
            Some(ProviderEvent::TextDelta("partial".to_string()))
        );
        let err = stream.try_next().await.unwrap_err();
        assert_eq!(err, ProviderError::Stream("upstream overloaded".to_string()));
        Ok(())
    }
}
