use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{Provider, ProviderError, ProviderEvent, ProviderStream, Usage};
use super::configs::AnthropicProviderConfig;
use super::sse;
use super::utils::{error_from_response, messages_to_anthropic_format, tools_to_anthropic_format};
use crate::models::message::Message;
use crate::models::tool::{Tool, ToolCall};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: i32 = 4096;

pub struct AnthropicProvider {
    client: Client,
    config: AnthropicProviderConfig,
}

struct PendingToolUse {
    id: String,
    name: String,
    input_json: String,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client, config })
    }

    async fn post(&self, payload: Value) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/v1/messages", self.config.host.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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
impl Provider for AnthropicProvider {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn stream(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<ProviderStream, ProviderError> {
        let mut payload = json!({
            "model": self.config.model,
            "system": system,
            "messages": messages_to_anthropic_format(messages),
            "max_tokens": self.config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "stream": true,
        });
        if !tools.is_empty() {
            payload["tools"] = json!(tools_to_anthropic_format(tools));
        }
        if let Some(temp) = self.config.temperature {
            payload["temperature"] = json!(temp);
        }

        let response = self.post(payload).await?;
        let events = sse::decode(response.bytes_stream());

        Ok(Box::pin(async_stream::try_stream! {
            let mut events = Box::pin(events);
            let mut pending: Option<PendingToolUse> = None;
            let mut usage = Usage::default();

            while let Some(event) = events.next().await {
                let event = event?;
                let data: Value = serde_json::from_str(&event.data)
                    .map_err(|e| ProviderError::Decode(e.to_string()))?;

                match data["type"].as_str().unwrap_or_default() {
                    "message_start" => {
                        usage.input_tokens = data["message"]["usage"]["input_tokens"]
                            .as_i64()
                            .map(|v| v as i32);
                    }
                    "content_block_start" => {
                        let block = &data["content_block"];
                        if block["type"] == "tool_use" {
                            pending = Some(PendingToolUse {
                                id: block["id"].as_str().unwrap_or_default().to_string(),
                                name: block["name"].as_str().unwrap_or_default().to_string(),
                                input_json: String::new(),
                            });
                        }
                    }
                    "content_block_delta" => {
                        let delta = &data["delta"];
                        match delta["type"].as_str() {
                            Some("text_delta") => {
                                if let Some(text) = delta["text"].as_str() {
                                    if !text.is_empty() {
                                        yield ProviderEvent::TextDelta(text.to_string());
                                    }
                                }
                            }
                            Some("input_json_delta") => {
                                if let (Some(tool), Some(chunk)) =
                                    (pending.as_mut(), delta["partial_json"].as_str())
                                {
                                    tool.input_json.push_str(chunk);
                                }
                            }
                            _ => {}
                        }
                    }
                    "content_block_stop" => {
                        if let Some(tool) = pending.take() {
                            yield ProviderEvent::ToolCall(ToolCall::new(
                                tool.id,
                                tool.name,
                                tool.input_json,
                            ));
                        }
                    }
                    "message_delta" => {
                        if let Some(output) = data["usage"]["output_tokens"].as_i64() {
                            usage.output_tokens = Some(output as i32);
                        }
                    }
                    "message_stop" => break,
                    "error" => {
                        let message = data["error"]["message"]
                            .as_str()
                            .unwrap_or("provider reported an error")
                            .to_string();
                        Err::<(), _>(ProviderError::Stream(message))?;
                    }
                    _ => {}
                }
            }

            if let (Some(input), Some(output)) = (usage.input_tokens, usage.output_tokens) {
                usage.total_tokens = Some(input + output);
            }
            yield ProviderEvent::Usage(usage);
        }))
    }
}
