use lazy_static::lazy_static;
use regex::Regex;
use reqwest::StatusCode;
use serde_json::{json, Value};

use super::base::ProviderError;
use crate::models::message::Message;
use crate::models::role::Role;
use crate::models::tool::Tool;

lazy_static! {
    static ref INVALID_NAME_CHARS: Regex = Regex::new(r"[^a-zA-Z0-9_-]").unwrap();
}

/// Convert internal messages to the OpenAI chat completions message format.
/// Groq and OpenRouter accept the same shape.
pub fn messages_to_openai_format(system: &str, messages: &[Message]) -> Vec<Value> {
    let mut wire = vec![json!({"role": "system", "content": system})];

    for message in messages {
        let mut converted = json!({
            "role": message.role.as_str(),
            "content": message.content,
        });

        match message.role {
            Role::Assistant if message.has_tool_calls() => {
                if message.content.is_empty() {
                    converted["content"] = Value::Null;
                }
                converted["tool_calls"] = message
                    .tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": sanitize_function_name(&call.name),
                                "arguments": call.arguments,
                            }
                        })
                    })
                    .collect();
            }
            Role::Tool => {
                converted["tool_call_id"] = json!(message.tool_call_id);
            }
            _ => {}
        }

        wire.push(converted);
    }

    wire
}

/// Convert internal Tool format to OpenAI's API tool format
pub fn tools_to_openai_format(tools: &[Tool]) -> Result<Vec<Value>, ProviderError> {
    let mut tool_names = std::collections::HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(ProviderError::Request {
                status: 0,
                message: format!("Duplicate tool name: {}", tool.name),
            });
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.parameters,
            }
        }));
    }

    Ok(result)
}

/// Convert internal messages to the Anthropic messages format.
///
/// The system prompt travels separately. Consecutive tool results are merged into
/// a single user turn because the API requires alternating roles.
pub fn messages_to_anthropic_format(messages: &[Message]) -> Vec<Value> {
    let mut wire: Vec<Value> = Vec::new();

    for message in messages {
        match message.role {
            Role::System => continue,
            Role::User => wire.push(json!({"role": "user", "content": message.content})),
            Role::Assistant => {
                let mut blocks = Vec::new();
                if !message.content.is_empty() {
                    blocks.push(json!({"type": "text", "text": message.content}));
                }
                for call in &message.tool_calls {
                    let input = call
                        .parsed_arguments()
                        .ok()
                        .filter(Value::is_object)
                        .unwrap_or_else(|| json!({}));
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": input,
                    }));
                }
                wire.push(json!({"role": "assistant", "content": blocks}));
            }
            Role::Tool => {
                let block = json!({
                    "type": "tool_result",
                    "tool_use_id": message.tool_call_id,
                    "content": message.content,
                });
                let merged = wire.last_mut().and_then(|last| {
                    let is_result_turn = last["role"] == "user"
                        && last["content"]
                            .as_array()
                            .map(|blocks| blocks.iter().all(|b| b["type"] == "tool_result"))
                            .unwrap_or(false);
                    if is_result_turn {
                        last["content"].as_array_mut()
                    } else {
                        None
                    }
                });
                match merged {
                    Some(blocks) => blocks.push(block),
                    None => wire.push(json!({"role": "user", "content": [block]})),
                }
            }
        }
    }

    wire
}

pub fn tools_to_anthropic_format(tools: &[Tool]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "input_schema": tool.parameters,
            })
        })
        .collect()
}

pub fn sanitize_function_name(name: &str) -> String {
    INVALID_NAME_CHARS.replace_all(name, "_").to_string()
}

/// Pull a human readable message out of a provider error body.
///
/// Both OpenAI-style `{"error": {"message": ..}}` and Anthropic-style
/// `{"type": "error", "error": {"message": ..}}` bodies are recognised. The raw body
/// is never passed through.
pub fn extract_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    error
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| error.as_str())
        .map(str::to_string)
}

fn is_context_length_error(body: &str) -> bool {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return false;
    };
    let code = value["error"]["code"].as_str().unwrap_or_default();
    let message = value["error"]["message"].as_str().unwrap_or_default();
    code == "context_length_exceeded"
        || code == "string_above_max_length"
        || message.to_lowercase().contains("prompt is too long")
}

/// Map a non-success provider response to a stable error
pub fn error_from_response(status: StatusCode, body: &str) -> ProviderError {
    let message = extract_error_message(body)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Authentication(message),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(message),
        StatusCode::BAD_REQUEST if is_context_length_error(body) => {
            ProviderError::ContextLengthExceeded(message)
        }
        status if status.is_server_error() => ProviderError::Server {
            status: status.as_u16(),
            message,
        },
        status => ProviderError::Request {
            status: status.as_u16(),
            message,
        },
    }
}
