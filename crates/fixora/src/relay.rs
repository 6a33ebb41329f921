//! The chat relay: streams a model's answer and runs the tools it asks for.
//!
//! One run alternates provider turns and tool rounds until the model answers
//! without requesting tools. Every run ends with exactly one terminal event,
//! unless it is cancelled, in which case it simply stops.
use futures::stream::{BoxStream, FuturesUnordered, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::errors::{RelayError, ToolError, ToolResult};
use crate::models::event::StreamEvent;
use crate::models::message::{Conversation, Message};
use crate::models::tool::ToolCall;
use crate::providers::base::{Provider, ProviderError, ProviderEvent, Usage};
use crate::tools::{ToolDefinition, ToolSet};

pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 6;
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct RelayConfig {
    pub max_tool_rounds: usize,
    pub tool_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

/// The collected outcome of a run, for clients that do not stream
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
}

pub struct Relay {
    provider: Arc<dyn Provider>,
    tools: ToolSet,
    config: RelayConfig,
}

impl Relay {
    pub fn new(provider: Arc<dyn Provider>, tools: ToolSet, config: RelayConfig) -> Self {
        Self {
            provider,
            tools,
            config,
        }
    }

    /// Stream the run as protocol events. Failures arrive as a final
    /// [`StreamEvent::Error`].
    pub fn run(
        self,
        conversation: Conversation,
        cancel: CancellationToken,
    ) -> BoxStream<'static, StreamEvent> {
        self.events(conversation, cancel)
            .map(|event| match event {
                Ok(event) => event,
                Err(err) => StreamEvent::Error {
                    kind: err.kind(),
                    message: err.to_string(),
                },
            })
            .boxed()
    }

    /// Drive the run to completion and collect the final answer.
    ///
    /// Returns `Ok(None)` if the run was cancelled before it finished.
    pub async fn complete(
        self,
        conversation: Conversation,
        cancel: CancellationToken,
    ) -> Result<Option<Reply>, RelayError> {
        let mut events = self.events(conversation, cancel);
        let mut tool_calls = Vec::new();
        while let Some(event) = events.next().await {
            match event? {
                StreamEvent::ToolCall {
                    call_id, name, args, ..
                } => {
                    let arguments = match args {
                        Value::String(raw) => raw,
                        other => other.to_string(),
                    };
                    tool_calls.push(ToolCall::new(call_id, name, arguments));
                }
                StreamEvent::Done { message, usage, .. } => {
                    return Ok(Some(Reply {
                        text: message.content,
                        tool_calls,
                        usage,
                    }));
                }
                _ => {}
            }
        }
        Ok(None)
    }

    fn events(
        self,
        mut conversation: Conversation,
        cancel: CancellationToken,
    ) -> BoxStream<'static, Result<StreamEvent, RelayError>> {
        Box::pin(async_stream::stream! {
            let started = Instant::now();
            let schemas = self.tools.tools();
            let mut usage = Usage::default();
            let mut emitted = false;
            let mut rounds = 0;
            // everything streamed to the client, across model calls
            let mut transcript = String::new();

            tracing::info!(
                model = self.provider.model(),
                tools = schemas.len(),
                messages = conversation.len(),
                "starting relay run"
            );

            loop {
                let request = self.provider.stream(
                    conversation.system_prompt(),
                    conversation.turns(),
                    &schemas,
                );
                let connected = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::debug!("run cancelled while connecting");
                        return;
                    }
                    result = request => result,
                };
                let mut deltas = match connected {
                    Ok(deltas) => deltas,
                    Err(err) => {
                        yield Err(provider_failure(emitted, err));
                        return;
                    }
                };

                let mut text = String::new();
                let mut calls: Vec<ToolCall> = Vec::new();
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            tracing::debug!("run cancelled while streaming");
                            return;
                        }
                        next = deltas.next() => next,
                    };
                    match next {
                        None => break,
                        Some(Ok(ProviderEvent::TextDelta(delta))) => {
                            if delta.is_empty() {
                                continue;
                            }
                            emitted = true;
                            text.push_str(&delta);
                            transcript.push_str(&delta);
                            yield Ok(StreamEvent::text_delta(delta));
                        }
                        Some(Ok(ProviderEvent::ToolCall(call))) => {
                            emitted = true;
                            let args = call
                                .parsed_arguments()
                                .unwrap_or_else(|_| Value::String(call.arguments.clone()));
                            yield Ok(StreamEvent::ToolCall {
                                call_id: call.id.clone(),
                                name: call.name.clone(),
                                args,
                            });
                            calls.push(call);
                        }
                        Some(Ok(ProviderEvent::Usage(turn_usage))) => usage.add(&turn_usage),
                        Some(Err(err)) => {
                            yield Err(provider_failure(emitted, err));
                            return;
                        }
                    }
                }

                if calls.is_empty() {
                    conversation.push(Message::assistant(text));
                    let message = Message::assistant(transcript);
                    let latency_ms = started.elapsed().as_millis() as u64;
                    tracing::info!(rounds, latency_ms, "relay run finished");
                    yield Ok(StreamEvent::Done {
                        message,
                        usage,
                        latency_ms,
                        rounds,
                    });
                    return;
                }

                if rounds >= self.config.max_tool_rounds {
                    tracing::warn!(rounds, "model keeps requesting tools, giving up");
                    let err = RelayError::ToolLoopExceeded(self.config.max_tool_rounds);
                    // close out the calls already streamed for this round
                    for call in &calls {
                        yield Ok(StreamEvent::ToolResult {
                            call_id: call.id.clone(),
                            result: json!({ "error": err.to_string() }),
                        });
                    }
                    yield Err(err);
                    return;
                }
                rounds += 1;
                tracing::debug!(round = rounds, calls = calls.len(), "running tools");

                let mut pending: FuturesUnordered<_> = calls
                    .iter()
                    .map(|call| {
                        dispatch(
                            self.tools.get(&call.name).cloned(),
                            call.clone(),
                            self.config.tool_timeout,
                        )
                    })
                    .collect();

                let mut results: HashMap<String, Value> = HashMap::new();
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            tracing::debug!("run cancelled while tools were running");
                            return;
                        }
                        next = pending.next() => next,
                    };
                    let Some((call_id, result)) = next else {
                        break;
                    };
                    yield Ok(StreamEvent::ToolResult {
                        call_id: call_id.clone(),
                        result: result.clone(),
                    });
                    results.insert(call_id, result);
                }

                let assistant = calls
                    .iter()
                    .cloned()
                    .fold(Message::assistant(text), Message::with_tool_call);
                conversation.push(assistant);
                for call in &calls {
                    let result = results.remove(&call.id).unwrap_or(Value::Null);
                    conversation.push(Message::tool(call.id.clone(), result.to_string()));
                }
            }
        })
    }
}

fn provider_failure(emitted: bool, err: ProviderError) -> RelayError {
    tracing::error!("provider failed: {}", err);
    if emitted {
        RelayError::StreamInterrupted(err.to_string())
    } else {
        RelayError::ModelUnavailable(err.to_string())
    }
}

/// Run one call, folding every failure into an `{error}` payload
async fn dispatch(
    definition: Option<ToolDefinition>,
    call: ToolCall,
    timeout: Duration,
) -> (String, Value) {
    let result = execute(definition, &call, timeout).await;
    let payload = match result {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(tool = %call.name, kind = ?err.kind(), "tool call failed: {}", err);
            json!({ "error": err.to_string() })
        }
    };
    (call.id, payload)
}

async fn execute(
    definition: Option<ToolDefinition>,
    call: &ToolCall,
    timeout: Duration,
) -> ToolResult<Value> {
    let definition = definition.ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;
    let arguments = call
        .parsed_arguments()
        .map_err(|e| ToolError::InvalidArguments {
            name: call.name.clone(),
            message: e.to_string(),
        })?;

    tokio::time::timeout(timeout, definition.call(arguments))
        .await
        .map_err(|_| ToolError::Timeout {
            name: call.name.clone(),
            secs: timeout.as_secs(),
        })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::models::role::Role;
    use crate::models::tool::Tool;
    use crate::providers::mock::{MockProvider, Turn};

    fn conversation(prompt: &str) -> Conversation {
        Conversation::from_messages("You are helpful.", vec![Message::user(prompt)]).unwrap()
    }

    fn echo_tool() -> ToolDefinition {
        ToolDefinition::from_fn(
            Tool::new("echo", "Echo the arguments", json!({"type": "object"})),
            |args| Box::pin(async move { Ok(args) }),
        )
    }

    fn sleeping_tool(name: &str, delay: Duration) -> ToolDefinition {
        let name = name.to_string();
        ToolDefinition::from_fn(
            Tool::new(name.clone(), "Sleep then answer", json!({"type": "object"})),
            move |_| {
                let name = name.clone();
                Box::pin(async move {
                    tokio::time::sleep(delay).await;
                    Ok(json!({ "done": name }))
                })
            },
        )
    }

    fn relay(provider: &Arc<MockProvider>, tools: Vec<ToolDefinition>) -> Relay {
        Relay::new(
            provider.clone(),
            tools.into_iter().collect(),
            RelayConfig::default(),
        )
    }

    async fn collect(relay: Relay, prompt: &str) -> Vec<StreamEvent> {
        relay
            .run(conversation(prompt), CancellationToken::new())
            .collect()
            .await
    }

    fn assert_single_terminal(events: &[StreamEvent]) {
        let terminals = events.iter().filter(|e| e.is_terminal()).count();
        assert_eq!(terminals, 1);
        assert!(events.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_text_only_run() {
        let provider = Arc::new(MockProvider::new(vec![Turn::Events(vec![
            Ok(ProviderEvent::TextDelta("2 + 2".to_string())),
            Ok(ProviderEvent::TextDelta(" = 4".to_string())),
            Ok(ProviderEvent::Usage(Usage::new(Some(12), Some(4), Some(16)))),
        ])]));

        let events = collect(relay(&provider, vec![]), "2+2?").await;
        assert_single_terminal(&events);

        let streamed: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::TextDelta { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        match events.last().unwrap() {
            StreamEvent::Done {
                message,
                usage,
                rounds,
                ..
            } => {
                assert_eq!(message.content, streamed);
                assert_eq!(message.content, "2 + 2 = 4");
                assert_eq!(usage.total_tokens, Some(16));
                assert_eq!(*rounds, 0);
            }
            other => panic!("expected done, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tool_round_is_paired_and_resubmitted() {
        let provider = Arc::new(MockProvider::new(vec![
            Turn::tool_call("call_1", "echo", r#"{"word":"hi"}"#),
            Turn::text("You said hi."),
        ]));

        let events = collect(relay(&provider, vec![echo_tool()]), "say hi").await;
        assert_single_terminal(&events);

        assert_eq!(
            events[0],
            StreamEvent::ToolCall {
                call_id: "call_1".to_string(),
                name: "echo".to_string(),
                args: json!({"word": "hi"}),
            }
        );
        assert_eq!(
            events[1],
            StreamEvent::ToolResult {
                call_id: "call_1".to_string(),
                result: json!({"word": "hi"}),
            }
        );
        assert!(matches!(events.last(), Some(StreamEvent::Done { rounds: 1, .. })));

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        let second = &requests[1];
        assert_eq!(second.len(), 3);
        assert_eq!(second[1].role, Role::Assistant);
        assert_eq!(second[1].tool_calls[0].id, "call_1");
        assert_eq!(second[2].role, Role::Tool);
        assert_eq!(second[2].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(second[2].content, r#"{"word":"hi"}"#);
    }

    #[tokio::test]
    async fn test_done_carries_text_from_every_model_call() {
        let provider = Arc::new(MockProvider::new(vec![
            Turn::Events(vec![
                Ok(ProviderEvent::TextDelta("Let me check. ".to_string())),
                Ok(ProviderEvent::ToolCall(ToolCall::new("call_1", "echo", "{}"))),
            ]),
            Turn::text("Done."),
        ]));

        let events = collect(relay(&provider, vec![echo_tool()]), "check").await;
        assert_single_terminal(&events);
        let streamed: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::TextDelta { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        match events.last().unwrap() {
            StreamEvent::Done { message, .. } => {
                assert_eq!(message.content, streamed);
                assert_eq!(message.content, "Let me check. Done.");
            }
            other => panic!("expected done, got {:?}", other),
        }

        // each model call keeps only its own text in history
        let second = &provider.requests()[1];
        assert_eq!(second[1].content, "Let me check. ");
    }

    #[tokio::test]
    async fn test_complete_collects_text_across_tool_rounds() {
        let provider = Arc::new(MockProvider::new(vec![
            Turn::Events(vec![
                Ok(ProviderEvent::TextDelta("Looking. ".to_string())),
                Ok(ProviderEvent::ToolCall(ToolCall::new("call_1", "echo", "{}"))),
            ]),
            Turn::text("Found it."),
        ]));

        let reply = relay(&provider, vec![echo_tool()])
            .complete(conversation("find"), CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.text, "Looking. Found it.");
        assert_eq!(reply.tool_calls.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_error_result() {
        let provider = Arc::new(MockProvider::new(vec![
            Turn::tool_call("call_1", "deleteEverything", "{}"),
            Turn::text("I can't do that."),
        ]));

        let events = collect(relay(&provider, vec![echo_tool()]), "go").await;
        assert_single_terminal(&events);
        assert_eq!(
            events[1],
            StreamEvent::ToolResult {
                call_id: "call_1".to_string(),
                result: json!({"error": "unknown tool deleteEverything"}),
            }
        );
        assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));
    }

    #[tokio::test]
    async fn test_invalid_arguments_become_error_result() {
        let provider = Arc::new(MockProvider::new(vec![
            Turn::tool_call("call_1", "echo", r#"{"word":"#),
            Turn::text("Sorry."),
        ]));

        let events = collect(relay(&provider, vec![echo_tool()]), "go").await;
        match &events[0] {
            StreamEvent::ToolCall { args, .. } => assert_eq!(args, &json!(r#"{"word":"#)),
            other => panic!("expected tool call, got {:?}", other),
        }
        match &events[1] {
            StreamEvent::ToolResult { result, .. } => {
                let message = result["error"].as_str().unwrap();
                assert!(message.starts_with("invalid arguments for echo"));
            }
            other => panic!("expected tool result, got {:?}", other),
        }
        assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));
    }

    #[tokio::test]
    async fn test_tool_timeout() {
        let provider = Arc::new(MockProvider::new(vec![
            Turn::tool_call("call_1", "slow", "{}"),
            Turn::text("Gave up."),
        ]));
        let relay = Relay::new(
            provider.clone(),
            vec![sleeping_tool("slow", Duration::from_secs(30))]
                .into_iter()
                .collect(),
            RelayConfig {
                tool_timeout: Duration::from_millis(50),
                ..RelayConfig::default()
            },
        );

        let events = collect(relay, "go").await;
        assert_eq!(
            events[1],
            StreamEvent::ToolResult {
                call_id: "call_1".to_string(),
                result: json!({"error": "tool slow timed out after 0s"}),
            }
        );
        assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));
    }

    #[tokio::test]
    async fn test_tools_run_concurrently() {
        let provider = Arc::new(MockProvider::new(vec![
            Turn::Events(vec![
                Ok(ProviderEvent::ToolCall(ToolCall::new("a", "slow", "{}"))),
                Ok(ProviderEvent::ToolCall(ToolCall::new("b", "fast", "{}"))),
            ]),
            Turn::text("Both done."),
        ]));
        let tools = vec![
            sleeping_tool("slow", Duration::from_millis(300)),
            sleeping_tool("fast", Duration::from_millis(10)),
        ];

        let started = Instant::now();
        let events = collect(relay(&provider, tools), "go").await;
        assert!(started.elapsed() < Duration::from_millis(600));

        let results: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolResult { call_id, .. } => Some(call_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(results, vec!["b", "a"]);

        // history keeps the order the model asked in
        let second = &provider.requests()[1];
        assert_eq!(second[2].tool_call_id.as_deref(), Some("a"));
        assert_eq!(second[3].tool_call_id.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_tool_loop_is_capped() {
        let provider = Arc::new(MockProvider::repeating(Turn::tool_call(
            "call_1", "echo", "{}",
        )));
        let relay = Relay::new(
            provider.clone(),
            vec![echo_tool()].into_iter().collect(),
            RelayConfig {
                max_tool_rounds: 2,
                ..RelayConfig::default()
            },
        );

        let events = collect(relay, "loop forever").await;
        assert_single_terminal(&events);
        let calls = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::ToolCall { .. }))
            .count();
        let results = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::ToolResult { .. }))
            .count();
        assert_eq!(calls, 3);
        assert_eq!(results, calls);
        assert_eq!(
            events[events.len() - 2],
            StreamEvent::ToolResult {
                call_id: "call_1".to_string(),
                result: json!({"error": "tool loop exceeded 2 rounds"}),
            }
        );
        assert_eq!(
            events.last(),
            Some(&StreamEvent::Error {
                kind: ErrorKind::ToolLoopExceeded,
                message: "tool loop exceeded 2 rounds".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_failure_before_output_is_model_unavailable() {
        let provider = Arc::new(MockProvider::new(vec![Turn::Fail(
            ProviderError::Authentication("invalid api key".to_string()),
        )]));

        let events = collect(relay(&provider, vec![]), "hi").await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::Error { kind, message } => {
                assert_eq!(*kind, ErrorKind::ModelUnavailable);
                assert!(message.contains("invalid api key"));
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failure_after_output_is_stream_interrupted() {
        let provider = Arc::new(MockProvider::new(vec![Turn::Events(vec![
            Ok(ProviderEvent::TextDelta("The answer is".to_string())),
            Err(ProviderError::Stream("connection reset".to_string())),
        ])]));

        let events = collect(relay(&provider, vec![]), "hi").await;
        assert_single_terminal(&events);
        assert_eq!(events[0], StreamEvent::text_delta("The answer is"));
        assert!(matches!(
            events[1],
            StreamEvent::Error {
                kind: ErrorKind::StreamInterrupted,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_cancel_stops_without_terminal_event() {
        let provider = Arc::new(MockProvider::new(vec![Turn::Stall(vec![
            ProviderEvent::TextDelta("Thinking".to_string()),
        ])]));
        let cancel = CancellationToken::new();
        let mut events = relay(&provider, vec![]).run(conversation("hi"), cancel.clone());

        assert_eq!(events.next().await, Some(StreamEvent::text_delta("Thinking")));
        cancel.cancel();
        let rest = tokio::time::timeout(Duration::from_secs(1), events.next())
            .await
            .unwrap();
        assert_eq!(rest, None);
    }

    #[tokio::test]
    async fn test_cancel_abandons_running_tools() {
        let provider = Arc::new(MockProvider::new(vec![Turn::tool_call(
            "call_1", "slow", "{}",
        )]));
        let cancel = CancellationToken::new();
        let mut events = relay(&provider, vec![sleeping_tool("slow", Duration::from_secs(30))])
            .run(conversation("hi"), cancel.clone());

        assert!(matches!(events.next().await, Some(StreamEvent::ToolCall { .. })));
        cancel.cancel();
        let rest = tokio::time::timeout(Duration::from_secs(1), events.next())
            .await
            .unwrap();
        assert_eq!(rest, None);
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_complete_collects_reply() {
        let provider = Arc::new(MockProvider::new(vec![
            Turn::tool_call("call_1", "echo", r#"{"n":1}"#),
            Turn::text("Done."),
        ]));

        let reply = relay(&provider, vec![echo_tool()])
            .complete(conversation("go"), CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.text, "Done.");
        assert_eq!(reply.tool_calls, vec![ToolCall::new("call_1", "echo", r#"{"n":1}"#)]);
        assert_eq!(reply.usage.total_tokens, Some(15));

        let provider = Arc::new(MockProvider::new(vec![Turn::Fail(ProviderError::Connection(
            "refused".to_string(),
        ))]));
        let err = relay(&provider, vec![])
            .complete(conversation("go"), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ModelUnavailable);
    }
}
