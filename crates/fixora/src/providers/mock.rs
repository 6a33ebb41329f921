use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::models::message::Message;
use crate::models::tool::{Tool, ToolCall};
use crate::providers::base::{Provider, ProviderError, ProviderEvent, ProviderStream, Usage};

/// What the mock does for one completion request
#[derive(Clone)]
pub enum Turn {
    /// Stream these items, then end
    Events(Vec<Result<ProviderEvent, ProviderError>>),
    /// Refuse the request before streaming
    Fail(ProviderError),
    /// Stream these items, then never end
    Stall(Vec<ProviderEvent>),
}

impl Turn {
    pub fn text(text: &str) -> Self {
        Turn::Events(vec![
            Ok(ProviderEvent::TextDelta(text.to_string())),
            Ok(ProviderEvent::Usage(Usage::new(Some(10), Some(5), Some(15)))),
        ])
    }

    pub fn tool_call(id: &str, name: &str, arguments: &str) -> Self {
        Turn::Events(vec![Ok(ProviderEvent::ToolCall(ToolCall::new(
            id, name, arguments,
        )))])
    }
}

/// A provider that plays back scripted turns and records what it was sent
pub struct MockProvider {
    turns: Mutex<VecDeque<Turn>>,
    repeat_last: bool,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of turns
    pub fn new(turns: Vec<Turn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            repeat_last: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A provider that answers every request with the same turn
    pub fn repeating(turn: Turn) -> Self {
        Self {
            repeat_last: true,
            ..Self::new(vec![turn])
        }
    }

    /// Message lists received so far, one entry per request
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn model(&self) -> &str {
        "mock"
    }

    async fn stream(
        &self,
        _system: &str,
        messages: &[Message],
        _tools: &[Tool],
    ) -> Result<ProviderStream, ProviderError> {
        self.requests.lock().unwrap().push(messages.to_vec());

        let turn = {
            let mut turns = self.turns.lock().unwrap();
            if self.repeat_last && turns.len() == 1 {
                turns.front().cloned()
            } else {
                turns.pop_front()
            }
        };

        match turn {
            // out of script: an empty answer
            None => Ok(stream::empty().boxed()),
            Some(Turn::Events(events)) => Ok(stream::iter(events).boxed()),
            Some(Turn::Fail(err)) => Err(err),
            Some(Turn::Stall(events)) => Ok(stream::iter(events.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed()),
        }
    }
}
