//! Tools backed by the user's service connections.
//!
//! Building a [`ToolSet`] only decrypts credentials and prepares clients; network
//! I/O happens when the model actually invokes a tool.
pub mod github;
pub mod mcp;
pub mod supabase;

use async_trait::async_trait;
use futures::future::BoxFuture;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::codec::SecretCodec;
use crate::errors::{ToolError, ToolResult};
use crate::models::tool::Tool;
use crate::store::connection::{Connection, ConnectionKind};

/// Runs one tool invocation
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn call(&self, arguments: Value) -> ToolResult<Value>;
}

struct FnExecutor<F>(F);

#[async_trait]
impl<F> ToolExecutor for FnExecutor<F>
where
    F: Fn(Value) -> BoxFuture<'static, ToolResult<Value>> + Send + Sync,
{
    async fn call(&self, arguments: Value) -> ToolResult<Value> {
        (self.0)(arguments).await
    }
}

/// A tool schema paired with the code that runs it
#[derive(Clone)]
pub struct ToolDefinition {
    pub tool: Tool,
    executor: Arc<dyn ToolExecutor>,
}

impl ToolDefinition {
    pub fn new(tool: Tool, executor: impl ToolExecutor + 'static) -> Self {
        Self {
            tool,
            executor: Arc::new(executor),
        }
    }

    /// Wrap a closure as an executor
    pub fn from_fn<F>(tool: Tool, f: F) -> Self
    where
        F: Fn(Value) -> BoxFuture<'static, ToolResult<Value>> + Send + Sync + 'static,
    {
        Self::new(tool, FnExecutor(f))
    }

    pub fn name(&self) -> &str {
        &self.tool.name
    }

    pub async fn call(&self, arguments: Value) -> ToolResult<Value> {
        self.executor.call(arguments).await
    }
}

/// Tools available to one chat request, keyed by unique name
#[derive(Clone, Default)]
pub struct ToolSet {
    order: Vec<String>,
    definitions: HashMap<String, ToolDefinition>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a definition, suffixing the name (`_2`, `_3`, ...) if it is taken.
    /// Returns the name the tool was registered under.
    pub fn insert(&mut self, mut definition: ToolDefinition) -> String {
        if self.definitions.contains_key(definition.name()) {
            let base = definition.tool.name.clone();
            let mut n = 2;
            while self.definitions.contains_key(&format!("{}_{}", base, n)) {
                n += 1;
            }
            definition.tool.name = format!("{}_{}", base, n);
        }
        let name = definition.tool.name.clone();
        self.order.push(name.clone());
        self.definitions.insert(name.clone(), definition);
        name
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.definitions.get(name)
    }

    /// Schemas in registration order
    pub fn tools(&self) -> Vec<Tool> {
        self.order
            .iter()
            .filter_map(|name| self.definitions.get(name))
            .map(|d| d.tool.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl FromIterator<ToolDefinition> for ToolSet {
    fn from_iter<I: IntoIterator<Item = ToolDefinition>>(iter: I) -> Self {
        let mut set = ToolSet::new();
        for definition in iter {
            set.insert(definition);
        }
        set
    }
}

/// Turns connections into tools
#[derive(Clone)]
pub struct ToolRegistry {
    client: Client,
}

impl ToolRegistry {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("fixora/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }

    /// Tools for every usable connection. Connections of unsupported kinds, or
    /// whose credentials cannot be decrypted or are incomplete, contribute nothing.
    pub fn from_connections(&self, connections: &[Connection], codec: &dyn SecretCodec) -> ToolSet {
        let mut set = ToolSet::new();
        for connection in connections {
            let Some(kind) = connection.connection_kind() else {
                tracing::debug!(kind = %connection.kind, "no tools for connection kind");
                continue;
            };
            let credentials = match connection.decrypt_credentials(codec) {
                Ok(credentials) => credentials,
                Err(e) => {
                    tracing::warn!(connection = %connection.id, "skipping connection: {}", e);
                    continue;
                }
            };

            let definitions = match kind {
                ConnectionKind::Github => github::tools(self.client.clone(), &credentials),
                ConnectionKind::Supabase => supabase::tools(self.client.clone(), &credentials),
                ConnectionKind::Mcp => mcp::tools(self.client.clone(), &credentials),
            };
            match definitions {
                Some(definitions) => {
                    for definition in definitions {
                        set.insert(definition);
                    }
                }
                None => {
                    tracing::warn!(connection = %connection.id, %kind, "connection is missing credentials")
                }
            }
        }
        set
    }
}

pub(crate) fn required_str(arguments: &Value, tool: &str, field: &str) -> ToolResult<String> {
    arguments
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ToolError::InvalidArguments {
            name: tool.to_string(),
            message: format!("missing string field '{}'", field),
        })
}

pub(crate) fn optional_u64(arguments: &Value, field: &str) -> Option<u64> {
    arguments.get(field).and_then(Value::as_u64)
}

/// Send a request and decode a JSON body, turning non-2xx responses into
/// a short message instead of the service's raw body
pub(crate) async fn fetch_json(request: RequestBuilder, service: &str) -> ToolResult<Value> {
    let response = request.send().await.map_err(|e| {
        ToolError::ExecutionFailed(format!("{} request failed: {}", service, e))
    })?;

    let status = response.status();
    if status.is_success() {
        return response.json().await.map_err(|e| {
            ToolError::ExecutionFailed(format!("{} returned invalid JSON: {}", service, e))
        });
    }

    let body: Value = response.json().await.unwrap_or(Value::Null);
    let message = body
        .get("message")
        .or_else(|| body.get("error"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());
    Err(ToolError::ExecutionFailed(format!(
        "{} returned {}: {}",
        service,
        status.as_u16(),
        message
    )))
}
