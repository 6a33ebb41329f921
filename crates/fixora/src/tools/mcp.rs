use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;

use super::{fetch_json, required_str, ToolDefinition, ToolExecutor};
use crate::errors::ToolResult;
use crate::models::tool::Tool;

#[derive(Clone)]
struct ContextServer {
    client: Client,
    url: String,
    token: Option<String>,
}

impl ContextServer {
    async fn get(&self, path: &str) -> ToolResult<Value> {
        let mut request = self.client.get(format!("{}{}", self.url, path));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        fetch_json(request, "MCP server").await
    }
}

struct ListContexts(ContextServer);

#[async_trait]
impl ToolExecutor for ListContexts {
    async fn call(&self, _arguments: Value) -> ToolResult<Value> {
        self.0.get("/contexts").await
    }
}

struct GetContext(ContextServer);

#[async_trait]
impl ToolExecutor for GetContext {
    async fn call(&self, arguments: Value) -> ToolResult<Value> {
        let id = required_str(&arguments, "getMcpContext", "id")?;
        self.0
            .get(&format!("/contexts/{}", urlencoding::encode(&id)))
            .await
    }
}

/// Tools for a model context server. Needs a `url`; `token` is sent as a
/// bearer token when present.
pub fn tools(client: Client, credentials: &HashMap<String, String>) -> Option<Vec<ToolDefinition>> {
    let url = credentials.get("url").filter(|u| !u.is_empty())?;
    let server = ContextServer {
        client,
        url: url.trim_end_matches('/').to_string(),
        token: credentials.get("token").filter(|t| !t.is_empty()).cloned(),
    };

    Some(vec![
        ToolDefinition::new(
            Tool::new(
                "listMcpContexts",
                "List the contexts available on the connected context server",
                json!({"type": "object", "properties": {}}),
            ),
            ListContexts(server.clone()),
        ),
        ToolDefinition::new(
            Tool::new(
                "getMcpContext",
                "Fetch a single context by id",
                json!({
                    "type": "object",
                    "properties": {"id": {"type": "string"}},
                    "required": ["id"]
                }),
            ),
            GetContext(server),
        ),
    ])
}
