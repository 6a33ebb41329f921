use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;

use super::{fetch_json, optional_u64, required_str, ToolDefinition, ToolExecutor};
use crate::errors::{ToolError, ToolResult};
use crate::models::tool::Tool;

const DEFAULT_LIMIT: u64 = 20;
const MAX_LIMIT: u64 = 1000;

lazy_static! {
    static ref TABLE_NAME: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Read-only PostgREST access to a Supabase project
struct QueryTable {
    client: Client,
    url: String,
    key: String,
}

#[async_trait]
impl ToolExecutor for QueryTable {
    async fn call(&self, arguments: Value) -> ToolResult<Value> {
        let table = required_str(&arguments, "querySupabaseTable", "table")?;
        // the name becomes a path segment
        if !TABLE_NAME.is_match(&table) {
            return Err(ToolError::InvalidArguments {
                name: "querySupabaseTable".to_string(),
                message: format!("invalid table name '{}'", table),
            });
        }
        let select = arguments
            .get("select")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("*")
            .to_string();
        let limit = optional_u64(&arguments, "limit")
            .unwrap_or(DEFAULT_LIMIT)
            .clamp(1, MAX_LIMIT);

        let request = self
            .client
            .get(format!("{}/rest/v1/{}", self.url, table))
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
            .query(&[("select", select), ("limit", limit.to_string())]);
        fetch_json(request, "Supabase").await
    }
}

/// Supabase tools for a connection. Needs `url` and `key` credentials.
pub fn tools(client: Client, credentials: &HashMap<String, String>) -> Option<Vec<ToolDefinition>> {
    let url = credentials.get("url").filter(|u| !u.is_empty())?;
    let key = credentials.get("key").filter(|k| !k.is_empty())?;

    Some(vec![ToolDefinition::new(
        Tool::new(
            "querySupabaseTable",
            "Read rows from a table in the connected Supabase project",
            json!({
                "type": "object",
                "properties": {
                    "table": {"type": "string", "description": "Table name"},
                    "select": {"type": "string", "description": "Columns to return, PostgREST syntax"},
                    "limit": {"type": "integer", "minimum": 1, "maximum": MAX_LIMIT}
                },
                "required": ["table"]
            }),
        ),
        QueryTable {
            client,
            url: url.trim_end_matches('/').to_string(),
            key: key.clone(),
        },
    )])
}
