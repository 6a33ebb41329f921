use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;

use super::{fetch_json, optional_u64, required_str, ToolDefinition, ToolExecutor};
use crate::errors::ToolResult;
use crate::models::tool::Tool;

const DEFAULT_BASE_URL: &str = "https://api.github.com";
const DEFAULT_PER_PAGE: u64 = 30;
const MAX_PER_PAGE: u64 = 100;

#[derive(Clone)]
struct GitHubClient {
    client: Client,
    base_url: String,
    token: String,
}

impl GitHubClient {
    async fn get(&self, path: &str, query: &[(&str, String)]) -> ToolResult<Value> {
        let request = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .query(query);
        fetch_json(request, "GitHub").await
    }
}

#[derive(Clone, Copy)]
enum Operation {
    FetchUser,
    ListRepos,
    GetRepo,
}

struct GitHubTool {
    client: GitHubClient,
    operation: Operation,
}

#[async_trait]
impl ToolExecutor for GitHubTool {
    async fn call(&self, arguments: Value) -> ToolResult<Value> {
        match self.operation {
            Operation::FetchUser => {
                let username = required_str(&arguments, "fetchGitHubUser", "username")?;
                let user = self.client.get(&format!("/users/{}", username), &[]).await?;
                Ok(summarize_user(&user))
            }
            Operation::ListRepos => {
                let per_page = optional_u64(&arguments, "perPage")
                    .unwrap_or(DEFAULT_PER_PAGE)
                    .clamp(1, MAX_PER_PAGE);
                let path = match arguments.get("username").and_then(Value::as_str) {
                    Some(username) if !username.is_empty() => format!("/users/{}/repos", username),
                    _ => "/user/repos".to_string(),
                };
                let repos = self
                    .client
                    .get(
                        &path,
                        &[
                            ("per_page", per_page.to_string()),
                            ("sort", "updated".to_string()),
                        ],
                    )
                    .await?;
                let repos = repos
                    .as_array()
                    .map(|repos| repos.iter().map(summarize_repo).collect())
                    .unwrap_or_default();
                Ok(Value::Array(repos))
            }
            Operation::GetRepo => {
                let owner = required_str(&arguments, "getGitHubRepo", "owner")?;
                let repo = required_str(&arguments, "getGitHubRepo", "repo")?;
                let repo = self
                    .client
                    .get(&format!("/repos/{}/{}", owner, repo), &[])
                    .await?;
                Ok(summarize_repo(&repo))
            }
        }
    }
}

fn pick(value: &Value, fields: &[&str]) -> Value {
    let mut out = serde_json::Map::new();
    for field in fields {
        if let Some(v) = value.get(*field) {
            out.insert(field.to_string(), v.clone());
        }
    }
    Value::Object(out)
}

fn summarize_user(user: &Value) -> Value {
    pick(
        user,
        &[
            "login",
            "name",
            "bio",
            "company",
            "location",
            "public_repos",
            "followers",
            "following",
            "html_url",
            "created_at",
        ],
    )
}

fn summarize_repo(repo: &Value) -> Value {
    pick(
        repo,
        &[
            "full_name",
            "description",
            "language",
            "stargazers_count",
            "forks_count",
            "open_issues_count",
            "default_branch",
            "private",
            "html_url",
            "updated_at",
        ],
    )
}

/// GitHub tools for a connection. Needs a `token` credential; `base_url`
/// points at a GitHub Enterprise API.
pub fn tools(client: Client, credentials: &HashMap<String, String>) -> Option<Vec<ToolDefinition>> {
    let token = credentials.get("token").filter(|t| !t.is_empty())?.clone();
    let base_url = credentials
        .get("base_url")
        .map(|u| u.trim_end_matches('/').to_string())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let client = GitHubClient {
        client,
        base_url,
        token,
    };

    let definition = |tool: Tool, operation: Operation| {
        ToolDefinition::new(
            tool,
            GitHubTool {
                client: client.clone(),
                operation,
            },
        )
    };

    Some(vec![
        definition(
            Tool::new(
                "fetchGitHubUser",
                "Fetch a GitHub user's public profile",
                json!({
                    "type": "object",
                    "properties": {
                        "username": {"type": "string", "description": "GitHub login"}
                    },
                    "required": ["username"]
                }),
            ),
            Operation::FetchUser,
        ),
        definition(
            Tool::new(
                "listGitHubRepos",
                "List repositories for a user, or for the connected account when no username is given",
                json!({
                    "type": "object",
                    "properties": {
                        "username": {"type": "string", "description": "GitHub login"},
                        "perPage": {"type": "integer", "minimum": 1, "maximum": MAX_PER_PAGE}
                    }
                }),
            ),
            Operation::ListRepos,
        ),
        definition(
            Tool::new(
                "getGitHubRepo",
                "Get details about a single repository",
                json!({
                    "type": "object",
                    "properties": {
                        "owner": {"type": "string"},
                        "repo": {"type": "string"}
                    },
                    "required": ["owner", "repo"]
                }),
            ),
            Operation::GetRepo,
        ),
    ])
}
