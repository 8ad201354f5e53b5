//! Tool layer
//!
//! Translates structured tool invocations (a tool name plus JSON arguments)
//! into tracker API calls and renders the results as plain text.

use serde::Serialize;
use serde_json::{json, Value};
use std::fmt::Write;
use tracing::info;

use crate::client::TrackerClient;
use crate::error::{ApiResult, ToolError, ToolResult};
use crate::metrics::ThrottleMetrics;
use crate::models::{Comment, Issue, NewIssue, SearchPage};
use crate::validation::{
    BatchGetArgs, CommentArgs, CreateIssueArgs, IssueKeyArgs, RequestValidator, SearchArgs,
    UpdateStateArgs,
};

/// Description of a callable tool
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

fn key_schema() -> Value {
    json!({"type": "string", "description": "Issue key, e.g. CORE-42"})
}

pub fn descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "get_issue",
            description: "Fetch a single issue by key",
            input_schema: json!({
                "type": "object",
                "properties": {"key": key_schema()},
                "required": ["key"]
            }),
        },
        ToolDescriptor {
            name: "search_issues",
            description: "Search issues with the tracker's query syntax",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 100, "default": 20}
                },
                "required": ["query"]
            }),
        },
        ToolDescriptor {
            name: "create_issue",
            description: "Create a new issue in a project",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "project": {"type": "string", "description": "Project key, e.g. CORE"},
                    "title": {"type": "string"},
                    "description": {"type": "string"},
                    "labels": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["project", "title"]
            }),
        },
        ToolDescriptor {
            name: "update_issue_state",
            description: "Move an issue to another workflow state",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "key": key_schema(),
                    "state": {"type": "string", "enum": ["open", "in_progress", "done", "closed"]}
                },
                "required": ["key", "state"]
            }),
        },
        ToolDescriptor {
            name: "add_comment",
            description: "Add a comment to an issue",
            input_schema: json!({
                "type": "object",
                "properties": {"key": key_schema(), "body": {"type": "string"}},
                "required": ["key", "body"]
            }),
        },
        ToolDescriptor {
            name: "list_comments",
            description: "List the comments on an issue",
            input_schema: json!({
                "type": "object",
                "properties": {"key": key_schema()},
                "required": ["key"]
            }),
        },
        ToolDescriptor {
            name: "get_issues",
            description: "Fetch several issues at once",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "keys": {"type": "array", "items": key_schema(), "minItems": 1, "maxItems": 100},
                    "batch_size": {"type": "integer", "minimum": 1, "maximum": 20, "default": 5}
                },
                "required": ["keys"]
            }),
        },
        ToolDescriptor {
            name: "rate_limit_status",
            description: "Show request budget utilization for the tracker API",
            input_schema: json!({"type": "object", "properties": {}}),
        },
    ]
}

/// Dispatches tool invocations against a tracker client
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    client: TrackerClient,
}

impl ToolRegistry {
    pub fn new(client: TrackerClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &TrackerClient {
        &self.client
    }

    /// Run one tool and render its result as text
    pub async fn call(&self, name: &str, args: Value) -> ToolResult<String> {
        info!(tool = name, "Tool invocation");

        match name {
            "get_issue" => {
                let args: IssueKeyArgs = RequestValidator::parse_args(args)?;
                let key = RequestValidator::validate_issue_key(&args.key)?;
                let issue = self.client.get_issue(&key).await?;
                Ok(format_issue(&issue))
            }
            "search_issues" => {
                let args: SearchArgs = RequestValidator::parse_args(args)?;
                let page = self.client.search_issues(&args.query, args.limit).await?;
                Ok(format_search_page(&args.query, &page))
            }
            "create_issue" => {
                let args: CreateIssueArgs = RequestValidator::parse_args(args)?;
                let project = RequestValidator::validate_project_key(&args.project)?;
                let issue = self
                    .client
                    .create_issue(&NewIssue {
                        project,
                        title: args.title.trim().to_string(),
                        description: args.description,
                        labels: args.labels,
                    })
                    .await?;
                Ok(format!("Created {}\n\n{}", issue.key, format_issue(&issue)))
            }
            "update_issue_state" => {
                let args: UpdateStateArgs = RequestValidator::parse_args(args)?;
                let key = RequestValidator::validate_issue_key(&args.key)?;
                let state = RequestValidator::validate_state(&args.state)?;
                let issue = self.client.update_issue_state(&key, state).await?;
                Ok(format!("{} is now {}", issue.key, issue.state))
            }
            "add_comment" => {
                let args: CommentArgs = RequestValidator::parse_args(args)?;
                let key = RequestValidator::validate_issue_key(&args.key)?;
                let comment = self.client.add_comment(&key, &args.body).await?;
                Ok(format!(
                    "Comment {} added to {} by {}",
                    comment.id, key, comment.author.name
                ))
            }
            "list_comments" => {
                let args: IssueKeyArgs = RequestValidator::parse_args(args)?;
                let key = RequestValidator::validate_issue_key(&args.key)?;
                let comments = self.client.list_comments(&key).await?;
                Ok(format_comments(&key, &comments))
            }
            "get_issues" => {
                let args: BatchGetArgs = RequestValidator::parse_args(args)?;
                let keys = args
                    .keys
                    .iter()
                    .map(|key| RequestValidator::validate_issue_key(key))
                    .collect::<ToolResult<Vec<_>>>()?;
                let results = self.client.get_issues(keys.clone(), args.batch_size).await;
                Ok(format_batch(&keys, &results))
            }
            "rate_limit_status" => Ok(format_metrics(
                self.client.throttle().config().requests_per_hour,
                &self.client.throttle_metrics(),
            )),
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}

pub fn format_issue(issue: &Issue) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}: {}", issue.key, issue.title);
    let _ = writeln!(out, "State: {}", issue.state);
    let assignee = issue
        .assignee
        .as_ref()
        .map(|user| user.name.as_str())
        .unwrap_or("unassigned");
    let _ = writeln!(out, "Assignee: {}", assignee);
    if !issue.labels.is_empty() {
        let _ = writeln!(out, "Labels: {}", issue.labels.join(", "));
    }
    let _ = writeln!(out, "Updated: {}", issue.updated_at.to_rfc3339());
    if let Some(description) = issue.description.as_deref().filter(|d| !d.trim().is_empty()) {
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", description.trim());
    }
    out.trim_end().to_string()
}

fn format_issue_line(issue: &Issue) -> String {
    format!("{} [{}] {}", issue.key, issue.state, issue.title)
}

pub fn format_search_page(query: &str, page: &SearchPage) -> String {
    if page.issues.is_empty() {
        return format!("No issues match '{}'", query);
    }

    let mut out = format!(
        "Showing {} of {} issues matching '{}'\n",
        page.issues.len(),
        page.total,
        query
    );
    for issue in &page.issues {
        let _ = writeln!(out, "- {}", format_issue_line(issue));
    }
    out.trim_end().to_string()
}

pub fn format_comments(key: &str, comments: &[Comment]) -> String {
    if comments.is_empty() {
        return format!("{} has no comments", key);
    }

    let mut out = format!("{} comments on {}\n", comments.len(), key);
    for comment in comments {
        let _ = writeln!(
            out,
            "\n{} ({}):\n{}",
            comment.author.name,
            comment.created_at.to_rfc3339(),
            comment.body.trim()
        );
    }
    out.trim_end().to_string()
}

pub fn format_batch(keys: &[String], results: &[ApiResult<Issue>]) -> String {
    let mut out = String::new();
    for (key, result) in keys.iter().zip(results) {
        match result {
            Ok(issue) => {
                let _ = writeln!(out, "- {}", format_issue_line(issue));
            }
            Err(err) => {
                let _ = writeln!(out, "- {}: error: {}", key, err);
            }
        }
    }
    out.trim_end().to_string()
}

pub fn format_metrics(requests_per_hour: u32, metrics: &ThrottleMetrics) -> String {
    let last = metrics
        .last_request_time
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());

    format!(
        "Requests in last hour: {} / {} ({:.1}%)\n\
         Remaining requests: {}\n\
         Average request time: {} ms\n\
         Queue length: {}\n\
         Last request: {}",
        metrics.requests_in_last_hour,
        requests_per_hour,
        metrics.utilization_percent(),
        metrics.remaining_requests,
        metrics.average_request_time_ms,
        metrics.queue_length,
        last
    )
}
