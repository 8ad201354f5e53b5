use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::LazyLock;
use validator::Validate;

use crate::error::{ToolError, ToolResult};
use crate::models::IssueState;

static ISSUE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Z0-9]+-[0-9]+$").expect("valid issue key pattern"));

static PROJECT_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Z0-9]+$").expect("valid project key pattern"));

fn default_search_limit() -> u32 {
    20
}

fn default_batch_size() -> usize {
    5
}

#[derive(Debug, Deserialize, Validate)]
pub struct IssueKeyArgs {
    pub key: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SearchArgs {
    #[validate(length(min = 1, max = 500))]
    pub query: String,
    #[serde(default = "default_search_limit")]
    #[validate(range(min = 1, max = 100))]
    pub limit: u32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateIssueArgs {
    pub project: String,
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    #[serde(default)]
    #[validate(length(max = 20000))]
    pub description: Option<String>,
    #[serde(default)]
    #[validate(length(max = 20))]
    pub labels: Vec<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateStateArgs {
    pub key: String,
    pub state: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CommentArgs {
    pub key: String,
    #[validate(length(min = 1, max = 10000))]
    pub body: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BatchGetArgs {
    #[validate(length(min = 1, max = 100))]
    pub keys: Vec<String>,
    #[serde(default = "default_batch_size")]
    #[validate(range(min = 1, max = 20))]
    pub batch_size: usize,
}

/// Tool argument validation utilities
pub struct RequestValidator;

impl RequestValidator {
    /// Deserializes tool arguments and runs their field validation
    pub fn parse_args<T>(args: Value) -> ToolResult<T>
    where
        T: DeserializeOwned + Validate,
    {
        let args = if args.is_null() {
            Value::Object(Default::default())
        } else {
            args
        };

        let parsed: T = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        parsed
            .validate()
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        Ok(parsed)
    }

    /// Validates an issue key such as `CORE-42`
    pub fn validate_issue_key(key: &str) -> ToolResult<String> {
        let key = key.trim();
        if key.is_empty() {
            return Err(ToolError::InvalidArguments(
                "Issue key cannot be empty".to_string(),
            ));
        }

        let normalized = key.to_uppercase();
        if !ISSUE_KEY.is_match(&normalized) {
            return Err(ToolError::InvalidArguments(format!(
                "Invalid issue key '{}': expected PROJECT-NUMBER, e.g. CORE-42",
                key
            )));
        }

        Ok(normalized)
    }

    /// Validates a project key such as `CORE`
    pub fn validate_project_key(project: &str) -> ToolResult<String> {
        let normalized = project.trim().to_uppercase();
        if !PROJECT_KEY.is_match(&normalized) {
            return Err(ToolError::InvalidArguments(format!(
                "Invalid project key '{}': expected uppercase letters and digits",
                project
            )));
        }

        Ok(normalized)
    }

    pub fn validate_state(state: &str) -> ToolResult<IssueState> {
        state.parse().map_err(ToolError::InvalidArguments)
    }
}
