//! Client integration files
//!
//! Writes the JSON configuration that desktop assistants and editors read to
//! discover tool servers. Existing files are merged: only the entry for this
//! server is replaced, everything else is preserved.

use clap::ValueEnum;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::IntegrationError;

pub const DEFAULT_SERVER_NAME: &str = "issue-tracker";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ClientKind {
    ClaudeDesktop,
    Cursor,
    Vscode,
    Windsurf,
}

impl ClientKind {
    /// Top-level key holding the server table
    pub fn section(&self) -> &'static str {
        match self {
            ClientKind::Vscode => "servers",
            _ => "mcpServers",
        }
    }

    /// Default location of the client's configuration file
    pub fn default_path(&self, home: &Path) -> PathBuf {
        match self {
            ClientKind::ClaudeDesktop => {
                if cfg!(target_os = "macos") {
                    home.join("Library/Application Support/Claude/claude_desktop_config.json")
                } else if cfg!(target_os = "windows") {
                    home.join("AppData/Roaming/Claude/claude_desktop_config.json")
                } else {
                    home.join(".config/Claude/claude_desktop_config.json")
                }
            }
            ClientKind::Cursor => home.join(".cursor/mcp.json"),
            // VS Code reads a per-workspace file
            ClientKind::Vscode => PathBuf::from(".vscode/mcp.json"),
            ClientKind::Windsurf => home.join(".codeium/windsurf/mcp_config.json"),
        }
    }
}

/// One server entry in a client configuration file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerEntry {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub transport: Option<&'static str>,
    pub command: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl ServerEntry {
    pub fn new(client: ClientKind, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            transport: (client == ClientKind::Vscode).then_some("stdio"),
            command: command.into(),
            args,
            env: BTreeMap::new(),
        }
    }

    pub fn with_env(mut self, name: &str, value: impl Into<String>) -> Self {
        self.env.insert(name.to_string(), value.into());
        self
    }
}

/// Resolve the output path, falling back to the client's default location
pub fn resolve_path(
    client: ClientKind,
    output: Option<PathBuf>,
) -> Result<PathBuf, IntegrationError> {
    if let Some(path) = output {
        return Ok(path);
    }
    if client == ClientKind::Vscode {
        return Ok(client.default_path(Path::new("")));
    }

    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .ok_or(IntegrationError::NoHomeDirectory)?;
    Ok(client.default_path(&home))
}

/// Merge `entry` under `name` into the document, returning the new document
pub fn merge_entry(
    client: ClientKind,
    existing: Option<Value>,
    name: &str,
    entry: &ServerEntry,
) -> Result<Value, String> {
    let mut root = match existing {
        None => Map::new(),
        Some(Value::Object(map)) => map,
        Some(_) => return Err("top-level value must be an object".to_string()),
    };

    let section = root
        .entry(client.section())
        .or_insert_with(|| Value::Object(Map::new()));
    let servers = section
        .as_object_mut()
        .ok_or_else(|| format!("'{}' must be an object", client.section()))?;

    let value = serde_json::to_value(entry).map_err(|e| e.to_string())?;
    servers.insert(name.to_string(), value);

    Ok(Value::Object(root))
}

/// Write or update the client configuration file at `path`
pub fn write_config(
    client: ClientKind,
    path: &Path,
    name: &str,
    entry: &ServerEntry,
) -> Result<(), IntegrationError> {
    let io_err = |source| IntegrationError::Io {
        path: path.to_path_buf(),
        source,
    };

    let existing = if path.exists() {
        let raw = fs::read_to_string(path).map_err(io_err)?;
        if raw.trim().is_empty() {
            None
        } else {
            Some(
                serde_json::from_str::<Value>(&raw).map_err(|e| IntegrationError::InvalidFile {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?,
            )
        }
    } else {
        None
    };

    let document =
        merge_entry(client, existing, name, entry).map_err(|reason| IntegrationError::InvalidFile {
            path: path.to_path_buf(),
            reason,
        })?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let mut rendered = serde_json::to_string_pretty(&document)?;
    rendered.push('\n');
    fs::write(path, rendered).map_err(io_err)?;

    info!(client = ?client, path = %path.display(), server = name, "Wrote integration config");
    Ok(())
}
