use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;
use crate::integrations::{ClientKind, DEFAULT_SERVER_NAME};

#[derive(Debug, Parser)]
#[command(
    name = "tracker-bridge",
    version,
    about = "Issue-tracker API tools behind an hourly request throttle"
)]
pub struct Cli {
    /// Tracker API base URL (overrides TRACKER_API_URL)
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Tracker API token (overrides TRACKER_API_TOKEN)
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Log level (overrides LOG_LEVEL)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Invoke one tool and print its text result
    Call {
        /// Tool name, see `tools`
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,

        /// Print the throttle metrics snapshot afterwards
        #[arg(long)]
        show_metrics: bool,
    },

    /// Fetch several issues through the batch helper
    GetIssues {
        /// Issue keys, e.g. CORE-1 CORE-2
        #[arg(required = true)]
        keys: Vec<String>,

        /// Requests waiting at the throttle at once
        #[arg(long, default_value_t = 5)]
        batch_size: usize,
    },

    /// List the available tools
    Tools {
        /// Print descriptors as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write the integration file for an assistant or editor
    WriteConfig {
        #[arg(value_enum)]
        client: ClientKind,

        /// Output file (defaults to the client's standard location)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Server name inside the file
        #[arg(long, default_value = DEFAULT_SERVER_NAME)]
        name: String,

        /// Command the client should launch (defaults to this executable)
        #[arg(long)]
        command: Option<String>,

        /// Argument passed to the command; repeatable
        #[arg(long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,

        /// Store the API token in the file's env section
        #[arg(long)]
        include_token: bool,
    },
}

impl Cli {
    /// Apply command-line overrides on top of environment configuration
    pub fn apply(&self, config: &mut Config) {
        if let Some(url) = &self.api_url {
            config.api_url = url.clone();
        }
        if let Some(token) = &self.token {
            config.api_token = Some(token.clone());
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
    }
}
