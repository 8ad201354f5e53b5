use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tracker_bridge::cli::{Cli, Command};
use tracker_bridge::config::Config;
use tracker_bridge::integrations::{self, ServerEntry};
use tracker_bridge::tools::{self, ToolRegistry};
use tracker_bridge::TrackerClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let mut config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    cli.apply(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    // Logs go to stderr so command output stays clean
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tracker_bridge={}", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::debug!(
        api_url = %config.api_url,
        requests_per_hour = config.throttle.requests_per_hour,
        "Configuration loaded"
    );

    match cli.command {
        Command::Call {
            tool,
            args,
            show_metrics,
        } => {
            let args: serde_json::Value =
                serde_json::from_str(&args).context("--args must be a JSON object")?;
            let registry = ToolRegistry::new(TrackerClient::from_config(&config)?);

            let output = registry.call(&tool, args).await?;
            println!("{}", output);

            if show_metrics {
                let metrics = registry.client().throttle_metrics();
                println!("{}", serde_json::to_string_pretty(&metrics)?);
            }
        }
        Command::GetIssues { keys, batch_size } => {
            let registry = ToolRegistry::new(TrackerClient::from_config(&config)?);
            let args = serde_json::json!({"keys": keys, "batch_size": batch_size});
            println!("{}", registry.call("get_issues", args).await?);
        }
        Command::Tools { json } => {
            let descriptors = tools::descriptors();
            if json {
                println!("{}", serde_json::to_string_pretty(&descriptors)?);
            } else {
                for descriptor in descriptors {
                    println!("{:<20} {}", descriptor.name, descriptor.description);
                }
            }
        }
        Command::WriteConfig {
            client,
            output,
            name,
            command,
            args,
            include_token,
        } => {
            let command = match command {
                Some(command) => command,
                None => std::env::current_exe()
                    .context("Failed to resolve the current executable")?
                    .display()
                    .to_string(),
            };

            let mut entry = ServerEntry::new(client, command, args)
                .with_env("TRACKER_API_URL", config.api_url.clone());
            if include_token {
                let token = config.require_token()?;
                entry = entry.with_env("TRACKER_API_TOKEN", token);
            }

            let path = integrations::resolve_path(client, output)?;
            integrations::write_config(client, &path, &name, &entry)?;
            println!("Wrote {} configuration to {}", name, path.display());
        }
    }

    Ok(())
}
