use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use stagewatch::auth::Token;
use stagewatch::client::ApiClient;
use stagewatch::config::Config;
use stagewatch::logs::{CollectOptions, LogEntry, LogStream, WorkspaceLogs};
use stagewatch::output::{format_entry, print_statuses, WaitProgress};
use stagewatch::pipeline::{StageOutcome, WaitOptions, WorkspaceLandscape};

#[derive(Parser)]
#[command(name = "stagewatch")]
#[command(author, version, about = "Pipeline stage logs and completion", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ./stagewatch.{toml,json,yaml,yml})
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, env = "CS_BASE_URL")]
    base_url: Option<String>,

    #[arg(short, long, global = true, env = "CS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[arg(short, long, global = true, env = "CS_WORKSPACE_ID")]
    workspace: Option<u64>,

    /// Write JSON output to this file instead of stdout
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,

    /// Print log lines without colors or local time conversion
    #[arg(long, global = true, default_value_t = false)]
    plain: bool,
}

#[derive(Args)]
struct Source {
    /// Pipeline stage: prepare, test or run
    stage: String,

    #[arg(default_value_t = 0)]
    step: u32,

    /// Read run logs of a single server
    #[arg(long, conflicts_with = "replica")]
    server: Option<String>,

    /// Read run logs of a single replica
    #[arg(long)]
    replica: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream logs of a stage step
    Logs {
        #[command(flatten)]
        source: Source,

        /// Overall read timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Keep reading until the server ends the stream
        #[arg(short, long, default_value_t = false, conflicts_with = "timeout")]
        follow: bool,
    },
    /// Collect logs of a stage step as JSON
    Collect {
        #[command(flatten)]
        source: Source,

        #[arg(short = 'n', long)]
        max_entries: Option<usize>,

        /// Stop collecting after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Show the per-worker status of a stage
    Status {
        stage: String,

        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Start a stage
    Start {
        stage: String,

        /// CI profile name (ci.<profile>.yml)
        #[arg(short = 'P', long)]
        profile: Option<String>,
    },
    /// Stop a stage
    Stop { stage: String },
    /// Wait until every relevant worker of a stage has finished
    Wait {
        stage: String,

        /// Maximum time to wait, in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Time between status checks, in seconds
        #[arg(long)]
        poll_interval: Option<u64>,

        /// Only wait for this server
        #[arg(long)]
        server: Option<String>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

impl Cli {
    pub async fn execute(&self) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;
        let client = self.api_client(&config)?;
        let workspace_id = self
            .workspace
            .or(config.api.workspace_id)
            .context("No workspace given: pass --workspace, set CS_WORKSPACE_ID or api.workspace-id")?;

        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling...");
                on_interrupt.cancel();
            }
        });

        match &self.command {
            Commands::Logs {
                source,
                timeout,
                follow,
            } => {
                let logs = WorkspaceLogs::new(client, workspace_id);
                let timeout = match (timeout, follow) {
                    (Some(secs), _) => Some(Duration::from_secs(*secs)),
                    (None, true) => None,
                    (None, false) if source.is_run_worker() => None,
                    (None, false) => Some(Duration::from_secs(config.logs.stage_timeout_secs)),
                };
                let stream = source.open(&logs, timeout).await?;
                self.print_logs(stream.with_cancellation(cancel)).await
            }
            Commands::Collect {
                source,
                max_entries,
                timeout,
            } => {
                let logs = WorkspaceLogs::new(client, workspace_id);
                let options = CollectOptions {
                    max_entries: max_entries.or(config.logs.max_entries),
                    timeout: timeout
                        .map(Duration::from_secs)
                        .or(CollectOptions::default().timeout),
                };
                let entries = source
                    .open(&logs, options.timeout)
                    .await?
                    .with_cancellation(cancel)
                    .collect_entries(options.max_entries)
                    .await?;
                info!("Collected {} log entries", entries.len());
                self.write_json(&entries)
            }
            Commands::Status { stage, json } => {
                let landscape = WorkspaceLandscape::new(client, workspace_id);
                let statuses = landscape.get_stage_status(stage).await?;
                if *json {
                    self.write_json(&statuses)
                } else {
                    print_statuses(&statuses);
                    Ok(())
                }
            }
            Commands::Start { stage, profile } => {
                let landscape = WorkspaceLandscape::new(client, workspace_id);
                landscape.start_stage(stage, profile.as_deref()).await?;
                eprintln!("Started stage '{stage}'");
                Ok(())
            }
            Commands::Stop { stage } => {
                let landscape = WorkspaceLandscape::new(client, workspace_id);
                landscape.stop_stage(stage).await?;
                eprintln!("Stopped stage '{stage}'");
                Ok(())
            }
            Commands::Wait {
                stage,
                timeout,
                poll_interval,
                server,
                json,
            } => {
                let landscape = WorkspaceLandscape::new(client, workspace_id);
                let options = WaitOptions {
                    timeout: Duration::from_secs(timeout.unwrap_or(config.wait.timeout_secs)),
                    poll_interval: Duration::from_secs(
                        poll_interval.unwrap_or(config.wait.poll_interval_secs),
                    ),
                    server: server.clone(),
                };
                let outcome = self
                    .wait(&landscape, stage, &options, &cancel, *json)
                    .await?;

                if !outcome.all_succeeded() {
                    let failed = outcome
                        .failed()
                        .map(|s| format!("{}/{}={}", s.server, s.replica, s.state))
                        .collect::<Vec<_>>()
                        .join(", ");
                    bail!("Stage '{stage}' did not succeed: {failed}");
                }
                Ok(())
            }
        }
    }

    fn api_client(&self, config: &Config) -> Result<ApiClient> {
        let base_url = self.base_url.as_deref().unwrap_or(&config.api.base_url);
        let token = self
            .token
            .clone()
            .or_else(|| config.api.token.clone())
            .map(Token::from);

        if token.is_none() {
            warn!("No API token configured; requests will be sent unauthenticated");
        }

        Ok(ApiClient::with_timeouts(
            base_url,
            token,
            config.api.connect_timeout(),
            config.api.request_timeout(),
        )?)
    }

    async fn print_logs(&self, stream: LogStream) -> Result<()> {
        let mut entries = std::pin::pin!(stream.into_stream());
        let mut count = 0usize;

        while let Some(entry) = entries.next().await {
            let entry: LogEntry = entry?;
            println!("{}", format_entry(&entry, self.plain));
            count += 1;
        }

        info!("Log stream ended after {count} entries");
        Ok(())
    }

    async fn wait(
        &self,
        landscape: &WorkspaceLandscape,
        stage: &str,
        options: &WaitOptions,
        cancel: &CancellationToken,
        json: bool,
    ) -> Result<StageOutcome> {
        let progress = WaitProgress::start(stage, options.timeout);

        let outcome = match landscape.wait_for_stage(stage, options, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                progress.abandon();
                return Err(e.into());
            }
        };

        if outcome.all_succeeded() {
            progress.finish_success(stage);
        } else {
            progress.finish_failure(stage, outcome.failed().count());
        }

        if json {
            self.write_json(&outcome)?;
        } else {
            print_statuses(&outcome.statuses);
        }

        Ok(outcome)
    }

    fn write_json<T: serde::Serialize>(&self, value: &T) -> Result<()> {
        let json_output = if self.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };

        if let Some(output_path) = &self.output {
            std::fs::write(output_path, json_output)?;
            info!("Output written to: {}", output_path.display());
        } else {
            println!("{json_output}");
        }

        Ok(())
    }
}

impl Source {
    fn is_run_worker(&self) -> bool {
        self.server.is_some() || self.replica.is_some()
    }

    async fn open(&self, logs: &WorkspaceLogs, timeout: Option<Duration>) -> Result<LogStream> {
        if self.is_run_worker() && self.stage != "run" {
            bail!("--server and --replica are only available for the 'run' stage");
        }

        let stream = match (&self.server, &self.replica) {
            (Some(server), _) => logs.open_server_stream(self.step, server, timeout).await?,
            (None, Some(replica)) => logs.open_replica_stream(self.step, replica, timeout).await?,
            (None, None) => logs.open_stream(&self.stage, self.step, timeout).await?,
        };

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_wait() {
        let cli = Cli::try_parse_from([
            "stagewatch",
            "wait",
            "run",
            "--timeout",
            "600",
            "--server",
            "web",
            "-w",
            "12",
        ])
        .unwrap();

        assert_eq!(cli.workspace, Some(12));
        match cli.command {
            Commands::Wait {
                stage,
                timeout,
                server,
                ..
            } => {
                assert_eq!(stage, "run");
                assert_eq!(timeout, Some(600));
                assert_eq!(server.as_deref(), Some("web"));
            }
            _ => panic!("expected wait command"),
        }
    }

    #[test]
    fn test_server_and_replica_conflict() {
        let result = Cli::try_parse_from([
            "stagewatch",
            "logs",
            "run",
            "1",
            "--server",
            "web",
            "--replica",
            "web-0",
        ]);
        assert!(result.is_err());
    }
}
