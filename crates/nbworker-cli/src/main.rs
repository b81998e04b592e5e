//! nbworker - command-line front end for the notebook execution worker.
//!
//! `render` runs a document through the worker (starting it if needed) and
//! writes the resulting notebook as JSON. The remaining subcommands administer
//! an already running worker.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nbworker_core::{ExecuteOptions, ExecutionMode, MappedDocument, WorkerClient, WorkerError};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "nbworker")]
#[command(about = "Run notebooks through a persistent Julia worker")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Execute a document and print the resulting notebook
    Render {
        /// Document to execute
        file: PathBuf,

        /// Keep the file's worker session alive after rendering
        #[arg(long, conflicts_with = "one_shot")]
        daemon: bool,

        /// Close the file's worker session before and after rendering
        #[arg(long)]
        one_shot: bool,

        /// Discard an existing session for the file before rendering
        #[arg(long)]
        restart: bool,

        /// Render options passed to the worker, as a JSON object
        #[arg(long, default_value = "{}")]
        options: String,

        /// Write the notebook here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Get status information on the running worker
    Status,
    /// Kill the worker. This also kills all notebook processes it manages
    Kill,
    /// Print the worker log, which can be used to diagnose problems
    Log,
    /// Close the worker session for a notebook without interrupting a running render
    Close {
        file: PathBuf,

        /// Terminate the session even if it is running
        #[arg(short, long)]
        force: bool,
    },
    /// Ask the worker to close all notebooks and exit. Fails if any notebook is busy
    Stop,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match run(args.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Cmd) -> Result<()> {
    let client = WorkerClient::from_env()?;

    match command {
        Cmd::Render {
            file,
            daemon,
            one_shot,
            restart,
            options,
            output,
        } => {
            let render_options: serde_json::Value =
                serde_json::from_str(&options).context("--options must be valid JSON")?;
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let mode = if daemon {
                ExecutionMode::Daemon
            } else if one_shot {
                ExecutionMode::OneShot
            } else {
                ExecutionMode::detect()
            };

            let options = ExecuteOptions::new(&file, MappedDocument::from_file(&file, &text))
                .with_mode(mode)
                .with_restart(restart)
                .with_render_options(render_options);
            let notebook = client.execute(&options).await?;
            let json = serde_json::to_string_pretty(&notebook)?;

            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!("Wrote notebook to {}", path.display());
                }
                None => println!("{}", json),
            }
        }
        Cmd::Status => {
            if let Some(status) = status_report(client.status().await)? {
                print!("{}", status);
            }
        }
        Cmd::Kill => match client.kill().await {
            Ok(_) => info!("Sent SIGTERM to server process"),
            Err(WorkerError::ServerNotRunning) => info!("Worker server is not running."),
            Err(e) => return Err(e.into()),
        },
        Cmd::Log => match client.server_log().await? {
            Some(log) => print!("{}", log),
            None => info!("Server log file doesn't exist"),
        },
        Cmd::Close { file, force } => {
            client.close(&file, force).await?;
            info!("Worker {}closed successfully.", if force { "force-" } else { "" });
        }
        Cmd::Stop => {
            let message = client.stop().await?;
            info!("{}", message);
        }
    }
    Ok(())
}

/// Status text to print, or `None` when there is no reachable worker to ask.
fn status_report(result: nbworker_core::Result<String>) -> Result<Option<String>> {
    match result {
        Ok(status) => Ok(Some(status)),
        Err(WorkerError::ServerNotRunning) => {
            info!("Worker server is not running.");
            Ok(None)
        }
        Err(e @ WorkerError::ServerUnreachable { .. }) => {
            info!("{}", e);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Print the error chain, plus the worker log when the worker failed to start.
fn report(err: &anyhow::Error) {
    error!("{:#}", err);
    let log = err
        .downcast_ref::<WorkerError>()
        .and_then(WorkerError::worker_log);
    if let Some(log) = log {
        eprintln!("This is the log from the server process:");
        eprintln!("#### BEGIN LOG ####");
        eprint!("{}", log);
        eprintln!("#### END LOG ####");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_args() {
        let args = Args::parse_from([
            "nbworker", "render", "doc.qmd", "--one-shot", "--restart", "--options", "{\"a\":1}",
        ]);
        match args.command {
            Cmd::Render {
                file,
                one_shot,
                daemon,
                restart,
                options,
                output,
            } => {
                assert_eq!(file, PathBuf::from("doc.qmd"));
                assert!(one_shot && restart && !daemon);
                assert_eq!(options, "{\"a\":1}");
                assert!(output.is_none());
            }
            other => panic!("Expected render, got: {:?}", other),
        }
    }

    #[test]
    fn test_daemon_conflicts_with_one_shot() {
        assert!(Args::try_parse_from(["nbworker", "render", "d.qmd", "--daemon", "--one-shot"]).is_err());
    }

    #[test]
    fn test_close_force_flag() {
        let args = Args::parse_from(["nbworker", "--debug", "close", "-f", "doc.qmd"]);
        assert!(args.debug);
        assert!(matches!(args.command, Cmd::Close { force: true, .. }));
    }

    #[test]
    fn test_status_without_reachable_worker_is_not_an_error() {
        assert!(status_report(Err(WorkerError::ServerNotRunning)).unwrap().is_none());
        let unreachable = WorkerError::ServerUnreachable {
            source: Box::new(WorkerError::Internal("connection refused".into())),
        };
        assert!(status_report(Err(unreachable)).unwrap().is_none());
    }

    #[test]
    fn test_status_passes_through_text_and_other_errors() {
        assert_eq!(
            status_report(Ok("workers: 0\n".into())).unwrap().as_deref(),
            Some("workers: 0\n")
        );
        assert!(status_report(Err(WorkerError::Internal("boom".into()))).is_err());
    }
}
