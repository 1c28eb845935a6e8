//! sudo-ssh - Entry point
//!
//! Parses CLI arguments, connects to the host, runs one command with sudo
//! elevation and exits with the remote exit status.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use sudo_ssh::config::{Action, Args, CommandArgs, Config};
use sudo_ssh::error::{Result, SudoSshError};
use sudo_ssh::{SshConnectionManager, SudoBackend};

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr; stdout carries command output
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run().await {
        Ok(code) => code,
        Err(SudoSshError::CommandFailed { exit_status, .. }) => {
            ExitCode::from(u8::try_from(exit_status).unwrap_or(u8::MAX))
        }
        Err(e) => {
            error!("{}", e);
            if let Some(output) = e.partial_output() {
                print!("{}", output.stdout);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode> {
    let args = Args::parse();
    let config = Config::from_args(args)?;

    info!("sudo-ssh v{} starting...", env!("CARGO_PKG_VERSION"));
    info!(
        "Connecting to {}@{}:{}",
        config.ssh.username, config.ssh.host, config.ssh.port
    );

    let connection = Arc::new(SshConnectionManager::new(config.ssh.clone()));
    connection.connect().await?;

    let backend = SudoBackend::new(connection.clone(), config.backend.clone());

    let result = match &config.action {
        Action::Exec(cmd) => exec(&scoped(&backend, cmd), cmd, config.json).await,
        Action::Capture(cmd) => capture(&scoped(&backend, cmd), cmd, config.json).await,
    };

    connection.close().await;
    result
}

/// Apply `--as`, `--within` and `--env` to the backend
fn scoped(backend: &SudoBackend, cmd: &CommandArgs) -> SudoBackend {
    let mut view = backend.with_env(cmd.env.iter().cloned());
    if let Some(user) = &cmd.as_user {
        view = view.as_user(user.as_str(), None);
    }
    if let Some(dir) = &cmd.within {
        view = view.within(dir);
    }
    view
}

async fn exec(backend: &SudoBackend, cmd: &CommandArgs, json: bool) -> Result<ExitCode> {
    let output = backend.run(cmd.command.iter().cloned()).await?;

    if json {
        let rendered = serde_json::to_string_pretty(&output)
            .map_err(|e| SudoSshError::config(format!("Failed to render output: {}", e)))?;
        println!("{}", rendered);
    }

    Ok(match output.exit_code {
        Some(0) => ExitCode::SUCCESS,
        Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(u8::MAX)),
        None => ExitCode::FAILURE,
    })
}

async fn capture(backend: &SudoBackend, cmd: &CommandArgs, json: bool) -> Result<ExitCode> {
    let stdout = backend.capture(cmd.command.iter().cloned()).await?;

    if json {
        println!("{}", serde_json::json!({ "stdout": stdout }));
    } else {
        println!("{}", stdout);
    }

    Ok(ExitCode::SUCCESS)
}
