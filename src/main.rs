// ABOUTME: Entry point for the agentssh CLI application.
// ABOUTME: Dials one host, runs one command, and mirrors its exit status.

mod cli;

use agentssh::config::Config;
use agentssh::diagnostics::Diagnostics;
use agentssh::error::Result;
use agentssh::ssh::{Input, Session};
use clap::Parser;
use cli::{Cli, Mode};
use std::env;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {e}");
            e.process_exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::discover_or_default(&env::current_dir()?)?,
    };

    // Command-line flags win over the config file
    if let Some(socket) = cli.socket {
        config.agent_socket = Some(socket);
    }
    if cli.forward_agent {
        config.forward_agent = true;
    }
    if let Some(timeout) = cli.timeout {
        config.timeout = timeout;
    }

    let target = config.resolve_target(&cli.address)?;
    let mut envs = config.resolved_env()?;
    envs.extend(cli.env);
    let command = cli.command.join(" ");

    let mut session = Session::dial_with(&config.backend(), config.dial_config(target)?).await?;
    session.set_envs(envs);

    let result = execute(&session, &command, cli.mode, cli.stdin).await;

    let mut diag = Diagnostics::default();
    if let Err(e) = session.close().await {
        diag.warn(format!("failed to close session to {}: {}", session.target(), e));
    }
    if let Err(e) = diag.report(&mut std::io::stderr()) {
        tracing::debug!("Failed to report warnings: {}", e);
    }

    result
}

async fn execute(session: &Session, command: &str, mode: Mode, bind_stdin: bool) -> Result<()> {
    let mut stdin = tokio::io::stdin();
    let input: Option<Input<'_>> = if bind_stdin { Some(&mut stdin) } else { None };
    let mut stdout = tokio::io::stdout();

    match mode {
        Mode::Stream => {
            let mut stderr = tokio::io::stderr();
            session.run(command, input, &mut stdout, &mut stderr).await?;
        }
        Mode::Output => {
            let output = session.output(command, input).await?;
            stdout.write_all(&output).await?;
        }
        Mode::Combined => {
            let output = session.combined_output(command, input).await?;
            stdout.write_all(&output).await?;
        }
    }
    stdout.flush().await?;
    Ok(())
}
