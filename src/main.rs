use std::sync::Arc;

use clap::Parser;

use mnemosyne::cli::{Cli, Commands, FocusAction};
use mnemosyne::config::AppConfig;
use mnemosyne::Daemon;

#[tokio::main]
async fn main() {
    env_logger::init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(if e.downcast_ref::<StartupError>().is_some() { 1 } else { 2 });
    }
}

#[derive(Debug, thiserror::Error)]
#[error("fatal startup error: {0}")]
struct StartupError(String);

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load().map_err(|e| StartupError(e.to_string()))?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config).await,
        Commands::Query { question } => run_query(config, &question).await,
        Commands::Focus { action } => run_focus(config, action).await,
        Commands::Clear { since, until } => run_clear(config, &since, until.as_deref()).await,
    }
}

async fn run_daemon(config: AppConfig) -> anyhow::Result<()> {
    let daemon = Daemon::open(config).await.map_err(|e| StartupError(e.to_string()))?;
    daemon.start();
    log::info!("mnemosyne daemon started");

    tokio::signal::ctrl_c().await?;
    log::info!("shutting down");
    daemon.shutdown();
    Ok(())
}

async fn run_query(config: AppConfig, question: &str) -> anyhow::Result<()> {
    let daemon = Daemon::open(config).await.map_err(|e| StartupError(e.to_string()))?;
    let answer = daemon
        .query_engine
        .query(question, Some(&daemon.ocr), |chunk| {
            print!("{chunk}");
            use std::io::Write;
            let _ = std::io::stdout().flush();
        })
        .await?;
    println!();
    let _ = answer;
    Ok(())
}

async fn run_focus(config: AppConfig, action: FocusAction) -> anyhow::Result<()> {
    let daemon = Arc::new(Daemon::open(config).await.map_err(|e| StartupError(e.to_string()))?);
    match action {
        FocusAction::Start { mode_id } => {
            let session_id = daemon.start_focus_session(&mode_id)?;
            println!("focus session {session_id} started");
        }
        FocusAction::Stop => {
            daemon.stop_focus_session()?;
            println!("focus session stopped");
        }
    }
    Ok(())
}

async fn run_clear(config: AppConfig, since: &str, until: Option<&str>) -> anyhow::Result<()> {
    let daemon = Daemon::open(config).await.map_err(|e| StartupError(e.to_string()))?;
    let start = chrono::DateTime::parse_from_rfc3339(since)?.with_timezone(&chrono::Utc);
    let end = match until {
        Some(u) => chrono::DateTime::parse_from_rfc3339(u)?.with_timezone(&chrono::Utc),
        None => chrono::Utc::now(),
    };
    let count = daemon.clear_captures(start, end)?;
    println!("cleared {count} capture(s)");
    Ok(())
}
