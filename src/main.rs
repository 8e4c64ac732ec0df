use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use runboard::{HistoryStore, Leaderboard, LeaderboardReport, RunBoard, RunConfig, Standing};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "runboard")]
#[command(about = "Host-owned group runs with idle expiry and leaderboards")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP adapter
    Serve {
        /// JSON configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Listen address, overrides the configuration
        #[arg(long)]
        addr: Option<String>,
    },
    /// Print the leaderboard of a durable history
    Leaderboard {
        #[arg(long)]
        history_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("runboard=info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { config, addr } => serve(config, addr).await,
        Command::Leaderboard { history_dir } => print_leaderboard(history_dir).await,
    }
}

async fn serve(config_path: Option<PathBuf>, addr: Option<String>) -> Result<()> {
    let mut config = match &config_path {
        Some(path) => RunConfig::from_json_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => RunConfig::new(),
    };
    if let Some(addr) = addr {
        config = config.listen_addr(&addr);
    }

    let board = RunBoard::open(config).context("opening run board")?;
    let listener = tokio::net::TcpListener::bind(&board.config().listen_addr)
        .await
        .with_context(|| format!("binding {}", board.config().listen_addr))?;
    info!(addr = %board.config().listen_addr, "listening");

    axum::serve(listener, board.router())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("serving http")?;

    board.shutdown().await;
    info!("stopped");
    Ok(())
}

async fn print_leaderboard(history_dir: PathBuf) -> Result<()> {
    let store = HistoryStore::read_only(&history_dir)
        .with_context(|| format!("reading history in {}", history_dir.display()))?;
    let report = Leaderboard::new(Arc::new(store))
        .report()
        .await
        .context("computing leaderboard")?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &LeaderboardReport) {
    print_table("Top hosts (last 30 days)", &report.monthly_hosts);
    print_table("Top hosts (all time)", &report.all_time_hosts);
    print_table("Top participants (last 30 days)", &report.monthly_participants);
    print_table("Top participants (all time)", &report.all_time_participants);
}

fn print_table(title: &str, standings: &[Standing]) {
    println!("{}", title);
    if standings.is_empty() {
        println!("  (none)");
    }
    for (rank, standing) in standings.iter().enumerate() {
        println!("  {:>2}. {:<24} {}", rank + 1, standing.name, standing.count);
    }
    println!();
}
