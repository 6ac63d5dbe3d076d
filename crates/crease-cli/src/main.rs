use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use crease_sync::SyncConfig;
use tracing::info;
use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "crease-cli")]
#[command(about = "Crease cricket ingestion command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one full ingestion and print its report.
    Sync,
    /// Apply the schema and seed sample data into an empty store.
    Migrate,
    /// Close stale live matches without scraping.
    Sweep,
    /// Serve the JSON API, with the scheduler when enabled.
    Serve,
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("failed to initialize tracing: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let report = crease_sync::run_sync_once_from_env().await?;
            let o = &report.outcome;
            println!(
                "sync complete: run_id={} teams_created={} players_created={} \
                 players_updated={} matches_created={} matches_updated={} skipped={} \
                 swept={} fallback={}",
                report.run_id,
                o.teams.created,
                o.players.created,
                o.players.updated,
                o.matches.created,
                o.matches.updated,
                o.players.skipped + o.matches.skipped,
                report.swept.len(),
                report.used_fallback()
            );
            println!("{}", serde_json::to_string_pretty(&report.sources)?);
        }
        Commands::Migrate => {
            let config = SyncConfig::from_env()?;
            let store = crease_sync::Store::connect(&config.database_url).await?;
            store.migrate().await?;
            let seeded = store.seed_sample_data().await?;
            let counts = store.counts().await?;
            info!(seeded, "migrations applied");
            println!(
                "migrate complete: teams={} players={} matches={} seeded={}",
                counts.teams, counts.players, counts.matches, seeded
            );
        }
        Commands::Sweep => {
            let config = SyncConfig::from_env()?;
            let coordinator = crease_sync::build_coordinator(&config).await?;
            let swept = coordinator.sweep().await?;
            println!("sweep complete: closed={} ids={:?}", swept.len(), swept);
        }
        Commands::Serve => {
            crease_web::serve_from_env().await?;
        }
    }

    Ok(())
}
