//!
//! src/main.rs
//!
//! Entry point of the recently-played etl job. `run` performs one
//! extract/transform/load pass, `schedule` keeps firing it at the
//! configured local hours.
//!

mod config;
mod errors;
mod logging;

mod covers;
mod etl;
mod fetch;
mod normalize;
mod scheduler;
mod sink;
mod tables;
mod types;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::errors::EtlError;

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    about = "Snapshots today's Spotify listening history to object storage"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the job once (default)
    Run,
    /// Run the job at the configured local hours until interrupted
    Schedule,
    /// Print the URL that grants this app access to listening history
    AuthorizeUrl,
    /// Trade an authorization code for the refresh token the job uses
    ExchangeCode {
        #[arg(long)]
        code: String,
    },
    /// Add album cover urls to a csv with a track_url column
    Covers {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
}

async fn run_once() -> Result<(), EtlError> {
    let cfgs = config::load_config()?;
    let _log = logging::init_logging(&cfgs.logging)?;
    startup(&cfgs);

    let spotify = fetch::SpotifyClient::new(&cfgs.http, &cfgs.spotify)?;
    let sink    = sink::TableSink::from_config(&cfgs.storage)?;

    // stdout carries the log lines
    match etl::run_etl(&cfgs.etl, &spotify, &sink, chrono::Utc::now()).await? {
        etl::RunOutcome::Written { tracks, artists, tracks_location, artists_location } => {
            eprintln!("wrote {tracks} tracks to {tracks_location}");
            eprintln!("wrote {artists} artists to {artists_location}");
        },
        etl::RunOutcome::NoTracksToday { .. } => eprintln!("No tracks found for today."),
    }
    Ok(())
}

async fn schedule() -> Result<(), EtlError> {
    let cfgs = config::load_config()?;
    let _log = logging::init_logging(&cfgs.logging)?;
    startup(&cfgs);

    let spotify = fetch::SpotifyClient::new(&cfgs.http, &cfgs.spotify)?;
    let sink    = sink::TableSink::from_config(&cfgs.storage)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            on_signal.cancel();
        }
    });

    scheduler::run_schedule(&cfgs.etl, &cfgs.schedule, &spotify, &sink, cancel).await
}

fn startup(cfgs: &config::AppConfig) {
    tracing::info!(
        service = env!("CARGO_PKG_NAME"),
        version = %env!("CARGO_PKG_VERSION"),
        limit = cfgs.etl.fetch_limit,
        offset = %cfgs.etl.utc_offset,
        backend = ?cfgs.storage.backend,
        bucket = %cfgs.storage.bucket,
        "starting"
    );
    if !cfgs.spotify.grants_recently_played() {
        tracing::warn!(scope = %cfgs.spotify.scope, "scope lacks {}", config::RECENTLY_PLAYED_SCOPE);
    }
}

#[tokio::main]
async fn main() -> Result<(), EtlError> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_once().await,
        Command::Schedule => schedule().await,
        Command::AuthorizeUrl => {
            let cfgs = config::load_auth_config()?;
            let spotify = fetch::SpotifyClient::new(&cfgs.http, &cfgs.spotify)?;
            println!("{}", spotify.authorize_url());
            Ok(())
        },
        Command::ExchangeCode { code } => {
            let cfgs = config::load_auth_config()?;
            let _log = logging::init_logging(&cfgs.logging)?;
            let spotify = fetch::SpotifyClient::new(&cfgs.http, &cfgs.spotify)?;

            let token = spotify.exchange_code(&code).await?;
            let refresh = token.refresh_token.ok_or_else(||
                EtlError::Parse("token response has no refresh_token".to_string()))?;
            println!("SPOTIFY_REFRESH_TOKEN={refresh}");
            Ok(())
        },
        Command::Covers { input, output } => {
            let cfgs = config::load_auth_config()?;
            let _log = logging::init_logging(&cfgs.logging)?;
            let spotify = fetch::SpotifyClient::new(&cfgs.http, &cfgs.spotify)?;

            let summary = covers::enrich_covers(&spotify, &input, &output).await?;
            println!(
                "Cover URLs resolved for {}/{} rows, saved to {}",
                summary.resolved, summary.rows, output.display()
            );
            Ok(())
        },
    }
}
