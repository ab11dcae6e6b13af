//!
//! src/etl.rs
//!
//! One run of the job: refresh token, fetch history, keep today's plays,
//! build both tables and write them. Every stage is awaited in turn and
//! the first fatal error aborts the run.
//!

use chrono::{DateTime, Utc};
use object_store::path::Path;
use tracing::info;

use crate::config::EtlConfig;
use crate::errors::EtlError;
use crate::fetch::SpotifyClient;
use crate::normalize::{LocalDay, normalize_events};
use crate::sink::{encode_csv, TableKind, TableSink};
use crate::tables::build_tables;
use crate::types::{ArtistRecord, TrackRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Written {
        tracks: usize,
        artists: usize,
        tracks_location: Path,
        artists_location: Path
    },
    NoTracksToday {
        fetched: usize
    }
}

#[tracing::instrument(
    name = "etl.run",
    skip_all,
    fields(run_id = %uuid::Uuid::new_v4(), limit = cfg.fetch_limit)
)]
pub async fn run_etl(
    cfg: &EtlConfig,
    spotify: &SpotifyClient,
    sink: &TableSink,
    now: DateTime<Utc>
) -> Result<RunOutcome, EtlError> {
    let local_now = now.with_timezone(&cfg.utc_offset);
    let day = LocalDay::new(now, cfg.utc_offset);

    let token  = spotify.refresh_access_token().await?;
    let events = spotify.fetch_recently_played(cfg.fetch_limit, &token.access_token).await?;
    let fetched = events.len();

    let plays = normalize_events(&events, &day);
    let Some(tables) = build_tables(plays) else {
        info!(fetched, today = %day.today, "No tracks found for today.");
        return Ok(RunOutcome::NoTracksToday { fetched });
    };

    // encode both before writing either
    let tracks_body  = encode_csv(&TrackRecord::HEADERS, &tables.tracks)?;
    let artists_body = encode_csv(&ArtistRecord::HEADERS, &tables.artists)?;

    let tracks_location  = sink.location(TableKind::Tracks, &local_now);
    let artists_location = sink.location(TableKind::Artists, &local_now);
    sink.put(&tracks_location, tracks_body).await?;
    sink.put(&artists_location, artists_body).await?;

    info!(
        fetched,
        tracks = tables.tracks.len(),
        artists = tables.artists.len(),
        "etl.complete"
    );

    Ok( RunOutcome::Written {
        tracks: tables.tracks.len(),
        artists: tables.artists.len(),
        tracks_location,
        artists_location
    })
}
