//!
//! src/covers.rs
//!
//! Adds a cover_url column to an exported csv that has a track_url
//! column, looking up each track's album art
//!

use std::path::Path;

use tracing::{info, warn};

use crate::errors::EtlError;
use crate::fetch::SpotifyClient;
use crate::types::Track;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverSummary {
    pub rows: usize,
    pub resolved: usize
}

/// `https://open.spotify.com/track/{id}?si=...` -> `{id}`
pub fn track_id_from_url(url: &str) -> Option<&str> {
    let last = url.trim().trim_end_matches('/').rsplit('/').next()?;
    let id = last.split('?').next()?;
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(id)
}

pub fn cover_url(track: &Track) -> Option<String> {
    track.album.images.first().map(|i| i.url.clone())
}

async fn lookup(spotify: &SpotifyClient, url: &str, bearer: &str) -> Result<String, EtlError> {
    let id = track_id_from_url(url)
        .ok_or_else(|| EtlError::Parse(format!("no track id in {url}")))?;
    let track = spotify.fetch_track(id, bearer).await?;
    cover_url(&track)
        .ok_or_else(|| EtlError::Parse(format!("no album images for {id}")))
}

pub async fn enrich_covers(
    spotify: &SpotifyClient,
    input: &Path,
    output: &Path
) -> Result<CoverSummary, EtlError> {
    let mut reader = csv::Reader::from_path(input)?;
    let headers = reader.headers()?.clone();
    let url_col = headers.iter()
        .position(|h| h == "track_url")
        .ok_or_else(|| EtlError::Parse(
            format!("{} has no track_url column", input.display())
        ))?;

    let token = spotify.client_credentials_token().await?;

    let mut writer = csv::Writer::from_path(output)?;
    let mut out_headers = headers.clone();
    out_headers.push_field("cover_url");
    writer.write_record(&out_headers)?;

    let mut summary = CoverSummary { rows: 0, resolved: 0 };
    for record in reader.records() {
        let mut record = record?;
        summary.rows += 1;

        let url = record.get(url_col).unwrap_or_default();
        let cover = match lookup(spotify, url, &token.access_token).await {
            Ok(cover) => {
                summary.resolved += 1;
                cover
            },
            Err(e) => {
                warn!(url, error = %e, "covers.unresolved");
                String::new()
            }
        };
        record.push_field(&cover);
        writer.write_record(&record)?;
    }
    writer.flush()?;

    info!(rows = summary.rows, resolved = summary.resolved, "covers.done");
    Ok(summary)
}
