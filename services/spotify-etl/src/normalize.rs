//!
//! src/normalize.rs
//!
//! Flattens raw playback events into track and artist rows, keeping
//! only the plays that happened on the run's local calendar day
//!

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use tracing::{debug, warn};

use crate::types::{ArtistRecord, NormalizedPlay, PlaybackEvent, TrackRecord};

const ZONED_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"];
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// The local calendar day a run collects plays for
#[derive(Debug, Clone, Copy)]
pub struct LocalDay {
    pub offset: FixedOffset,
    pub today: NaiveDate
}

impl LocalDay {
    pub fn new(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self { offset, today: now.with_timezone(&offset).date_naive() }
    }

    pub fn contains(&self, at: &DateTime<FixedOffset>) -> bool {
        at.date_naive() == self.today
    }
}

/// Parses an upstream timestamp into a UTC instant. Zone-naive input is UTC.
pub fn parse_played_at(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(zoned) = DateTime::parse_from_rfc3339(raw) {
        return Some(zoned.with_timezone(&Utc));
    }
    // basic offsets like +0000 are not rfc 3339
    if let Some(zoned) = ZONED_FORMATS.iter()
        .find_map(|fmt| DateTime::parse_from_str(raw, fmt).ok()) {
        return Some(zoned.with_timezone(&Utc));
    }
    NAIVE_FORMATS.iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

pub fn localize_played_at(raw: &str, offset: &FixedOffset) -> Option<DateTime<FixedOffset>> {
    parse_played_at(raw).map(|utc| utc.with_timezone(offset))
}

/// Zero or one row set per event, `None` when the play is not from today
pub fn normalize_event(event: &PlaybackEvent, day: &LocalDay) -> Option<NormalizedPlay> {
    let Some(played_at) = localize_played_at(&event.played_at, &day.offset) else {
        warn!(played_at = %event.played_at, "event.unparseable_timestamp");
        return None;
    };
    if !day.contains(&played_at) {
        debug!(played_at = %played_at, today = %day.today, "event.outside_day");
        return None;
    }

    let track = &event.track;
    let album = &track.album;
    let primary = track.artists.first();

    let (context_type, playlist_url) = match &event.context {
        Some(ctx) => (ctx.kind.clone(), ctx.external_urls.spotify.clone()),
        None => (None, None)
    };

    let record = TrackRecord {
        track_id: track.id.clone(),
        track_name: track.name.clone(),
        album_artist_id: primary.and_then(|a| a.id.clone()),
        album_artist_name: primary.map(|a| a.name.clone()),
        duration_ms: track.duration_ms,
        explicit: track.explicit,
        popularity: track.popularity,
        track_number: track.track_number,
        played_at,
        track_url: track.external_urls.spotify.clone(),
        artist_url: primary.and_then(|a| a.external_urls.spotify.clone()),
        album_id: album.id.clone(),
        album_name: album.name.clone(),
        album_release_date: None,
        total_tracks: album.total_tracks,
        album_url: album.external_urls.spotify.clone(),
        context_type,
        playlist_url,
        album_release_raw: album.release_date.clone(),
    };

    let artists = track.artists.iter()
        .map(|a| ArtistRecord {
            track_id: track.id.clone(),
            artist_id: a.id.clone(),
            artist_name: a.name.clone(),
        })
        .collect();

    Some( NormalizedPlay { track: record, artists } )
}

pub fn normalize_events<'a>(
    events: impl IntoIterator<Item = &'a PlaybackEvent>,
    day: &LocalDay
) -> Vec<NormalizedPlay> {
    events.into_iter()
        .filter_map(|e| normalize_event(e, day))
        .collect()
}
