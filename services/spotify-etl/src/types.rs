use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

// Raw shapes returned by the Web API, only the fields the job reads

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalUrls {
    #[serde(default)]
    pub spotify: Option<String>
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimplifiedArtist {
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub external_urls: ExternalUrls
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub url: String
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Album {
    pub id: Option<String>,
    pub name: String,
    pub release_date: Option<String>,
    pub total_tracks: Option<u32>,
    #[serde(default)]
    pub external_urls: ExternalUrls,
    #[serde(default)]
    pub images: Vec<Image>
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<SimplifiedArtist>,
    pub duration_ms: u64,
    pub explicit: bool,
    pub popularity: Option<u32>,
    pub track_number: Option<u32>,
    #[serde(default)]
    pub external_urls: ExternalUrls,
    pub album: Album
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackContext {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub external_urls: ExternalUrls
}

/// One play from GET /me/player/recently-played
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackEvent {
    pub track: Track,
    pub played_at: String,
    #[serde(default)]
    pub context: Option<PlaybackContext>
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecentlyPlayedPage {
    #[serde(default)]
    pub items: Option<Vec<PlaybackEvent>>,
    pub next: Option<String>
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
    pub refresh_token: Option<String>
}

// Derived rows, field order is the csv column order

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackRecord {
    pub track_id: Option<String>,
    pub track_name: String,
    pub album_artist_id: Option<String>,
    pub album_artist_name: Option<String>,
    pub duration_ms: u64,
    pub explicit: bool,
    pub popularity: Option<u32>,
    pub track_number: Option<u32>,
    pub played_at: DateTime<FixedOffset>,
    pub track_url: Option<String>,
    pub artist_url: Option<String>,
    pub album_id: Option<String>,
    pub album_name: String,
    /// Filled by the table builder from `album_release_raw`
    pub album_release_date: Option<NaiveDate>,
    pub total_tracks: Option<u32>,
    pub album_url: Option<String>,
    pub context_type: Option<String>,
    pub playlist_url: Option<String>,
    #[serde(skip)]
    pub album_release_raw: Option<String>
}

impl TrackRecord {
    pub const HEADERS: [&'static str; 18] = [
        "track_id", "track_name", "album_artist_id", "album_artist_name",
        "duration_ms", "explicit", "popularity", "track_number", "played_at",
        "track_url", "artist_url", "album_id", "album_name",
        "album_release_date", "total_tracks", "album_url", "context_type",
        "playlist_url",
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ArtistRecord {
    pub track_id: Option<String>,
    pub artist_id: Option<String>,
    pub artist_name: String
}

impl ArtistRecord {
    pub const HEADERS: [&'static str; 3] = ["track_id", "artist_id", "artist_name"];
}

/// A qualifying play split into its two table rows
#[derive(Debug, Clone)]
pub struct NormalizedPlay {
    pub track: TrackRecord,
    pub artists: Vec<ArtistRecord>
}
