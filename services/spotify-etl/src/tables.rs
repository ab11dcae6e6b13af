//!
//! src/tables.rs
//!
//! Aggregates normalized plays into the tracks and artists tables
//!

use std::collections::HashSet;

use chrono::{Datelike, NaiveDate};

use crate::types::{ArtistRecord, NormalizedPlay, TrackRecord};

#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub tracks: Vec<TrackRecord>,
    pub artists: Vec<ArtistRecord>
}

/// Release dates come as year, year-month or full date depending on
/// the album's precision. Anything unparseable becomes `None`.
pub fn parse_album_date(raw: &str) -> Option<NaiveDate> {
    let date = match raw.len() {
        4 => raw.parse::<i32>()
            .ok()
            .filter(|_| raw.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1)),
        7 => NaiveDate::parse_from_str(&format!("{raw}-01"), "%Y-%m-%d").ok(),
        _ => NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
    };
    // year zero is not a real release year
    date.filter(|d| d.year() >= 1)
}

/// `None` when no play qualified, nothing should be written then
pub fn build_tables(plays: impl IntoIterator<Item = NormalizedPlay>) -> Option<Tables> {
    let mut tables = Tables::default();
    let mut seen: HashSet<ArtistRecord> = HashSet::new();

    for NormalizedPlay { mut track, artists } in plays {
        track.album_release_date = track.album_release_raw
            .as_deref()
            .and_then(parse_album_date);
        tables.tracks.push(track);

        for artist in artists {
            if seen.insert(artist.clone()) {
                tables.artists.push(artist);
            }
        }
    }

    if tables.tracks.is_empty() {
        None
    } else {
        Some(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{LocalDay, normalize_events};
    use crate::normalize::tests::{event, ist, run_now};

    fn ymd(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    #[test]
    fn parses_each_release_precision() {
        assert_eq!(parse_album_date("2020"), ymd(2020, 1, 1));
        assert_eq!(parse_album_date("2020-05"), ymd(2020, 5, 1));
        assert_eq!(parse_album_date("2020-05-17"), ymd(2020, 5, 17));
    }

    #[test]
    fn bad_release_dates_are_none() {
        for raw in ["bad-date", "", "20x0", "2020-13", "2020-02-30", "+202", "0000", "0000-05", "0000-05-01"] {
            assert_eq!(parse_album_date(raw), None, "{raw} parsed");
        }
    }

    #[test]
    fn empty_input_short_circuits() {
        assert!(build_tables(Vec::new()).is_none());
    }

    #[test]
    fn shared_artist_keeps_one_row_per_track() {
        let day = LocalDay::new(run_now(), ist());
        let events = vec![
            event("t1", "2024-10-22T05:10:00Z", &[("a1", "One"), ("feat", "Guest")], false),
            event("t2", "2024-10-22T05:20:00Z", &[("a2", "Two"), ("feat", "Guest")], false),
        ];
        let tables = build_tables(normalize_events(&events, &day)).unwrap();

        let guest: Vec<_> = tables.artists.iter()
            .filter(|a| a.artist_id.as_deref() == Some("feat"))
            .map(|a| a.track_id.clone().unwrap())
            .collect();
        assert_eq!(guest, vec!["t1", "t2"]);
        assert_eq!(tables.artists.len(), 4);
    }

    #[test]
    fn replayed_track_dedups_artists_not_tracks() {
        let day = LocalDay::new(run_now(), ist());
        let events = vec![
            event("t1", "2024-10-22T05:40:00Z", &[("a1", "One"), ("a2", "Two"), ("a3", "Three")], true),
            event("t1", "2024-10-22T05:10:00Z", &[("a1", "One"), ("a2", "Two"), ("a3", "Three")], false),
        ];
        let tables = build_tables(normalize_events(&events, &day)).unwrap();

        assert_eq!(tables.tracks.len(), 2);
        let for_t1 = tables.artists.iter()
            .filter(|a| a.track_id.as_deref() == Some("t1"))
            .count();
        assert_eq!(for_t1, 3);
    }

    #[test]
    fn release_date_is_normalized() {
        let day = LocalDay::new(run_now(), ist());
        let events = vec![event("t1", "2024-10-22T05:10:00Z", &[("a1", "One")], false)];
        let tables = build_tables(normalize_events(&events, &day)).unwrap();
        assert_eq!(tables.tracks[0].album_release_date, ymd(2019, 6, 1));
    }
}
