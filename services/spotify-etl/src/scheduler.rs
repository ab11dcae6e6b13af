//!
//! src/scheduler.rs
//!
//! Fires the job at fixed local hours. A failed run is retried a fixed
//! number of times before the loop gives up and waits for the next
//! fire time. Runs never overlap.
//!

use std::time::Duration;

use chrono::{DateTime, Days, FixedOffset, NaiveTime, TimeZone, Utc};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{EtlConfig, ScheduleConfig};
use crate::errors::EtlError;
use crate::etl::{run_etl, RunOutcome};
use crate::fetch::SpotifyClient;
use crate::sink::TableSink;

/// First `HH:00:00` among `hours` strictly after `now`, in `now`'s offset
pub fn next_fire(now: DateTime<FixedOffset>, hours: &[u32]) -> Option<DateTime<FixedOffset>> {
    let offset = *now.offset();
    let mut sorted = hours.to_vec();
    sorted.sort_unstable();

    let today = now.date_naive();
    let tomorrow = today.checked_add_days(Days::new(1))?;

    [today, tomorrow].into_iter()
        .flat_map(|day| sorted.iter().map(move |h| (day, *h)))
        .filter_map(|(day, h)| {
            let time = NaiveTime::from_hms_opt(h, 0, 0)?;
            offset.from_local_datetime(&day.and_time(time)).single()
        })
        .find(|fire| *fire > now)
}

/// Small random spread added to retry delays
fn jitter(enabled: bool, rng: &mut SmallRng) -> Duration {
    if enabled {
        Duration::from_millis(rng.gen_range(50..=500))
    } else {
        Duration::ZERO
    }
}

/// One scheduled fire, with the configured retries
pub async fn run_with_retries(
    etl: &EtlConfig,
    schedule: &ScheduleConfig,
    spotify: &SpotifyClient,
    sink: &TableSink,
    cancel: &CancellationToken
) -> Result<RunOutcome, EtlError> {
    let mut rng = SmallRng::from_entropy();
    let mut attempt = 0_u8;
    loop {
        match run_etl(etl, spotify, sink, Utc::now()).await {
            Ok(outcome) => return Ok(outcome),
            Err(e) if attempt < schedule.retries => {
                let backoff = schedule.retry_delay + jitter(schedule.jitter, &mut rng);
                warn!(
                    error = %e,
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    "etl.retry"
                );
                tokio::select! {
                    _ = sleep(backoff) => {},
                    _ = cancel.cancelled() => return Err(e),
                }
                attempt += 1;
            },
            Err(e) => return Err(e)
        }
    }
}

/// Loops until `cancel` fires, a failed fire does not stop the loop
pub async fn run_schedule(
    etl: &EtlConfig,
    schedule: &ScheduleConfig,
    spotify: &SpotifyClient,
    sink: &TableSink,
    cancel: CancellationToken
) -> Result<(), EtlError> {
    loop {
        let now = Utc::now().with_timezone(&etl.utc_offset);
        let fire = next_fire(now, &schedule.hours).ok_or_else(||
            EtlError::Config("no schedulable hour".to_string()))?;
        let wait = (fire - now).to_std().unwrap_or(Duration::ZERO);
        info!(next_fire = %fire, wait_s = wait.as_secs(), "schedule.waiting");

        tokio::select! {
            _ = sleep(wait) => {},
            _ = cancel.cancelled() => {
                info!("schedule.cancelled");
                return Ok(());
            }
        }

        match run_with_retries(etl, schedule, spotify, sink, &cancel).await {
            Ok(outcome) => info!(outcome = ?outcome, "schedule.fire.done"),
            Err(e) => error!(error = %e, retries = schedule.retries, "schedule.fire.failed"),
        }

        if cancel.is_cancelled() {
            return Ok(());
        }
    }
}
