//!
//! src/config.rs
//!
//! Reads the environment once at program start and validates it into
//! the read-only AppConfig handed to every stage of the job
//!

use chrono::FixedOffset;
use url::Url;
use std::{path::PathBuf, time};
use crate::errors::EtlError;

/// Constants for HTTP Config
pub const HTTP_TIMEOUT: u64 = 8000;
pub const HTTP_CONNECT_TIMEOUT: u64 = 2000;
pub const HTTP_POOL_MAX_IDLE: usize = 4;
pub const HTTP_POOL_IDLE_TIMEOUT: u64 = 90000;
pub const HTTP_MAX_REDIRECTS: u8 = 4;

/// Constants for the scheduler, mirrors the deployed trigger
pub const SCHEDULE_HOURS: [u32; 3] = [11, 18, 23];
pub const RETRY_MAX_ATTEMPTS: u8 = 2;
pub const RETRY_DELAY: u64 = 60;
pub const RETRY_JITTER: bool = true;

pub const DEFAULT_UTC_OFFSET: &str = "+05:30";
pub const SPOTIFY_MAX_LIMIT: u32 = 50;
pub const RECENTLY_PLAYED_SCOPE: &str = "user-read-recently-played";

/// Variable lookup, std::env in production and a map in tests
pub struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>
}

impl<'a> Env<'a> {
    pub fn new(lookup: &'a dyn Fn(&str) -> Option<String>) -> Self {
        Self { lookup }
    }

    fn get(&self, s: &str) -> Option<String> {
        (self.lookup)(s)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Returns an invalid enviroment var error if missing or blank
    fn env_check(&self, s: &str) -> Result<String, EtlError> {
        self.get(s)
            .ok_or_else(|| EtlError::Config(format!("{s} was not set")))
    }

    fn or(&self, s: &str, default: &str) -> String {
        self.get(s).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T: std::str::FromStr>(&self, s: &str, default: T) ->
        Result<T, EtlError> {
        match self.get(s) {
            Some(v) => v.parse::<T>()
                .map_err(|_| EtlError::Config(format!("{s} invalid: {v}"))),
            None => Ok(default)
        }
    }
}

/// Ensures that url is https
fn ensure_https(url: &Url) -> Result<(), String> {
    if url.scheme() == "https" {
        Ok(())
    } else {
        Err(format!("URL must be https: {url}"))
    }
}

fn ensure_host(url: &Url, expected_host: &str) -> Result<(), String> {
    match url.host_str() {
        Some(h) if h.eq_ignore_ascii_case(expected_host) => Ok(()),
        Some(h) => Err(
            format!("Unexpected host for {url} (got {h}, expected {expected_host})")
        ),
        None => Err(format!("URL missing host: {url}"))
    }
}

fn ensure_trailing_slash(url: &mut Url) {
    if !url.path().ends_with('/') {
        let mut path = url.path().to_string();
        path.push('/');
        url.set_path(&path);
    }
}

fn spotify_url(env: &Env, key: &str, default: &str, host: &str) ->
    Result<Url, EtlError> {
    let raw = env.or(key, default);
    let url = Url::parse(&raw)
        .map_err(|e| EtlError::Config(format!("{key} invalid {e}")))?;

    ensure_https(&url).map_err(EtlError::Config)?;
    ensure_host(&url, host).map_err(EtlError::Config)?;
    Ok(url)
}

///
/// Configuration that Spotify expects when hitting endpoints
///
#[derive(Debug, Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: Url,
    pub scope: String,
    pub refresh_token: Option<String>,
    pub token_url: Url,
    pub authorize_url: Url,
    pub api_base: Url,
}

impl SpotifyConfig {
    /// Scope must grant access to listening history
    pub fn grants_recently_played(&self) -> bool {
        self.scope.split_whitespace().any(|s| s == RECENTLY_PLAYED_SCOPE)
    }
}

fn build_spotify(env: &Env) -> Result<SpotifyConfig, EtlError> {
    let client_id     = env.env_check("SPOTIFY_CLIENT_ID")?;
    let client_secret = env.env_check("SPOTIFY_CLIENT_SECRET")?;
    let scope         = env.env_check("SPOTIFY_SCOPE")?;
    let refresh_token = env.get("SPOTIFY_REFRESH_TOKEN");

    let redirect_uri = env.env_check("SPOTIFY_REDIRECT_URI")?;
    let redirect_uri = Url::parse(&redirect_uri)
        .map_err(|e| EtlError::Config(format!("SPOTIFY_REDIRECT_URI invalid {e}")))?;

    let token_url = spotify_url(
        env,
        "SPOTIFY_TOKEN_URL",
        "https://accounts.spotify.com/api/token",
        "accounts.spotify.com"
    )?;
    let authorize_url = spotify_url(
        env,
        "SPOTIFY_AUTHORIZE_URL",
        "https://accounts.spotify.com/authorize",
        "accounts.spotify.com"
    )?;
    let mut api_base = spotify_url(
        env,
        "SPOTIFY_API_BASE",
        "https://api.spotify.com/v1/",
        "api.spotify.com"
    )?;
    ensure_trailing_slash(&mut api_base);

    Ok( SpotifyConfig {
        client_id, client_secret, redirect_uri, scope, refresh_token,
        token_url, authorize_url, api_base
    })
}

///
/// Configuration of the extract/transform step
///
#[derive(Debug, Clone)]
pub struct EtlConfig {
    pub fetch_limit: u32,
    pub utc_offset: FixedOffset,
}

fn build_etl(env: &Env) -> Result<EtlConfig, EtlError> {
    let raw = env.env_check("ETL_LIMIT")?;
    let fetch_limit = raw.parse::<u32>()
        .ok()
        .filter(|l| (1..=SPOTIFY_MAX_LIMIT).contains(l))
        .ok_or_else(|| EtlError::Config(
            format!("ETL_LIMIT must be in 1..={SPOTIFY_MAX_LIMIT}, got {raw}")
        ))?;

    let raw = env.or("ETL_UTC_OFFSET", DEFAULT_UTC_OFFSET);
    let utc_offset = raw.parse::<FixedOffset>()
        .map_err(|e| EtlError::Config(format!("ETL_UTC_OFFSET invalid {raw}: {e}")))?;

    Ok( EtlConfig { fetch_limit, utc_offset } )
}

///
/// Configuration for the object store that receives the csv snapshots
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    S3,
    Local
}

#[derive(Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub endpoint: Option<String>,
}

// keep secrets out of the startup log
impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub bucket: String,
    pub tracks_folder: String,
    pub artists_folder: String,
    pub s3: Option<S3Credentials>,
    pub local_root: PathBuf,
}

fn build_storage(env: &Env) -> Result<StorageConfig, EtlError> {
    let backend = match env.or("STORAGE_BACKEND", "s3").to_ascii_lowercase().as_str() {
        "s3"    => StorageBackend::S3,
        "local" => StorageBackend::Local,
        other   => return Err(EtlError::Config(
            format!("STORAGE_BACKEND must be s3 or local, got {other}")
        ))
    };

    let bucket         = env.env_check("S3_BUCKET")?;
    let tracks_folder  = env.env_check("S3_TRACKS_FOLDER")?;
    let artists_folder = env.env_check("S3_ARTISTS_FOLDER")?;

    let s3 = match backend {
        StorageBackend::S3 => Some(S3Credentials {
            access_key_id: env.env_check("AWS_ACCESS_KEY_ID")?,
            secret_access_key: env.env_check("AWS_SECRET_ACCESS_KEY")?,
            region: env.or("AWS_REGION", "us-east-1"),
            endpoint: env.get("S3_ENDPOINT"),
        }),
        StorageBackend::Local => None
    };
    let local_root = PathBuf::from(env.or("LOCAL_STORE_ROOT", "./data"));

    Ok( StorageConfig {
        backend, bucket, tracks_folder, artists_folder, s3, local_root
    })
}

///
/// Configuration for the in-process trigger
///
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub hours: Vec<u32>,
    pub retries: u8,
    pub retry_delay: time::Duration,
    pub jitter: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            hours: SCHEDULE_HOURS.to_vec(),
            retries: RETRY_MAX_ATTEMPTS,
            retry_delay: time::Duration::from_secs(RETRY_DELAY),
            jitter: RETRY_JITTER
        }
    }
}

fn build_schedule(env: &Env) -> Result<ScheduleConfig, EtlError> {
    let defaults = ScheduleConfig::default();

    let hours = match env.get("ETL_SCHEDULE_HOURS") {
        Some(raw) => {
            let mut hours = raw.split(',')
                .map(|h| h.trim().parse::<u32>().ok().filter(|h| *h < 24))
                .collect::<Option<Vec<u32>>>()
                .filter(|h| !h.is_empty())
                .ok_or_else(|| EtlError::Config(
                    format!("ETL_SCHEDULE_HOURS invalid: {raw}")
                ))?;
            hours.sort_unstable();
            hours.dedup();
            hours
        },
        None => defaults.hours
    };

    let retries = env.parse_or("ETL_RETRIES", defaults.retries)?;
    let delay   = env.parse_or("ETL_RETRY_DELAY_SECS", RETRY_DELAY)?;

    Ok( ScheduleConfig {
        hours,
        retries,
        retry_delay: time::Duration::from_secs(delay),
        jitter: defaults.jitter
    })
}

///
/// Configuration for Http timeouts, pooling, etc.
///
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: time::Duration,
    pub connect_timeout: time::Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: time::Duration,
    pub max_redirects: u8,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: time::Duration::from_millis(HTTP_TIMEOUT),
            connect_timeout: time::Duration::from_millis(HTTP_CONNECT_TIMEOUT),
            pool_max_idle_per_host: HTTP_POOL_MAX_IDLE,
            pool_idle_timeout: time::Duration::from_millis(HTTP_POOL_IDLE_TIMEOUT),
            max_redirects: HTTP_MAX_REDIRECTS,
        }
    }
}

///
/// Configuration for Logger
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub filter_directives: String,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub include_file_line: bool,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter_directives: "info,spotify_etl=debug,reqwest=warn".to_string(),
            format: LogFormat::Json,
            with_ansi: true,
            include_file_line: true,
            include_target: true,
        }
    }
}

fn build_logging(env: &Env) -> Result<LoggingConfig, EtlError> {
    let format = match env.or("LOG_FORMAT", "json").to_ascii_lowercase().as_str() {
        "json"   => LogFormat::Json,
        "pretty" => LogFormat::Pretty,
        other    => return Err(EtlError::Config(
            format!("LOG_FORMAT must be json or pretty, got {other}")
        ))
    };
    Ok( LoggingConfig { format, ..LoggingConfig::default() } )
}

///
/// Spotify app settings alone, enough for the auth helpers and covers
///
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub spotify: SpotifyConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig
}

///
/// AppConfig which holds everything a run or the scheduler needs
///
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub spotify: SpotifyConfig,
    pub etl: EtlConfig,
    pub storage: StorageConfig,
    pub schedule: ScheduleConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig
}

fn process_env(s: &str) -> Option<String> {
    std::env::var(s).ok()
}

pub fn load_auth_config_from(env: &Env) -> Result<AuthConfig, EtlError> {
    let spotify = build_spotify(env)?;
    let http    = HttpConfig::default();
    let logging = build_logging(env)?;

    Ok( AuthConfig { spotify, http, logging } )
}

pub fn load_config_from(env: &Env) -> Result<AppConfig, EtlError> {
    let spotify = build_spotify(env)?;
    if spotify.refresh_token.is_none() {
        return Err(EtlError::Config("SPOTIFY_REFRESH_TOKEN was not set".to_string()));
    }

    let etl      = build_etl(env)?;
    let storage  = build_storage(env)?;
    let schedule = build_schedule(env)?;
    let http     = HttpConfig::default();
    let logging  = build_logging(env)?;

    Ok( AppConfig { spotify, etl, storage, schedule, http, logging } )
}

///
/// Return all environment variables to caller at program start.
///
pub fn load_config() -> Result<AppConfig, EtlError> {
    dotenvy::dotenv().ok();
    load_config_from(&Env::new(&process_env))
}

pub fn load_auth_config() -> Result<AuthConfig, EtlError> {
    dotenvy::dotenv().ok();
    load_auth_config_from(&Env::new(&process_env))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_vars() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("SPOTIFY_CLIENT_ID", "client-id"),
            ("SPOTIFY_CLIENT_SECRET", "client-secret"),
            ("SPOTIFY_REDIRECT_URI", "http://localhost:8888/callback"),
            ("SPOTIFY_SCOPE", "user-read-recently-played"),
            ("SPOTIFY_REFRESH_TOKEN", "refresh"),
            ("ETL_LIMIT", "50"),
            ("S3_BUCKET", "listening-history"),
            ("S3_TRACKS_FOLDER", "tracks"),
            ("S3_ARTISTS_FOLDER", "artists"),
            ("AWS_ACCESS_KEY_ID", "AKIA"),
            ("AWS_SECRET_ACCESS_KEY", "secret"),
        ])
    }

    fn load(vars: &HashMap<&'static str, &'static str>) -> Result<AppConfig, EtlError> {
        let lookup = |k: &str| vars.get(k).map(|v| v.to_string());
        load_config_from(&Env::new(&lookup))
    }

    #[test]
    fn loads_defaults() {
        let cfg = load(&base_vars()).unwrap();

        assert_eq!(cfg.etl.fetch_limit, 50);
        assert_eq!(cfg.etl.utc_offset.local_minus_utc(), 5 * 3600 + 30 * 60);
        assert_eq!(cfg.storage.backend, StorageBackend::S3);
        assert_eq!(cfg.storage.s3.as_ref().unwrap().region, "us-east-1");
        assert_eq!(cfg.schedule.hours, vec![11, 18, 23]);
        assert_eq!(cfg.schedule.retries, 2);
        assert_eq!(cfg.spotify.api_base.as_str(), "https://api.spotify.com/v1/");
        assert!(cfg.spotify.grants_recently_played());
    }

    #[test]
    fn blank_credential_is_missing() {
        let mut vars = base_vars();
        vars.insert("SPOTIFY_CLIENT_SECRET", "   ");

        match load(&vars) {
            Err(EtlError::Config(msg)) => assert!(msg.contains("SPOTIFY_CLIENT_SECRET")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn refresh_token_required_for_runs_only() {
        let mut vars = base_vars();
        vars.remove("SPOTIFY_REFRESH_TOKEN");
        assert!(load(&vars).is_err());

        let lookup = |k: &str| vars.get(k).map(|v| v.to_string());
        let auth = load_auth_config_from(&Env::new(&lookup)).unwrap();
        assert!(auth.spotify.refresh_token.is_none());
    }

    #[test]
    fn rejects_out_of_range_limit() {
        for bad in ["0", "51", "-3", "ten"] {
            let mut vars = base_vars();
            vars.insert("ETL_LIMIT", bad);
            assert!(load(&vars).is_err(), "limit {bad} accepted");
        }
    }

    #[test]
    fn rejects_foreign_token_host() {
        let mut vars = base_vars();
        vars.insert("SPOTIFY_TOKEN_URL", "https://evil.example.com/api/token");
        assert!(load(&vars).is_err());

        vars.insert("SPOTIFY_TOKEN_URL", "http://accounts.spotify.com/api/token");
        assert!(load(&vars).is_err());
    }

    #[test]
    fn local_backend_skips_aws_credentials() {
        let mut vars = base_vars();
        vars.remove("AWS_ACCESS_KEY_ID");
        vars.remove("AWS_SECRET_ACCESS_KEY");
        assert!(load(&vars).is_err());

        vars.insert("STORAGE_BACKEND", "local");
        vars.insert("LOCAL_STORE_ROOT", "/tmp/etl");
        let cfg = load(&vars).unwrap();
        assert_eq!(cfg.storage.backend, StorageBackend::Local);
        assert!(cfg.storage.s3.is_none());
        assert_eq!(cfg.storage.local_root, PathBuf::from("/tmp/etl"));
    }

    #[test]
    fn parses_schedule_and_offset() {
        let mut vars = base_vars();
        vars.insert("ETL_SCHEDULE_HOURS", "23, 11,18,11");
        vars.insert("ETL_UTC_OFFSET", "-03:00");
        vars.insert("ETL_RETRY_DELAY_SECS", "5");
        let cfg = load(&vars).unwrap();

        assert_eq!(cfg.schedule.hours, vec![11, 18, 23]);
        assert_eq!(cfg.schedule.retry_delay, time::Duration::from_secs(5));
        assert_eq!(cfg.etl.utc_offset.local_minus_utc(), -3 * 3600);

        vars.insert("ETL_SCHEDULE_HOURS", "11,24");
        assert!(load(&vars).is_err());
    }

    #[test]
    fn scope_without_history_is_detected() {
        let mut vars = base_vars();
        vars.insert("SPOTIFY_SCOPE", "user-top-read user-read-recently-played-extra");
        let cfg = load(&vars).unwrap();
        assert!(!cfg.spotify.grants_recently_played());
    }

    #[test]
    fn debug_redacts_secret() {
        let cfg = load(&base_vars()).unwrap();
        let printed = format!("{:?}", cfg.storage);
        assert!(!printed.contains("\"secret\""));
        assert!(printed.contains("<redacted>"));
    }
}
