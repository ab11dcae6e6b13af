//!
//! src/errors.rs
//!
//! Defines enums and methods of error conversion
//! for errors the etl job uses
//!
//!

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("config error: {0}")]
    Config(String),
    #[error("failed to refresh token: {status} - {body}")]
    AuthRefresh { status: u16, body: String },
    #[error("upstream error: {status} - {body}")]
    Upstream { status: u16, body: String },
    #[error("rate limited: retry {0:?}")]
    RateLimited(Option<String>),
    #[error("http error: {0}")]
    Http(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("csv error: {0}")]
    Csv(String),
    #[error("sink error: {0}")]
    Sink(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error)
}

impl From<reqwest::Error> for EtlError {
    fn from(e: reqwest::Error) -> Self { EtlError::Http(e.to_string()) }
}

impl From<serde_json::Error> for EtlError {
    fn from(e: serde_json::Error) -> Self { EtlError::Parse(e.to_string()) }
}

impl From<csv::Error> for EtlError {
    fn from(e: csv::Error) -> Self { EtlError::Csv(e.to_string()) }
}

impl From<object_store::Error> for EtlError {
    fn from(e: object_store::Error) -> Self { EtlError::Sink(e.to_string()) }
}
