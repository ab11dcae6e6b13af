//!
//! src/sink.rs
//!
//! Serializes tables to csv and writes them as single objects into
//! the configured object store, one folder per table kind
//!

use std::{fs, sync::Arc};

use chrono::{DateTime, FixedOffset};
use object_store::{
    aws::AmazonS3Builder, local::LocalFileSystem, path::Path, ObjectStore, PutPayload
};
use serde::Serialize;

use crate::config::{StorageBackend, StorageConfig};
use crate::errors::EtlError;

const STAMP_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Tracks,
    Artists
}

impl TableKind {
    pub fn name(self) -> &'static str {
        match self {
            TableKind::Tracks => "tracks",
            TableKind::Artists => "artists",
        }
    }
}

/// `{kind}_{YYYY-MM-DD_HH:MM:SS}.csv`
pub fn file_name(kind: TableKind, stamp: &DateTime<FixedOffset>) -> String {
    format!("{}_{}.csv", kind.name(), stamp.format(STAMP_FORMAT))
}

/// Header row first even when there are no rows, nulls as empty fields
pub fn encode_csv<T: Serialize>(headers: &[&str], rows: &[T]) -> Result<Vec<u8>, EtlError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    writer.write_record(headers)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.into_inner()
        .map_err(|e| EtlError::Csv(format!("flush: {e}")))
}

pub struct TableSink {
    store: Arc<dyn ObjectStore>,
    tracks_folder: String,
    artists_folder: String
}

impl TableSink {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        tracks_folder: impl Into<String>,
        artists_folder: impl Into<String>
    ) -> Self {
        Self {
            store,
            tracks_folder: tracks_folder.into(),
            artists_folder: artists_folder.into()
        }
    }

    pub fn from_config(cfg: &StorageConfig) -> Result<Self, EtlError> {
        let store: Arc<dyn ObjectStore> = match cfg.backend {
            StorageBackend::S3 => {
                let creds = cfg.s3.as_ref().ok_or_else(||
                    EtlError::Config("s3 backend without credentials".to_string()))?;

                let mut builder = AmazonS3Builder::new()
                    .with_bucket_name(&cfg.bucket)
                    .with_region(&creds.region)
                    .with_access_key_id(&creds.access_key_id)
                    .with_secret_access_key(&creds.secret_access_key);
                if let Some(endpoint) = &creds.endpoint {
                    builder = builder
                        .with_endpoint(endpoint)
                        .with_allow_http(endpoint.starts_with("http://"));
                }
                Arc::new(builder.build()?) as Arc<dyn ObjectStore>
            },
            StorageBackend::Local => {
                let root = cfg.local_root.join(&cfg.bucket);
                fs::create_dir_all(&root).map_err(|e|
                    EtlError::Sink(format!("create dir {}: {e}", root.display())))?;
                Arc::new(LocalFileSystem::new_with_prefix(&root)?) as Arc<dyn ObjectStore>
            }
        };

        Ok( Self::new(store, cfg.tracks_folder.clone(), cfg.artists_folder.clone()) )
    }

    #[cfg(test)]
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    fn folder(&self, kind: TableKind) -> &str {
        match kind {
            TableKind::Tracks => &self.tracks_folder,
            TableKind::Artists => &self.artists_folder,
        }
    }

    pub fn location(&self, kind: TableKind, stamp: &DateTime<FixedOffset>) -> Path {
        let folder = self.folder(kind).trim_matches('/');
        let name = file_name(kind, stamp);
        if folder.is_empty() {
            Path::from(name)
        } else {
            Path::from(format!("{folder}/{name}"))
        }
    }

    /// Single-object PUT, a failure leaves nothing to clean up
    pub async fn put(&self, location: &Path, body: Vec<u8>) -> Result<(), EtlError> {
        let bytes = body.len();
        self.store.put(location, PutPayload::from(body)).await
            .map_err(|e| EtlError::Sink(format!("put {location}: {e}")))?;
        tracing::info!(location = %location, bytes, "sink.put");
        Ok(())
    }
}
