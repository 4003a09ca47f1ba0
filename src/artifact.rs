//! Access to the QR artifact written by the protocol adapter.
//!
//! The coordinator only needs two capabilities, a modification-time probe and
//! a read that returns transport-safe text. The panel's file API implements
//! them remotely (see [`crate::panel`]); [`LocalArtifactSource`] implements
//! them against a directory tree on this host.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::rlog_trace;

#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Modification time of `path` inside `scope`, or `None` if it does not exist.
    async fn stat(&self, scope: &str, path: &str) -> Result<Option<DateTime<Utc>>>;

    /// Content of `path` inside `scope`, base64 encoded.
    async fn read_as_text(&self, scope: &str, path: &str) -> Result<String>;
}

/// Reads artifacts from `<base>/<scope>/<path>`, or `<path>` when no base is set.
#[derive(Debug, Clone, Default)]
pub struct LocalArtifactSource {
    base: Option<PathBuf>,
}

impl LocalArtifactSource {
    pub fn new(base: Option<PathBuf>) -> Self {
        Self { base }
    }

    fn resolve(&self, scope: &str, path: &str) -> PathBuf {
        match &self.base {
            Some(base) => base.join(scope).join(path),
            None => Path::new(path).to_path_buf(),
        }
    }
}

#[async_trait]
impl ArtifactSource for LocalArtifactSource {
    async fn stat(&self, scope: &str, path: &str) -> Result<Option<DateTime<Utc>>> {
        let full = self.resolve(scope, path);
        match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_file() => Ok(Some(DateTime::<Utc>::from(meta.modified()?))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_as_text(&self, scope: &str, path: &str) -> Result<String> {
        let full = self.resolve(scope, path);
        let bytes = tokio::fs::read(&full).await?;
        rlog_trace!("LocalArtifactSource: read {} bytes from {}", bytes.len(), full.display());
        Ok(STANDARD.encode(bytes))
    }
}
