//! Append-only per-session text logs of finalized rounds.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::config::{ArchiveConfig, RequestConfig};
use crate::error::{ArchiveError, ArchiveResult};

/// File each session's rounds are appended to.
pub const ARCHIVE_FILE_NAME: &str = "novel.txt";

/// Header written before each archived round.
pub fn round_header(round: u32) -> String {
    format!("\n\n=== Round {} ===\n\n", round)
}

/// Whether `session_id` is usable as a single path segment.
pub fn is_safe_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id != "."
        && session_id != ".."
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Destination of finalized round text.
#[async_trait]
pub trait ArchiveSink: Send + Sync {
    /// Append one round of a session.
    async fn append(&self, session_id: &str, round: u32, content: &str) -> ArchiveResult<()>;
}

/// Build the sink configured by `ARCHIVE_URL` or `ARCHIVE_DIR`, URL first.
pub fn sink_from_config(
    config: &ArchiveConfig,
    request: &RequestConfig,
) -> ArchiveResult<Option<Arc<dyn ArchiveSink>>> {
    if let Some(url) = &config.url {
        return Ok(Some(Arc::new(HttpArchiveSink::new(url, request)?)));
    }
    Ok(config
        .dir
        .as_ref()
        .map(|dir| Arc::new(FileArchiveSink::new(dir)) as Arc<dyn ArchiveSink>))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ArchiveRequest<'a> {
    session_id: &'a str,
    content: &'a str,
    round: u32,
}

/// Posts `{sessionId, content, round}` to an archive endpoint.
#[derive(Clone)]
pub struct HttpArchiveSink {
    client: Client,
    url: String,
}

impl HttpArchiveSink {
    /// Create a sink posting to `url`
    pub fn new(url: impl Into<String>, request: &RequestConfig) -> ArchiveResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ArchiveSink for HttpArchiveSink {
    async fn append(&self, session_id: &str, round: u32, content: &str) -> ArchiveResult<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&ArchiveRequest {
                session_id,
                content,
                round,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ArchiveError::Api {
                status: status.as_u16(),
                message,
            });
        }

        debug!(session_id, round, "Round archived over HTTP");
        Ok(())
    }
}

/// Appends rounds to `<root>/<session_id>/novel.txt`.
#[derive(Debug, Clone)]
pub struct FileArchiveSink {
    root: PathBuf,
}

impl FileArchiveSink {
    /// Create a sink under `root`
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Archive file of a session.
    pub fn path_for(&self, session_id: &str) -> ArchiveResult<PathBuf> {
        if !is_safe_session_id(session_id) {
            return Err(ArchiveError::InvalidSessionId {
                session_id: session_id.to_string(),
            });
        }
        Ok(self.root.join(session_id).join(ARCHIVE_FILE_NAME))
    }
}

#[async_trait]
impl ArchiveSink for FileArchiveSink {
    async fn append(&self, session_id: &str, round: u32, content: &str) -> ArchiveResult<()> {
        let path = self.path_for(session_id)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(round_header(round).as_bytes()).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;

        info!(session_id, round, path = %path.display(), "Round archived");
        Ok(())
    }
}
