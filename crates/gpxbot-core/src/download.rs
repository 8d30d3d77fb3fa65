//! Batch download engine
//!
//! Key principles:
//! - One fetch per link reference, all dispatched together (bounded by a limit)
//! - A failing reference never cancels or delays its siblings
//! - Every reference yields exactly one result, in input order
//! - Each success is a transient file owned by an `Artifact`

use crate::error::{DownloadError, ParseError};
use crate::links::LinkExtractor;
use crate::session::GpxSource;
use futures::{stream, StreamExt};
use gpxbot_types::LinkReference;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A transient track file waiting to be delivered
///
/// The file is removed when the artifact is dropped, so it never outlives
/// its owner whatever path the owner takes.
#[derive(Debug)]
pub struct Artifact {
    path: PathBuf,
    filename: String,
    armed: bool,
}

impl Artifact {
    /// Reserve a unique path in `dir` for a file suggested as `filename`
    pub fn new(dir: &Path, filename: impl Into<String>) -> Self {
        Self {
            path: dir.join(format!("{}.gpx", Uuid::new_v4())),
            filename: filename.into(),
            armed: true,
        }
    }

    /// Location of the transient file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name to present the file under
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Delete the transient file now
    pub async fn remove(mut self) -> std::io::Result<()> {
        self.armed = false;
        match tokio::fs::remove_file(&self.path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

impl Drop for Artifact {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Why a reference produced no artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The link could not be resolved to a route
    Parse,
    /// The export could not be fetched or stored
    Download,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl fmt::Display for DownloadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} failure: {}", self.kind, self.detail)
    }
}

impl From<ParseError> for DownloadFailure {
    fn from(error: ParseError) -> Self {
        Self {
            kind: FailureKind::Parse,
            detail: error.to_string(),
        }
    }
}

impl From<DownloadError> for DownloadFailure {
    fn from(error: DownloadError) -> Self {
        Self {
            kind: FailureKind::Download,
            detail: error.to_string(),
        }
    }
}

/// Outcome for one reference of a batch
#[derive(Debug)]
pub struct DownloadResult {
    pub reference: LinkReference,
    pub outcome: Result<Artifact, DownloadFailure>,
}

impl DownloadResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Fetches batches of link references into transient files
#[derive(Clone)]
pub struct DownloadOrchestrator {
    source: Arc<dyn GpxSource>,
    extractor: LinkExtractor,
    artifact_dir: PathBuf,
    max_concurrent: usize,
    fetch_timeout: Duration,
}

impl DownloadOrchestrator {
    pub fn new(
        source: Arc<dyn GpxSource>,
        artifact_dir: PathBuf,
        max_concurrent: usize,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            extractor: LinkExtractor::new(Arc::clone(&source)),
            source,
            artifact_dir,
            max_concurrent: max_concurrent.max(1),
            fetch_timeout,
        }
    }

    /// Fetch every reference, isolating failures per reference
    ///
    /// Returns one result per reference, in the order given.
    pub async fn download_all(&self, references: Vec<LinkReference>) -> Vec<DownloadResult> {
        let count = references.len();
        info!(count, "Starting batch download");

        // Completion order frees slots; the index restores input order afterwards
        let mut indexed: Vec<_> = stream::iter(references.into_iter().enumerate())
            .map(|(index, reference)| async move {
                let outcome = self.fetch_with_timeout(&reference).await;
                match &outcome {
                    Ok(artifact) => debug!(%reference, file = %artifact.filename(), "Fetched"),
                    Err(failure) => warn!(%reference, %failure, "Fetch failed"),
                }
                (index, DownloadResult { reference, outcome })
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        indexed.sort_by_key(|(index, _)| *index);
        let results: Vec<DownloadResult> = indexed.into_iter().map(|(_, r)| r).collect();

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        info!(count, succeeded, "Batch download finished");
        results
    }

    async fn fetch_with_timeout(&self, reference: &LinkReference) -> Result<Artifact, DownloadFailure> {
        match tokio::time::timeout(self.fetch_timeout, self.fetch(reference)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(DownloadError::Timeout.into()),
        }
    }

    async fn fetch(&self, reference: &LinkReference) -> Result<Artifact, DownloadFailure> {
        match self.extractor.resolve(reference).await? {
            LinkReference::Route(id) => Ok(self.download_route(id).await?),
            LinkReference::Activity(id) => Ok(self.download_activity(id).await?),
            LinkReference::Share(token) => Err(ParseError::NoRoute(token).into()),
        }
    }

    /// Stream a route export to a new transient file
    async fn download_route(&self, route_id: u64) -> Result<Artifact, DownloadError> {
        let export = self.source.fetch_route_export(route_id).await?;

        // Created before the first write so a failure below removes the partial file
        let artifact = Artifact::new(&self.artifact_dir, export.filename);
        let mut file = File::create(artifact.path()).await?;
        let mut body = export.body;

        while let Some(chunk) = body.next().await {
            file.write_all(&chunk?).await?;
        }
        file.sync_all().await?;

        Ok(artifact)
    }

    /// Persist an activity export to a new transient file
    async fn download_activity(&self, activity_id: u64) -> Result<Artifact, DownloadError> {
        let export = self.source.fetch_activity_export(activity_id).await?;

        let artifact = Artifact::new(&self.artifact_dir, export.filename);
        let mut file = File::create(artifact.path()).await?;
        file.write_all(&export.data).await?;
        file.sync_all().await?;

        Ok(artifact)
    }
}
