//! Top-level session orchestration: wires the Glob Resolver (C1) through
//! the Artifact Builder (C2), Store Adapters (C3), Batch Registrar (C4),
//! and Transfer Engine (C5) into the two operations an external CLI
//! collaborator actually calls: `upload` and `download`.

use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::{
    adapters::StoreAdapter,
    artifact::Artifact,
    artifact_builder,
    control_plane::{ArtifactSearchQuery, ControlPlane},
    error::SessionError,
    glob_resolver,
    registrar,
    throttle::Throttle,
    transfer::{self, SessionThrottle},
    util::SizeUnit,
};

/// Options shared by `upload` and `download`. Built by the caller from
/// whatever CLI flags or config it already resolved — this crate never
/// reads flags itself (spec §1, out of scope).
#[derive(Clone)]
pub struct SessionOptions {
    pub job_id: String,
    pub working_dir: PathBuf,
    pub follow_symlinks: bool,
    /// Optional session-wide transfer-rate cap, in bytes per second.
    pub max_bytes_per_second: Option<u64>,
}

/// Summary of a finished session, returned alongside `Ok` only when every
/// artifact reached `finished` (spec's supplemental Stats type, SPEC_FULL
/// §5).
#[derive(Debug, Clone)]
pub struct Stats {
    pub artifact_count: usize,
    pub bytes_transferred: u64,
    pub elapsed: Duration,
}

impl std::fmt::Display for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let size: SizeUnit = (self.bytes_transferred as f64).into();
        write!(
            f,
            "{} artifact(s), {} in {:.1}s",
            self.artifact_count,
            size,
            self.elapsed.as_secs_f64()
        )
    }
}

fn build_throttle(options: &SessionOptions) -> Option<SessionThrottle> {
    options
        .max_bytes_per_second
        .map(|limit| Arc::new(AsyncMutex::new(Throttle::per_second(limit))))
}

/// Resolves glob `patterns` to files, hashes and registers them with
/// `control_plane`, and uploads them to `destination` (an `s3://`, `gs://`,
/// `rt://`, Azure Blob, or empty destination string — spec §4.3).
pub async fn upload(
    control_plane: &dyn ControlPlane,
    patterns: &str,
    pattern_delimiter: char,
    destination: &str,
    options: SessionOptions,
) -> Result<Stats, SessionError> {
    let started = Instant::now();
    let session_cancel = CancellationToken::new();

    let patterns = glob_resolver::split_patterns(patterns, pattern_delimiter);
    let (paths_rx, resolver_handle) =
        glob_resolver::spawn(patterns, options.follow_symlinks, session_cancel.clone());

    let artifacts = artifact_builder::collect(
        paths_rx,
        options.working_dir.clone(),
        options.follow_symlinks,
        destination.to_string(),
        session_cancel.clone(),
    )
    .await?;

    resolver_handle.await.map_err(|_| {
        SessionError::Collect(crate::error::CollectError::Io {
            path: options.working_dir.clone(),
            source: std::io::Error::other("glob resolver task panicked"),
        })
    })??;

    let bytes_total: u64 = artifacts.iter().map(|a| a.size).sum();
    let artifact_count = artifacts.len();

    registrar::register_all(
        control_plane,
        &options.job_id,
        &artifacts,
        destination,
        &session_cancel,
    )
    .await
    .map_err(SessionError::Registration)?;

    let adapter = Arc::new(StoreAdapter::for_upload(destination).await?);

    for artifact in &artifacts {
        artifact.url.set(Some(adapter.url(artifact))).await;
    }

    let work: Vec<(Arc<Artifact>, Arc<StoreAdapter>)> =
        artifacts.iter().map(|a| (a.clone(), adapter.clone())).collect();

    let throttle = build_throttle(&options);
    let failures = transfer::run(control_plane, &options.job_id, work, session_cancel, throttle).await;

    if !failures.is_empty() {
        return Err(SessionError::PartialUpload(failures));
    }

    Ok(Stats {
        artifact_count,
        bytes_transferred: bytes_total,
        elapsed: started.elapsed(),
    })
}

/// Searches `control_plane` for artifacts matching `query` and downloads
/// each to its recorded relative path under `options.working_dir`,
/// choosing an adapter per-artifact from its recorded upload destination
/// (spec §4.3).
pub async fn download(
    control_plane: &dyn ControlPlane,
    build_id: &str,
    query: ArtifactSearchQuery,
    options: SessionOptions,
) -> Result<Stats, SessionError> {
    let started = Instant::now();
    let session_cancel = CancellationToken::new();

    let remote_artifacts = control_plane
        .search_artifacts(build_id, &query)
        .await
        .map_err(SessionError::Search)?;

    let mut work: Vec<(Arc<Artifact>, Arc<StoreAdapter>)> = Vec::with_capacity(remote_artifacts.len());
    let mut bytes_total: u64 = 0;

    for remote in remote_artifacts {
        let absolute_path = options.working_dir.join(&remote.relative_path);
        if let Some(parent) = absolute_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| SessionError::Collect(crate::error::CollectError::Io {
                    path: parent.to_path_buf(),
                    source,
                }))?;
        }

        let artifact = Artifact::new(
            remote.relative_path,
            absolute_path,
            remote.size,
            remote.sha1,
            remote.sha256,
            remote.content_type,
            remote.upload_destination.clone(),
        );
        artifact.id.set(Some(remote.id)).await;
        artifact.url.set(Some(remote.url)).await;
        bytes_total += artifact.size;

        let adapter = Arc::new(StoreAdapter::for_download(&remote.upload_destination).await);
        work.push((Arc::new(artifact), adapter));
    }

    let artifact_count = work.len();
    let throttle = build_throttle(&options);
    let failures = transfer::run(control_plane, &options.job_id, work, session_cancel, throttle).await;

    if !failures.is_empty() {
        return Err(SessionError::PartialUpload(failures));
    }

    Ok(Stats {
        artifact_count,
        bytes_transferred: bytes_total,
        elapsed: started.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_display_includes_artifact_count_and_size() {
        let stats = Stats {
            artifact_count: 3,
            bytes_transferred: 2048,
            elapsed: Duration::from_millis(1500),
        };
        let rendered = stats.to_string();
        assert!(rendered.contains('3'));
        assert!(rendered.contains("1.5s"));
    }

    #[test]
    fn throttle_is_none_when_not_configured() {
        let options = SessionOptions {
            job_id: "job".to_string(),
            working_dir: PathBuf::from("."),
            follow_symlinks: false,
            max_bytes_per_second: None,
        };
        assert!(build_throttle(&options).is_none());
    }

    #[test]
    fn throttle_is_built_when_configured() {
        let options = SessionOptions {
            job_id: "job".to_string(),
            working_dir: PathBuf::from("."),
            follow_symlinks: false,
            max_bytes_per_second: Some(1_000_000),
        };
        assert!(build_throttle(&options).is_some());
    }
}
