//! Store Adapters (C3): one module per back-end, selected by the
//! destination string's scheme prefix. No shared base type beyond this
//! enum — each backend owns its own request construction end to end.

pub mod artifactory;
pub mod azure_blob;
pub mod default_form;
pub mod gcs;
pub mod s3;

use std::sync::Arc;

use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::{
    artifact::{Artifact, WorkUnit},
    error::{ConfigurationError, TransferError},
};

/// Splits a `part_count`-way even division of `size` bytes and returns the
/// half-open byte range `[start, end)` for `index`. The last part absorbs
/// the remainder. Used by adapters that must divide a whole file across
/// several work units without a range field on the wire type itself.
pub(crate) fn part_range(size: u64, index: u32, part_count: u32) -> (u64, u64) {
    let part_count = part_count.max(1) as u64;
    let base = size / part_count;
    let start = base * index as u64;
    let end = if index as u64 + 1 == part_count {
        size
    } else {
        base * (index as u64 + 1)
    };
    (start, end)
}

/// Which way bytes move through a work unit. Threaded into adapter
/// construction so `execute()` can pick the matching HTTP verb — an
/// adapter built for `Download` never uploads and vice versa.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

/// A selected, fully-configured back-end. Built once per destination
/// string and reused for every work unit the adapter creates.
pub enum StoreAdapter {
    DefaultForm(default_form::DefaultFormAdapter),
    S3(s3::S3Adapter),
    Gcs(gcs::GcsAdapter),
    Artifactory(artifactory::ArtifactoryAdapter),
    AzureBlob(azure_blob::AzureBlobAdapter),
    /// Download-only fallback for an artifact whose upload destination
    /// doesn't match any known scheme: a direct GET against the
    /// artifact's recorded URL (spec §4.3).
    DirectGet,
}

impl StoreAdapter {
    /// Resolves the adapter to use for uploading to `destination`.
    /// Unknown non-empty schemes are a `ConfigurationError`.
    pub async fn for_upload(destination: &str) -> Result<Self, ConfigurationError> {
        Self::resolve(destination, Direction::Upload).await
    }

    /// Resolves the adapter to use for downloading an artifact whose
    /// recorded upload destination is `upload_destination`. Unlike
    /// upload resolution, an unrecognized scheme never fails — it falls
    /// back to a direct GET against the artifact's URL.
    pub async fn for_download(upload_destination: &str) -> Self {
        if upload_destination.is_empty() {
            return Self::DirectGet;
        }

        match Self::resolve(upload_destination, Direction::Download).await {
            Ok(adapter) => adapter,
            Err(_) => Self::DirectGet,
        }
    }

    async fn resolve(destination: &str, direction: Direction) -> Result<Self, ConfigurationError> {
        if destination.is_empty() {
            return Ok(Self::DefaultForm(default_form::DefaultFormAdapter::new()));
        }

        if let Some(rest) = destination.strip_prefix("s3://") {
            return Ok(Self::S3(s3::S3Adapter::new(rest, direction).await?));
        }

        if let Some(rest) = destination.strip_prefix("gs://") {
            return Ok(Self::Gcs(gcs::GcsAdapter::new(rest, direction)?));
        }

        if let Some(rest) = destination.strip_prefix("rt://") {
            return Ok(Self::Artifactory(artifactory::ArtifactoryAdapter::new(
                rest, direction,
            )?));
        }

        if azure_blob::is_azure_blob_url(destination) {
            return Ok(Self::AzureBlob(azure_blob::AzureBlobAdapter::new(
                destination,
                direction,
            )?));
        }

        Err(ConfigurationError::UnknownScheme {
            destination: destination.to_string(),
        })
    }

    /// The pre-registration destination URL synthesized for `artifact`.
    pub fn url(&self, artifact: &Artifact) -> String {
        match self {
            Self::DefaultForm(a) => a.url(artifact),
            Self::S3(a) => a.url(artifact),
            Self::Gcs(a) => a.url(artifact),
            Self::Artifactory(a) => a.url(artifact),
            Self::AzureBlob(a) => a.url(artifact),
            Self::DirectGet => (*artifact.url).clone().unwrap_or_default(),
        }
    }

    /// Splits `artifact` into the work units its upload requires.
    pub fn create_work(&self, artifact: Arc<Artifact>) -> Vec<WorkUnit> {
        match self {
            Self::DefaultForm(a) => a.create_work(artifact),
            Self::S3(a) => a.create_work(artifact),
            Self::Gcs(a) => a.create_work(artifact),
            Self::Artifactory(a) => a.create_work(artifact),
            Self::AzureBlob(a) => a.create_work(artifact),
            Self::DirectGet => vec![WorkUnit {
                description: format!("GET {}", artifact.relative_path),
                kind: crate::artifact::WorkUnitKind::Whole,
                artifact,
            }],
        }
    }

    /// Executes a single work unit: uploads the bytes it describes, or
    /// for `DirectGet`, downloads them to the artifact's local path.
    pub async fn execute(
        &self,
        client: &Client,
        unit: &WorkUnit,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        match self {
            Self::DefaultForm(a) => a.execute(client, unit, cancel).await,
            Self::S3(a) => a.execute(client, unit, cancel).await,
            Self::Gcs(a) => a.execute(client, unit, cancel).await,
            Self::Artifactory(a) => a.execute(client, unit, cancel).await,
            Self::AzureBlob(a) => a.execute(client, unit, cancel).await,
            Self::DirectGet => direct_get(client, unit).await,
        }
    }
}

async fn direct_get(client: &Client, unit: &WorkUnit) -> Result<(), TransferError> {
    let url = (*unit.artifact.url).clone().unwrap_or_default();
    let response = client.get(&url).send().await?;
    let response = check_status(response).await?;
    let bytes = response.bytes().await?;
    tokio::fs::write(&unit.artifact.absolute_path, &bytes).await?;
    Ok(())
}

/// Maps a non-2xx response to the appropriate `TransferError` variant,
/// classifying it as retryable or not the way C6's callers expect.
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TransferError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let code = status.as_u16();
    let body = response.text().await.unwrap_or_default();

    if code == 429 || status.is_server_error() {
        Err(TransferError::Transient(crate::error::TransientTransportError::Status {
            status: code,
            body,
        }))
    } else {
        Err(TransferError::NonRetryable(crate::error::NonRetryableRemoteError {
            status: code,
            body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_range_splits_evenly_with_remainder_on_last() {
        assert_eq!(part_range(10, 0, 3), (0, 3));
        assert_eq!(part_range(10, 1, 3), (3, 6));
        assert_eq!(part_range(10, 2, 3), (6, 10));
    }

    #[tokio::test]
    async fn unknown_upload_scheme_is_a_configuration_error() {
        let result = StoreAdapter::for_upload("ftp://example.com/x").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unknown_download_scheme_falls_back_to_direct_get() {
        let adapter = StoreAdapter::for_download("ftp://example.com/x").await;
        assert!(matches!(adapter, StoreAdapter::DirectGet));
    }

    #[tokio::test]
    async fn empty_destination_resolves_to_default_form() {
        let adapter = StoreAdapter::for_upload("").await.unwrap();
        assert!(matches!(adapter, StoreAdapter::DefaultForm(_)));
    }
}
