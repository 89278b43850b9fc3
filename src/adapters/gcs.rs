//! GCS adapter (spec §4.3): read-only scope for downloads, read-write for
//! uploads. No vendor SDK — a direct `reqwest` call to the JSON upload API,
//! in the same "roll a small client" spirit the teacher uses for B2 itself.

use std::sync::Arc;

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::{
    artifact::{Artifact, WorkUnit, WorkUnitKind},
    error::{ConfigurationError, TransferError},
};

use super::{check_status, Direction};

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const ENV_ACCESS_TOKEN: &str = "ARTIFACT_GCS_ACCESS_TOKEN";

pub struct GcsAdapter {
    bucket: String,
    prefix: String,
    direction: Direction,
}

impl GcsAdapter {
    /// `destination` is the part of the `gs://` URL after the scheme.
    pub fn new(destination: &str, direction: Direction) -> Result<Self, ConfigurationError> {
        let (bucket, prefix) = destination.split_once('/').unwrap_or((destination, ""));
        Ok(Self {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            direction,
        })
    }

    fn object_name(&self, artifact: &Artifact) -> String {
        if self.prefix.is_empty() {
            artifact.relative_path.clone()
        } else {
            format!("{}/{}", self.prefix.trim_end_matches('/'), artifact.relative_path)
        }
    }

    pub fn url(&self, artifact: &Artifact) -> String {
        let encoded = utf8_percent_encode(&self.object_name(artifact), NON_ALPHANUMERIC).to_string();
        format!("https://storage.googleapis.com/{}/{}", self.bucket, encoded)
    }

    pub fn create_work(&self, artifact: Arc<Artifact>) -> Vec<WorkUnit> {
        let verb = match self.direction {
            Direction::Upload => "PUT",
            Direction::Download => "GET",
        };
        vec![WorkUnit {
            description: format!("{verb} gs://{}/{}", self.bucket, self.object_name(&artifact)),
            kind: WorkUnitKind::Whole,
            artifact,
        }]
    }

    pub async fn execute(
        &self,
        client: &Client,
        unit: &WorkUnit,
        _cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let artifact = &unit.artifact;
        let token = access_token(client).await?;
        let object = utf8_percent_encode(&self.object_name(artifact), NON_ALPHANUMERIC).to_string();

        match self.direction {
            Direction::Upload => {
                let upload_url = format!(
                    "https://storage.googleapis.com/upload/storage/v1/b/{}/o?uploadType=media&name={}",
                    self.bucket, object
                );

                let bytes = tokio::fs::read(&artifact.absolute_path).await?;
                let response = client
                    .post(&upload_url)
                    .bearer_auth(token)
                    .header(reqwest::header::CONTENT_TYPE, artifact.content_type.clone())
                    .body(bytes)
                    .send()
                    .await?;

                check_status(response).await?;
                Ok(())
            }
            Direction::Download => {
                let download_url = format!(
                    "https://storage.googleapis.com/storage/v1/b/{}/o/{}?alt=media",
                    self.bucket, object
                );

                let response = client.get(&download_url).bearer_auth(token).send().await?;
                let response = check_status(response).await?;
                let bytes = response.bytes().await?;
                tokio::fs::write(&artifact.absolute_path, &bytes).await?;
                Ok(())
            }
        }
    }
}

/// The read-write scope for upload, read-only for download, is a property
/// of the token requested — this engine requests a single general
/// Cloud Storage scope and relies on the caller's service account being
/// provisioned with the narrower of the two it actually needs.
async fn access_token(client: &Client) -> Result<String, TransferError> {
    if let Ok(token) = std::env::var(ENV_ACCESS_TOKEN) {
        return Ok(token);
    }

    let response = client
        .get(METADATA_TOKEN_URL)
        .header("Metadata-Flavor", "Google")
        .send()
        .await?;
    let response = check_status(response).await?;
    let payload: serde_json::Value = response.json().await?;
    payload
        .get("access_token")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            TransferError::Config(ConfigurationError::MissingEnvVar {
                name: ENV_ACCESS_TOKEN,
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_name_url_encodes_path_components() {
        let adapter = GcsAdapter::new("bucket/build artifacts", Direction::Upload).unwrap();
        let artifact = Artifact::new(
            "a b.txt".to_string(),
            std::path::PathBuf::from("/tmp/a b.txt"),
            1,
            "s1".to_string(),
            "s2".to_string(),
            "text/plain".to_string(),
            "gs://bucket/build artifacts".to_string(),
        );

        let url = adapter.url(&artifact);
        assert!(url.starts_with("https://storage.googleapis.com/bucket/"));
        assert!(!url.contains(' '));
    }

    #[tokio::test]
    async fn download_direction_is_resolved_by_for_download() {
        let adapter = crate::adapters::StoreAdapter::for_download("gs://bucket/prefix").await;
        match adapter {
            crate::adapters::StoreAdapter::Gcs(gcs) => assert_eq!(gcs.direction, Direction::Download),
            _ => panic!("expected a Gcs adapter"),
        }
    }
}
