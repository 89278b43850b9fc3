//! Artifactory adapter (spec §4.3): basic auth, per-request checksum
//! headers computed by reopening the file.

use std::sync::Arc;

use md5::{Digest as Md5Digest, Md5};
use reqwest::Client;
use sha1_smol::Sha1;
use sha2::{Digest as Sha2Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::{
    artifact::{Artifact, WorkUnit, WorkUnitKind},
    error::{ConfigurationError, TransferError},
};

use super::{check_status, Direction};

const ENV_URL: &str = "ARTIFACT_ARTIFACTORY_URL";
const ENV_USER: &str = "ARTIFACT_ARTIFACTORY_USER";
const ENV_PASSWORD: &str = "ARTIFACT_ARTIFACTORY_PASSWORD";

pub struct ArtifactoryAdapter {
    base_url: String,
    repo_path: String,
    user: String,
    password: String,
    direction: Direction,
}

impl ArtifactoryAdapter {
    /// `destination` is the part of the `rt://` URL after the scheme:
    /// `repo/path`.
    pub fn new(destination: &str, direction: Direction) -> Result<Self, ConfigurationError> {
        let base_url = std::env::var(ENV_URL).map_err(|_| ConfigurationError::MissingEnvVar {
            name: ENV_URL,
        })?;
        let user = std::env::var(ENV_USER).map_err(|_| ConfigurationError::MissingEnvVar {
            name: ENV_USER,
        })?;
        let password = std::env::var(ENV_PASSWORD).map_err(|_| ConfigurationError::MissingEnvVar {
            name: ENV_PASSWORD,
        })?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            repo_path: destination.trim_matches('/').to_string(),
            user,
            password,
            direction,
        })
    }

    fn object_path(&self, artifact: &Artifact) -> String {
        format!("{}/{}", self.repo_path, artifact.relative_path)
    }

    pub fn url(&self, artifact: &Artifact) -> String {
        format!("{}/{}", self.base_url, self.object_path(artifact))
    }

    pub fn create_work(&self, artifact: Arc<Artifact>) -> Vec<WorkUnit> {
        let verb = match self.direction {
            Direction::Upload => "PUT",
            Direction::Download => "GET",
        };
        vec![WorkUnit {
            description: format!("{verb} {}", self.url(&artifact)),
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

        match self.direction {
            Direction::Upload => {
                let bytes = tokio::fs::read(&artifact.absolute_path).await?;
                let (md5_hex, sha1_hex, sha256_hex) = checksums(&bytes);

                let response = client
                    .put(self.url(artifact))
                    .basic_auth(&self.user, Some(&self.password))
                    .header("X-Checksum-Md5", md5_hex)
                    .header("X-Checksum-Sha1", sha1_hex)
                    .header("X-Checksum-Sha256", sha256_hex)
                    .header(reqwest::header::CONTENT_TYPE, artifact.content_type.clone())
                    .body(bytes)
                    .send()
                    .await?;

                check_status(response).await?;
                Ok(())
            }
            Direction::Download => {
                let response = client
                    .get(self.url(artifact))
                    .basic_auth(&self.user, Some(&self.password))
                    .send()
                    .await?;
                let response = check_status(response).await?;
                let bytes = response.bytes().await?;
                tokio::fs::write(&artifact.absolute_path, &bytes).await?;
                Ok(())
            }
        }
    }
}

fn checksums(bytes: &[u8]) -> (String, String, String) {
    let md5_hex = Md5::digest(bytes).iter().map(|b| format!("{b:02x}")).collect::<String>();
    let sha1_hex = Sha1::from(bytes).digest().to_string();

    let mut sha256 = Sha256::new();
    sha256.update(bytes);
    let sha256_hex = sha256
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>();

    (md5_hex, sha1_hex, sha256_hex)
}
