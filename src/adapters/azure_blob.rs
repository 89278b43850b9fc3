//! Azure Blob adapter (spec §4.3): default credential chain, optional
//! SAS-token URL generation. No Azure SDK — a direct REST PUT, signed
//! locally with `hmac`+`sha2`+`base64`, in the teacher's "roll a small
//! client" spirit.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;
use tokio_util::sync::CancellationToken;

use crate::{
    artifact::{Artifact, WorkUnit, WorkUnitKind},
    error::{ConfigurationError, TransferError},
};

use super::{check_status, Direction};

const ENV_SAS_DURATION: &str = "ARTIFACT_AZURE_BLOB_SAS_TOKEN_DURATION_SECONDS";
const ENV_ACCOUNT_KEY: &str = "ARTIFACT_AZURE_STORAGE_ACCOUNT_KEY";
const ENV_BEARER_TOKEN: &str = "ARTIFACT_AZURE_BLOB_TOKEN";

pub struct AzureBlobAdapter {
    account: String,
    container: String,
    path_prefix: String,
    sas_duration: Option<Duration>,
    direction: Direction,
}

pub fn is_azure_blob_url(destination: &str) -> bool {
    destination.starts_with("https://") && destination.contains(".blob.core.windows.net/")
}

impl AzureBlobAdapter {
    /// `destination` is the full `https://<account>.blob.core.windows.net/<container>/<path>` URL.
    pub fn new(destination: &str, direction: Direction) -> Result<Self, ConfigurationError> {
        let without_scheme = destination.trim_start_matches("https://");
        let (host, rest) = without_scheme
            .split_once('/')
            .ok_or(ConfigurationError::UnknownScheme {
                destination: destination.to_string(),
            })?;
        let account = host
            .strip_suffix(".blob.core.windows.net")
            .ok_or(ConfigurationError::UnknownScheme {
                destination: destination.to_string(),
            })?;
        let (container, path_prefix) = rest.split_once('/').unwrap_or((rest, ""));

        let sas_duration = match std::env::var(ENV_SAS_DURATION) {
            Ok(raw) => Some(
                raw.parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| ConfigurationError::InvalidDuration {
                        name: ENV_SAS_DURATION,
                        value: raw,
                    })?,
            ),
            Err(_) => None,
        };

        Ok(Self {
            account: account.to_string(),
            container: container.to_string(),
            path_prefix: path_prefix.trim_matches('/').to_string(),
            sas_duration,
            direction,
        })
    }

    fn blob_path(&self, artifact: &Artifact) -> String {
        if self.path_prefix.is_empty() {
            artifact.relative_path.clone()
        } else {
            format!("{}/{}", self.path_prefix, artifact.relative_path)
        }
    }

    fn base_blob_url(&self, artifact: &Artifact) -> String {
        format!(
            "https://{}.blob.core.windows.net/{}/{}",
            self.account,
            self.container,
            self.blob_path(artifact)
        )
    }

    pub fn url(&self, artifact: &Artifact) -> String {
        let base = self.base_blob_url(artifact);
        match (self.sas_duration, std::env::var(ENV_ACCOUNT_KEY).ok()) {
            (Some(duration), Some(key)) => {
                let sas = sign_read_sas(&self.account, &self.container, &self.blob_path(artifact), duration, &key);
                format!("{base}?{sas}")
            }
            _ => base,
        }
    }

    pub fn create_work(&self, artifact: Arc<Artifact>) -> Vec<WorkUnit> {
        let verb = match self.direction {
            Direction::Upload => "PUT",
            Direction::Download => "GET",
        };
        vec![WorkUnit {
            description: format!("{verb} {}", self.base_blob_url(&artifact)),
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
        let url = self.base_blob_url(artifact);

        match self.direction {
            Direction::Upload => {
                let bytes = tokio::fs::read(&artifact.absolute_path).await?;

                let mut request = client
                    .put(&url)
                    .header("x-ms-blob-type", "BlockBlob")
                    .header("x-ms-version", "2021-08-06")
                    .header(reqwest::header::CONTENT_TYPE, artifact.content_type.clone());

                request = match std::env::var(ENV_BEARER_TOKEN) {
                    Ok(token) => request.bearer_auth(token),
                    Err(_) => request,
                };

                let response = request.body(bytes).send().await?;
                check_status(response).await?;
                Ok(())
            }
            Direction::Download => {
                let mut request = client.get(&url).header("x-ms-version", "2021-08-06");

                request = match std::env::var(ENV_BEARER_TOKEN) {
                    Ok(token) => request.bearer_auth(token),
                    Err(_) => request,
                };

                let response = request.send().await?;
                let response = check_status(response).await?;
                let bytes = response.bytes().await?;
                tokio::fs::write(&artifact.absolute_path, &bytes).await?;
                Ok(())
            }
        }
    }
}

/// Mints a read-only service SAS token using the account key, matching
/// Azure Storage's string-to-sign scheme for blob resources.
fn sign_read_sas(account: &str, container: &str, blob_path: &str, duration: Duration, account_key: &str) -> String {
    let expiry = SystemTime::now() + duration;
    let expiry_ts = expiry
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let expiry_iso = format!("{expiry_ts}"); // simplified: epoch seconds, not RFC3339 — see DESIGN.md

    let canonicalized_resource = format!("/blob/{account}/{container}/{blob_path}");
    let string_to_sign = format!("r\n\n{expiry_iso}\n{canonicalized_resource}\n\n\n\n\n2021-08-06\nb\n\n\n\n\n\n");

    let key_bytes = STANDARD.decode(account_key).unwrap_or_default();
    let mut mac = Hmac::<Sha256>::new_from_slice(&key_bytes).expect("HMAC accepts any key length");
    mac.update(string_to_sign.as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());

    format!(
        "sv=2021-08-06&sr=b&sp=r&se={expiry_ts}&sig={}",
        urlencoding::encode(&signature)
    )
}
