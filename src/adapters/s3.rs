//! S3 adapter (spec §4.3): region discovery, env-based credentials, canned
//! ACL, optional server-side encryption. Grounded in the pack's
//! `aws-sdk-s3`-based artifact stores (see DESIGN.md), generalized from a
//! single hardcoded bucket/region to the destination string's own
//! `bucket/prefix`.

use std::sync::Arc;

use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    types::ServerSideEncryption,
    Client,
};
use reqwest::Client as HttpClient;
use tokio_util::sync::CancellationToken;

use crate::{
    artifact::{Artifact, WorkUnit, WorkUnitKind},
    error::{ConfigurationError, TransferError},
};

use super::Direction;

const ENV_ACCESS_KEY_ID: &str = "ARTIFACT_S3_ACCESS_KEY_ID";
const ENV_SECRET_ACCESS_KEY: &str = "ARTIFACT_S3_SECRET_ACCESS_KEY";
const ENV_SESSION_TOKEN: &str = "ARTIFACT_S3_SESSION_TOKEN";
const ENV_DEFAULT_REGION: &str = "ARTIFACT_S3_DEFAULT_REGION";
const ENV_ENDPOINT: &str = "ARTIFACT_S3_ENDPOINT";
const ENV_ACL: &str = "ARTIFACT_S3_ACL";
const ENV_SSE_ENABLED: &str = "ARTIFACT_S3_SSE_ENABLED";
const ENV_ACCESS_URL: &str = "ARTIFACT_S3_ACCESS_URL";
const ENV_PROFILE: &str = "ARTIFACT_S3_PROFILE";

const DEFAULT_ACL: &str = "public-read";
const VALID_ACLS: &[&str] = &[
    "private",
    "public-read",
    "public-read-write",
    "authenticated-read",
    "aws-exec-read",
    "bucket-owner-read",
    "bucket-owner-full-control",
];

pub struct S3Adapter {
    client: Client,
    bucket: String,
    prefix: String,
    region: String,
    acl: String,
    sse_enabled: bool,
    path_style: bool,
    access_url: Option<String>,
    direction: Direction,
}

impl S3Adapter {
    /// `destination` is the part of the `s3://` URL after the scheme:
    /// `bucket/prefix/...`.
    pub async fn new(destination: &str, direction: Direction) -> Result<Self, ConfigurationError> {
        let (bucket, prefix) = destination
            .split_once('/')
            .unwrap_or((destination, ""));

        let acl = std::env::var(ENV_ACL).unwrap_or_else(|_| DEFAULT_ACL.to_string());
        if !VALID_ACLS.contains(&acl.as_str()) {
            return Err(ConfigurationError::InvalidAcl { value: acl });
        }

        let sse_enabled = std::env::var(ENV_SSE_ENABLED)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let endpoint = std::env::var(ENV_ENDPOINT).ok();
        let path_style = endpoint.is_some();

        let region = resolve_region(bucket, &endpoint).await;

        let mut config_loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.clone()));

        if let Ok(profile) = std::env::var(ENV_PROFILE) {
            config_loader = config_loader.profile_name(profile);
        }

        if let (Ok(access_key), Ok(secret_key)) = (
            std::env::var(ENV_ACCESS_KEY_ID),
            std::env::var(ENV_SECRET_ACCESS_KEY),
        ) {
            let session_token = std::env::var(ENV_SESSION_TOKEN).ok();
            let credentials = Credentials::new(
                access_key,
                secret_key,
                session_token,
                None,
                "artifact-transfer-engine",
            );
            config_loader = config_loader.credentials_provider(credentials);
        }

        let shared_config = config_loader.load().await;
        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if let Some(endpoint) = &endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint.clone());
        }
        s3_config_builder = s3_config_builder.force_path_style(path_style);

        let client = Client::from_conf(s3_config_builder.build());

        Ok(Self {
            client,
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            region,
            acl,
            sse_enabled,
            path_style,
            access_url: std::env::var(ENV_ACCESS_URL).ok(),
            direction,
        })
    }

    fn key_for(&self, artifact: &Artifact) -> String {
        if self.prefix.is_empty() {
            artifact.relative_path.clone()
        } else {
            format!("{}/{}", self.prefix.trim_end_matches('/'), artifact.relative_path)
        }
    }

    pub fn url(&self, artifact: &Artifact) -> String {
        let key = self.key_for(artifact);
        if let Some(base) = &self.access_url {
            return format!("{}/{}", base.trim_end_matches('/'), key);
        }

        if self.path_style {
            format!("https://s3.{}.amazonaws.com/{}/{}", self.region, self.bucket, key)
        } else {
            format!("https://{}.s3.{}.amazonaws.com/{}", self.bucket, self.region, key)
        }
    }

    pub fn create_work(&self, artifact: Arc<Artifact>) -> Vec<WorkUnit> {
        let verb = match self.direction {
            Direction::Upload => "PUT",
            Direction::Download => "GET",
        };
        vec![WorkUnit {
            description: format!("{verb} s3://{}/{}", self.bucket, self.key_for(&artifact)),
            kind: WorkUnitKind::Whole,
            artifact,
        }]
    }

    pub async fn execute(
        &self,
        _client: &HttpClient,
        unit: &WorkUnit,
        _cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let artifact = &unit.artifact;

        match self.direction {
            Direction::Upload => {
                let body = aws_sdk_s3::primitives::ByteStream::from_path(&artifact.absolute_path)
                    .await
                    .map_err(|err| std::io::Error::other(err.to_string()))?;

                let mut request = self
                    .client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(self.key_for(artifact))
                    .body(body)
                    .content_type(&artifact.content_type)
                    .acl(self.acl.as_str().into());

                if self.sse_enabled {
                    request = request.server_side_encryption(ServerSideEncryption::Aes256);
                }

                request
                    .send()
                    .await
                    .map_err(|err| crate::error::TransientTransportError::Status {
                        status: 0,
                        body: err.to_string(),
                    })?;

                Ok(())
            }
            Direction::Download => {
                let response = self
                    .client
                    .get_object()
                    .bucket(&self.bucket)
                    .key(self.key_for(artifact))
                    .send()
                    .await
                    .map_err(|err| crate::error::TransientTransportError::Status {
                        status: 0,
                        body: err.to_string(),
                    })?;

                let bytes = response
                    .body
                    .collect()
                    .await
                    .map_err(|err| std::io::Error::other(err.to_string()))?
                    .into_bytes();

                tokio::fs::write(&artifact.absolute_path, &bytes).await?;
                Ok(())
            }
        }
    }
}

/// Explicit region hint wins; otherwise derive the current region from
/// the default provider chain, then ask the bucket's own region via a
/// head call; fall back to the derived current region with a logged
/// warning if that call fails (spec §4.3 region discovery).
async fn resolve_region(bucket: &str, endpoint: &Option<String>) -> String {
    if let Ok(hint) = std::env::var(ENV_DEFAULT_REGION) {
        return hint;
    }

    if endpoint.is_some() {
        return "us-east-1".to_string();
    }

    let discovery_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
    let current_region = discovery_config
        .region()
        .map(|r| r.to_string())
        .unwrap_or_else(|| "us-east-1".to_string());

    let probe_config = aws_sdk_s3::config::Builder::from(&discovery_config)
        .region(Region::new(current_region.clone()))
        .build();
    let probe_client = Client::from_conf(probe_config);

    match probe_client.head_bucket().bucket(bucket).send().await {
        Ok(_) => current_region,
        Err(err) => {
            tracing::warn!(bucket, error = %err, "bucket region discovery failed, falling back to current region");
            current_region
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_acl_values_are_rejected() {
        assert!(!VALID_ACLS.contains(&"do-anything"));
    }

    #[test]
    fn key_for_joins_prefix_and_relative_path() {
        let adapter = S3Adapter {
            client: Client::from_conf(
                aws_sdk_s3::Config::builder()
                    .region(Region::new("us-east-1"))
                    .behavior_version(BehaviorVersion::latest())
                    .credentials_provider(Credentials::new("a", "b", None, None, "t"))
                    .build(),
            ),
            bucket: "bucket".to_string(),
            prefix: "prefix".to_string(),
            region: "us-east-1".to_string(),
            acl: DEFAULT_ACL.to_string(),
            sse_enabled: false,
            path_style: false,
            access_url: None,
            direction: Direction::Upload,
        };

        let artifact = Artifact::new(
            "a/b.txt".to_string(),
            std::path::PathBuf::from("/tmp/a/b.txt"),
            1,
            "s1".to_string(),
            "s2".to_string(),
            "text/plain".to_string(),
            "s3://bucket/prefix".to_string(),
        );

        assert_eq!(adapter.key_for(&artifact), "prefix/a/b.txt");
    }
}
