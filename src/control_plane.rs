//! The abstract control-plane interface the core consumes (spec §1, §6).
//!
//! The concrete HTTP client, authentication, and wire format are an
//! external collaborator's concern; this crate only needs the three calls
//! below and treats them as opaque, retryable operations.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::{
    artifact::{ArtifactBatch, ArtifactState, UploadInstructions},
    error::TransientTransportError,
};

/// Result of `CreateArtifacts`: the server assigns IDs in the same order
/// the batch's artifacts were presented, a template shared by every
/// artifact in the batch, and optionally per-artifact overrides keyed by
/// the assigned ID.
#[derive(Debug, Clone, Default)]
pub struct CreateArtifactsResult {
    pub artifact_ids: Vec<String>,
    pub instructions_template: Option<UploadInstructions>,
    pub per_artifact_instructions: HashMap<String, UploadInstructions>,
}

/// Query used by `SearchArtifacts` to resolve records for download.
#[derive(Debug, Clone, Default)]
pub struct ArtifactSearchQuery {
    pub query: String,
    pub scope: Option<String>,
    pub state: Option<ArtifactState>,
    pub include_retried_jobs: bool,
    pub include_duplicates: bool,
}

/// One artifact record as known to the control plane, as returned by
/// `SearchArtifacts` for the download path.
#[derive(Debug, Clone)]
pub struct RemoteArtifact {
    pub id: String,
    pub relative_path: String,
    pub size: u64,
    pub sha1: String,
    pub sha256: String,
    pub content_type: String,
    pub url: String,
    pub upload_destination: String,
}

/// Operations the core consumes from the control plane. A concrete HTTP
/// implementation lives outside this crate; tests use an in-memory fake
/// (see `control_plane::tests::FakeControlPlane` in the registrar/transfer
/// test modules).
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn create_artifacts(
        &self,
        job_id: &str,
        batch: &ArtifactBatch,
    ) -> Result<CreateArtifactsResult, TransientTransportError>;

    async fn search_artifacts(
        &self,
        build_id: &str,
        query: &ArtifactSearchQuery,
    ) -> Result<Vec<RemoteArtifact>, TransientTransportError>;

    async fn update_artifacts(
        &self,
        job_id: &str,
        states: &HashMap<String, ArtifactState>,
    ) -> Result<(), TransientTransportError>;
}
