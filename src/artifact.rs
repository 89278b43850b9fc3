//! The data model shared by every component (spec §3).

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::util::WriteLockArc;

/// One multipart part of a large upload, as returned by the control plane's
/// upload instructions.
#[derive(Debug, Clone)]
pub struct MultipartPart {
    pub index: u32,
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
}

/// Server-issued instructions for uploading an artifact's bytes. When
/// `parts` is non-empty the adapter splits the upload into one work unit
/// per part; otherwise it performs a single whole-object transfer using
/// `method`/`action`/`data`.
#[derive(Debug, Clone, Default)]
pub struct UploadInstructions {
    pub method: Option<String>,
    pub action: Option<String>,
    /// Extra form fields; values may contain `${artifact:...}` placeholders
    /// substituted from the owning artifact before the request is sent.
    pub data: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub parts: Vec<MultipartPart>,
}

/// A single registered file: computed once by the Artifact Builder (C2),
/// then mutated in place by the Batch Registrar (C4, fills id/instructions)
/// and the Store Adapter (C3, fills url) before the Transfer Engine (C5)
/// drives it to a terminal state.
#[derive(Debug)]
pub struct Artifact {
    pub id: WriteLockArc<Option<String>>,
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub size: u64,
    pub sha1: String,
    pub sha256: String,
    pub content_type: String,
    pub url: WriteLockArc<Option<String>>,
    /// The raw scheme-bearing string the caller supplied (`s3://...`,
    /// `rt://...`, empty for the default form adapter).
    pub upload_destination: String,
    pub instructions: WriteLockArc<Option<UploadInstructions>>,
}

impl Artifact {
    pub fn new(
        relative_path: String,
        absolute_path: PathBuf,
        size: u64,
        sha1: String,
        sha256: String,
        content_type: String,
        upload_destination: String,
    ) -> Self {
        Self {
            id: WriteLockArc::new(None),
            relative_path,
            absolute_path,
            size,
            sha1,
            sha256,
            content_type,
            url: WriteLockArc::new(None),
            upload_destination,
            instructions: WriteLockArc::new(None),
        }
    }
}

/// A group of up to 30 artifacts presented to the control plane atomically
/// (spec §3, §4.4). Immutable after construction; a retried registration
/// attempt must reuse the same `id`.
#[derive(Debug)]
pub struct ArtifactBatch {
    pub id: Uuid,
    pub artifacts: Vec<Arc<Artifact>>,
    pub destination: String,
}

impl ArtifactBatch {
    pub fn new(artifacts: Vec<Arc<Artifact>>, destination: String) -> Self {
        Self {
            id: crate::ids::new_batch_id(),
            artifacts,
            destination,
        }
    }
}

/// One HTTP transfer contributing to an artifact's upload or download.
#[derive(Debug, Clone)]
pub enum WorkUnitKind {
    Whole,
    Part(MultipartPart),
}

/// A unit of transfer produced by an adapter from one artifact.
#[derive(Clone)]
pub struct WorkUnit {
    pub artifact: Arc<Artifact>,
    pub kind: WorkUnitKind,
    pub description: String,
}

impl std::fmt::Debug for WorkUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkUnit")
            .field("artifact", &self.artifact.relative_path)
            .field("description", &self.description)
            .finish()
    }
}

/// The terminal state an artifact is reported in (spec glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactState {
    Finished,
    Error,
}

impl ArtifactState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Finished => "finished",
            Self::Error => "error",
        }
    }
}

/// Per-artifact bookkeeping the Transfer Engine keeps while the artifact is
/// in flight: a cancellation handle propagated to every work unit the
/// artifact spawns, scoped strictly to that artifact (spec §4.5, §5).
#[derive(Clone)]
pub struct PerArtifactState {
    pub artifact: Arc<Artifact>,
    pub cancel: CancellationToken,
}

impl PerArtifactState {
    pub fn new(artifact: Arc<Artifact>, parent: &CancellationToken) -> Self {
        Self {
            artifact,
            cancel: parent.child_token(),
        }
    }
}
