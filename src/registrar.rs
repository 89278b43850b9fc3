//! Batch Registrar (C4): chunks artifacts into groups of 30, registers each
//! chunk with the control plane, and copies the assigned IDs and upload
//! instructions back into the in-memory `Artifact` records.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    artifact::{Artifact, ArtifactBatch},
    control_plane::ControlPlane,
    error::TransientTransportError,
    retry::{retry, RetryStrategy},
};

/// Maximum artifacts presented to the control plane in a single batch
/// (spec §4.4).
const CHUNK_SIZE: usize = 30;

/// Registers every artifact in `artifacts`, chunked, against `control_plane`
/// under `job_id`. Each chunk's registration call is retried independently;
/// a chunk's failure after exhausting retries aborts the whole registration
/// (the caller decides whether to treat that as fatal for the session).
pub async fn register_all(
    control_plane: &dyn ControlPlane,
    job_id: &str,
    artifacts: &[Arc<Artifact>],
    destination: &str,
    cancel: &CancellationToken,
) -> Result<(), TransientTransportError> {
    for chunk in artifacts.chunks(CHUNK_SIZE) {
        register_chunk(control_plane, job_id, chunk, destination, cancel).await?;
    }

    Ok(())
}

async fn register_chunk(
    control_plane: &dyn ControlPlane,
    job_id: &str,
    chunk: &[Arc<Artifact>],
    destination: &str,
    cancel: &CancellationToken,
) -> Result<(), TransientTransportError> {
    let batch = ArtifactBatch::new(chunk.to_vec(), destination.to_string());
    let strategy = RetryStrategy::control_plane_default();

    // First four attempts get a 10s per-attempt deadline, compensating for
    // servers that need more time once they've accepted load; later
    // attempts are unbounded (spec §4.4).
    let result = retry(&strategy, cancel, |handle| {
        let batch = &batch;
        async move {
            let call = control_plane.create_artifacts(job_id, batch);

            let outcome = if handle.attempt_count() <= 4 {
                match tokio::time::timeout(std::time::Duration::from_secs(10), call).await {
                    Ok(result) => result,
                    Err(_) => Err(TransientTransportError::Status {
                        status: 0,
                        body: "registration attempt timed out".to_string(),
                    }),
                }
            } else {
                call.await
            };

            match outcome {
                Ok(result) => Ok(result),
                Err(err @ TransientTransportError::Status { status, .. }) if is_non_retryable(status) => {
                    handle.break_retries();
                    Err(err)
                }
                Err(err) => Err(err),
            }
        }
    })
    .await?;

    for (artifact, id) in chunk.iter().zip(result.artifact_ids.iter()) {
        artifact.id.set(Some(id.clone())).await;

        let instructions = result
            .per_artifact_instructions
            .get(id)
            .cloned()
            .or_else(|| result.instructions_template.clone());

        if let Some(instructions) = instructions {
            artifact.instructions.set(Some(instructions)).await;
        }
    }

    Ok(())
}

/// Any 4xx response other than 429 breaks the retry loop (spec §4.4).
fn is_non_retryable(status: u16) -> bool {
    (400..500).contains(&status) && status != 429
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        artifact::ArtifactState,
        control_plane::{ArtifactSearchQuery, CreateArtifactsResult, RemoteArtifact},
    };
    use async_trait::async_trait;
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
    };

    struct FakeControlPlane {
        calls: AtomicUsize,
        fail_until: usize,
        status_on_failure: u16,
    }

    #[async_trait]
    impl ControlPlane for FakeControlPlane {
        async fn create_artifacts(
            &self,
            _job_id: &str,
            batch: &ArtifactBatch,
        ) -> Result<CreateArtifactsResult, TransientTransportError> {
            let call = self.calls.fetch_add(1, Ordering::Relaxed);
            if call < self.fail_until {
                return Err(TransientTransportError::Status {
                    status: self.status_on_failure,
                    body: "nope".to_string(),
                });
            }

            Ok(CreateArtifactsResult {
                artifact_ids: batch
                    .artifacts
                    .iter()
                    .enumerate()
                    .map(|(i, _)| format!("id-{i}"))
                    .collect(),
                instructions_template: None,
                per_artifact_instructions: HashMap::new(),
            })
        }

        async fn search_artifacts(
            &self,
            _build_id: &str,
            _query: &ArtifactSearchQuery,
        ) -> Result<Vec<RemoteArtifact>, TransientTransportError> {
            Ok(Vec::new())
        }

        async fn update_artifacts(
            &self,
            _job_id: &str,
            _states: &HashMap<String, ArtifactState>,
        ) -> Result<(), TransientTransportError> {
            Ok(())
        }
    }

    fn sample_artifacts(n: usize) -> Vec<Arc<Artifact>> {
        (0..n)
            .map(|i| {
                Arc::new(Artifact::new(
                    format!("file-{i}.bin"),
                    std::path::PathBuf::from(format!("/tmp/file-{i}.bin")),
                    1,
                    "sha1".to_string(),
                    "sha256".to_string(),
                    "application/octet-stream".to_string(),
                    String::new(),
                ))
            })
            .collect()
    }

    #[tokio::test]
    async fn ids_are_copied_back_in_order() {
        let control_plane = FakeControlPlane {
            calls: AtomicUsize::new(0),
            fail_until: 0,
            status_on_failure: 500,
        };
        let artifacts = sample_artifacts(3);
        let cancel = CancellationToken::new();

        register_all(&control_plane, "job-1", &artifacts, "", &cancel)
            .await
            .unwrap();

        for (i, artifact) in artifacts.iter().enumerate() {
            assert_eq!((*artifact.id).clone(), Some(format!("id-{i}")));
        }
    }

    #[tokio::test]
    async fn large_artifact_lists_are_chunked() {
        let control_plane = FakeControlPlane {
            calls: AtomicUsize::new(0),
            fail_until: 0,
            status_on_failure: 500,
        };
        let artifacts = sample_artifacts(65);
        let cancel = CancellationToken::new();

        register_all(&control_plane, "job-1", &artifacts, "", &cancel)
            .await
            .unwrap();

        assert_eq!(control_plane.calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn non_429_4xx_breaks_retries_immediately() {
        let control_plane = FakeControlPlane {
            calls: AtomicUsize::new(0),
            fail_until: 100,
            status_on_failure: 403,
        };
        let artifacts = sample_artifacts(1);
        let cancel = CancellationToken::new();

        let result = register_all(&control_plane, "job-1", &artifacts, "", &cancel).await;
        assert!(result.is_err());
        assert_eq!(control_plane.calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_then_succeed() {
        let control_plane = FakeControlPlane {
            calls: AtomicUsize::new(0),
            fail_until: 2,
            status_on_failure: 503,
        };
        let artifacts = sample_artifacts(1);
        let cancel = CancellationToken::new();

        register_all(&control_plane, "job-1", &artifacts, "", &cancel)
            .await
            .unwrap();
        assert_eq!(control_plane.calls.load(Ordering::Relaxed), 3);
    }
}
