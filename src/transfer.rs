//! Transfer Engine (C5): Transfer Pool + State Reporter, wired over four
//! channels the way spec §4.5 describes — workUnits, unitResults,
//! unitCounts, and an implicit done signal via the Reporter task's join
//! handle.

use std::{
    collections::HashMap,
    sync::Arc,
    time::Duration,
};

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

use crate::{
    adapters::StoreAdapter,
    artifact::{Artifact, ArtifactState, PerArtifactState, WorkUnit},
    control_plane::ControlPlane,
    error::{ArtifactFailure, TransferError, TransientTransportError},
    retry::{retry, RetryStrategy},
    throttle::Throttle,
    transport_cache,
};

/// An optional session-wide byte-rate limiter shared by every Transfer
/// Pool worker (spec's supplemental Stats/Throttle knob — see
/// SPEC_FULL.md §5).
pub type SessionThrottle = Arc<AsyncMutex<Throttle<u64>>>;

const RESULTS_CHANNEL_CAPACITY: usize = 1024;
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

struct UnitResult {
    artifact_id: String,
    relative_path: String,
    error: Option<TransferError>,
}

/// The key the control plane's `UpdateArtifacts` call expects (spec §6):
/// the artifact's server-issued id. Every artifact reaching the Transfer
/// Engine has already been registered by the Batch Registrar (C4) in both
/// the upload and download paths, so this should always be populated; the
/// fallback to `relative_path` only protects against that invariant being
/// violated rather than silently mis-keying the report.
fn artifact_key(artifact: &Artifact) -> String {
    artifact.id.clone().unwrap_or_else(|| {
        tracing::warn!(
            relative_path = %artifact.relative_path,
            "artifact has no id at transfer time; falling back to relative_path as the report key"
        );
        artifact.relative_path.clone()
    })
}

/// Runs every artifact in `work` to completion against its resolved
/// adapter. Returns the list of artifacts that ended in the `error` state;
/// an empty list means every artifact reached `finished`.
pub async fn run(
    control_plane: &dyn ControlPlane,
    job_id: &str,
    work: Vec<(Arc<Artifact>, Arc<StoreAdapter>)>,
    session_cancel: CancellationToken,
    throttle: Option<SessionThrottle>,
) -> Vec<ArtifactFailure> {
    let worker_count = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);

    let mut per_artifact: HashMap<String, PerArtifactState> = HashMap::new();
    let mut all_units: Vec<(WorkUnit, Arc<StoreAdapter>)> = Vec::new();
    let mut counts: Vec<(String, u64)> = Vec::new();

    for (artifact, adapter) in &work {
        let state = PerArtifactState::new(artifact.clone(), &session_cancel);
        let units = adapter.create_work(artifact.clone());
        let artifact_id = artifact_key(artifact);
        counts.push((artifact_id.clone(), units.len() as u64));
        per_artifact.insert(artifact_id, state);

        for unit in units {
            all_units.push((unit, adapter.clone()));
        }
    }

    let (work_tx, work_rx) = mpsc::channel::<(WorkUnit, Arc<StoreAdapter>)>(all_units.len().max(1));
    let (results_tx, results_rx) = mpsc::channel::<UnitResult>(RESULTS_CHANNEL_CAPACITY);
    let (counts_tx, counts_rx) = mpsc::channel::<(String, u64)>(counts.len().max(1));

    for count in counts {
        counts_tx.send(count).await.ok();
    }
    drop(counts_tx);

    for item in all_units {
        work_tx.send(item).await.ok();
    }
    drop(work_tx);

    let per_artifact = Arc::new(per_artifact);
    let work_rx = Arc::new(AsyncMutex::new(work_rx));
    let mut pool_handles = Vec::with_capacity(worker_count);

    for _ in 0..worker_count {
        let work_rx = work_rx.clone();
        let results_tx = results_tx.clone();
        let per_artifact = per_artifact.clone();
        let http_client = transport_cache::transport_for(true, None);
        let throttle = throttle.clone();

        pool_handles.push(tokio::spawn(async move {
            loop {
                let item = {
                    let mut rx = work_rx.lock().await;
                    rx.recv().await
                };

                let Some((unit, adapter)) = item else { break };
                let artifact_id = artifact_key(&unit.artifact);
                let relative_path = unit.artifact.relative_path.clone();
                let unit_cancel = per_artifact
                    .get(&artifact_id)
                    .map(|s| s.cancel.clone())
                    .unwrap_or_default();

                if let Some(throttle) = &throttle {
                    throttle.lock().await.advance_by(unit.artifact.size).await;
                }

                let strategy = RetryStrategy::transfer_default();
                let result = retry(&strategy, &unit_cancel, |_handle| {
                    let adapter = &adapter;
                    let unit = &unit;
                    let http_client = &http_client;
                    let unit_cancel = &unit_cancel;
                    async move { adapter.execute(http_client, unit, unit_cancel).await }
                })
                .await;

                let error = result.err();
                if error.is_some() {
                    unit_cancel.cancel();
                }

                if results_tx
                    .send(UnitResult {
                        artifact_id,
                        relative_path,
                        error,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }));
    }
    drop(results_tx);

    // The Reporter runs as a plain future polled alongside the pool's join,
    // rather than a spawned task, so it can borrow `control_plane` for
    // exactly the session's duration instead of requiring a `'static` bound.
    let drain_pool = async {
        for handle in pool_handles {
            handle.await.ok();
        }
    };

    let (failures, ()) = tokio::join!(report(control_plane, job_id, counts_rx, results_rx), drain_pool);
    failures
}

async fn report(
    control_plane: &dyn ControlPlane,
    job_id: &str,
    mut counts_rx: mpsc::Receiver<(String, u64)>,
    mut results_rx: mpsc::Receiver<UnitResult>,
) -> Vec<ArtifactFailure> {
    let mut pending: HashMap<String, u64> = HashMap::new();
    let mut staged: HashMap<String, ArtifactState> = HashMap::new();
    let mut failures: Vec<ArtifactFailure> = Vec::new();
    let mut messages: HashMap<String, String> = HashMap::new();
    let mut relative_paths: HashMap<String, String> = HashMap::new();

    let mut ticker = tokio::time::interval(REPORT_INTERVAL);
    let mut counts_open = true;
    let mut results_open = true;

    while counts_open || results_open {
        tokio::select! {
            count = counts_rx.recv(), if counts_open => {
                match count {
                    Some((artifact_id, unit_count)) => {
                        let entry = pending.entry(artifact_id.clone()).or_insert(0);
                        *entry += unit_count;
                        if *entry == 0 {
                            stage(&mut staged, &artifact_id, ArtifactState::Finished);
                        }
                    }
                    None => counts_open = false,
                }
            }
            result = results_rx.recv(), if results_open => {
                match result {
                    Some(unit_result) => {
                        let artifact_id = unit_result.artifact_id;
                        relative_paths.insert(artifact_id.clone(), unit_result.relative_path);
                        let entry = pending.entry(artifact_id.clone()).or_insert(0);
                        *entry = entry.saturating_sub(1);

                        if let Some(err) = unit_result.error {
                            messages.insert(artifact_id.clone(), err.to_string());
                            stage(&mut staged, &artifact_id, ArtifactState::Error);
                        } else if *entry == 0 && !matches!(staged.get(&artifact_id), Some(ArtifactState::Error)) {
                            stage(&mut staged, &artifact_id, ArtifactState::Finished);
                        }
                    }
                    None => results_open = false,
                }
            }
            _ = ticker.tick() => {
                flush(control_plane, job_id, &mut staged, &mut failures, &messages, &relative_paths).await;
            }
        }
    }

    flush(control_plane, job_id, &mut staged, &mut failures, &messages, &relative_paths).await;
    failures
}

/// Per-artifact monotonicity: `error` is never overridden by `finished`.
fn stage(staged: &mut HashMap<String, ArtifactState>, artifact_id: &str, state: ArtifactState) {
    if matches!(staged.get(artifact_id), Some(ArtifactState::Error)) && state == ArtifactState::Finished {
        return;
    }
    staged.insert(artifact_id.to_string(), state);
}

async fn flush(
    control_plane: &dyn ControlPlane,
    job_id: &str,
    staged: &mut HashMap<String, ArtifactState>,
    failures: &mut Vec<ArtifactFailure>,
    messages: &HashMap<String, String>,
    relative_paths: &HashMap<String, String>,
) {
    if staged.is_empty() {
        return;
    }

    let batch: HashMap<String, ArtifactState> = staged.clone();
    let strategy = RetryStrategy::control_plane_default();
    let cancel = CancellationToken::new();

    let result = retry(&strategy, &cancel, |handle| {
        let batch = &batch;
        async move {
            let call = control_plane.update_artifacts(job_id, batch);

            if handle.attempt_count() <= 4 {
                match tokio::time::timeout(Duration::from_secs(5), call).await {
                    Ok(result) => result,
                    Err(_) => Err(TransientTransportError::Status {
                        status: 0,
                        body: "state update attempt timed out".to_string(),
                    }),
                }
            } else {
                call.await
            }
        }
    })
    .await;

    match result {
        Ok(()) => staged.clear(),
        Err(err) => {
            for (artifact_id, _) in batch.iter() {
                failures.push(ArtifactFailure {
                    relative_path: relative_paths
                        .get(artifact_id)
                        .cloned()
                        .unwrap_or_else(|| artifact_id.clone()),
                    message: messages
                        .get(artifact_id)
                        .cloned()
                        .unwrap_or_else(|| err.to_string()),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::{ArtifactSearchQuery, CreateArtifactsResult, RemoteArtifact};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct RecordingControlPlane {
        updates: StdMutex<Vec<HashMap<String, ArtifactState>>>,
    }

    #[async_trait]
    impl ControlPlane for RecordingControlPlane {
        async fn create_artifacts(
            &self,
            _job_id: &str,
            _batch: &crate::artifact::ArtifactBatch,
        ) -> Result<CreateArtifactsResult, TransientTransportError> {
            unimplemented!("not exercised by transfer tests")
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
            states: &HashMap<String, ArtifactState>,
        ) -> Result<(), TransientTransportError> {
            self.updates.lock().unwrap().push(states.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn reporter_flushes_finished_state_once_units_drain_to_zero() {
        let control_plane = RecordingControlPlane {
            updates: StdMutex::new(Vec::new()),
        };

        let (counts_tx, counts_rx) = mpsc::channel(4);
        let (results_tx, results_rx) = mpsc::channel(4);

        // The artifact id deliberately differs from its relative_path so
        // this test fails if the reporter ever keys its update by path
        // again instead of id.
        counts_tx.send(("artifact-1".to_string(), 1)).await.unwrap();
        drop(counts_tx);
        results_tx
            .send(UnitResult {
                artifact_id: "artifact-1".to_string(),
                relative_path: "a.txt".to_string(),
                error: None,
            })
            .await
            .unwrap();
        drop(results_tx);

        let failures = report(&control_plane, "job-1", counts_rx, results_rx).await;

        assert!(failures.is_empty());
        let updates = control_plane.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].get("artifact-1"), Some(&ArtifactState::Finished));
        assert!(updates[0].get("a.txt").is_none());
    }

    #[tokio::test]
    async fn reporter_reports_artifact_errors() {
        let control_plane = RecordingControlPlane {
            updates: StdMutex::new(Vec::new()),
        };

        let (counts_tx, counts_rx) = mpsc::channel(4);
        let (results_tx, results_rx) = mpsc::channel(4);

        counts_tx.send(("artifact-1".to_string(), 1)).await.unwrap();
        drop(counts_tx);
        results_tx
            .send(UnitResult {
                artifact_id: "artifact-1".to_string(),
                relative_path: "a.txt".to_string(),
                error: Some(TransferError::Io(std::io::Error::other("disk full"))),
            })
            .await
            .unwrap();
        drop(results_tx);

        let failures = report(&control_plane, "job-1", counts_rx, results_rx).await;

        assert!(failures.is_empty());
        let updates = control_plane.updates.lock().unwrap();
        assert_eq!(updates[0].get("artifact-1"), Some(&ArtifactState::Error));
    }

    #[test]
    fn error_state_is_never_overridden_by_finished() {
        let mut staged = HashMap::new();
        stage(&mut staged, "a.txt", ArtifactState::Error);
        stage(&mut staged, "a.txt", ArtifactState::Finished);
        assert_eq!(staged.get("a.txt"), Some(&ArtifactState::Error));
    }
}
