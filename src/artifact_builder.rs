//! Artifact Builder (C2): turns concrete file paths into `Artifact`
//! records, deduplicated by absolute path.

use std::{
    collections::HashSet,
    io::Read,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use sha1_smol::Sha1;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;

use crate::{artifact::Artifact, error::CollectError, paths};

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        write!(out, "{byte:02x}").expect("writing to a String cannot fail");
    }
    out
}

/// A chunk of bytes read while hashing; kept small so large files don't
/// force a full read into memory before hashing starts.
const HASH_CHUNK: usize = 64 * 1024;

/// Drains `paths` and builds one `Artifact` per distinct absolute path,
/// spreading the stat+hash work over a fixed worker pool sized to the
/// machine's parallelism, mirroring spec §4.2.
///
/// Deduplication is keyed on the resolved absolute path (after following
/// symlinks), so two overlapping glob patterns that match the same file
/// contribute exactly one artifact (spec §8 property 1).
///
/// Any local I/O failure cancels `cancel` and is fatal for the whole
/// collection, matching the Glob Resolver's own fail-fast contract.
pub async fn collect(
    paths: Receiver<PathBuf>,
    working_dir: PathBuf,
    follow_symlinks: bool,
    upload_destination: String,
    cancel: CancellationToken,
) -> Result<Vec<Arc<Artifact>>, CollectError> {
    let worker_count = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);

    let seen: Arc<Mutex<HashSet<PathBuf>>> = Arc::new(Mutex::new(HashSet::new()));
    let artifacts: Arc<Mutex<Vec<Arc<Artifact>>>> = Arc::new(Mutex::new(Vec::new()));
    let work_rx: Arc<tokio::sync::Mutex<Receiver<PathBuf>>> =
        Arc::new(tokio::sync::Mutex::new(paths));

    let mut workers = Vec::with_capacity(worker_count);

    for _ in 0..worker_count {
        let work_rx = work_rx.clone();
        let seen = seen.clone();
        let artifacts = artifacts.clone();
        let working_dir = working_dir.clone();
        let upload_destination = upload_destination.clone();
        let cancel = cancel.clone();

        workers.push(tokio::spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    return Ok(());
                }

                let path = {
                    let mut rx = work_rx.lock().await;
                    rx.recv().await
                };

                let Some(path) = path else {
                    return Ok(());
                };

                let result = tokio::task::spawn_blocking({
                    let seen = seen.clone();
                    let working_dir = working_dir.clone();
                    let upload_destination = upload_destination.clone();
                    move || build_one(&path, &working_dir, follow_symlinks, &upload_destination, &seen)
                })
                .await
                .expect("artifact builder worker panicked");

                match result {
                    Ok(Some(artifact)) => {
                        artifacts.lock().expect("artifacts mutex poisoned").push(Arc::new(artifact));
                    }
                    Ok(None) => {}
                    Err(err) => {
                        cancel.cancel();
                        return Err(err);
                    }
                }
            }
        }));
    }

    for worker in workers {
        match worker.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(_join_err) => {}
        }
    }

    let artifacts = Arc::try_unwrap(artifacts)
        .map(|m| m.into_inner().expect("artifacts mutex poisoned"))
        .unwrap_or_else(|arc| arc.lock().expect("artifacts mutex poisoned").clone());

    Ok(artifacts)
}

fn build_one(
    path: &Path,
    working_dir: &Path,
    follow_symlinks: bool,
    upload_destination: &str,
    seen: &Mutex<HashSet<PathBuf>>,
) -> Result<Option<Artifact>, CollectError> {
    // Symlink-ness has to be read off the pre-resolution path: `canonicalize`
    // below fully resolves every symlink component, so `absolute` itself can
    // never stat back as a symlink. Checking the resolved path (as this used
    // to) made `follow_symlinks = false` a no-op.
    let leaf_metadata = std::fs::symlink_metadata(path).map_err(|source| CollectError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    if leaf_metadata.file_type().is_symlink() && !follow_symlinks {
        return Ok(None);
    }

    let absolute = std::fs::canonicalize(path).map_err(|source| CollectError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    {
        let mut seen = seen.lock().expect("seen-paths mutex poisoned");
        if !seen.insert(absolute.clone()) {
            return Ok(None);
        }
    }

    let metadata = std::fs::symlink_metadata(&absolute).map_err(|source| CollectError::Io {
        path: absolute.clone(),
        source,
    })?;

    if metadata.is_dir() {
        return Ok(None);
    }

    let was_absolute_pattern = paths::pattern_is_absolute(&path.to_string_lossy());
    let relative_path = paths::relative_to(&absolute, working_dir, was_absolute_pattern)?;

    let (size, sha1, sha256) = hash_file(&absolute).map_err(|source| CollectError::Io {
        path: absolute.clone(),
        source,
    })?;

    let content_type = mime_guess::from_path(&absolute)
        .first_raw()
        .unwrap_or("binary/octet-stream")
        .to_string();

    Ok(Some(Artifact::new(
        relative_path,
        absolute,
        size,
        sha1,
        sha256,
        content_type,
        upload_destination.to_string(),
    )))
}

/// Streams the file once through both hashers, counting bytes as they're
/// read. The byte count this function returns is authoritative — it is
/// never replaced with the value from `stat` (spec §4.2 step 5, §8
/// property 2).
fn hash_file(path: &Path) -> std::io::Result<(u64, String, String)> {
    let mut file = std::fs::File::open(path)?;
    let mut sha1 = Sha1::new();
    let mut sha256 = Sha256::new();
    let mut buffer = [0u8; HASH_CHUNK];
    let mut total: u64 = 0;

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }

        sha1.update(&buffer[..read]);
        sha256.update(&buffer[..read]);
        total += read as u64;
    }

    Ok((total, sha1.digest().to_string(), to_hex(&sha256.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn hashes_match_independent_computation() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("a.bin");
        std::fs::write(&file_path, b"hello world").unwrap();

        let (tx, rx) = mpsc::channel(8);
        tx.send(file_path.clone()).await.unwrap();
        drop(tx);

        let cancel = CancellationToken::new();
        let artifacts = collect(rx, dir.path().to_path_buf(), false, String::new(), cancel)
            .await
            .unwrap();

        assert_eq!(artifacts.len(), 1);
        let artifact = &artifacts[0];
        assert_eq!(artifact.size, 11);

        let expected_sha1 = Sha1::from(b"hello world").digest().to_string();
        let mut hasher = Sha256::new();
        hasher.update(b"hello world");
        let expected_sha256 = to_hex(&hasher.finalize());

        assert_eq!(artifact.sha1, expected_sha1);
        assert_eq!(artifact.sha256, expected_sha256);
    }

    #[tokio::test]
    async fn duplicate_absolute_paths_collapse_to_one_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("a.bin");
        std::fs::write(&file_path, b"data").unwrap();

        let (tx, rx) = mpsc::channel(8);
        tx.send(file_path.clone()).await.unwrap();
        tx.send(file_path.clone()).await.unwrap();
        drop(tx);

        let cancel = CancellationToken::new();
        let artifacts = collect(rx, dir.path().to_path_buf(), false, String::new(), cancel)
            .await
            .unwrap();

        assert_eq!(artifacts.len(), 1);
    }

    #[tokio::test]
    async fn relative_paths_use_forward_slashes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let file_path = dir.path().join("sub/a.bin");
        std::fs::write(&file_path, b"x").unwrap();

        let (tx, rx) = mpsc::channel(8);
        tx.send(file_path).await.unwrap();
        drop(tx);

        let cancel = CancellationToken::new();
        let artifacts = collect(rx, dir.path().to_path_buf(), false, String::new(), cancel)
            .await
            .unwrap();

        assert_eq!(artifacts[0].relative_path, "sub/a.bin");
    }

    #[tokio::test]
    async fn symlinked_match_is_skipped_unless_follow_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let target_path = dir.path().join("target.bin");
        std::fs::write(&target_path, b"data").unwrap();
        let link_path = dir.path().join("link.bin");
        std::os::unix::fs::symlink(&target_path, &link_path).unwrap();

        let (tx, rx) = mpsc::channel(8);
        tx.send(link_path.clone()).await.unwrap();
        drop(tx);

        let cancel = CancellationToken::new();
        let artifacts = collect(rx, dir.path().to_path_buf(), false, String::new(), cancel)
            .await
            .unwrap();
        assert!(artifacts.is_empty());

        let (tx, rx) = mpsc::channel(8);
        tx.send(link_path).await.unwrap();
        drop(tx);

        let cancel = CancellationToken::new();
        let artifacts = collect(rx, dir.path().to_path_buf(), true, String::new(), cancel)
            .await
            .unwrap();
        assert_eq!(artifacts.len(), 1);
    }
}
