//! Glob Resolver (C1): expands user patterns into a stream of concrete
//! file paths.

use std::path::PathBuf;

use tokio::sync::mpsc::{self, Receiver};
use tokio_util::sync::CancellationToken;

use crate::error::CollectError;

/// Channel depth between the resolver and the Artifact Builder workers.
/// Bounded so a slow hashing pool applies backpressure to a fast glob walk.
const CHANNEL_CAPACITY: usize = 256;

/// Splits a delimiter-separated pattern list the way the agent's CLI passes
/// them through, trimming whitespace and dropping empty entries.
pub fn split_patterns(patterns: &str, delimiter: char) -> Vec<String> {
    patterns
        .split(delimiter)
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Expands `patterns` into a bounded channel of concrete file paths.
///
/// Directory matches are logged and skipped. A pattern that matches nothing
/// is non-fatal. An unparsable pattern is fatal: the first one cancels
/// `cancel` so in-flight Artifact Builder workers stop promptly and is
/// returned as the resolver's own error once collection finishes. Symlinks
/// are followed to their target path before matching, then re-resolved
/// against `follow_symlinks` during the Artifact Builder's own stat pass.
pub fn spawn(
    patterns: Vec<String>,
    follow_symlinks: bool,
    cancel: CancellationToken,
) -> (Receiver<PathBuf>, tokio::task::JoinHandle<Result<(), CollectError>>) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    let handle = tokio::task::spawn_blocking(move || {
        let mut glob_options = glob::MatchOptions::new();
        glob_options.require_literal_leading_dot = false;

        for pattern in patterns {
            if cancel.is_cancelled() {
                break;
            }

            let entries = match glob::glob_with(&pattern, glob_options) {
                Ok(entries) => entries,
                Err(source) => {
                    tracing::error!(pattern = %pattern, "unparsable glob pattern");
                    cancel.cancel();
                    return Err(CollectError::BadPattern { pattern, source });
                }
            };

            let mut matched_any = false;

            for entry in entries {
                if cancel.is_cancelled() {
                    break;
                }

                let path = match entry {
                    Ok(path) => path,
                    Err(err) => {
                        tracing::warn!(pattern = %pattern, error = %err, "glob entry unreadable, skipping");
                        continue;
                    }
                };

                let metadata = if follow_symlinks {
                    std::fs::metadata(&path)
                } else {
                    std::fs::symlink_metadata(&path)
                };

                match metadata {
                    Ok(meta) if meta.is_dir() => {
                        tracing::debug!(path = %path.display(), "skipping directory match");
                        continue;
                    }
                    Ok(_) => {}
                    Err(_) => {
                        // Race between glob's readdir and our stat; treat as
                        // a miss rather than a hard failure.
                        continue;
                    }
                }

                matched_any = true;

                if tx.blocking_send(path).is_err() {
                    break;
                }
            }

            if !matched_any {
                tracing::warn!(pattern = %pattern, "pattern matched no files");
            }
        }

        Ok(())
    });

    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_and_drops_empty_patterns() {
        let parsed = split_patterns(" fixtures/**/*.jpg ;; fixtures/**/*.gif ", ';');
        assert_eq!(parsed, vec!["fixtures/**/*.jpg", "fixtures/**/*.gif"]);
    }

    #[tokio::test]
    async fn resolves_overlapping_globs_to_every_match() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"a").unwrap();
        std::fs::write(dir.path().join("b.jpg"), b"b").unwrap();
        std::fs::create_dir(dir.path().join("folder")).unwrap();
        std::fs::write(dir.path().join("folder/c.jpg"), b"c").unwrap();

        let pattern_all = format!("{}/**/*.jpg", dir.path().display());
        let pattern_one = format!("{}/folder/c.jpg", dir.path().display());

        let cancel = CancellationToken::new();
        let (mut rx, handle) = spawn(vec![pattern_all, pattern_one], false, cancel);

        let mut seen = Vec::new();
        while let Some(path) = rx.recv().await {
            seen.push(path);
        }

        handle.await.unwrap().unwrap();
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn missing_pattern_is_non_fatal() {
        let cancel = CancellationToken::new();
        let (mut rx, handle) = spawn(vec!["/no/such/dir/*.jpg".to_string()], false, cancel);

        assert!(rx.recv().await.is_none());
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn unparsable_pattern_is_fatal() {
        let cancel = CancellationToken::new();
        let (mut rx, handle) = spawn(vec!["[".to_string()], false, cancel);

        assert!(rx.recv().await.is_none());
        assert!(handle.await.unwrap().is_err());
    }
}
