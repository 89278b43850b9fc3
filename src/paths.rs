//! Relative-path normalization (spec §3 invariants, §9 open question).
//!
//! The relative path stored on an `Artifact` is always expressed from a
//! well-defined base: the working directory if the matched path was given
//! relative, or the filesystem/drive-volume root if it was given absolute.
//! Under the normalized-paths policy all separators become forward
//! slashes before the path is ever sent to the control plane.

use std::path::{Component, Path, PathBuf};

use crate::error::CollectError;

/// Computes the relative path an `Artifact` should record for `absolute`,
/// given the session's working directory (already canonicalized), and
/// whether the pattern that matched it was written as an absolute path.
///
/// Drive-letter absolute paths on Windows are rebased at the drive root
/// (`C:\a\b` -> `a/b`), matching the legacy behavior this policy
/// generalizes. UNC paths (`\\server\share\...`) are deliberately
/// unsupported here — see DESIGN.md's Open Question decision — and return
/// `CollectError::Io` rather than silently guessing a base.
pub fn relative_to(
    absolute: &Path,
    working_dir: &Path,
    was_absolute_pattern: bool,
) -> Result<String, CollectError> {
    let relative = if was_absolute_pattern {
        rebase_at_root(absolute)?
    } else {
        absolute
            .strip_prefix(working_dir)
            .map(PathBuf::from)
            .unwrap_or_else(|_| absolute.to_path_buf())
    };

    Ok(normalize_separators(&relative))
}

fn rebase_at_root(absolute: &Path) -> Result<PathBuf, CollectError> {
    let mut out = PathBuf::new();

    for component in absolute.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => {}
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(CollectError::Io {
                    path: absolute.to_path_buf(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "absolute path contains a parent component",
                    ),
                });
            }
            Component::Normal(part) => out.push(part),
        }
    }

    Ok(out)
}

fn normalize_separators(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// True if a raw glob pattern (pre-expansion) was written as an absolute
/// path, including Windows drive-letter forms (`C:\...`, `C:/...`).
pub fn pattern_is_absolute(pattern: &str) -> bool {
    Path::new(pattern).is_absolute()
        || pattern
            .as_bytes()
            .first()
            .is_some_and(|c| c.is_ascii_alphabetic())
            && pattern.as_bytes().get(1) == Some(&b':')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_pattern_bases_at_working_dir() {
        let working_dir = Path::new("/home/build/repo");
        let absolute = Path::new("/home/build/repo/fixtures/a.jpg");

        let rel = relative_to(absolute, working_dir, false).unwrap();
        assert_eq!(rel, "fixtures/a.jpg");
    }

    #[test]
    fn absolute_pattern_bases_at_filesystem_root() {
        let working_dir = Path::new("/home/build/repo");
        let absolute = Path::new("/var/log/build.log");

        let rel = relative_to(absolute, working_dir, true).unwrap();
        assert_eq!(rel, "var/log/build.log");
    }

    #[test]
    fn separators_are_always_forward_slashes() {
        let working_dir = Path::new("/home/build/repo");
        let absolute = Path::new("/home/build/repo/a/b/c.txt");

        let rel = relative_to(absolute, working_dir, false).unwrap();
        assert!(!rel.contains('\\'));
        assert_eq!(rel, "a/b/c.txt");
    }
}
