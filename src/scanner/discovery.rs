//! Package discovery: candidate folders and manifest classification

use std::path::{Component, Path, PathBuf};

use crate::package::manifest::{has_namespace, read_manifest};

/// Directories whose changes never trigger a package update
const IGNORED_DIRS: &[&str] = &["node_modules", "target", "build", "dist", "out"];

/// Whether a path relative to a watched root should be ignored
///
/// Hidden segments (leading `.`) and build/output/dependency directories are
/// excluded.
#[must_use]
pub fn is_ignored(relative: &Path) -> bool {
    relative.components().any(|component| match component {
        Component::Normal(segment) => {
            let segment = segment.to_string_lossy();
            segment.starts_with('.') || IGNORED_DIRS.contains(&segment.as_ref())
        }
        _ => false,
    })
}

/// Decide whether a folder is a package
///
/// A folder is a package when its manifest parses and carries the namespace
/// key. I/O and parse errors are logged and classify as "not a package".
pub async fn is_package(dir: &Path, manifest_file: &str, namespace: &str) -> bool {
    let manifest_path = dir.join(manifest_file);
    match read_manifest(&manifest_path).await {
        Ok(value) => has_namespace(&value, namespace),
        Err(crate::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            tracing::debug!(
                path = %manifest_path.display(),
                error = %e,
                "manifest not usable, not a package"
            );
            false
        }
    }
}

/// Immediate subfolders of a root that may hold a package
pub async fn candidate_dirs(root: &Path) -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(path = %root.display(), error = %e, "failed to read plugin root");
            return candidates;
        }
    };

    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
                let name = entry.file_name();
                if is_dir && !is_ignored(Path::new(&name)) {
                    candidates.push(entry.path());
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(path = %root.display(), error = %e, "failed to list plugin root");
                break;
            }
        }
    }

    candidates.sort();
    candidates
}

/// Map a changed path to the candidate package it belongs to
///
/// With `root_is_package`, everything maps to the root. Otherwise the
/// candidate is the root joined with the first segment under it. Returns
/// `None` for paths outside the root, the root itself, or ignored paths.
#[must_use]
pub fn candidate_for(root: &Path, changed: &Path, root_is_package: bool) -> Option<PathBuf> {
    let relative = changed.strip_prefix(root).ok()?;
    if is_ignored(relative) {
        return None;
    }
    if root_is_package {
        return Some(root.to_path_buf());
    }

    match relative.components().next()? {
        Component::Normal(first) => Some(root.join(first)),
        _ => None,
    }
}
