//! Path normalization inside a working directory

use crate::error::ScopeError;
use std::path::{Component, Path, PathBuf};

/// Canonical form of a working directory, falling back to lexical cleanup when it
/// does not exist yet
pub fn canonical_root(workdir: &Path) -> Result<PathBuf, ScopeError> {
    let absolute = if workdir.is_absolute() {
        workdir.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| unresolvable(workdir, e))?
            .join(workdir)
    };
    match std::fs::canonicalize(&absolute) {
        Ok(canonical) => Ok(canonical),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => normalize_absolute(&absolute),
        Err(err) => Err(unresolvable(workdir, err)),
    }
}

/// Resolve `raw` (relative to `root`, or absolute) to a canonical path inside `root`
///
/// `..` is folded lexically, then symlinks are resolved through the longest existing
/// ancestor so a link pointing outside the tree cannot smuggle a write out.
pub fn resolve_within(root: &Path, raw: &str) -> Result<PathBuf, ScopeError> {
    let cleaned = raw.trim().replace('\\', "/");
    if cleaned.is_empty() {
        return Err(ScopeError::EmptyPath);
    }

    let candidate = Path::new(&cleaned);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };

    let lexical = normalize_absolute(&joined)
        .map_err(|_| ScopeError::OutsideWorkdir(raw.trim().to_string()))?;
    let resolved = resolve_existing_prefix(&lexical)
        .map_err(|e| unresolvable(Path::new(raw.trim()), e))?;

    if resolved.starts_with(root) {
        Ok(resolved)
    } else {
        Err(ScopeError::OutsideWorkdir(raw.trim().to_string()))
    }
}

/// Fold `.` and `..` without touching the filesystem
pub fn normalize_absolute(path: &Path) -> Result<PathBuf, ScopeError> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
            Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::Normal(part) => normalized.push(part),
            Component::ParentDir => {
                if !normalized.pop() || normalized.as_os_str().is_empty() {
                    return Err(ScopeError::OutsideWorkdir(path.display().to_string()));
                }
            }
        }
    }
    Ok(normalized)
}

fn resolve_existing_prefix(path: &Path) -> std::io::Result<PathBuf> {
    let mut existing = path;
    let mut rest = Vec::new();
    loop {
        if existing.exists() || existing.symlink_metadata().is_ok() {
            break;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name.to_os_string());
                existing = parent;
            }
            _ => return Ok(path.to_path_buf()),
        }
    }

    let mut resolved = std::fs::canonicalize(existing)?;
    for part in rest.into_iter().rev() {
        resolved.push(part);
    }
    Ok(resolved)
}

fn unresolvable(path: &Path, err: std::io::Error) -> ScopeError {
    ScopeError::Unresolvable {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_paths_resolve_inside() {
        let dir = tempfile::tempdir().unwrap();
        let root = canonical_root(dir.path()).unwrap();

        let resolved = resolve_within(&root, "./src/../src/main/App.java").unwrap();
        assert_eq!(resolved, root.join("src/main/App.java"));

        let windows = resolve_within(&root, "src\\main\\App.java").unwrap();
        assert_eq!(windows, root.join("src/main/App.java"));
    }

    #[test]
    fn test_escapes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let root = canonical_root(dir.path()).unwrap();

        assert!(matches!(
            resolve_within(&root, "../outside.txt"),
            Err(ScopeError::OutsideWorkdir(_))
        ));
        assert!(matches!(
            resolve_within(&root, "/etc/passwd"),
            Err(ScopeError::OutsideWorkdir(_))
        ));
        assert_eq!(resolve_within(&root, "   "), Err(ScopeError::EmptyPath));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_out_of_tree_is_rejected() {
        let outside = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let root = canonical_root(dir.path()).unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("link")).unwrap();

        assert!(matches!(
            resolve_within(&root, "link/new/file.txt"),
            Err(ScopeError::OutsideWorkdir(_))
        ));
    }
}
