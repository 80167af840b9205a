//! Auto-remediation between validation rounds

use super::scoring::{Violation, ViolationKind};
use crate::error::{Result, ResultExt, WardenError};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Create the directory of every `missing_directory` violation
///
/// Returns the directories that did not exist before, outermost first, so the caller
/// can release them again.
pub fn auto_fix(workdir: &Path, violations: &[Violation]) -> Result<Vec<PathBuf>> {
    let mut created = Vec::new();

    for violation in violations
        .iter()
        .filter(|v| v.kind == ViolationKind::MissingDirectory)
    {
        let target = workdir.join(&violation.path);
        if target.is_dir() {
            continue;
        }

        let mut fresh: Vec<PathBuf> = target
            .ancestors()
            .take_while(|p| *p != workdir && !p.exists())
            .map(Path::to_path_buf)
            .collect();
        fresh.reverse();

        std::fs::create_dir_all(&target)
            .map_err(WardenError::from)
            .with_context(|| format!("creating {}", target.display()))?;
        debug!(dir = %violation.path, "auto-fix created layer directory");
        created.extend(fresh);
    }

    Ok(created)
}

/// Remove auto-fix directories that are still empty, innermost first
///
/// Returns how many were removed. Directories that gained content are left alone.
pub fn release(created: &[PathBuf]) -> usize {
    let mut removed = 0;
    for dir in created.iter().rev() {
        let empty = match std::fs::read_dir(dir) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => continue,
        };
        if !empty {
            continue;
        }
        match std::fs::remove_dir(dir) {
            Ok(()) => removed += 1,
            Err(e) => warn!(dir = %dir.display(), error = %e, "could not release directory"),
        }
    }
    removed
}
