//! Context phase: summarize the working tree

use super::{PhaseError, PipelinePhase};
use crate::error::Result;
use crate::state::{ContextSummary, PipelineState};
use crate::types::{relative_display, Stage};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use walkdir::{DirEntry, WalkDir};

/// Directories never worth scanning
pub const SKIPPED_DIRS: &[&str] = &["target", "node_modules", "build", "dist", "__pycache__"];

/// Hidden entries and build output are left out of every tree walk
pub fn is_skipped(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || (entry.file_type().is_dir() && SKIPPED_DIRS.contains(&name.as_ref()))
}

/// Walk the source files under `workdir`
pub fn source_files(workdir: &Path) -> impl Iterator<Item = DirEntry> {
    WalkDir::new(workdir)
        .into_iter()
        .filter_entry(|e| !is_skipped(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
}

/// Produces the context summary the later phases plan against
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn summarize(&self, workdir: &Path) -> Result<ContextSummary>;
}

/// Filesystem walk with a bounded path sample
#[derive(Debug, Clone)]
pub struct FsContextProvider {
    sample_limit: usize,
}

impl FsContextProvider {
    pub fn new() -> Self {
        Self { sample_limit: 50 }
    }

    pub fn with_sample_limit(mut self, limit: usize) -> Self {
        self.sample_limit = limit;
        self
    }
}

impl Default for FsContextProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContextProvider for FsContextProvider {
    async fn summarize(&self, workdir: &Path) -> Result<ContextSummary> {
        let mut summary = ContextSummary::default();
        for entry in source_files(workdir) {
            summary.file_count += 1;
            if summary.sampled.len() < self.sample_limit {
                summary.sampled.push(relative_display(entry.path(), workdir));
            } else {
                summary.truncated = true;
            }
        }
        summary.sampled.sort();
        Ok(summary)
    }
}

pub struct ContextPhase {
    provider: Arc<dyn ContextProvider>,
}

impl ContextPhase {
    pub fn new(provider: Arc<dyn ContextProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl PipelinePhase for ContextPhase {
    fn stage(&self) -> Stage {
        Stage::Context
    }

    async fn run(&self, state: &PipelineState) -> std::result::Result<PipelineState, PhaseError> {
        if !state.workdir.is_dir() {
            return Err(PhaseError::Fatal(format!(
                "working directory not found: {}",
                state.workdir.display()
            )));
        }

        let summary = self
            .provider
            .summarize(&state.workdir)
            .await
            .map_err(PhaseError::classify)?;
        info!(files = summary.file_count, "context scanned");

        let mut next = state.clone();
        next.context = Some(summary);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_summary_skips_noise() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::create_dir_all(root.join("target/debug")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join("src/a.rs"), "").unwrap();
        std::fs::write(root.join("src/b.rs"), "").unwrap();
        std::fs::write(root.join("target/debug/out"), "").unwrap();
        std::fs::write(root.join(".git/HEAD"), "").unwrap();

        let summary = FsContextProvider::new()
            .with_sample_limit(1)
            .summarize(root)
            .await
            .unwrap();
        assert_eq!(summary.file_count, 2);
        assert_eq!(summary.sampled.len(), 1);
        assert!(summary.truncated);
    }

    #[tokio::test]
    async fn test_missing_workdir_is_fatal() {
        let phase = ContextPhase::new(Arc::new(FsContextProvider::new()));
        let state = PipelineState::new("x", "/definitely/not/here");
        let err = phase.run(&state).await.unwrap_err();
        assert!(matches!(err, PhaseError::Fatal(_)));
    }
}
