//! Impact phase: widen the allow-list to files that reference the planned entities

use super::context::source_files;
use super::intent::extract_entities;
use super::{PhaseError, PipelinePhase};
use crate::error::{Result, WardenError};
use crate::state::PipelineState;
use crate::types::{relative_display, AllowList, ErrorSeverity, Stage};
use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Finds existing files a change is likely to ripple into
#[async_trait]
pub trait ImpactAnalyzer: Send + Sync {
    async fn analyze(&self, request: &str, workdir: &Path, planned: &AllowList) -> Result<Vec<String>>;
}

/// Whole-word references to an entity named in the request
#[derive(Debug, Clone)]
pub struct ReferenceImpactAnalyzer {
    max_file_bytes: u64,
    max_files: usize,
}

impl ReferenceImpactAnalyzer {
    pub fn new() -> Self {
        Self {
            max_file_bytes: 512 * 1024,
            max_files: 50,
        }
    }

    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }
}

impl Default for ReferenceImpactAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImpactAnalyzer for ReferenceImpactAnalyzer {
    async fn analyze(&self, request: &str, workdir: &Path, planned: &AllowList) -> Result<Vec<String>> {
        let entities = extract_entities(request);
        if entities.is_empty() {
            return Ok(Vec::new());
        }
        let alternation = entities
            .iter()
            .map(|e| regex::escape(e))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = Regex::new(&format!(r"\b(?:{})\b", alternation))
            .map_err(|e| WardenError::Config(e.to_string()))?;

        let mut impacted = Vec::new();
        for entry in source_files(workdir) {
            let too_big = entry
                .metadata()
                .map(|m| m.len() > self.max_file_bytes)
                .unwrap_or(true);
            if too_big {
                continue;
            }
            let relative = relative_display(entry.path(), workdir);
            if planned.contains(&relative) {
                continue;
            }
            // Binary or unreadable files are skipped
            let Ok(content) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            if !pattern.is_match(&content) {
                continue;
            }
            if impacted.len() >= self.max_files {
                warn!(limit = self.max_files, "impact analysis truncated");
                break;
            }
            impacted.push(relative);
        }
        impacted.sort();
        Ok(impacted)
    }
}

pub struct ImpactPhase {
    analyzer: Arc<dyn ImpactAnalyzer>,
}

impl ImpactPhase {
    pub fn new(analyzer: Arc<dyn ImpactAnalyzer>) -> Self {
        Self { analyzer }
    }
}

#[async_trait]
impl PipelinePhase for ImpactPhase {
    fn stage(&self) -> Stage {
        Stage::Impact
    }

    async fn run(&self, state: &PipelineState) -> std::result::Result<PipelineState, PhaseError> {
        let mut next = state.clone();
        match self
            .analyzer
            .analyze(&state.request, &state.workdir, &state.allow_list)
            .await
        {
            Ok(impacted) => {
                let added = next.allow_list.extend(impacted);
                info!(added, total = next.allow_list.len(), "impact analysis widened scope");
            }
            Err(e) => match PhaseError::classify(e) {
                PhaseError::Recoverable(message) => {
                    next.record_error(Stage::Impact, ErrorSeverity::Recoverable, message)
                }
                fatal => return Err(fatal),
            },
        }
        Ok(next)
    }
}
