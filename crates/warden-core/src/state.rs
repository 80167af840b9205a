//! Pipeline state and the suspension blob
//!
//! [`PipelineState`] is the single record threaded through every phase. Phases never
//! mutate it in place: they return a new state that the orchestrator commits.

use crate::error::{Result, WardenError};
use crate::structure::{StructureFeedback, Violation};
use crate::types::{
    AllowList, AppliedChange, ErrorRecord, ErrorSeverity, Patch, Phase, Stage, Timestamp,
    VerificationResult,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// What the context phase saw of the tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSummary {
    pub file_count: usize,
    /// Bounded sample of workdir-relative paths
    pub sampled: Vec<String>,
    pub truncated: bool,
}

/// Everything one request accumulates on its way through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub run_id: String,
    pub request: String,
    pub workdir: PathBuf,
    pub phase: Phase,
    pub context: Option<ContextSummary>,
    pub allow_list: AllowList,
    pub violations: Vec<Violation>,
    pub compliance_score: f64,
    pub production_ready: bool,
    pub feedback: Option<StructureFeedback>,
    pub created_dirs: Vec<PathBuf>,
    pub patches: Vec<Patch>,
    pub denied_invocations: usize,
    pub applied: Vec<AppliedChange>,
    pub verification: Option<VerificationResult>,
    pub errors: Vec<ErrorRecord>,
    pub started_at: Timestamp,
}

impl PipelineState {
    pub fn new(request: impl Into<String>, workdir: impl AsRef<Path>) -> Self {
        let workdir = workdir.as_ref();
        let workdir = if workdir.is_absolute() {
            workdir.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(workdir))
                .unwrap_or_else(|_| workdir.to_path_buf())
        };

        Self {
            run_id: Uuid::new_v4().to_string(),
            request: request.into(),
            workdir,
            phase: Phase::Init,
            context: None,
            allow_list: AllowList::new(),
            violations: Vec::new(),
            compliance_score: 0.0,
            production_ready: false,
            feedback: None,
            created_dirs: Vec::new(),
            patches: Vec::new(),
            denied_invocations: 0,
            applied: Vec::new(),
            verification: None,
            errors: Vec::new(),
            started_at: Utc::now(),
        }
    }

    pub fn record_error(&mut self, stage: Stage, severity: ErrorSeverity, message: impl Into<String>) {
        self.errors.push(ErrorRecord::new(stage, severity, message));
    }

    pub fn has_fatal_error(&self) -> bool {
        self.errors.iter().any(ErrorRecord::is_fatal)
    }

    pub fn fatal_errors(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.errors.iter().filter(|e| e.is_fatal())
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Whether `stage` already ran for this state
    pub fn completed(&self, stage: Stage) -> bool {
        self.phase != Phase::Failed && self.phase.rank() >= stage.completes().rank()
    }
}

const BLOB_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    run_id: String,
    checksum: String,
    state: String,
}

/// Opaque, checksummed serialization of a suspended state
pub struct SuspendedRun;

impl SuspendedRun {
    pub fn seal(state: &PipelineState) -> Result<String> {
        let body = serde_json::to_string(state)?;
        let envelope = Envelope {
            version: BLOB_VERSION,
            run_id: state.run_id.clone(),
            checksum: blake3::hash(body.as_bytes()).to_hex().to_string(),
            state: body,
        };
        Ok(serde_json::to_string(&envelope)?)
    }

    /// Reattach a sealed state, rejecting tampered or truncated blobs
    pub fn open(blob: &str) -> Result<PipelineState> {
        let envelope: Envelope = serde_json::from_str(blob.trim())
            .map_err(|e| WardenError::InvalidSuspension(format!("unreadable blob: {}", e)))?;
        if envelope.version != BLOB_VERSION {
            return Err(WardenError::InvalidSuspension(format!(
                "unsupported blob version {}",
                envelope.version
            )));
        }
        let checksum = blake3::hash(envelope.state.as_bytes()).to_hex().to_string();
        if checksum != envelope.checksum {
            return Err(WardenError::InvalidSuspension("checksum mismatch".to_string()));
        }
        let state: PipelineState = serde_json::from_str(&envelope.state)?;
        if state.run_id != envelope.run_id {
            return Err(WardenError::InvalidSuspension("run id mismatch".to_string()));
        }
        Ok(state)
    }
}
