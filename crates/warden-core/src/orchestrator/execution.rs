//! Execution phase: apply the synthesized patches

use super::{PhaseError, PipelinePhase};
use crate::config::GuardrailSettings;
use crate::error::Result;
use crate::guardrail::ScopeGuardrail;
use crate::state::PipelineState;
use crate::types::{AppliedChange, ChangeOutcome, ErrorSeverity, ExecutionReport, Patch, Stage};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Applies patches; the guardrail is the only writer
#[async_trait]
pub trait PatchExecutor: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        patches: &[Patch],
        guardrail: &ScopeGuardrail,
        dry_run: bool,
    ) -> Result<ExecutionReport>;
}

/// Applies every patch in order against the real tree
#[derive(Debug, Clone, Default)]
pub struct DirectExecutor;

/// Apply patches one by one; a failing patch is recorded and the rest still run
pub fn apply_all(patches: &[Patch], guardrail: &ScopeGuardrail, dry_run: bool) -> Vec<AppliedChange> {
    patches
        .iter()
        .map(|patch| match guardrail.apply(patch, dry_run) {
            Ok(change) => change,
            Err(e) => {
                warn!(path = %patch.display_path(guardrail.workdir()), error = %e, "patch failed");
                AppliedChange {
                    path: patch.path.clone(),
                    operation: patch.operation,
                    outcome: ChangeOutcome::Failed {
                        reason: e.to_string(),
                    },
                    bytes: 0,
                }
            }
        })
        .collect()
}

#[async_trait]
impl PatchExecutor for DirectExecutor {
    fn name(&self) -> &str {
        "direct"
    }

    async fn execute(
        &self,
        patches: &[Patch],
        guardrail: &ScopeGuardrail,
        dry_run: bool,
    ) -> Result<ExecutionReport> {
        Ok(ExecutionReport {
            changes: apply_all(patches, guardrail, dry_run),
            verification: None,
        })
    }
}

pub struct ExecutionPhase {
    executor: Arc<dyn PatchExecutor>,
    guardrail: GuardrailSettings,
    dry_run: bool,
}

impl ExecutionPhase {
    pub fn new(executor: Arc<dyn PatchExecutor>, guardrail: GuardrailSettings, dry_run: bool) -> Self {
        Self {
            executor,
            guardrail,
            dry_run,
        }
    }
}

#[async_trait]
impl PipelinePhase for ExecutionPhase {
    fn stage(&self) -> Stage {
        Stage::Execution
    }

    async fn run(&self, state: &PipelineState) -> std::result::Result<PipelineState, PhaseError> {
        let guardrail = ScopeGuardrail::new(
            &state.allow_list,
            &state.workdir,
            self.guardrail.mode,
            &self.guardrail.role_keywords,
        )
        .map_err(PhaseError::classify)?;

        let report = self
            .executor
            .execute(&state.patches, &guardrail, self.dry_run)
            .await
            .map_err(PhaseError::classify)?;

        let mut next = state.clone();
        for change in &report.changes {
            if let ChangeOutcome::Failed { reason } = &change.outcome {
                next.record_error(
                    Stage::Execution,
                    ErrorSeverity::Recoverable,
                    format!("{}: {}", change.path.display(), reason),
                );
            }
        }
        if let Some(verification) = report.verification.as_ref().filter(|v| !v.success) {
            next.record_error(
                Stage::Execution,
                ErrorSeverity::Recoverable,
                format!(
                    "verification `{}` failed with exit code {}",
                    verification.command, verification.exit_code
                ),
            );
        }

        info!(
            executor = self.executor.name(),
            applied = report.changes.iter().filter(|c| c.is_applied()).count(),
            total = report.changes.len(),
            dry_run = self.dry_run,
            "execution finished"
        );
        next.applied = report.changes;
        next.verification = report.verification;
        Ok(next)
    }
}
