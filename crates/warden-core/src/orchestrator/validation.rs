//! Structure phase: run the compliance validator and copy its final round into the state

use super::{PhaseError, PipelinePhase};
use crate::state::PipelineState;
use crate::structure::StructureValidator;
use crate::types::{ErrorSeverity, Stage};
use async_trait::async_trait;
use tracing::warn;

pub struct StructurePhase {
    validator: StructureValidator,
}

impl StructurePhase {
    pub fn new(validator: StructureValidator) -> Self {
        Self { validator }
    }
}

#[async_trait]
impl PipelinePhase for StructurePhase {
    fn stage(&self) -> Stage {
        Stage::Structure
    }

    async fn run(&self, state: &PipelineState) -> std::result::Result<PipelineState, PhaseError> {
        let report = self
            .validator
            .validate(&state.workdir, &state.allow_list)
            .map_err(PhaseError::classify)?;

        let mut next = state.clone();
        next.violations = report.violations;
        next.compliance_score = report.compliance_score;
        next.production_ready = report.production_ready;
        next.feedback = report.feedback;
        for dir in report.created_dirs {
            if !next.created_dirs.contains(&dir) {
                next.created_dirs.push(dir);
            }
        }

        if !next.production_ready {
            warn!(score = next.compliance_score, "layout is not production ready");
            next.record_error(
                Stage::Structure,
                ErrorSeverity::Recoverable,
                format!(
                    "layout not production ready after {} round(s): score {:.1}, {} violation(s)",
                    report.rounds.len(),
                    next.compliance_score,
                    next.violations.len()
                ),
            );
        }
        Ok(next)
    }
}
