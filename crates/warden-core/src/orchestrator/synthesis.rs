//! Synthesis phase: engine + guardrail + normalizer

use super::{PhaseError, PipelinePhase};
use crate::config::GuardrailSettings;
use crate::engine::{ReasoningEngine, ToolSpec};
use crate::error::{EngineError, WardenError};
use crate::guardrail::{GuardedToolbox, IntentReminder, ScopeGuardrail};
use crate::normalizer::PatchNormalizer;
use crate::state::PipelineState;
use crate::types::{ErrorSeverity, Stage};
use async_trait::async_trait;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{info, warn};

pub struct SynthesisPhase {
    engine: Arc<dyn ReasoningEngine>,
    tools: Vec<ToolSpec>,
    guardrail: GuardrailSettings,
}

impl SynthesisPhase {
    pub fn new(engine: Arc<dyn ReasoningEngine>, tools: Vec<ToolSpec>, guardrail: GuardrailSettings) -> Self {
        Self {
            engine,
            tools,
            guardrail,
        }
    }
}

/// Prompt handed to the engine
pub fn build_prompt(
    state: &PipelineState,
    guardrail: &ScopeGuardrail,
    reminder: Option<&IntentReminder>,
) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "{}", state.request);
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "Working directory: {}", guardrail.workdir().display());
    if let Some(context) = &state.context {
        let _ = writeln!(prompt, "The tree holds {} file(s).", context.file_count);
    }

    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "You may only create or modify these paths (entries ending in / are directories):");
    for entry in guardrail.effective_scope() {
        let _ = writeln!(prompt, "- {}", entry);
    }

    if let Some(feedback) = &state.feedback {
        if !feedback.items.is_empty() {
            let _ = writeln!(prompt);
            let _ = writeln!(prompt, "Structure notes:");
            for item in &feedback.items {
                let _ = writeln!(prompt, "- {}", item);
            }
        }
    }

    match reminder {
        Some(reminder) => reminder.attach(&prompt),
        None => prompt,
    }
}

#[async_trait]
impl PipelinePhase for SynthesisPhase {
    fn stage(&self) -> Stage {
        Stage::Synthesis
    }

    async fn run(&self, state: &PipelineState) -> std::result::Result<PipelineState, PhaseError> {
        if state.allow_list.is_empty() {
            return Err(PhaseError::Fatal(
                "allow-list is empty; every mutation would be rejected".to_string(),
            ));
        }

        let guardrail = ScopeGuardrail::new(
            &state.allow_list,
            &state.workdir,
            self.guardrail.mode,
            &self.guardrail.role_keywords,
        )
        .map(Arc::new)
        .map_err(PhaseError::classify)?;

        let reminder = self
            .guardrail
            .intent_reminder
            .then(|| IntentReminder::new(state.request.clone()));
        let mut toolbox = GuardedToolbox::new(Arc::clone(&guardrail));
        if let Some(reminder) = reminder.clone() {
            toolbox = toolbox.with_reminder(reminder);
        }

        let prompt = build_prompt(state, &guardrail, reminder.as_ref());
        info!(engine = self.engine.name(), scope = guardrail.effective_scope().len(), "synthesis started");

        let run = self
            .engine
            .run(&prompt, &self.tools, guardrail.workdir(), &toolbox)
            .await
            .map_err(|e| match e {
                WardenError::Engine(EngineError::Spawn(_)) => PhaseError::Fatal(e.to_string()),
                other => PhaseError::Recoverable(other.to_string()),
            })?;

        let mut next = state.clone();
        next.denied_invocations = toolbox.denials();

        match PatchNormalizer::new(&guardrail).normalize(&run) {
            Ok(patches) => next.patches = patches,
            Err(e @ WardenError::NoChangesProduced { .. }) => {
                warn!(error = %e, "engine produced no usable patch");
                next.patches.clear();
                next.record_error(Stage::Synthesis, ErrorSeverity::Recoverable, e.to_string());
            }
            Err(e) => return Err(PhaseError::classify(e)),
        }

        info!(
            patches = next.patches.len(),
            denied = next.denied_invocations,
            "synthesis finished"
        );
        Ok(next)
    }
}
