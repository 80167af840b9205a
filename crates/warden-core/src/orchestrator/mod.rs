//! Orchestrator
//!
//! Sequences the pipeline phases over one evolving [`PipelineState`]:
//!
//! ```text
//! context → intent → structure → impact → synthesis → [confirmation] → execution
//! ```
//!
//! Each phase reads the committed state and returns a new one. The orchestrator
//! commits it only when the phase succeeded and the state invariants still hold
//! (immutable request and workdir, append-only errors, monotonic allow-list).
//! Recoverable errors are recorded and the run advances on degraded inputs; fatal
//! errors move the run straight to [`Phase::Failed`].
//!
//! Phases run on the blocking pool under the phase deadline, so a phase stuck in
//! synchronous filesystem work still times out. Whatever it returns late is dropped.

pub mod context;
pub mod execution;
pub mod impact;
pub mod intent;
pub mod synthesis;
pub mod validation;

pub use context::{ContextPhase, ContextProvider, FsContextProvider};
pub use execution::{apply_all, DirectExecutor, ExecutionPhase, PatchExecutor};
pub use impact::{ImpactAnalyzer, ImpactPhase, ReferenceImpactAnalyzer};
pub use intent::{
    extract_entities, IntentExtractor, IntentInput, IntentPhase, TemplateIntentExtractor,
};
pub use synthesis::{build_prompt, SynthesisPhase};
pub use validation::StructurePhase;

use crate::config::WardenConfig;
use crate::engine::{default_tools, ProcessEngine, ReasoningEngine};
use crate::error::{EngineError, Result, WardenError};
use crate::state::{PipelineState, SuspendedRun};
use crate::structure::{release, StructureValidator};
use crate::template::{CompiledTemplate, TemplateCatalog};
use crate::types::{ErrorRecord, ErrorSeverity, Phase, Stage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// How a phase failed; the orchestrator reads only the tag
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PhaseError {
    #[error("{0}")]
    Recoverable(String),

    #[error("{0}")]
    Fatal(String),
}

impl PhaseError {
    /// Misconfiguration and a missing tree are fatal; everything else degrades the run
    pub fn classify(err: WardenError) -> Self {
        match err.root() {
            WardenError::WorkdirNotFound(_)
            | WardenError::Template(_)
            | WardenError::Config(_)
            | WardenError::InvalidSuspension(_)
            | WardenError::Engine(EngineError::Spawn(_)) => PhaseError::Fatal(err.to_string()),
            _ => PhaseError::Recoverable(err.to_string()),
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PhaseError::Recoverable(_) => ErrorSeverity::Recoverable,
            PhaseError::Fatal(_) => ErrorSeverity::Fatal,
        }
    }
}

/// One step of the pipeline: `&state -> state'`
#[async_trait]
pub trait PipelinePhase: Send + Sync {
    fn stage(&self) -> Stage;

    async fn run(&self, state: &PipelineState) -> std::result::Result<PipelineState, PhaseError>;
}

/// Human decision at the confirmation point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confirmation {
    Approve,
    Cancel,
}

/// What `run` and `resume` hand back
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Terminal state: `Executed` or `Failed`
    Completed(Box<PipelineState>),
    /// Waiting for confirmation; `blob` reattaches the state
    Suspended {
        blob: String,
        state: Box<PipelineState>,
    },
}

impl RunOutcome {
    pub fn state(&self) -> &PipelineState {
        match self {
            RunOutcome::Completed(state) => state,
            RunOutcome::Suspended { state, .. } => state,
        }
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, RunOutcome::Suspended { .. })
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary::from_state(self.state())
    }
}

/// Compact report of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub phase: Phase,
    pub compliance_score: f64,
    pub production_ready: bool,
    pub allow_list: usize,
    pub patches: usize,
    pub applied: usize,
    pub dry_run: usize,
    pub denied_invocations: usize,
    pub feedback: Vec<String>,
    pub errors: Vec<ErrorRecord>,
}

impl RunSummary {
    pub fn from_state(state: &PipelineState) -> Self {
        use crate::types::ChangeOutcome;
        Self {
            run_id: state.run_id.clone(),
            phase: state.phase,
            compliance_score: state.compliance_score,
            production_ready: state.production_ready,
            allow_list: state.allow_list.len(),
            patches: state.patches.len(),
            applied: state.applied.iter().filter(|c| c.is_applied()).count(),
            dry_run: state
                .applied
                .iter()
                .filter(|c| c.outcome == ChangeOutcome::DryRun)
                .count(),
            denied_invocations: state.denied_invocations,
            feedback: state
                .feedback
                .as_ref()
                .map(|f| f.items.clone())
                .unwrap_or_default(),
            errors: state.errors.clone(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.phase == Phase::Executed
    }
}

/// Phase sequencer with error routing and an optional confirmation point
pub struct Orchestrator {
    phases: Vec<Arc<dyn PipelinePhase>>,
    execution: Arc<dyn PipelinePhase>,
    phase_timeout: Duration,
    require_confirmation: bool,
}

impl Orchestrator {
    pub fn builder(config: WardenConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    /// Assemble from explicit phases; `phases` run in order before the confirmation point
    pub fn from_phases(
        phases: Vec<Box<dyn PipelinePhase>>,
        execution: Box<dyn PipelinePhase>,
        phase_timeout: Duration,
        require_confirmation: bool,
    ) -> Self {
        Self {
            phases: phases.into_iter().map(Arc::from).collect(),
            execution: Arc::from(execution),
            phase_timeout,
            require_confirmation,
        }
    }

    /// Start a new run
    pub async fn start(&self, request: impl Into<String>, workdir: impl AsRef<std::path::Path>) -> Result<RunOutcome> {
        self.run(PipelineState::new(request, workdir)).await
    }

    /// Drive `state` up to the confirmation point (or to the end)
    ///
    /// Phases the state already completed are skipped, so re-running a committed state
    /// never repeats work.
    pub async fn run(&self, mut state: PipelineState) -> Result<RunOutcome> {
        info!(run_id = %state.run_id, request = %state.request, "run started");

        for phase in &self.phases {
            if state.is_terminal() {
                break;
            }
            if state.completed(phase.stage()) {
                continue;
            }
            state = self.step(phase, state).await;
        }

        if state.is_terminal() || state.completed(Stage::Execution) {
            return Ok(self.finish(state));
        }

        if self.require_confirmation {
            let blob = SuspendedRun::seal(&state)?;
            info!(run_id = %state.run_id, patches = state.patches.len(), "suspended for confirmation");
            return Ok(RunOutcome::Suspended {
                blob,
                state: Box::new(state),
            });
        }

        let state = self.step(&self.execution, state).await;
        Ok(self.finish(state))
    }

    /// Reattach a suspended state and act on the human decision
    pub async fn resume(&self, blob: &str, confirmation: Confirmation) -> Result<RunOutcome> {
        let mut state = SuspendedRun::open(blob)?;
        if state.phase != Phase::Synthesized {
            return Err(WardenError::InvalidSuspension(format!(
                "state is at {}, expected Synthesized",
                state.phase
            )));
        }

        match confirmation {
            Confirmation::Approve => {
                info!(run_id = %state.run_id, "execution confirmed");
                let state = self.step(&self.execution, state).await;
                Ok(self.finish(state))
            }
            Confirmation::Cancel => {
                let released = release(&state.created_dirs);
                warn!(run_id = %state.run_id, released, "execution cancelled");
                state.record_error(
                    Stage::Confirmation,
                    ErrorSeverity::Fatal,
                    "execution not confirmed",
                );
                state.phase = Phase::Failed;
                Ok(self.finish(state))
            }
        }
    }

    fn finish(&self, state: PipelineState) -> RunOutcome {
        match state.phase {
            Phase::Failed => error!(run_id = %state.run_id, errors = state.errors.len(), "run failed"),
            phase => info!(run_id = %state.run_id, %phase, "run finished"),
        }
        RunOutcome::Completed(Box::new(state))
    }

    /// Run one phase under the deadline and commit or route its result
    async fn step(&self, phase: &Arc<dyn PipelinePhase>, mut state: PipelineState) -> PipelineState {
        let stage = phase.stage();
        let deadline = self.phase_timeout;

        let worker = {
            let phase = Arc::clone(phase);
            let input = state.clone();
            let runtime = Handle::current();
            tokio::task::spawn_blocking(move || runtime.block_on(phase.run(&input)))
        };

        let outcome = match timeout(deadline, worker).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join)) => Err(PhaseError::Fatal(format!("{} phase aborted: {}", stage, join))),
            Err(_) => Err(PhaseError::Recoverable(format!(
                "{} phase timed out after {}s",
                stage,
                deadline.as_secs()
            ))),
        };

        let mut next = match outcome {
            Ok(next) => match check_invariants(&state, &next) {
                Ok(()) => next,
                Err(violation) => {
                    Self::fail(&mut state, stage, violation);
                    return state;
                }
            },
            Err(PhaseError::Fatal(message)) => {
                Self::fail(&mut state, stage, message);
                return state;
            }
            Err(PhaseError::Recoverable(message)) => {
                warn!(%stage, error = %message, "recoverable phase error");
                state.record_error(stage, ErrorSeverity::Recoverable, message);
                state
            }
        };

        if next.has_fatal_error() {
            next.phase = Phase::Failed;
            error!(%stage, "phase recorded a fatal error");
        } else {
            next.phase = stage.completes();
            info!(%stage, phase = %next.phase, "phase committed");
        }
        next
    }

    fn fail(state: &mut PipelineState, stage: Stage, message: String) {
        error!(%stage, error = %message, "fatal phase error");
        state.record_error(stage, ErrorSeverity::Fatal, message);
        state.phase = Phase::Failed;
    }
}

fn check_invariants(before: &PipelineState, after: &PipelineState) -> std::result::Result<(), String> {
    if after.run_id != before.run_id || after.request != before.request {
        return Err("phase changed the request".to_string());
    }
    if after.workdir != before.workdir {
        return Err("phase changed the working directory".to_string());
    }
    if !after.allow_list.is_superset_of(&before.allow_list) {
        return Err("phase removed entries from the allow-list".to_string());
    }
    if after.errors.len() < before.errors.len() || after.errors[..before.errors.len()] != before.errors[..] {
        return Err("phase rewrote the error history".to_string());
    }
    Ok(())
}

/// Wires the default phases from configuration
pub struct OrchestratorBuilder {
    config: WardenConfig,
    template: Option<CompiledTemplate>,
    engine: Option<Arc<dyn ReasoningEngine>>,
    context: Arc<dyn ContextProvider>,
    intent: Arc<dyn IntentExtractor>,
    impact: Arc<dyn ImpactAnalyzer>,
    executor: Arc<dyn PatchExecutor>,
}

impl OrchestratorBuilder {
    pub fn new(config: WardenConfig) -> Self {
        Self {
            config,
            template: None,
            engine: None,
            context: Arc::new(FsContextProvider::new()),
            intent: Arc::new(TemplateIntentExtractor),
            impact: Arc::new(ReferenceImpactAnalyzer::new()),
            executor: Arc::new(DirectExecutor),
        }
    }

    /// Use this template instead of resolving `structure.template`
    pub fn template(mut self, template: CompiledTemplate) -> Self {
        self.template = Some(template);
        self
    }

    pub fn engine(mut self, engine: Arc<dyn ReasoningEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn context_provider(mut self, provider: Arc<dyn ContextProvider>) -> Self {
        self.context = provider;
        self
    }

    pub fn intent_extractor(mut self, extractor: Arc<dyn IntentExtractor>) -> Self {
        self.intent = extractor;
        self
    }

    pub fn impact_analyzer(mut self, analyzer: Arc<dyn ImpactAnalyzer>) -> Self {
        self.impact = analyzer;
        self
    }

    pub fn executor(mut self, executor: Arc<dyn PatchExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        self.config.validate()?;

        let template = match self.template {
            Some(template) => template,
            None => TemplateCatalog::new()
                .resolve(&self.config.structure.template)?
                .compile()?,
        };
        let template = Arc::new(template);

        let engine = match self.engine {
            Some(engine) => engine,
            None => ProcessEngine::from_settings(&self.config.engine)
                .map(|e| Arc::new(e) as Arc<dyn ReasoningEngine>)
                .ok_or_else(|| WardenError::Config("no reasoning engine configured".to_string()))?,
        };

        let validator =
            StructureValidator::from_settings(template.as_ref().clone(), &self.config.structure);
        let guardrail = self.config.guardrail.clone();

        let phases: Vec<Box<dyn PipelinePhase>> = vec![
            Box::new(ContextPhase::new(self.context)),
            Box::new(IntentPhase::new(self.intent, Arc::clone(&template))),
            Box::new(StructurePhase::new(validator)),
            Box::new(ImpactPhase::new(self.impact)),
            Box::new(SynthesisPhase::new(engine, default_tools(), guardrail.clone())),
        ];
        let execution = Box::new(ExecutionPhase::new(
            self.executor,
            guardrail,
            self.config.pipeline.dry_run,
        ));

        Ok(Orchestrator::from_phases(
            phases,
            execution,
            self.config.pipeline.phase_timeout(),
            self.config.pipeline.require_confirmation,
        ))
    }
}
