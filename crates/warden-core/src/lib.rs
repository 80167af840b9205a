//! Warden Core - governed execution of engine-driven code changes
//!
//! Warden turns a free-form change request into a bounded set of file patches and
//! applies them only inside an explicitly approved scope.
//!
//! # Architecture
//!
//! 1. **Orchestrator** (`orchestrator`): phase sequencing over one evolving [`PipelineState`],
//!    with error routing and an optional confirmation point
//! 2. **Structure** (`structure`): compliance of the tree against an architecture template,
//!    with bounded auto-fix rounds
//! 3. **Guardrail** (`guardrail`): scope enforcement for every tool invocation and every write
//! 4. **Normalizer** (`normalizer`): canonical patches from heterogeneous engine output
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use warden_core::engine::ScriptedEngine;
//! use warden_core::types::Invocation;
//! use warden_core::{Orchestrator, WardenConfig};
//!
//! # async fn demo() -> warden_core::Result<()> {
//! let engine = ScriptedEngine::new("demo")
//!     .tool(Invocation::write("src/model/Order.java", "public class Order {}"))
//!     .finish("done");
//!
//! let orchestrator = Orchestrator::builder(WardenConfig::default())
//!     .engine(Arc::new(engine))
//!     .build()?;
//!
//! let outcome = orchestrator.start("Add Order CRUD", "./project").await?;
//! println!("{:?}", outcome.summary().phase);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(rust_2018_idioms, clippy::all)]

pub mod config;
pub mod engine;
pub mod error;
pub mod guardrail;
pub mod normalizer;
pub mod orchestrator;
pub mod state;
pub mod structure;
pub mod template;
pub mod types;

// Re-export commonly used types for convenience
pub use config::{EnforcementMode, WardenConfig};
pub use engine::{EngineRun, ReasoningEngine, ToolGate};
pub use error::{Result, WardenError};
pub use guardrail::{GuardrailDecision, ScopeGuardrail, Verdict};
pub use normalizer::PatchNormalizer;
pub use orchestrator::{
    Confirmation, Orchestrator, OrchestratorBuilder, PhaseError, PipelinePhase, RunOutcome,
    RunSummary,
};
pub use state::{PipelineState, SuspendedRun};
pub use structure::{StructureValidator, ValidationReport, Violation};
pub use template::{ArchitectureTemplate, CompiledTemplate, TemplateCatalog};
pub use types::{AllowList, Invocation, Patch, PatchOperation, Phase, Stage};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
