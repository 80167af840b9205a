//! E2E Test: Governed Pipeline
//!
//! Drives the full orchestrator over a temporary tree with a scripted engine:
//! context, intent, structure, impact, synthesis, confirmation and execution.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use warden_core::engine::{ProcessEngine, ScriptStep, ScriptedEngine};
use warden_core::orchestrator::{IntentExtractor, IntentInput};
use warden_core::types::{ErrorSeverity, Invocation, PatchOperation, Stage};
use warden_core::{
    Confirmation, Orchestrator, Phase, RunOutcome, WardenConfig, WardenError,
};

const MODEL: &str = "src/main/java/app/model/OrderEntity.java";
const DTO: &str = "src/main/java/app/dto/OrderDto.java";
const REPOSITORY: &str = "src/main/java/app/repository/OrderRepository.java";
const SERVICE: &str = "src/main/java/app/service/OrderService.java";
const CONTROLLER: &str = "src/main/java/app/controller/OrderController.java";

fn crud_engine() -> ScriptedEngine {
    ScriptedEngine::new("crud")
        .tool(Invocation::read("pom.xml"))
        .tool(Invocation::create(MODEL, "public class OrderEntity {}\n"))
        .tool(Invocation::create(DTO, "public record OrderDto(long id) {}\n"))
        .tool(Invocation::create(
            REPOSITORY,
            "public interface OrderRepository {}\n",
        ))
        .tool(Invocation::create(SERVICE, "public class OrderService {}\n"))
        .tool(Invocation::create(
            CONTROLLER,
            "public class OrderController {}\n",
        ))
        .finish("done")
}

fn orchestrator(config: WardenConfig, engine: ScriptedEngine) -> Orchestrator {
    Orchestrator::builder(config)
        .engine(Arc::new(engine))
        .build()
        .expect("default pipeline should build")
}

fn read(root: &Path, relative: &str) -> String {
    std::fs::read_to_string(root.join(relative)).unwrap_or_default()
}

/// E2E test: "Add Order entity with CRUD" on a java-layered tree
///
/// This test validates:
/// 1. The intent phase plans one file per layer
/// 2. Auto-fix creates the missing layer directories and the tree converges
/// 3. Every in-scope tool call becomes a Create patch
/// 4. Execution writes the files
#[tokio::test]
async fn e2e_order_crud_on_java_layered() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(WardenConfig::default(), crud_engine());

    let outcome = orch
        .start("Add Order entity with CRUD endpoints", dir.path())
        .await
        .expect("run should complete");
    let state = outcome.state();

    assert_eq!(state.phase, Phase::Executed, "errors: {:?}", state.errors);
    assert!(!state.has_fatal_error());
    for planned in [MODEL, DTO, REPOSITORY, SERVICE, CONTROLLER] {
        assert!(state.allow_list.contains(planned), "missing {}", planned);
    }

    assert_eq!(state.compliance_score, 100.0);
    assert!(state.production_ready);
    assert!(!state.created_dirs.is_empty());

    assert_eq!(state.patches.len(), 5);
    assert!(state
        .patches
        .iter()
        .all(|p| p.operation == PatchOperation::Create));
    assert_eq!(state.denied_invocations, 0);

    assert_eq!(read(dir.path(), SERVICE), "public class OrderService {}\n");
    assert_eq!(read(dir.path(), CONTROLLER), "public class OrderController {}\n");

    let summary = outcome.summary();
    assert!(summary.succeeded());
    assert_eq!(summary.applied, 5);
}

struct FixedIntent(Vec<&'static str>);

#[async_trait]
impl IntentExtractor for FixedIntent {
    async fn plan(&self, _input: &IntentInput<'_>) -> warden_core::Result<Vec<String>> {
        Ok(self.0.iter().map(|s| s.to_string()).collect())
    }
}

/// E2E test: an out-of-scope write is denied, not recorded as an error
#[tokio::test]
async fn e2e_out_of_scope_write_is_denied() {
    let dir = TempDir::new().unwrap();
    let engine = ScriptedEngine::new("drift")
        .tool_or_else(
            Invocation::write("PaymentGateway.java", "public class PaymentGateway {}"),
            vec![ScriptStep::Tool {
                invocation: Invocation::write(
                    "OrderController.java",
                    "public class OrderController {}",
                ),
                on_reject: Vec::new(),
            }],
        )
        .finish("done");

    let orch = Orchestrator::builder(WardenConfig::default())
        .engine(Arc::new(engine))
        .intent_extractor(Arc::new(FixedIntent(vec!["OrderController.java"])))
        .build()
        .unwrap();

    let outcome = orch.start("Add Order CRUD", dir.path()).await.unwrap();
    let state = outcome.state();

    assert_eq!(state.phase, Phase::Executed);
    assert_eq!(state.denied_invocations, 1);
    assert!(state
        .errors
        .iter()
        .all(|e| !e.message.contains("PaymentGateway")));
    assert_eq!(state.patches.len(), 1);
    assert!(state.patches[0].path.ends_with("OrderController.java"));
    assert!(!dir.path().join("PaymentGateway.java").exists());
    assert!(dir.path().join("OrderController.java").exists());
}

/// E2E test: impact analysis widens the scope to files referencing the entity
#[tokio::test]
async fn e2e_impact_extends_allow_list() {
    let dir = TempDir::new().unwrap();
    let billing = "src/main/java/app/service/BillingService.java";
    std::fs::create_dir_all(dir.path().join("src/main/java/app/service")).unwrap();
    std::fs::write(
        dir.path().join(billing),
        "public class BillingService {\n    // TODO charge Order\n}\n",
    )
    .unwrap();

    let engine = ScriptedEngine::new("impact").with_steps(vec![
        ScriptStep::Tool {
            invocation: Invocation::edit(billing, "// TODO charge Order", "void charge(Order o) {}"),
            on_reject: Vec::new(),
        },
        ScriptStep::Final {
            text: "done".to_string(),
        },
    ]);
    let orch = orchestrator(WardenConfig::default(), engine);

    let outcome = orch.start("Add Order CRUD", dir.path()).await.unwrap();
    let state = outcome.state();

    assert_eq!(state.phase, Phase::Executed, "errors: {:?}", state.errors);
    assert!(state.allow_list.contains(billing));
    assert!(state.allow_list.contains(SERVICE));
    assert_eq!(state.patches.len(), 1);
    assert_eq!(state.patches[0].operation, PatchOperation::Modify);
    assert!(read(dir.path(), billing).contains("void charge(Order o) {}"));
}

/// E2E test: confirmation suspends, approval executes, cancellation releases
#[tokio::test]
async fn e2e_confirmation_suspend_resume_cancel() {
    let dir = TempDir::new().unwrap();
    let config = WardenConfig::default().with_confirmation(true);
    let orch = orchestrator(config, crud_engine());

    let outcome = orch.start("Add Order CRUD", dir.path()).await.unwrap();
    let RunOutcome::Suspended { blob, state } = outcome else {
        panic!("expected the run to suspend");
    };
    assert_eq!(state.phase, Phase::Synthesized);
    assert_eq!(state.patches.len(), 5);
    assert!(state.applied.is_empty());
    assert!(!dir.path().join(SERVICE).exists());
    assert!(dir.path().join("src/main/java/app/service").is_dir());

    // Cancel: nothing written, auto-fix directories removed
    let cancelled = orch.resume(&blob, Confirmation::Cancel).await.unwrap();
    let cancelled = cancelled.state();
    assert_eq!(cancelled.phase, Phase::Failed);
    let last = cancelled.errors.last().unwrap();
    assert_eq!(last.stage, Stage::Confirmation);
    assert_eq!(last.severity, ErrorSeverity::Fatal);
    assert_eq!(last.message, "execution not confirmed");
    assert!(!dir.path().join("src").exists());

    // Approve a fresh suspension of the same request
    let outcome = orch.start("Add Order CRUD", dir.path()).await.unwrap();
    let RunOutcome::Suspended { blob, state } = outcome else {
        panic!("expected the run to suspend");
    };
    let approved = orch.resume(&blob, Confirmation::Approve).await.unwrap();
    assert_eq!(approved.state().phase, Phase::Executed);
    assert_eq!(approved.state().run_id, state.run_id);
    assert_eq!(read(dir.path(), MODEL), "public class OrderEntity {}\n");
}

/// E2E test: a tampered suspension blob is refused
#[tokio::test]
async fn e2e_tampered_blob_is_rejected() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(WardenConfig::default().with_confirmation(true), crud_engine());

    let outcome = orch.start("Add Order CRUD", dir.path()).await.unwrap();
    let RunOutcome::Suspended { blob, .. } = outcome else {
        panic!("expected the run to suspend");
    };

    let tampered = blob.replace("Add Order CRUD", "Add Payment CRUD");
    assert_ne!(tampered, blob);
    let err = orch.resume(&tampered, Confirmation::Approve).await.unwrap_err();
    assert!(matches!(err, WardenError::InvalidSuspension(_)));

    let err = orch.resume("not a blob", Confirmation::Approve).await.unwrap_err();
    assert!(matches!(err, WardenError::InvalidSuspension(_)));
    assert!(!dir.path().join(MODEL).exists());
}

/// E2E test: a missing working directory fails the run at the first phase
#[tokio::test]
async fn e2e_missing_workdir_is_fatal() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("does-not-exist");
    let orch = orchestrator(WardenConfig::default(), crud_engine());

    let outcome = orch.start("Add Order CRUD", &missing).await.unwrap();
    let state = outcome.state();

    assert_eq!(state.phase, Phase::Failed);
    assert_eq!(state.errors.len(), 1);
    assert_eq!(state.errors[0].stage, Stage::Context);
    assert!(state.errors[0].is_fatal());
    assert!(state.allow_list.is_empty());
    assert!(!missing.exists());
}

/// E2E test: an engine that cannot start is fatal, no patch is applied
#[tokio::test]
async fn e2e_engine_spawn_failure_is_fatal() {
    let dir = TempDir::new().unwrap();
    let engine = ProcessEngine::new("/nonexistent/warden-engine-binary");
    let orch = Orchestrator::builder(WardenConfig::default())
        .engine(Arc::new(engine))
        .build()
        .unwrap();

    let outcome = orch.start("Add Order CRUD", dir.path()).await.unwrap();
    let state = outcome.state();

    assert_eq!(state.phase, Phase::Failed);
    let fatal: Vec<_> = state.fatal_errors().collect();
    assert_eq!(fatal.len(), 1);
    assert_eq!(fatal[0].stage, Stage::Synthesis);
    assert!(state.applied.is_empty());
}

/// E2E test: activity without a usable patch degrades, it does not fail
#[tokio::test]
async fn e2e_no_changes_is_recoverable() {
    let dir = TempDir::new().unwrap();
    let engine = ScriptedEngine::new("chatty")
        .text("Thinking about the Order aggregate...")
        .finish("I could not decide on a design.");
    let orch = orchestrator(WardenConfig::default(), engine);

    let outcome = orch.start("Add Order CRUD", dir.path()).await.unwrap();
    let state = outcome.state();

    assert_eq!(state.phase, Phase::Executed);
    assert!(state.patches.is_empty());
    assert!(state
        .errors
        .iter()
        .any(|e| e.stage == Stage::Synthesis && e.message.contains("No changes produced")));
}

/// E2E test: dry run reports patches without writing them
#[tokio::test]
async fn e2e_dry_run_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(WardenConfig::default().with_dry_run(true), crud_engine());

    let outcome = orch.start("Add Order CRUD", dir.path()).await.unwrap();
    let summary = outcome.summary();

    assert!(summary.succeeded());
    assert_eq!(summary.patches, 5);
    assert_eq!(summary.applied, 0);
    assert_eq!(summary.dry_run, 5);
    assert!(!dir.path().join(MODEL).exists());
}
