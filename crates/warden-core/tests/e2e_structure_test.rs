//! E2E Test: Structural Compliance Validator
//!
//! Validates a realistic tree against the built-in templates and checks that the
//! validator is idempotent once the tree has converged.

use std::path::Path;
use tempfile::TempDir;
use warden_core::structure::ViolationKind;
use warden_core::{AllowList, StructureValidator, TemplateCatalog};

fn validator(name: &str) -> StructureValidator {
    let template = TemplateCatalog::new()
        .get(name)
        .expect("built-in template")
        .compile()
        .expect("built-in templates compile");
    StructureValidator::new(template)
}

fn touch(root: &Path, relative: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, "// stub\n").unwrap();
}

/// E2E test: a second validation of a converged tree changes nothing
#[test]
fn e2e_validator_is_idempotent() {
    let dir = TempDir::new().unwrap();
    touch(dir.path(), "src/models/order.model.ts");
    touch(dir.path(), "src/services/order.service.ts");
    touch(dir.path(), "src/services/helpers.ts");

    let validator = validator("node-mvc");
    let planned: AllowList = ["src/services/order.service.ts"].into_iter().collect();

    let first = validator.validate(dir.path(), &planned).unwrap();
    assert!(!first.created_dirs.is_empty());
    assert!(dir.path().join("src/controllers").is_dir());
    assert!(first
        .violations
        .iter()
        .any(|v| v.kind == ViolationKind::NamingMismatch && v.path.ends_with("helpers.ts")));

    let second = validator.validate(dir.path(), &planned).unwrap();
    assert_eq!(second.violations, first.violations);
    assert_eq!(second.compliance_score, first.compliance_score);
    assert_eq!(second.production_ready, first.production_ready);
    assert!(second.created_dirs.is_empty());
    assert_eq!(second.rounds.len(), 1);
}

/// E2E test: without auto-fix the verdict comes with feedback for the planner
#[test]
fn e2e_unfixed_tree_reports_feedback() {
    let dir = TempDir::new().unwrap();
    touch(dir.path(), "src/main/java/app/service/OrderService.java");

    let validator = validator("java-layered").with_auto_fix(false);
    let planned: AllowList = ["src/main/java/app/service/OrderService.java"]
        .into_iter()
        .collect();

    let report = validator.validate(dir.path(), &planned).unwrap();
    assert!(!report.production_ready);
    assert!(report.compliance_score < 85.0);
    assert!(report.created_dirs.is_empty());
    assert!(!dir.path().join("src/main/java/app/controller").exists());

    let feedback = report.feedback.expect("stalled run carries feedback");
    assert!(feedback
        .items
        .iter()
        .any(|item| item == "layer controller has no planned files; review feature breakdown"));
    assert!(!feedback
        .items
        .iter()
        .any(|item| item.starts_with("layer service ")));
}

/// E2E test: a missing working directory is an error, not a zero score
#[test]
fn e2e_missing_workdir_is_an_error() {
    let dir = TempDir::new().unwrap();
    let result = validator("rust-hexagonal").validate(&dir.path().join("nope"), &AllowList::new());
    assert!(result.is_err());
}

/// E2E test: "Add Order entity with CRUD" against an empty codebase
#[test]
fn e2e_empty_codebase_converges_in_two_rounds() {
    let dir = TempDir::new().unwrap();
    let validator = validator("java-layered");

    let before = validator.inspect(dir.path()).unwrap();
    assert_eq!(before.compliance_score, 0.0);
    assert_eq!(before.violations.len(), 5);
    assert!(before
        .violations
        .iter()
        .all(|v| v.kind == ViolationKind::MissingDirectory));

    let report = validator.validate(dir.path(), &AllowList::new()).unwrap();
    assert_eq!(report.rounds.len(), 2);
    assert_eq!(report.rounds[0].compliance_score, 0.0);
    assert_eq!(report.rounds[1].violations, 0);
    assert_eq!(report.compliance_score, 100.0);
    assert!(report.production_ready);
    assert!(report.feedback.is_none());
}
