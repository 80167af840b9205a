//! Structural Compliance Validator
//!
//! Scores a working tree against an [`ArchitectureTemplate`](crate::template::ArchitectureTemplate)
//! and remediates what it can across a bounded number of rounds:
//!
//! 1. [`layout::scan`] the subtree the template covers
//! 2. [`scoring::evaluate`] the snapshot (pure, recomputed from scratch every round)
//! 3. stop when production ready, when two consecutive rounds agree, or at the round cap
//! 4. otherwise [`remediation::auto_fix`] missing directories and go again

pub mod layout;
pub mod remediation;
pub mod scoring;

pub use layout::{scan, Layout, LayoutEntry};
pub use remediation::{auto_fix, release};
pub use scoring::{compliance_score, evaluate, Evaluation, Severity, Violation, ViolationKind};

use crate::config::{StructureSettings, MAX_VALIDATION_ROUNDS};
use crate::error::{Result, ResultExt};
use crate::template::CompiledTemplate;
use crate::types::AllowList;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Per-round trace kept in the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round: u32,
    pub violations: usize,
    pub compliance_score: f64,
    /// Directories auto-fix created after this round
    pub created: usize,
}

/// Structured feedback for the intent phase when the loop stops without converging
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructureFeedback {
    pub items: Vec<String>,
    /// Violations auto-fix could not resolve
    pub persistent: Vec<Violation>,
}

/// Final verdict of a validation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
    pub compliance_score: f64,
    pub production_ready: bool,
    pub feedback: Option<StructureFeedback>,
    pub rounds: Vec<RoundSummary>,
    pub created_dirs: Vec<PathBuf>,
}

/// Bounded scan, score, fix loop over one template
#[derive(Debug, Clone)]
pub struct StructureValidator {
    template: CompiledTemplate,
    max_rounds: u32,
    ready_threshold: f64,
    auto_fix: bool,
}

impl StructureValidator {
    pub fn new(template: CompiledTemplate) -> Self {
        let defaults = StructureSettings::default();
        Self {
            template,
            max_rounds: defaults.max_rounds,
            ready_threshold: defaults.ready_threshold,
            auto_fix: defaults.auto_fix,
        }
    }

    pub fn from_settings(template: CompiledTemplate, settings: &StructureSettings) -> Self {
        Self::new(template)
            .with_max_rounds(settings.max_rounds)
            .with_ready_threshold(settings.ready_threshold)
            .with_auto_fix(settings.auto_fix)
    }

    /// Round cap, clamped to `1..=3`
    pub fn with_max_rounds(mut self, rounds: u32) -> Self {
        self.max_rounds = rounds.clamp(1, MAX_VALIDATION_ROUNDS);
        self
    }

    pub fn with_ready_threshold(mut self, threshold: f64) -> Self {
        self.ready_threshold = threshold.clamp(0.0, 100.0);
        self
    }

    pub fn with_auto_fix(mut self, enabled: bool) -> Self {
        self.auto_fix = enabled;
        self
    }

    pub fn template(&self) -> &CompiledTemplate {
        &self.template
    }

    /// Score a single snapshot without touching the tree
    pub fn inspect(&self, workdir: &Path) -> Result<Evaluation> {
        let layout = scan(workdir, &self.template)?;
        Ok(evaluate(&layout, &self.template, self.ready_threshold))
    }

    /// Run the validation loop
    ///
    /// `planned` is the current allow-list; it only feeds feedback about layers the
    /// request does not touch.
    pub fn validate(&self, workdir: &Path, planned: &AllowList) -> Result<ValidationReport> {
        let mut rounds = Vec::new();
        let mut created_dirs = Vec::new();
        let mut previous: Option<HashSet<Violation>> = None;
        let mut round = 1;

        let (evaluation, stalled) = loop {
            let evaluation = self
                .inspect(workdir)
                .with_context(|| format!("validation round {}", round))?;
            debug!(
                round,
                score = evaluation.compliance_score,
                violations = evaluation.violations.len(),
                "structure round scored"
            );

            let mut summary = RoundSummary {
                round,
                violations: evaluation.violations.len(),
                compliance_score: evaluation.compliance_score,
                created: 0,
            };

            if evaluation.production_ready {
                rounds.push(summary);
                break (evaluation, false);
            }

            let current: HashSet<Violation> = evaluation.violations.iter().cloned().collect();
            if previous.as_ref() == Some(&current) {
                rounds.push(summary);
                break (evaluation, true);
            }

            if round >= self.max_rounds || !self.auto_fix {
                rounds.push(summary);
                break (evaluation, true);
            }

            let created = auto_fix(workdir, &evaluation.violations)?;
            summary.created = created.len();
            rounds.push(summary);
            created_dirs.extend(created);

            previous = Some(current);
            round += 1;
        };

        let feedback = stalled.then(|| self.feedback(&evaluation, planned));
        info!(
            template = %self.template.name,
            rounds = rounds.len(),
            score = evaluation.compliance_score,
            ready = evaluation.production_ready,
            "structure validation finished"
        );

        Ok(ValidationReport {
            violations: evaluation.violations,
            compliance_score: evaluation.compliance_score,
            production_ready: evaluation.production_ready,
            feedback,
            rounds,
            created_dirs,
        })
    }

    fn feedback(&self, evaluation: &Evaluation, planned: &AllowList) -> StructureFeedback {
        let mut items = Vec::new();

        for layer in self.template.required_layers() {
            let touched = planned
                .iter()
                .any(|entry| layer.contains(entry.trim_end_matches('/')));
            if !touched {
                items.push(format!(
                    "layer {} has no planned files; review feature breakdown",
                    layer.name()
                ));
            }
        }

        for violation in &evaluation.violations {
            let item = match violation.kind {
                ViolationKind::MissingDirectory => {
                    format!("{} is still missing; create it or drop the layer", violation.path)
                }
                ViolationKind::MixedResponsibility => format!(
                    "{} mixes {}; split it per layer",
                    violation.path,
                    violation.actual_layer.as_deref().unwrap_or("several layers")
                ),
                ViolationKind::NamingMismatch => format!(
                    "{} does not follow the {} naming pattern",
                    violation.path,
                    violation.expected_layer.as_deref().unwrap_or("layer")
                ),
                ViolationKind::MissingAuxiliaryLayer => continue,
            };
            items.push(item);
        }

        StructureFeedback {
            items,
            persistent: evaluation.violations.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{ArchitectureTemplate, LayerSpec};

    fn seven_layers() -> CompiledTemplate {
        let layers = ["model", "dto", "repository", "service", "controller", "mapper", "config"]
            .iter()
            .map(|name| LayerSpec::new(*name, format!("src/{}", name), format!("*_{}.rs", name)))
            .collect();
        ArchitectureTemplate::new("seven", layers).compile().unwrap()
    }

    #[test]
    fn test_converges_by_creating_directories() {
        let dir = tempfile::tempdir().unwrap();
        let validator = StructureValidator::new(seven_layers());

        let report = validator.validate(dir.path(), &AllowList::new()).unwrap();
        assert_eq!(report.rounds.len(), 2);
        assert_eq!(report.rounds[0].violations, 7);
        assert_eq!(report.rounds[0].created, 7);
        assert_eq!(report.rounds[1].violations, 0);
        assert!(report.production_ready);
        assert_eq!(report.compliance_score, 100.0);
        assert!(report.feedback.is_none());
        // `src` plus seven layer directories
        assert_eq!(report.created_dirs.len(), 8);
    }

    #[test]
    fn test_stalls_with_feedback() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/service")).unwrap();
        std::fs::write(dir.path().join("src/service/helpers.rs"), "").unwrap();

        let template = ArchitectureTemplate::new(
            "one",
            vec![LayerSpec::new("service", "src/service", "*_service.rs")],
        )
        .compile()
        .unwrap();
        let report = StructureValidator::new(template)
            .with_ready_threshold(100.0)
            .validate(dir.path(), &AllowList::new())
            .unwrap();

        assert!(!report.production_ready);
        assert_eq!(report.rounds.len(), 2);
        let feedback = report.feedback.unwrap();
        assert!(feedback
            .items
            .iter()
            .any(|i| i == "layer service has no planned files; review feature breakdown"));
        assert_eq!(feedback.persistent.len(), 1);
    }

    #[test]
    fn test_without_auto_fix_tree_is_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let report = StructureValidator::new(seven_layers())
            .with_auto_fix(false)
            .validate(dir.path(), &AllowList::from_iter(["src/model/order_model.rs"]))
            .unwrap();

        assert_eq!(report.rounds.len(), 1);
        assert!(report.created_dirs.is_empty());
        assert!(!dir.path().join("src").exists());
        let feedback = report.feedback.unwrap();
        assert!(!feedback.items.iter().any(|i| i.starts_with("layer model ")));
    }

    #[test]
    fn test_round_cap_is_clamped() {
        let validator = StructureValidator::new(seven_layers()).with_max_rounds(10);
        assert_eq!(validator.max_rounds, MAX_VALIDATION_ROUNDS);
    }
}
