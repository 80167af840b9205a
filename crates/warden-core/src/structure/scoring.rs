//! Pure layout scoring: `(Layout, Template) -> (Violations, Score)`

use super::layout::Layout;
use crate::template::CompiledTemplate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Violation severity, ordered from worst to mildest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Points deducted from the compliance score per violation
    pub fn weight(self) -> f64 {
        match self {
            Severity::Critical => 25.0,
            Severity::High => 15.0,
            Severity::Medium => 5.0,
            Severity::Low => 1.0,
        }
    }

    /// Severities that block `production_ready` regardless of score
    pub fn is_blocking(self) -> bool {
        matches!(self, Severity::Critical | Severity::High)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    MissingDirectory,
    MixedResponsibility,
    NamingMismatch,
    MissingAuxiliaryLayer,
}

impl ViolationKind {
    pub fn severity(self) -> Severity {
        match self {
            ViolationKind::MissingDirectory => Severity::Critical,
            ViolationKind::MixedResponsibility => Severity::High,
            ViolationKind::NamingMismatch => Severity::Medium,
            ViolationKind::MissingAuxiliaryLayer => Severity::Low,
        }
    }
}

/// A mismatch between the actual and the expected layout
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Violation {
    pub path: String,
    pub expected_layer: Option<String>,
    pub actual_layer: Option<String>,
    pub severity: Severity,
    pub kind: ViolationKind,
}

impl Violation {
    fn new(
        kind: ViolationKind,
        path: impl Into<String>,
        expected_layer: Option<String>,
        actual_layer: Option<String>,
    ) -> Self {
        Self {
            path: path.into(),
            expected_layer,
            actual_layer,
            severity: kind.severity(),
            kind,
        }
    }
}

/// Result of scoring one layout snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub violations: Vec<Violation>,
    pub compliance_score: f64,
    pub production_ready: bool,
}

/// `100 - Σ weight × count`, clamped to `[0, 100]`
pub fn compliance_score(violations: &[Violation]) -> f64 {
    let penalty: f64 = violations.iter().map(|v| v.severity.weight()).sum();
    (100.0 - penalty).clamp(0.0, 100.0)
}

/// Diff the layout against the template and score it
pub fn evaluate(layout: &Layout, template: &CompiledTemplate, ready_threshold: f64) -> Evaluation {
    let mut violations = Vec::new();

    for layer in &template.layers {
        if layout.present_layers.contains(layer.name()) {
            continue;
        }
        let kind = if layer.spec.required {
            ViolationKind::MissingDirectory
        } else {
            ViolationKind::MissingAuxiliaryLayer
        };
        violations.push(Violation::new(
            kind,
            layer.directory.clone(),
            Some(layer.name().to_string()),
            None,
        ));
    }

    for file in &layout.files {
        if file.name_layers.len() >= 2 {
            violations.push(Violation::new(
                ViolationKind::MixedResponsibility,
                file.path.clone(),
                file.dir_layer.clone(),
                Some(file.name_layers.join("+")),
            ));
            continue;
        }

        let Some(owner) = file.dir_layer.as_deref() else {
            continue;
        };
        if !file.name_layers.iter().any(|l| l == owner) {
            violations.push(Violation::new(
                ViolationKind::NamingMismatch,
                file.path.clone(),
                Some(owner.to_string()),
                file.name_layers.first().cloned(),
            ));
        }
    }

    let compliance_score = compliance_score(&violations);
    let production_ready = template.required_layers().next().is_none()
        || (compliance_score >= ready_threshold
            && !violations.iter().any(|v| v.severity.is_blocking()));

    Evaluation {
        violations,
        compliance_score,
        production_ready,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::layout::LayoutEntry;
    use crate::template::{ArchitectureTemplate, LayerSpec};
    use proptest::prelude::*;

    fn crud() -> CompiledTemplate {
        ArchitectureTemplate::new(
            "crud",
            ["model", "dto", "repository", "service", "controller"]
                .iter()
                .map(|name| {
                    let suffix = format!("{}{}", name[..1].to_uppercase(), &name[1..]);
                    LayerSpec::new(*name, format!("src/{}", name), format!("*{}.java", suffix))
                })
                .collect(),
        )
        .compile()
        .unwrap()
    }

    #[test]
    fn test_empty_codebase_scores_zero() {
        let eval = evaluate(&Layout::default(), &crud(), 85.0);
        assert_eq!(eval.violations.len(), 5);
        assert!(eval
            .violations
            .iter()
            .all(|v| v.kind == ViolationKind::MissingDirectory && v.severity == Severity::Critical));
        assert_eq!(eval.compliance_score, 0.0);
        assert!(!eval.production_ready);
    }

    #[test]
    fn test_all_dirs_present_scores_full() {
        let layout = Layout {
            present_layers: ["model", "dto", "repository", "service", "controller"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            files: Vec::new(),
        };
        let eval = evaluate(&layout, &crud(), 85.0);
        assert!(eval.violations.is_empty());
        assert_eq!(eval.compliance_score, 100.0);
        assert!(eval.production_ready);
    }

    #[test]
    fn test_file_level_findings() {
        let mut layout = Layout {
            present_layers: ["model", "dto", "repository", "service", "controller"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            files: Vec::new(),
        };
        layout.files.push(LayoutEntry {
            path: "src/service/OrderController.java".to_string(),
            dir_layer: Some("service".to_string()),
            name_layers: vec!["controller".to_string()],
        });
        layout.files.push(LayoutEntry {
            path: "src/service/Mixed.java".to_string(),
            dir_layer: Some("service".to_string()),
            name_layers: vec!["service".to_string(), "controller".to_string()],
        });

        let eval = evaluate(&layout, &crud(), 85.0);
        assert_eq!(eval.violations.len(), 2);

        let naming = &eval.violations[0];
        assert_eq!(naming.kind, ViolationKind::NamingMismatch);
        assert_eq!(naming.expected_layer.as_deref(), Some("service"));
        assert_eq!(naming.actual_layer.as_deref(), Some("controller"));

        assert_eq!(eval.violations[1].kind, ViolationKind::MixedResponsibility);
        assert_eq!(eval.compliance_score, 80.0);
        // High severity blocks readiness even though the score clears 80
        assert!(!evaluate(&layout, &crud(), 80.0).production_ready);
    }

    #[test]
    fn test_auxiliary_layer_is_low() {
        let template = ArchitectureTemplate::new(
            "aux",
            vec![
                LayerSpec::new("core", "src/core", "*.rs"),
                LayerSpec::new("dto", "src/dto", "*_dto.rs").auxiliary(),
            ],
        )
        .compile()
        .unwrap();
        let layout = Layout {
            present_layers: std::iter::once("core".to_string()).collect(),
            files: Vec::new(),
        };

        let eval = evaluate(&layout, &template, 85.0);
        assert_eq!(eval.violations.len(), 1);
        assert_eq!(eval.violations[0].severity, Severity::Low);
        assert_eq!(eval.compliance_score, 99.0);
        assert!(eval.production_ready);
    }

    #[test]
    fn test_no_required_layers_is_always_ready() {
        let template = ArchitectureTemplate::new(
            "optional",
            vec![LayerSpec::new("docs", "docs", "*.md").auxiliary()],
        )
        .compile()
        .unwrap();
        assert!(evaluate(&Layout::default(), &template, 100.0).production_ready);

        let empty = ArchitectureTemplate::new("empty", vec![]).compile().unwrap();
        assert!(evaluate(&Layout::default(), &empty, 85.0).production_ready);
    }

    fn severity_strategy() -> impl Strategy<Value = ViolationKind> {
        prop_oneof![
            Just(ViolationKind::MissingDirectory),
            Just(ViolationKind::MixedResponsibility),
            Just(ViolationKind::NamingMismatch),
            Just(ViolationKind::MissingAuxiliaryLayer),
        ]
    }

    proptest! {
        #[test]
        fn prop_score_is_clamped(kinds in prop::collection::vec(severity_strategy(), 0..40)) {
            let violations: Vec<Violation> = kinds
                .into_iter()
                .map(|k| Violation::new(k, "x", None, None))
                .collect();
            let score = compliance_score(&violations);
            prop_assert!((0.0..=100.0).contains(&score));
        }
    }
}
