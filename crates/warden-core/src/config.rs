//! Pipeline configuration
//!
//! Loaded from a TOML file (`warden.toml` by default). Every section has defaults, so
//! an empty file is a valid configuration.

use crate::error::{Result, ResultExt, WardenError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default config file name looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "warden.toml";

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub pipeline: PipelineSettings,
    pub structure: StructureSettings,
    pub guardrail: GuardrailSettings,
    pub engine: EngineSettings,
    pub execution: ExecutionSettings,
}

impl WardenConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause for human confirmation before execution
    pub fn with_confirmation(mut self, required: bool) -> Self {
        self.pipeline.require_confirmation = required;
        self
    }

    /// Preview patches without writing them
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.pipeline.dry_run = dry_run;
        self
    }

    /// Set the per-phase deadline
    pub fn with_phase_timeout(mut self, secs: u64) -> Self {
        self.pipeline.phase_timeout_secs = secs;
        self
    }

    /// Select the architecture template by catalog name or file path
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.structure.template = template.into();
        self
    }

    /// Set the guardrail enforcement mode
    pub fn with_guardrail_mode(mut self, mode: EnforcementMode) -> Self {
        self.guardrail.mode = mode;
        self
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(WardenError::from)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the pipeline cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.phase_timeout_secs == 0 {
            return Err(WardenError::Config(
                "pipeline.phase_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.structure.max_rounds == 0 || self.structure.max_rounds > MAX_VALIDATION_ROUNDS {
            return Err(WardenError::Config(format!(
                "structure.max_rounds must be within 1..={}",
                MAX_VALIDATION_ROUNDS
            )));
        }
        if !(0.0..=100.0).contains(&self.structure.ready_threshold) {
            return Err(WardenError::Config(
                "structure.ready_threshold must be within 0..=100".to_string(),
            ));
        }
        Ok(())
    }
}

/// Hard cap on structural validation rounds
pub const MAX_VALIDATION_ROUNDS: u32 = 3;

/// Orchestrator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Suspend before execution until a human confirms
    pub require_confirmation: bool,

    /// Execution reports what it would write without writing
    pub dry_run: bool,

    /// Deadline applied to each phase invocation
    pub phase_timeout_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            require_confirmation: false,
            dry_run: false,
            phase_timeout_secs: 300,
        }
    }
}

impl PipelineSettings {
    pub fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.phase_timeout_secs)
    }
}

/// Structural compliance settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructureSettings {
    /// Catalog name or path to a TOML/JSON template file
    pub template: String,

    pub max_rounds: u32,

    /// Minimum score for `production_ready`
    pub ready_threshold: f64,

    /// Create missing layer directories between rounds
    pub auto_fix: bool,
}

impl Default for StructureSettings {
    fn default() -> Self {
        Self {
            template: "java-layered".to_string(),
            max_rounds: MAX_VALIDATION_ROUNDS,
            ready_threshold: 85.0,
            auto_fix: true,
        }
    }
}

/// Guardrail enforcement mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementMode {
    /// Deny out-of-scope mutations
    #[default]
    Hard,
    /// Log out-of-scope mutations and let them through (diagnostics only)
    Soft,
}

/// Scope guardrail settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailSettings {
    pub mode: EnforcementMode,

    /// Directory names whose co-located files share scope
    pub role_keywords: Vec<String>,

    /// Re-assert the request on every tool result
    pub intent_reminder: bool,
}

impl Default for GuardrailSettings {
    fn default() -> Self {
        Self {
            mode: EnforcementMode::Hard,
            role_keywords: default_role_keywords(),
            intent_reminder: true,
        }
    }
}

/// Role keywords used by the scope expansion heuristic
pub fn default_role_keywords() -> Vec<String> {
    ["controller", "service", "repository", "model", "dto"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// External reasoning engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Command speaking the JSON-lines engine protocol
    pub command: Option<String>,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            timeout_secs: 180,
        }
    }
}

/// Execution settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Apply patches to a mirrored copy before touching the real tree
    pub sandbox: bool,

    /// Command run inside the sandbox after patches are applied
    pub verify_command: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WardenConfig::default();
        assert_eq!(config.structure.max_rounds, 3);
        assert_eq!(config.structure.ready_threshold, 85.0);
        assert_eq!(config.guardrail.mode, EnforcementMode::Hard);
        assert!(!config.pipeline.require_confirmation);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: WardenConfig = toml::from_str(
            r#"
            [pipeline]
            dry_run = true

            [guardrail]
            mode = "soft"
            "#,
        )
        .unwrap();

        assert!(config.pipeline.dry_run);
        assert_eq!(config.pipeline.phase_timeout_secs, 300);
        assert_eq!(config.guardrail.mode, EnforcementMode::Soft);
        assert_eq!(config.guardrail.role_keywords.len(), 5);
    }

    #[test]
    fn test_rejects_too_many_rounds() {
        let mut config = WardenConfig::default();
        config.structure.max_rounds = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        let config = WardenConfig::new()
            .with_confirmation(true)
            .with_template("node-mvc")
            .with_phase_timeout(30);

        config.to_file(&path).unwrap();
        let loaded = WardenConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
