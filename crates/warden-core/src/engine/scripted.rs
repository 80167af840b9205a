//! Scripted engine: replays a recorded run
//!
//! Used by tests and offline replays. A script is a list of steps; tool steps go
//! through the gate like any live engine would, and may carry a fallback to play when
//! the gate rejects them.

use super::{EngineRun, RawItem, ReasoningEngine, ToolGate, ToolSpec};
use crate::error::{Result, ResultExt, WardenError};
use crate::types::Invocation;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// One recorded engine action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScriptStep {
    Tool {
        #[serde(flatten)]
        invocation: Invocation,
        /// Steps to play if the gate rejects the call
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        on_reject: Vec<ScriptStep>,
    },
    Json {
        value: serde_json::Value,
    },
    Text {
        text: String,
    },
    Final {
        text: String,
    },
}

#[derive(Debug, Deserialize)]
struct ScriptFile {
    #[serde(default)]
    name: Option<String>,
    steps: Vec<ScriptStep>,
}

/// Engine that plays back a fixed list of steps
#[derive(Debug, Clone, Default)]
pub struct ScriptedEngine {
    name: String,
    steps: Vec<ScriptStep>,
}

impl ScriptedEngine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn with_steps(mut self, steps: Vec<ScriptStep>) -> Self {
        self.steps = steps;
        self
    }

    pub fn tool(self, invocation: Invocation) -> Self {
        self.tool_or_else(invocation, Vec::new())
    }

    /// Tool call with a fallback played on rejection
    pub fn tool_or_else(mut self, invocation: Invocation, on_reject: Vec<ScriptStep>) -> Self {
        self.steps.push(ScriptStep::Tool {
            invocation,
            on_reject,
        });
        self
    }

    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.steps.push(ScriptStep::Json { value });
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.steps.push(ScriptStep::Text { text: text.into() });
        self
    }

    pub fn finish(mut self, text: impl Into<String>) -> Self {
        self.steps.push(ScriptStep::Final { text: text.into() });
        self
    }

    pub fn steps(&self) -> &[ScriptStep] {
        &self.steps
    }

    /// Load a `{ "steps": [...] }` script from a `.json` or `.toml` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = path.extension().and_then(|e| e.to_str());
        if !matches!(format, Some("json") | Some("toml")) {
            return Err(WardenError::Config(format!(
                "engine script {} must be a .json or .toml file",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)
            .map_err(WardenError::from)
            .with_context(|| format!("reading engine script {}", path.display()))?;
        let parsed: Result<ScriptFile> = match format {
            Some("json") => serde_json::from_str(&content).map_err(WardenError::from),
            _ => toml::from_str(&content).map_err(WardenError::from),
        };
        let script = parsed.with_context(|| format!("parsing engine script {}", path.display()))?;
        let name = script.name.unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "script".to_string())
        });
        Ok(Self::new(name).with_steps(script.steps))
    }

    fn play(steps: &[ScriptStep], gate: &dyn ToolGate, run: &mut EngineRun) {
        for step in steps {
            match step {
                ScriptStep::Tool {
                    invocation,
                    on_reject,
                } => {
                    let outcome = gate.submit(invocation);
                    debug!(path = %invocation.path, accepted = outcome.accepted, "scripted tool call");
                    let rejected = !outcome.accepted;
                    run.items.push(RawItem::ToolCall {
                        invocation: invocation.clone(),
                        accepted: outcome.accepted,
                        response: outcome.response,
                    });
                    if rejected {
                        Self::play(on_reject, gate, run);
                    }
                }
                ScriptStep::Json { value } => run.items.push(RawItem::Json(value.clone())),
                ScriptStep::Text { text } => run.items.push(RawItem::Text(text.clone())),
                ScriptStep::Final { text } => run.final_text = text.clone(),
            }
        }
    }
}

#[async_trait]
impl ReasoningEngine for ScriptedEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        _prompt: &str,
        _tools: &[ToolSpec],
        _workdir: &Path,
        gate: &dyn ToolGate,
    ) -> Result<EngineRun> {
        let mut run = EngineRun::default();
        Self::play(&self.steps, gate, &mut run);
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ToolOutcome;

    struct DenyWrites;

    impl ToolGate for DenyWrites {
        fn submit(&self, invocation: &Invocation) -> ToolOutcome {
            ToolOutcome {
                accepted: !invocation.kind.is_mutation(),
                response: "rejected".to_string(),
            }
        }
    }

    #[tokio::test]
    async fn test_fallback_runs_on_rejection() {
        let engine = ScriptedEngine::new("replay")
            .tool_or_else(
                Invocation::write("src/Payment.java", "x"),
                vec![ScriptStep::Text {
                    text: "rejected, staying in scope".to_string(),
                }],
            )
            .finish("done");

        let run = engine
            .run("prompt", &[], Path::new("."), &DenyWrites)
            .await
            .unwrap();
        assert_eq!(run.items.len(), 2);
        assert!(matches!(&run.items[0], RawItem::ToolCall { accepted: false, .. }));
        assert_eq!(run.items[1], RawItem::Text("rejected, staying in scope".to_string()));
        assert_eq!(run.final_text, "done");
    }

    #[test]
    fn test_script_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("order.json");
        std::fs::write(
            &path,
            r#"{
                "steps": [
                    {"type": "tool", "kind": "create", "path": "src/Order.java",
                     "payload": {"type": "content", "content": "class Order {}"}},
                    {"type": "text", "text": "created src/Order.java"},
                    {"type": "final", "text": "{\"files\": []}"}
                ]
            }"#,
        )
        .unwrap();

        let engine = ScriptedEngine::from_file(&path).unwrap();
        assert_eq!(engine.name(), "order");
        assert_eq!(engine.steps().len(), 3);
        assert_eq!(
            engine.steps()[0],
            ScriptStep::Tool {
                invocation: Invocation::create("src/Order.java", "class Order {}"),
                on_reject: Vec::new(),
            }
        );
    }

    #[test]
    fn test_script_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();

        let yaml = dir.path().join("order.yaml");
        std::fs::write(&yaml, "steps: []").unwrap();
        let err = ScriptedEngine::from_file(&yaml).unwrap_err();
        assert!(matches!(err, WardenError::Config(_)));
        assert!(err.to_string().contains("order.yaml"));

        let missing = dir.path().join("missing.json");
        let err = ScriptedEngine::from_file(&missing).unwrap_err();
        assert!(matches!(err.root(), WardenError::Io(_)));
        assert!(err.to_string().contains("missing.json"));

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "steps = [").unwrap();
        let err = ScriptedEngine::from_file(&broken).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }
}
