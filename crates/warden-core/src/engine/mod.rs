//! Reasoning engine interface
//!
//! Engines are replaceable specialist workers: they receive a prompt, a tool list and a
//! [`ToolGate`], and return the raw run log. Every tool call goes through the gate
//! before it takes effect; the engine only records what the gate answered.

pub mod process;
pub mod scripted;

pub use process::ProcessEngine;
pub use scripted::{ScriptStep, ScriptedEngine};

use crate::error::Result;
use crate::types::{Invocation, InvocationKind, PatchBody};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A tool the engine may call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub kind: InvocationKind,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, kind: InvocationKind) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind,
        }
    }
}

/// File tools offered during synthesis
pub fn default_tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec::new("read_file", "Read a file relative to the working directory", InvocationKind::Read),
        ToolSpec::new("write_file", "Overwrite a file with new content", InvocationKind::Write),
        ToolSpec::new("edit_file", "Replace an exact text fragment in a file", InvocationKind::Edit),
        ToolSpec::new("create_file", "Create a new file", InvocationKind::Create),
    ]
}

/// What the gate answered for one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub accepted: bool,
    /// Text handed back to the engine as the tool result
    pub response: String,
}

/// Interception point between an engine and the filesystem
pub trait ToolGate: Send + Sync {
    fn submit(&self, invocation: &Invocation) -> ToolOutcome;
}

/// One raw item of an engine run log
#[derive(Debug, Clone, PartialEq)]
pub enum RawItem {
    /// A typed tool call and the gate's answer
    ToolCall {
        invocation: Invocation,
        accepted: bool,
        response: String,
    },
    /// A structured message the engine emitted
    Json(serde_json::Value),
    /// Free text: logs, assistant messages
    Text(String),
}

/// Raw output of one engine run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineRun {
    pub items: Vec<RawItem>,
    pub final_text: String,
}

impl EngineRun {
    /// Whether the engine did anything at all
    pub fn has_activity(&self) -> bool {
        !self.items.is_empty() || !self.final_text.trim().is_empty()
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = (&Invocation, bool)> {
        self.items.iter().filter_map(|item| match item {
            RawItem::ToolCall {
                invocation,
                accepted,
                ..
            } => Some((invocation, *accepted)),
            _ => None,
        })
    }
}

/// Decode a JSON tool-call object as engines tend to emit it
///
/// Accepts `{tool|name|kind, input|arguments|args|parameters: {path|file_path, ...}}`,
/// OpenAI-style `{function: {name, arguments: "<json>"}}`, and flat objects carrying
/// the arguments next to the tool name.
pub fn parse_tool_call(value: &serde_json::Value) -> Option<Invocation> {
    let object = value.as_object()?;
    if let Some(function) = object.get("function").filter(|f| f.is_object()) {
        return parse_tool_call(function);
    }

    let name = ["tool", "name", "kind", "tool_name"]
        .iter()
        .find_map(|key| object.get(*key).and_then(|v| v.as_str()))?;
    let kind = InvocationKind::from_tool_name(name)?;

    let args = ["input", "arguments", "args", "parameters"]
        .iter()
        .find_map(|key| object.get(*key))
        .map(|raw| match raw {
            serde_json::Value::String(encoded) => {
                serde_json::from_str(encoded).unwrap_or(serde_json::Value::Null)
            }
            other => other.clone(),
        })
        .unwrap_or_else(|| value.clone());

    let text = |keys: &[&str]| {
        keys.iter()
            .find_map(|key| args.get(*key).and_then(|v| v.as_str()))
            .map(str::to_string)
    };

    let path = text(&["path", "file_path", "filename", "file", "target"])?;
    let payload = if let (Some(old), Some(new)) = (
        text(&["old_string", "old_str", "old"]),
        text(&["new_string", "new_str", "new"]),
    ) {
        Some(PatchBody::Replace { old, new })
    } else if let Some(content) = text(&["content", "new_content", "contents", "text", "file_text"]) {
        Some(PatchBody::Content { content })
    } else {
        args.get("payload")
            .and_then(|p| serde_json::from_value::<PatchBody>(p.clone()).ok())
    };

    Some(Invocation {
        kind,
        path,
        payload,
    })
}

/// A generative reasoning engine
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    /// Engine name, for logs
    fn name(&self) -> &str;

    async fn run(
        &self,
        prompt: &str,
        tools: &[ToolSpec],
        workdir: &Path,
        gate: &dyn ToolGate,
    ) -> Result<EngineRun>;
}
