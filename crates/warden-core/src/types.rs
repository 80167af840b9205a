//! Core types for Warden
//!
//! This module defines the shared vocabulary of the pipeline:
//! - Pipeline phases and stages
//! - Error records and their severity tags
//! - Tool invocations issued by reasoning engines
//! - Canonical patches and their execution outcomes
//! - The monotonic allow-list

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Timestamp type alias
pub type Timestamp = DateTime<Utc>;

/// Position of a request in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    ContextDone,
    IntentDone,
    StructureValidated,
    ImpactDone,
    Synthesized,
    Executed,
    Failed,
}

impl Phase {
    /// Ordinal used to decide whether a stage already ran.
    ///
    /// `Failed` sorts after everything so that no stage runs on a failed state.
    pub fn rank(self) -> u8 {
        match self {
            Phase::Init => 0,
            Phase::ContextDone => 1,
            Phase::IntentDone => 2,
            Phase::StructureValidated => 3,
            Phase::ImpactDone => 4,
            Phase::Synthesized => 5,
            Phase::Executed => 6,
            Phase::Failed => u8::MAX,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Executed | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The unit of work that moves a request from one phase to the next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Context,
    Intent,
    Structure,
    Impact,
    Synthesis,
    Confirmation,
    Execution,
}

impl Stage {
    /// Phase reached when this stage completes
    pub fn completes(self) -> Phase {
        match self {
            Stage::Context => Phase::ContextDone,
            Stage::Intent => Phase::IntentDone,
            Stage::Structure => Phase::StructureValidated,
            Stage::Impact => Phase::ImpactDone,
            Stage::Synthesis | Stage::Confirmation => Phase::Synthesized,
            Stage::Execution => Phase::Executed,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Context => "context",
            Stage::Intent => "intent",
            Stage::Structure => "structure",
            Stage::Impact => "impact",
            Stage::Synthesis => "synthesis",
            Stage::Confirmation => "confirmation",
            Stage::Execution => "execution",
        };
        f.write_str(name)
    }
}

/// Recoverable errors degrade the run, fatal errors end it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Recoverable,
    Fatal,
}

/// An error attributed to the stage that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub stage: Stage,
    pub severity: ErrorSeverity,
    pub message: String,
    pub at: Timestamp,
}

impl ErrorRecord {
    pub fn new(stage: Stage, severity: ErrorSeverity, message: impl Into<String>) -> Self {
        Self {
            stage,
            severity,
            message: message.into(),
            at: Utc::now(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == ErrorSeverity::Fatal
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{:?}] {}", self.stage, self.severity, self.message)
    }
}

/// Kind of tool call a reasoning engine may issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationKind {
    Read,
    Write,
    Edit,
    Create,
}

impl InvocationKind {
    /// Whether executing the invocation would change the filesystem
    pub fn is_mutation(self) -> bool {
        !matches!(self, InvocationKind::Read)
    }

    /// Map a tool name as engines tend to spell it
    pub fn from_tool_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        match name.as_str() {
            "read" | "read_file" | "view" | "cat" | "open_file" => Some(InvocationKind::Read),
            "write" | "write_file" | "save_file" | "overwrite" => Some(InvocationKind::Write),
            "edit" | "edit_file" | "str_replace" | "replace" | "patch" | "apply_patch" => {
                Some(InvocationKind::Edit)
            }
            "create" | "create_file" | "new_file" | "add_file" => Some(InvocationKind::Create),
            _ => None,
        }
    }
}

/// Body carried by a mutation: full content, an exact-text replacement, or only a note
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PatchBody {
    Content { content: String },
    Replace { old: String, new: String },
    Described { note: String },
}

impl PatchBody {
    pub fn content(content: impl Into<String>) -> Self {
        PatchBody::Content {
            content: content.into(),
        }
    }

    pub fn described(note: impl Into<String>) -> Self {
        PatchBody::Described { note: note.into() }
    }

    /// Whether the body can actually be written
    pub fn is_concrete(&self) -> bool {
        !matches!(self, PatchBody::Described { .. })
    }
}

/// A single tool call as issued by a reasoning engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub kind: InvocationKind,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<PatchBody>,
}

impl Invocation {
    pub fn read(path: impl Into<String>) -> Self {
        Self {
            kind: InvocationKind::Read,
            path: path.into(),
            payload: None,
        }
    }

    pub fn write(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: InvocationKind::Write,
            path: path.into(),
            payload: Some(PatchBody::content(content)),
        }
    }

    pub fn create(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: InvocationKind::Create,
            path: path.into(),
            payload: Some(PatchBody::content(content)),
        }
    }

    pub fn edit(path: impl Into<String>, old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            kind: InvocationKind::Edit,
            path: path.into(),
            payload: Some(PatchBody::Replace {
                old: old.into(),
                new: new.into(),
            }),
        }
    }
}

/// Whether a patch creates a new file or modifies an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOperation {
    Create,
    Modify,
}

impl fmt::Display for PatchOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchOperation::Create => f.write_str("create"),
            PatchOperation::Modify => f.write_str("modify"),
        }
    }
}

/// Canonical, language-agnostic file change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    /// Absolute, normalized path inside the working directory
    pub path: PathBuf,
    pub operation: PatchOperation,
    pub content_or_diff: PatchBody,
}

impl Patch {
    /// Path relative to `root`, with forward slashes
    pub fn display_path(&self, root: &Path) -> String {
        relative_display(&self.path, root)
    }
}

/// Outcome of handing one patch to an executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChangeOutcome {
    Applied,
    DryRun,
    Skipped { reason: String },
    Failed { reason: String },
}

/// Record of an executed (or previewed) patch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedChange {
    pub path: PathBuf,
    pub operation: PatchOperation,
    pub outcome: ChangeOutcome,
    pub bytes: usize,
}

impl AppliedChange {
    pub fn is_applied(&self) -> bool {
        matches!(self.outcome, ChangeOutcome::Applied)
    }
}

/// Result of an optional verification command run against patched code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub command: String,
    pub success: bool,
    pub exit_code: i32,
    pub stdout_tail: String,
    pub stderr_tail: String,
}

/// What an executor hands back to the execution phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub changes: Vec<AppliedChange>,
    pub verification: Option<VerificationResult>,
}

/// Ordered set of in-scope paths; it only grows
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllowList(Vec<String>);

impl AllowList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, returning `false` if it was empty or already present
    pub fn insert(&mut self, entry: impl Into<String>) -> bool {
        let entry = canonical_entry(&entry.into());
        if entry.is_empty() || self.0.contains(&entry) {
            return false;
        }
        self.0.push(entry);
        true
    }

    /// Insert every entry, returning how many were new
    pub fn extend<I, S>(&mut self, entries: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        entries
            .into_iter()
            .map(|e| self.insert(e))
            .filter(|inserted| *inserted)
            .count()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.0.contains(&canonical_entry(entry))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// True when every entry of `other` is also present here
    pub fn is_superset_of(&self, other: &AllowList) -> bool {
        other.0.iter().all(|e| self.0.contains(e))
    }
}

impl<S: Into<String>> FromIterator<S> for AllowList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut list = AllowList::new();
        list.extend(iter);
        list
    }
}

fn canonical_entry(raw: &str) -> String {
    let trimmed = raw.trim().replace('\\', "/");
    let trimmed = trimmed.strip_prefix("./").unwrap_or(&trimmed);
    trimmed.to_string()
}

/// Render `path` relative to `root` with forward slashes, or the full path if outside
pub fn relative_display(path: &Path, root: &Path) -> String {
    let shown = path.strip_prefix(root).unwrap_or(path);
    shown.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_rank_orders_pipeline() {
        assert!(Phase::Init.rank() < Phase::ContextDone.rank());
        assert!(Phase::ImpactDone.rank() < Phase::Synthesized.rank());
        assert!(Phase::Executed.rank() < Phase::Failed.rank());
        assert!(Phase::Failed.is_terminal());
        assert!(!Phase::Synthesized.is_terminal());
    }

    #[test]
    fn test_tool_name_mapping() {
        assert_eq!(InvocationKind::from_tool_name("Write_File"), Some(InvocationKind::Write));
        assert_eq!(InvocationKind::from_tool_name("str_replace"), Some(InvocationKind::Edit));
        assert_eq!(InvocationKind::from_tool_name("read_file"), Some(InvocationKind::Read));
        assert_eq!(InvocationKind::from_tool_name("bash"), None);
        assert!(!InvocationKind::Read.is_mutation());
        assert!(InvocationKind::Create.is_mutation());
    }

    #[test]
    fn test_allow_list_dedups_and_only_grows() {
        let mut list = AllowList::new();
        assert!(list.insert("src/a.rs"));
        assert!(!list.insert("./src/a.rs"));
        assert!(!list.insert("   "));
        assert_eq!(list.extend(["src/b.rs", "src/a.rs", "src\\c.rs"]), 2);

        let before = list.clone();
        list.insert("src/d.rs");
        assert!(list.is_superset_of(&before));
        assert!(!before.is_superset_of(&list));
        assert!(list.contains("src/c.rs"));
        assert_eq!(list.len(), 4);
    }

    #[test]
    fn test_patch_body_serde_shape() {
        let body = PatchBody::Replace {
            old: "a".to_string(),
            new: "b".to_string(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["type"], "replace");
        assert!(!PatchBody::described("mentioned").is_concrete());
    }
}
