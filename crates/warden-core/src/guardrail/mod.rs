//! Scope Guardrail
//!
//! Intercepts every file operation a reasoning engine attempts and accepts or rejects
//! it against the allow-list computed by the intent and impact phases.
//!
//! The guardrail is an immutable value built once per synthesis phase. Entries are
//! normalized to canonical paths inside the working directory and the role-directory
//! expansion is computed at construction, so [`ScopeGuardrail::check`] is a plain
//! membership test over the effective entries.
//!
//! The guardrail is also the only writer of patch content ([`ScopeGuardrail::apply`]):
//! scope is checked again right before bytes hit the disk.

pub mod path;
pub mod reminder;
pub mod toolbox;

pub use path::{canonical_root, resolve_within};
pub use reminder::IntentReminder;
pub use toolbox::GuardedToolbox;

use crate::config::{default_role_keywords, EnforcementMode};
use crate::error::{Result, ResultExt, ScopeError, WardenError};
use crate::types::{
    relative_display, AllowList, AppliedChange, ChangeOutcome, Invocation, Patch, PatchBody,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Allow or deny
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Allow,
    Deny,
}

/// Decision about one invocation; logged and discarded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailDecision {
    pub invocation: Invocation,
    pub verdict: Verdict,
    pub reason: String,
    /// Canonical target, when the path could be resolved inside the workdir
    pub resolved: Option<PathBuf>,
}

impl GuardrailDecision {
    pub fn is_allowed(&self) -> bool {
        self.verdict == Verdict::Allow
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ScopeEntry {
    Exact(PathBuf),
    Prefix(PathBuf),
}

impl ScopeEntry {
    fn admits(&self, path: &Path) -> bool {
        match self {
            ScopeEntry::Exact(p) => p == path,
            ScopeEntry::Prefix(p) => path.starts_with(p),
        }
    }

    fn path(&self) -> &Path {
        match self {
            ScopeEntry::Exact(p) | ScopeEntry::Prefix(p) => p,
        }
    }
}

/// Runtime scope enforcement for one synthesis phase
#[derive(Debug, Clone)]
pub struct ScopeGuardrail {
    workdir: PathBuf,
    allow_list: AllowList,
    entries: Vec<ScopeEntry>,
    expanded: Vec<PathBuf>,
    mode: EnforcementMode,
    role_keywords: Vec<String>,
}

impl ScopeGuardrail {
    /// Build the guardrail, dropping entries that escape `workdir`
    pub fn new(
        allow_list: &AllowList,
        workdir: &Path,
        mode: EnforcementMode,
        role_keywords: &[String],
    ) -> Result<Self> {
        let workdir = canonical_root(workdir)
            .map_err(WardenError::from)
            .with_context(|| format!("normalizing workdir {}", workdir.display()))?;

        let mut entries = Vec::new();
        for raw in allow_list.iter() {
            let resolved = match resolve_within(&workdir, raw) {
                Ok(path) => path,
                Err(e) => {
                    warn!(entry = raw, error = %e, "dropping allow-list entry");
                    continue;
                }
            };
            let entry = if raw.ends_with('/') || resolved.is_dir() {
                ScopeEntry::Prefix(resolved)
            } else {
                ScopeEntry::Exact(resolved)
            };
            if !entries.contains(&entry) {
                entries.push(entry);
            }
        }

        let mut expanded = Vec::new();
        for entry in &entries {
            let ScopeEntry::Exact(file) = entry else {
                continue;
            };
            let Some(parent) = file.parent() else {
                continue;
            };
            let is_role = parent
                .file_name()
                .map(|name| is_role_directory(&name.to_string_lossy(), role_keywords))
                .unwrap_or(false);
            if is_role && parent != workdir && !expanded.iter().any(|p: &PathBuf| p == parent) {
                debug!(dir = %relative_display(parent, &workdir), "scope expanded to role directory");
                expanded.push(parent.to_path_buf());
            }
        }

        Ok(Self {
            workdir,
            allow_list: allow_list.clone(),
            entries,
            expanded,
            mode,
            role_keywords: role_keywords.to_vec(),
        })
    }

    /// Hard-mode guardrail with the default role keywords
    pub fn strict(allow_list: &AllowList, workdir: &Path) -> Result<Self> {
        Self::new(allow_list, workdir, EnforcementMode::Hard, &default_role_keywords())
    }

    /// The same allow-list rooted at another tree
    pub fn rebase(&self, root: &Path) -> Result<Self> {
        let relative: AllowList = self
            .allow_list
            .iter()
            .map(|entry| {
                let path = Path::new(entry);
                match path.strip_prefix(&self.workdir) {
                    Ok(rest) if path.is_absolute() => {
                        let mut shown = rest.to_string_lossy().replace('\\', "/");
                        if entry.ends_with('/') {
                            shown.push('/');
                        }
                        shown
                    }
                    _ => entry.to_string(),
                }
            })
            .collect();
        Self::new(&relative, root, self.mode, &self.role_keywords)
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn mode(&self) -> EnforcementMode {
        self.mode
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    /// No effective entry: every mutation is denied in hard mode
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Effective scope, relative to the workdir; prefixes end with `/`
    pub fn effective_scope(&self) -> Vec<String> {
        let mut scope: Vec<String> = self
            .entries
            .iter()
            .map(|e| {
                let shown = relative_display(e.path(), &self.workdir);
                match e {
                    ScopeEntry::Prefix(_) => format!("{}/", shown),
                    ScopeEntry::Exact(_) => shown,
                }
            })
            .collect();
        for dir in &self.expanded {
            let shown = format!("{}/", relative_display(dir, &self.workdir));
            if scope.contains(&shown) {
                continue;
            }
            let siblings = format!("{}*", shown);
            if !scope.contains(&siblings) {
                scope.push(siblings);
            }
        }
        scope
    }

    /// Resolve an engine-supplied path inside the workdir
    pub fn resolve(&self, raw: &str) -> std::result::Result<PathBuf, ScopeError> {
        resolve_within(&self.workdir, raw)
    }

    /// Membership test over the effective entries
    ///
    /// An expanded role directory admits its direct children only.
    pub fn in_scope(&self, path: &Path) -> bool {
        self.entries.iter().any(|e| e.admits(path))
            || path
                .parent()
                .is_some_and(|parent| self.expanded.iter().any(|dir| dir == parent))
    }

    /// Decide whether an invocation may run
    pub fn check(&self, invocation: &Invocation) -> GuardrailDecision {
        let decision = |verdict, reason: String, resolved| GuardrailDecision {
            invocation: invocation.clone(),
            verdict,
            reason,
            resolved,
        };

        let resolved = match self.resolve(&invocation.path) {
            Ok(path) => path,
            Err(e) => {
                warn!(path = %invocation.path, kind = ?invocation.kind, error = %e, "guardrail denied");
                return decision(Verdict::Deny, e.to_string(), None);
            }
        };

        if !invocation.kind.is_mutation() {
            return decision(Verdict::Allow, "read access".to_string(), Some(resolved));
        }

        if self.in_scope(&resolved) {
            debug!(path = %invocation.path, kind = ?invocation.kind, "guardrail allowed");
            return decision(Verdict::Allow, "in scope".to_string(), Some(resolved));
        }

        match self.mode {
            EnforcementMode::Hard => {
                warn!(path = %invocation.path, kind = ?invocation.kind, "guardrail denied out-of-scope mutation");
                decision(
                    Verdict::Deny,
                    format!("{} is not in the allowed set", invocation.path),
                    Some(resolved),
                )
            }
            EnforcementMode::Soft => {
                warn!(path = %invocation.path, kind = ?invocation.kind, "soft mode: allowing out-of-scope mutation");
                decision(
                    Verdict::Allow,
                    "out of scope, allowed by soft mode".to_string(),
                    Some(resolved),
                )
            }
        }
    }

    /// Structured rejection handed back to the engine as the tool result
    pub fn rejection_message(&self, decision: &GuardrailDecision) -> String {
        serde_json::json!({
            "status": "rejected",
            "tool": decision.invocation.kind,
            "attempted_path": decision.invocation.path,
            "reason": decision.reason,
            "allowed": self.effective_scope(),
            "hint": "Only modify files in the allowed set. Do not retry this path.",
        })
        .to_string()
    }

    /// Write one patch, re-checking scope first
    pub fn apply(&self, patch: &Patch, dry_run: bool) -> Result<AppliedChange> {
        let shown = patch.display_path(&self.workdir);
        let target = self.resolve(&patch.path.to_string_lossy())?;
        if !self.in_scope(&target) {
            match self.mode {
                EnforcementMode::Hard => return Err(ScopeError::NotAllowed(shown).into()),
                EnforcementMode::Soft => warn!(path = %shown, "soft mode: writing out-of-scope patch"),
            }
        }

        let change = |outcome, bytes| AppliedChange {
            path: target.clone(),
            operation: patch.operation,
            outcome,
            bytes,
        };

        let content = match &patch.content_or_diff {
            PatchBody::Described { note } => {
                return Ok(change(
                    ChangeOutcome::Skipped {
                        reason: format!("no content to apply: {}", note),
                    },
                    0,
                ))
            }
            PatchBody::Content { content } => content.clone(),
            PatchBody::Replace { old, new } => {
                if !target.is_file() {
                    return Err(ScopeError::ReplaceTargetMissing(shown).into());
                }
                let current = std::fs::read_to_string(&target)?;
                if !current.contains(old.as_str()) {
                    return Err(ScopeError::ReplaceMismatch(shown).into());
                }
                current.replacen(old.as_str(), new, 1)
            }
        };

        if dry_run {
            debug!(path = %shown, bytes = content.len(), "dry run");
            return Ok(change(ChangeOutcome::DryRun, content.len()));
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(WardenError::from)
                .with_context(|| format!("creating parent of {}", shown))?;
        }
        std::fs::write(&target, &content)
            .map_err(WardenError::from)
            .with_context(|| format!("writing {}", shown))?;
        debug!(path = %shown, bytes = content.len(), "patch applied");
        Ok(change(ChangeOutcome::Applied, content.len()))
    }
}

/// `controller`, `controllers`, `repositories`, ... match their keyword
fn is_role_directory(name: &str, keywords: &[String]) -> bool {
    let name = name.to_ascii_lowercase();
    keywords.iter().any(|keyword| {
        let keyword = keyword.to_ascii_lowercase();
        if name == keyword || name == format!("{}s", keyword) || name == format!("{}es", keyword) {
            return true;
        }
        keyword
            .strip_suffix('y')
            .is_some_and(|stem| name == format!("{}ies", stem))
    })
}
