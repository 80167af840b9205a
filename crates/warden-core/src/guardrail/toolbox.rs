//! Tool gate handed to the engine during synthesis

use super::{IntentReminder, ScopeGuardrail};
use crate::engine::{ToolGate, ToolOutcome};
use crate::types::{Invocation, InvocationKind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

const MAX_READ_BYTES: u64 = 256 * 1024;

/// Guardrail-backed tool gate
///
/// Reads return file content. Accepted mutations are only staged: the engine's run
/// log records them and execution writes them later through the same guardrail.
/// Denials answer with the structured rejection and are counted, never raised.
#[derive(Debug)]
pub struct GuardedToolbox {
    guardrail: Arc<ScopeGuardrail>,
    reminder: Option<IntentReminder>,
    denials: AtomicUsize,
}

impl GuardedToolbox {
    pub fn new(guardrail: Arc<ScopeGuardrail>) -> Self {
        Self {
            guardrail,
            reminder: None,
            denials: AtomicUsize::new(0),
        }
    }

    pub fn with_reminder(mut self, reminder: IntentReminder) -> Self {
        self.reminder = Some(reminder);
        self
    }

    pub fn guardrail(&self) -> &Arc<ScopeGuardrail> {
        &self.guardrail
    }

    /// Mutations denied so far
    pub fn denials(&self) -> usize {
        self.denials.load(Ordering::Relaxed)
    }

    fn remind(&self, response: String) -> String {
        match &self.reminder {
            Some(reminder) => reminder.attach(&response),
            None => response,
        }
    }
}

impl ToolGate for GuardedToolbox {
    fn submit(&self, invocation: &Invocation) -> ToolOutcome {
        let decision = self.guardrail.check(invocation);

        if !decision.is_allowed() {
            self.denials.fetch_add(1, Ordering::Relaxed);
            info!(path = %invocation.path, reason = %decision.reason, "tool call rejected");
            return ToolOutcome {
                accepted: false,
                response: self.remind(self.guardrail.rejection_message(&decision)),
            };
        }

        let response = match (invocation.kind, decision.resolved.as_deref()) {
            (InvocationKind::Read, Some(path)) => match std::fs::metadata(path) {
                Ok(meta) if meta.is_file() && meta.len() > MAX_READ_BYTES => {
                    format!("error: {} is too large to read ({} bytes)", invocation.path, meta.len())
                }
                Ok(meta) if meta.is_file() => std::fs::read_to_string(path)
                    .unwrap_or_else(|e| format!("error: cannot read {}: {}", invocation.path, e)),
                Ok(_) => format!("error: {} is not a file", invocation.path),
                Err(e) => format!("error: cannot read {}: {}", invocation.path, e),
            },
            (kind, _) => {
                let verb = match kind {
                    InvocationKind::Write => "write",
                    InvocationKind::Edit => "edit",
                    InvocationKind::Create => "create",
                    InvocationKind::Read => "read",
                };
                format!("ok: {} {} staged", verb, invocation.path)
            }
        };

        ToolOutcome {
            accepted: true,
            response: self.remind(response),
        }
    }
}
