//! Intent reminder
//!
//! Re-asserts the original request before every reasoning step. It never blocks; it
//! only decorates prompts and tool results.

use serde::{Deserialize, Serialize};

/// The original request anchored by its blake3 digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentReminder {
    request: String,
    anchor: String,
}

impl IntentReminder {
    pub fn new(request: impl Into<String>) -> Self {
        let request = request.into();
        let anchor = blake3::hash(request.as_bytes()).to_hex().as_str()[..12].to_string();
        Self { request, anchor }
    }

    pub fn request(&self) -> &str {
        &self.request
    }

    /// Short digest of the request, stable across runs
    pub fn anchor(&self) -> &str {
        &self.anchor
    }

    pub fn render(&self) -> String {
        format!(
            "[intent {}] Stay within the original request: \"{}\". Only modify files in scope.",
            self.anchor, self.request
        )
    }

    /// Append the reminder to a prompt or tool result
    pub fn attach(&self, text: &str) -> String {
        if text.is_empty() {
            return self.render();
        }
        format!("{}\n\n{}", text.trim_end(), self.render())
    }
}
