//! Patch Normalizer
//!
//! Turns a raw engine run log into an ordered list of canonical [`Patch`]es:
//!
//! 1. every run log item (and the final message) is handed to the extractor chain;
//!    the first extractor that claims the item wins
//! 2. every candidate path goes through the guardrail; unresolvable or out-of-scope
//!    paths are dropped with a warning
//! 3. candidates for the same path are merged in first-seen order
//!
//! An engine that did something but yielded no patch is reported as
//! [`WardenError::NoChangesProduced`].

pub mod extractors;

pub use extractors::{default_chain, looks_like_path, Candidate, Extractor, WorkItem};

use crate::config::EnforcementMode;
use crate::engine::EngineRun;
use crate::error::{Result, WardenError};
use crate::guardrail::ScopeGuardrail;
use crate::types::{Patch, PatchBody, PatchOperation};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Extractor chain plus guardrail-backed path normalization
pub struct PatchNormalizer<'g> {
    guardrail: &'g ScopeGuardrail,
    chain: Vec<Box<dyn Extractor>>,
}

impl<'g> PatchNormalizer<'g> {
    pub fn new(guardrail: &'g ScopeGuardrail) -> Self {
        Self {
            guardrail,
            chain: default_chain(),
        }
    }

    /// Replace the extractor chain
    pub fn with_chain(mut self, chain: Vec<Box<dyn Extractor>>) -> Self {
        self.chain = chain;
        self
    }

    /// Candidates from one work item; the first claiming extractor wins
    pub fn extract(&self, item: &WorkItem<'_>) -> Vec<Candidate> {
        for extractor in &self.chain {
            if let Some(found) = extractor.extract(item) {
                debug!(extractor = extractor.name(), candidates = found.len(), "work item claimed");
                return found;
            }
        }
        Vec::new()
    }

    pub fn normalize(&self, run: &EngineRun) -> Result<Vec<Patch>> {
        let mut candidates = Vec::new();
        for item in &run.items {
            candidates.extend(self.extract(&WorkItem::from_raw(item)));
        }
        if !run.final_text.trim().is_empty() {
            candidates.extend(self.extract(&WorkItem::from_text(&run.final_text)));
        }

        let patches = self.merge(candidates);
        if patches.is_empty() && run.has_activity() {
            return Err(WardenError::NoChangesProduced {
                items: run.items.len() + usize::from(!run.final_text.trim().is_empty()),
            });
        }
        Ok(patches)
    }

    /// Resolve, scope-check and merge candidates by path
    pub fn merge(&self, candidates: Vec<Candidate>) -> Vec<Patch> {
        let mut order: Vec<PathBuf> = Vec::new();
        let mut bodies: HashMap<PathBuf, PatchBody> = HashMap::new();

        for candidate in candidates {
            let path = match self.guardrail.resolve(&candidate.path) {
                Ok(path) => path,
                Err(e) => {
                    warn!(path = %candidate.path, source = candidate.source, error = %e, "dropping patch");
                    continue;
                }
            };
            if !self.guardrail.in_scope(&path) {
                match self.guardrail.mode() {
                    EnforcementMode::Hard => {
                        warn!(path = %candidate.path, source = candidate.source, "dropping out-of-scope patch");
                        continue;
                    }
                    EnforcementMode::Soft => {
                        warn!(path = %candidate.path, "soft mode: keeping out-of-scope patch")
                    }
                }
            }

            match bodies.remove(&path) {
                None => {
                    order.push(path.clone());
                    bodies.insert(path, candidate.body);
                }
                Some(existing) => {
                    bodies.insert(path, merge_bodies(existing, candidate.body));
                }
            }
        }

        order
            .into_iter()
            .filter_map(|path| {
                let body = bodies.remove(&path)?;
                let operation = if path.exists() {
                    PatchOperation::Modify
                } else {
                    PatchOperation::Create
                };
                Some(Patch {
                    path,
                    operation,
                    content_or_diff: body,
                })
            })
            .collect()
    }
}

/// A concrete body supersedes a description; later concrete bodies win, except that a
/// replacement is folded into earlier full content when it applies
fn merge_bodies(existing: PatchBody, incoming: PatchBody) -> PatchBody {
    match (existing, incoming) {
        (existing, PatchBody::Described { .. }) => existing,
        (PatchBody::Content { content }, PatchBody::Replace { old, new })
            if content.contains(old.as_str()) =>
        {
            PatchBody::Content {
                content: content.replacen(old.as_str(), &new, 1),
            }
        }
        (PatchBody::Replace { old, new: first }, PatchBody::Replace { old: next_old, new })
            if first.contains(next_old.as_str()) =>
        {
            PatchBody::Replace {
                old,
                new: first.replacen(next_old.as_str(), &new, 1),
            }
        }
        (_, incoming) => incoming,
    }
}
