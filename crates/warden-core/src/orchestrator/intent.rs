//! Intent phase: turn the request into an allow-list candidate

use super::context::source_files;
use super::{PhaseError, PipelinePhase};
use crate::error::Result;
use crate::state::{ContextSummary, PipelineState};
use crate::template::CompiledTemplate;
use crate::types::{relative_display, ErrorSeverity, Stage};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

const STOP_WORDS: &[&str] = &[
    "a", "an", "add", "and", "all", "api", "as", "by", "change", "create", "crud", "delete",
    "endpoint", "endpoints", "entity", "feature", "fix", "for", "from", "implement", "in",
    "into", "make", "new", "of", "on", "or", "please", "remove", "rename", "rest", "support",
    "the", "to", "update", "use", "with",
];

/// Capitalized identifiers in the request that are not filler words
pub fn extract_entities(request: &str) -> Vec<String> {
    let mut entities: Vec<String> = Vec::new();
    for token in request.split(|c: char| !c.is_alphanumeric() && c != '_') {
        let Some(first) = token.chars().next() else {
            continue;
        };
        let acronym = token.len() > 1 && token.chars().all(|c| !c.is_lowercase());
        if !first.is_uppercase()
            || acronym
            || STOP_WORDS.contains(&token.to_lowercase().as_str())
        {
            continue;
        }
        if !entities.iter().any(|e| e == token) {
            entities.push(token.to_string());
        }
    }
    entities
}

/// Lowercased request words worth matching against file names
pub fn request_keywords(request: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for token in request.split(|c: char| !c.is_alphanumeric()) {
        let word = token.to_lowercase();
        if word.len() < 3 || STOP_WORDS.contains(&word.as_str()) || keywords.contains(&word) {
            continue;
        }
        keywords.push(word);
    }
    keywords
}

/// What an intent extractor plans against
pub struct IntentInput<'a> {
    pub request: &'a str,
    pub workdir: &'a Path,
    pub context: Option<&'a ContextSummary>,
    pub template: &'a CompiledTemplate,
}

/// Produces workdir-relative paths the request is expected to touch
#[async_trait]
pub trait IntentExtractor: Send + Sync {
    async fn plan(&self, input: &IntentInput<'_>) -> Result<Vec<String>>;
}

/// One planned file per extracted entity per template layer
#[derive(Debug, Clone, Default)]
pub struct TemplateIntentExtractor;

#[async_trait]
impl IntentExtractor for TemplateIntentExtractor {
    async fn plan(&self, input: &IntentInput<'_>) -> Result<Vec<String>> {
        Ok(extract_entities(input.request)
            .iter()
            .flat_map(|entity| input.template.planned_files(entity))
            .collect())
    }
}

/// Existing files matching a layer pattern whose stem contains a request keyword
pub fn scan_fallback(workdir: &Path, template: &CompiledTemplate, request: &str) -> Vec<String> {
    let keywords = request_keywords(request);
    if keywords.is_empty() {
        return Vec::new();
    }

    let mut found = Vec::new();
    for entry in source_files(workdir) {
        let name = entry.file_name().to_string_lossy();
        if !template.layers.iter().any(|l| l.matches_filename(&name)) {
            continue;
        }
        let stem = entry
            .path()
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if keywords.iter().any(|k| stem.contains(k.as_str())) {
            found.push(relative_display(entry.path(), workdir));
        }
    }
    found.sort();
    found
}

pub struct IntentPhase {
    extractor: Arc<dyn IntentExtractor>,
    template: Arc<CompiledTemplate>,
}

impl IntentPhase {
    pub fn new(extractor: Arc<dyn IntentExtractor>, template: Arc<CompiledTemplate>) -> Self {
        Self {
            extractor,
            template,
        }
    }
}

#[async_trait]
impl PipelinePhase for IntentPhase {
    fn stage(&self) -> Stage {
        Stage::Intent
    }

    async fn run(&self, state: &PipelineState) -> std::result::Result<PipelineState, PhaseError> {
        let input = IntentInput {
            request: &state.request,
            workdir: &state.workdir,
            context: state.context.as_ref(),
            template: &self.template,
        };
        let mut next = state.clone();

        let planned = match self.extractor.plan(&input).await {
            Ok(planned) => planned,
            Err(e) => match PhaseError::classify(e) {
                PhaseError::Recoverable(message) => {
                    next.record_error(Stage::Intent, ErrorSeverity::Recoverable, message);
                    Vec::new()
                }
                fatal => return Err(fatal),
            },
        };

        let added = if planned.is_empty() {
            warn!("intent extraction produced no files, falling back to filesystem scan");
            next.record_error(
                Stage::Intent,
                ErrorSeverity::Recoverable,
                "intent extraction produced no candidate files; using filesystem scan",
            );
            next.allow_list
                .extend(scan_fallback(&state.workdir, &self.template, &state.request))
        } else {
            next.allow_list.extend(planned)
        };

        info!(added, total = next.allow_list.len(), "allow-list planned");
        Ok(next)
    }
}
