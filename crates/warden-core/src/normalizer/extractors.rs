//! Patch extractors, one per raw output shape
//!
//! Each extractor looks at one work item and either claims it (returning the
//! candidates it found, possibly none) or passes. The chain runs in priority order and
//! the first extractor that claims an item wins.

use crate::engine::{parse_tool_call, RawItem};
use crate::types::{Invocation, PatchBody};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

lazy_static! {
    static ref TOOL_LINE: Regex = Regex::new(
        r#"(?mi)^[ \t]*(?:\[tool\][ \t]*|tool(?:[ \t]+call)?:[ \t]*)?(write_file|create_file|edit_file|save_file|new_file|write|create|edit)[ \t]*(?::[ \t]*|\([ \t]*)(?:path[ \t]*=[ \t]*)?["'`]?([^\s"'`)]+)["'`]?[ \t]*\)?[ \t]*:?[ \t]*$"#
    )
    .expect("valid tool line regex");
    static ref FENCE: Regex =
        Regex::new(r"(?s)```([^\n`]*)\n(.*?)```").expect("valid fence regex");
    static ref FILE_HEADER: Regex = Regex::new(
        r"(?i)^\s*(?://|#|--|<!--|/\*)\s*(?:file|filepath|path)\s*:\s*([^\s*]+?)\s*(?:-->|\*/)?\s*$"
    )
    .expect("valid file header regex");
    static ref XML_FILE: Regex =
        Regex::new(r#"(?s)<file\s+path\s*=\s*["']([^"']+)["']\s*>(.*?)</file>"#)
            .expect("valid xml file regex");
    static ref MENTION: Regex = Regex::new(
        r#"(?i)\b(?:created|modified|updated|added|wrote|edited|changed)\s+(?:the\s+)?(?:new\s+)?(?:file\s+)?[`"']?([A-Za-z0-9_./\\-]+\.[A-Za-z0-9]+)[`"']?"#
    )
    .expect("valid mention regex");
}

/// A patch before path normalization and merging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: String,
    pub body: PatchBody,
    /// Extractor that produced it
    pub source: &'static str,
}

impl Candidate {
    fn new(path: impl Into<String>, body: PatchBody, source: &'static str) -> Self {
        Self {
            path: path.into(),
            body,
            source,
        }
    }
}

/// One unit of engine output, as the extractors see it
#[derive(Debug, Clone)]
pub enum WorkItem<'a> {
    Tool {
        invocation: &'a Invocation,
        accepted: bool,
    },
    Json(Value),
    Text(&'a str),
}

impl<'a> WorkItem<'a> {
    pub fn from_raw(item: &'a RawItem) -> Self {
        match item {
            RawItem::ToolCall {
                invocation,
                accepted,
                ..
            } => WorkItem::Tool {
                invocation,
                accepted: *accepted,
            },
            RawItem::Json(value) => WorkItem::Json(value.clone()),
            RawItem::Text(text) => Self::from_text(text),
        }
    }

    /// Text that is a bare JSON object is treated as JSON
    pub fn from_text(text: &'a str) -> Self {
        let trimmed = text.trim();
        if trimmed.starts_with('{') {
            if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
                if value.is_object() {
                    return WorkItem::Json(value);
                }
            }
        }
        WorkItem::Text(text)
    }

    /// Free text carried by the item; string leaves for JSON
    fn text(&self) -> Option<String> {
        match self {
            WorkItem::Text(text) => Some(text.to_string()),
            WorkItem::Json(value) => {
                let mut out = Vec::new();
                collect_strings(value, &mut out);
                (!out.is_empty()).then(|| out.join("\n"))
            }
            WorkItem::Tool { .. } => None,
        }
    }
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

/// A strategy recognizing one output shape
pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` passes the item to the next extractor; `Some` claims it
    fn extract(&self, item: &WorkItem<'_>) -> Option<Vec<Candidate>>;
}

/// The six extractors in priority order
pub fn default_chain() -> Vec<Box<dyn Extractor>> {
    vec![
        Box::new(ToolCallExtractor),
        Box::new(ToolLineExtractor),
        Box::new(FencedBlockExtractor),
        Box::new(XmlFileExtractor),
        Box::new(SummaryExtractor),
        Box::new(MentionExtractor),
    ]
}

/// Whether `s` plausibly names a file: no spaces, a file-like last segment
pub fn looks_like_path(s: &str) -> bool {
    let s = s.trim();
    if s.is_empty() || s.contains(char::is_whitespace) || s.contains("://") {
        return false;
    }
    let last = s.rsplit(['/', '\\']).next().unwrap_or(s);
    match last.rsplit_once('.') {
        Some((stem, ext)) => {
            !ext.is_empty()
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
                && (!stem.is_empty() || s.contains('/'))
        }
        None => false,
    }
}

/// Typed tool-call records and JSON tool-call objects
pub struct ToolCallExtractor;

impl ToolCallExtractor {
    fn from_invocation(invocation: &Invocation) -> Vec<Candidate> {
        if !invocation.kind.is_mutation() {
            return Vec::new();
        }
        let body = invocation.payload.clone().unwrap_or_else(|| {
            PatchBody::described(format!("tool call on {} carried no payload", invocation.path))
        });
        vec![Candidate::new(invocation.path.clone(), body, "tool_call")]
    }
}

impl Extractor for ToolCallExtractor {
    fn name(&self) -> &'static str {
        "tool_call"
    }

    fn extract(&self, item: &WorkItem<'_>) -> Option<Vec<Candidate>> {
        match item {
            WorkItem::Tool {
                invocation,
                accepted,
            } => {
                if *accepted {
                    Some(Self::from_invocation(invocation))
                } else {
                    Some(Vec::new())
                }
            }
            WorkItem::Json(value) => {
                let invocation = parse_tool_call(value)?;
                Some(Self::from_invocation(&invocation))
            }
            WorkItem::Text(_) => None,
        }
    }
}

/// `write_file: path` or `[tool] create(path)` lines followed by the body
pub struct ToolLineExtractor;

impl Extractor for ToolLineExtractor {
    fn name(&self) -> &'static str {
        "tool_line"
    }

    fn extract(&self, item: &WorkItem<'_>) -> Option<Vec<Candidate>> {
        let WorkItem::Text(text) = item else {
            return None;
        };
        let matches: Vec<_> = TOOL_LINE.captures_iter(text).collect();
        let mut candidates = Vec::new();

        for (i, cap) in matches.iter().enumerate() {
            let (Some(whole), Some(path)) = (cap.get(0), cap.get(2)) else {
                continue;
            };
            let path = path.as_str().trim();
            if !looks_like_path(path) {
                continue;
            }

            let end = matches
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map(|m| m.start())
                .unwrap_or(text.len());
            let section = &text[whole.end()..end];
            let body = match FENCE.captures(section).and_then(|c| c.get(2)) {
                Some(inner) => inner.as_str().to_string(),
                None => section.trim_matches('\n').to_string(),
            };

            let body = if body.trim().is_empty() {
                PatchBody::described(format!("logged tool call on {} without a body", path))
            } else {
                PatchBody::content(body)
            };
            candidates.push(Candidate::new(path, body, self.name()));
        }

        (!candidates.is_empty()).then_some(candidates)
    }
}

/// Markdown fences with a path in the info string or a `// File:` first line
pub struct FencedBlockExtractor;

impl FencedBlockExtractor {
    fn path_from_info(info: &str) -> Option<String> {
        info.split(|c: char| c.is_whitespace() || c == ':' || c == '=' || c == ',')
            .map(|token| token.trim_matches(|c: char| c == '"' || c == '\'' || c == '`'))
            .find(|token| looks_like_path(token))
            .map(str::to_string)
    }
}

impl Extractor for FencedBlockExtractor {
    fn name(&self) -> &'static str {
        "fenced_block"
    }

    fn extract(&self, item: &WorkItem<'_>) -> Option<Vec<Candidate>> {
        let text = item.text()?;
        let mut candidates = Vec::new();

        for cap in FENCE.captures_iter(&text) {
            let info = cap.get(1).map(|m| m.as_str()).unwrap_or_default();
            let body = cap.get(2).map(|m| m.as_str()).unwrap_or_default();

            if let Some(path) = Self::path_from_info(info) {
                candidates.push(Candidate::new(path, PatchBody::content(body), self.name()));
                continue;
            }

            let (first, rest) = body.split_once('\n').unwrap_or((body, ""));
            if let Some(path) = FILE_HEADER
                .captures(first)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str())
                .filter(|p| looks_like_path(p))
            {
                candidates.push(Candidate::new(path, PatchBody::content(rest), self.name()));
            }
        }

        (!candidates.is_empty()).then_some(candidates)
    }
}

/// `<file path="...">...</file>` blocks
pub struct XmlFileExtractor;

impl Extractor for XmlFileExtractor {
    fn name(&self) -> &'static str {
        "xml_file"
    }

    fn extract(&self, item: &WorkItem<'_>) -> Option<Vec<Candidate>> {
        let text = item.text()?;
        let candidates: Vec<Candidate> = XML_FILE
            .captures_iter(&text)
            .filter_map(|cap| {
                let path = cap.get(1)?.as_str().trim();
                let body = cap.get(2)?.as_str().trim_matches('\n');
                Some(Candidate::new(path, PatchBody::content(body), self.name()))
            })
            .collect();
        (!candidates.is_empty()).then_some(candidates)
    }
}

/// Final-message summaries: `{"files"|"changes": [{path, operation, content}]}`
pub struct SummaryExtractor;

impl SummaryExtractor {
    fn embedded_object(text: &str) -> Option<Value> {
        let start = text.find('{')?;
        let end = text.rfind('}')?;
        if end <= start {
            return None;
        }
        serde_json::from_str(&text[start..=end]).ok()
    }

    fn entries(value: &Value) -> Option<&Vec<Value>> {
        ["files", "changes", "patches"]
            .iter()
            .find_map(|key| value.get(*key).and_then(Value::as_array))
    }
}

impl Extractor for SummaryExtractor {
    fn name(&self) -> &'static str {
        "summary"
    }

    fn extract(&self, item: &WorkItem<'_>) -> Option<Vec<Candidate>> {
        let embedded;
        let value = match item {
            WorkItem::Json(value) => value,
            WorkItem::Text(text) => {
                embedded = Self::embedded_object(text)?;
                &embedded
            }
            WorkItem::Tool { .. } => return None,
        };
        let entries = Self::entries(value)?;

        let field = |entry: &Value, keys: &[&str]| {
            keys.iter()
                .find_map(|key| entry.get(*key).and_then(Value::as_str))
                .map(str::to_string)
        };

        let candidates: Vec<Candidate> = entries
            .iter()
            .filter_map(|entry| {
                if let Some(path) = entry.as_str() {
                    return Some(Candidate::new(
                        path,
                        PatchBody::described("listed in final summary"),
                        "summary",
                    ));
                }
                let path = field(entry, &["path", "file", "file_path", "filename"])?;
                let body = match field(entry, &["content", "new_content", "contents"]) {
                    Some(content) => PatchBody::content(content),
                    None => {
                        let operation = field(entry, &["operation", "action", "status"])
                            .unwrap_or_else(|| "change".to_string());
                        let note = field(entry, &["description", "summary", "reason"])
                            .unwrap_or_else(|| "listed in final summary".to_string());
                        PatchBody::described(format!("{}: {}", operation, note))
                    }
                };
                Some(Candidate::new(path, body, "summary"))
            })
            .collect();

        Some(candidates)
    }
}

/// `created|modified|updated <path>` in free text; description only
pub struct MentionExtractor;

impl Extractor for MentionExtractor {
    fn name(&self) -> &'static str {
        "mention"
    }

    fn extract(&self, item: &WorkItem<'_>) -> Option<Vec<Candidate>> {
        let text = item.text()?;
        let candidates: Vec<Candidate> = MENTION
            .captures_iter(&text)
            .filter_map(|cap| {
                let whole = cap.get(0)?.as_str();
                let path = cap.get(1)?.as_str();
                looks_like_path(path).then(|| {
                    Candidate::new(path, PatchBody::described(whole.trim()), self.name())
                })
            })
            .collect();
        (!candidates.is_empty()).then_some(candidates)
    }
}
