//! Architecture templates
//!
//! A template is a declarative mapping from logical layer name to the directory prefix
//! where that layer lives and a filename glob (`*` and `?`) its files must match.
//! Templates are validated and compiled once; a malformed template is a fatal error.

use crate::error::{Result, TemplateError, WardenError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Component, Path};

/// One layer of the expected layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub name: String,
    pub path_prefix: String,
    pub filename_pattern: String,
    /// Non-required layers are auxiliary: their absence is only a low-severity finding
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl LayerSpec {
    pub fn new(
        name: impl Into<String>,
        path_prefix: impl Into<String>,
        filename_pattern: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            path_prefix: path_prefix.into(),
            filename_pattern: filename_pattern.into(),
            required: true,
        }
    }

    pub fn auxiliary(mut self) -> Self {
        self.required = false;
        self
    }

    /// Prefix without leading `./` or trailing `/`
    pub fn directory(&self) -> String {
        let prefix = self.path_prefix.trim().replace('\\', "/");
        let prefix = prefix.strip_prefix("./").unwrap_or(&prefix);
        prefix.trim_end_matches('/').to_string()
    }

    /// Path of the file this layer would hold for `entity`, when the pattern has one `*`
    pub fn planned_file(&self, entity: &str) -> Option<String> {
        let pattern = &self.filename_pattern;
        if pattern.matches('*').count() != 1 || pattern.contains('?') {
            return None;
        }
        let file = pattern.replace('*', entity);
        let dir = self.directory();
        if dir.is_empty() {
            Some(file)
        } else {
            Some(format!("{}/{}", dir, file))
        }
    }
}

/// Expected layered architecture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchitectureTemplate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub layers: Vec<LayerSpec>,
}

impl ArchitectureTemplate {
    pub fn new(name: impl Into<String>, layers: Vec<LayerSpec>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            layers,
        }
    }

    /// Check the template is well formed
    pub fn validate(&self) -> std::result::Result<(), TemplateError> {
        if self.name.trim().is_empty() {
            return Err(TemplateError::MissingName);
        }

        let mut seen = HashSet::new();
        for (index, layer) in self.layers.iter().enumerate() {
            if layer.name.trim().is_empty() {
                return Err(TemplateError::EmptyLayerName(index));
            }
            if !seen.insert(layer.name.as_str()) {
                return Err(TemplateError::DuplicateLayer(layer.name.clone()));
            }
            validate_prefix(layer)?;
            validate_pattern(layer)?;
        }
        Ok(())
    }

    /// Validate and compile filename patterns
    pub fn compile(&self) -> std::result::Result<CompiledTemplate, TemplateError> {
        self.validate()?;
        let layers = self
            .layers
            .iter()
            .map(|spec| {
                let matcher = glob_to_regex(&spec.filename_pattern).map_err(|_| {
                    TemplateError::InvalidPattern {
                        layer: spec.name.clone(),
                        pattern: spec.filename_pattern.clone(),
                    }
                })?;
                Ok(CompiledLayer {
                    spec: spec.clone(),
                    directory: spec.directory(),
                    matcher,
                })
            })
            .collect::<std::result::Result<Vec<_>, TemplateError>>()?;

        Ok(CompiledTemplate {
            name: self.name.clone(),
            layers,
        })
    }

    /// Load a template from a `.toml` or `.json` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let template: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            other => {
                return Err(TemplateError::UnsupportedFormat(
                    other.unwrap_or("<none>").to_string(),
                )
                .into())
            }
        };
        template.validate()?;
        Ok(template)
    }
}

fn validate_prefix(layer: &LayerSpec) -> std::result::Result<(), TemplateError> {
    let invalid = |reason: &str| TemplateError::InvalidPrefix {
        layer: layer.name.clone(),
        prefix: layer.path_prefix.clone(),
        reason: reason.to_string(),
    };

    let dir = layer.directory();
    if dir.is_empty() {
        return Err(invalid("prefix is empty"));
    }
    let path = Path::new(&dir);
    if path.is_absolute() || dir.starts_with('/') {
        return Err(invalid("prefix must be relative"));
    }
    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        return Err(invalid("prefix must stay inside the project"));
    }
    Ok(())
}

fn validate_pattern(layer: &LayerSpec) -> std::result::Result<(), TemplateError> {
    let pattern = layer.filename_pattern.trim();
    if pattern.is_empty() || pattern.contains('/') || pattern.contains('\\') {
        return Err(TemplateError::InvalidPattern {
            layer: layer.name.clone(),
            pattern: layer.filename_pattern.clone(),
        });
    }
    Ok(())
}

fn glob_to_regex(glob: &str) -> std::result::Result<Regex, regex::Error> {
    let mut expr = String::from("^");
    for ch in glob.trim().chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr)
}

/// Layer with its compiled filename matcher
#[derive(Debug, Clone)]
pub struct CompiledLayer {
    pub spec: LayerSpec,
    pub directory: String,
    matcher: Regex,
}

impl CompiledLayer {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn matches_filename(&self, file_name: &str) -> bool {
        self.matcher.is_match(file_name)
    }

    /// Whether a workdir-relative path lies under this layer's directory
    pub fn contains(&self, relative: &str) -> bool {
        relative == self.directory
            || relative
                .strip_prefix(&self.directory)
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Literal characters in the pattern; more literals means a more specific layer
    pub fn specificity(&self) -> usize {
        self.spec
            .filename_pattern
            .chars()
            .filter(|c| *c != '*' && *c != '?')
            .count()
    }

    /// `*.java` generalizes `*Controller.java`: every name the other matches, this matches too
    pub fn generalizes(&self, other: &CompiledLayer) -> bool {
        let Some(suffix) = self.spec.filename_pattern.strip_prefix('*') else {
            return false;
        };
        !suffix.contains('*')
            && !suffix.contains('?')
            && other.spec.filename_pattern != self.spec.filename_pattern
            && other.spec.filename_pattern.ends_with(suffix)
    }
}

/// A validated template ready for matching
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    pub name: String,
    pub layers: Vec<CompiledLayer>,
}

impl CompiledTemplate {
    pub fn required_layers(&self) -> impl Iterator<Item = &CompiledLayer> {
        self.layers.iter().filter(|l| l.spec.required)
    }

    pub fn layer(&self, name: &str) -> Option<&CompiledLayer> {
        self.layers.iter().find(|l| l.name() == name)
    }

    /// Layer owning a relative path by directory, deepest prefix first
    pub fn layer_for_path(&self, relative: &str) -> Option<&CompiledLayer> {
        self.layers
            .iter()
            .filter(|l| l.contains(relative))
            .max_by_key(|l| l.directory.len())
    }

    /// Layers whose naming pattern the file name satisfies, with generalized catch-alls removed
    pub fn layers_for_filename(&self, file_name: &str) -> Vec<&CompiledLayer> {
        let matched: Vec<&CompiledLayer> = self
            .layers
            .iter()
            .filter(|l| l.matches_filename(file_name))
            .collect();

        let mut specific: Vec<&CompiledLayer> = matched
            .iter()
            .copied()
            .filter(|candidate| !matched.iter().any(|other| candidate.generalizes(other)))
            .collect();
        specific.sort_by(|a, b| b.specificity().cmp(&a.specificity()));
        specific
    }

    /// Files the template would hold for `entity`, one per layer
    pub fn planned_files(&self, entity: &str) -> Vec<String> {
        self.layers
            .iter()
            .filter_map(|l| l.spec.planned_file(entity))
            .collect()
    }
}

/// Built-in templates addressable by name
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    templates: HashMap<String, ArchitectureTemplate>,
}

impl TemplateCatalog {
    pub fn new() -> Self {
        let mut templates = HashMap::new();

        let java = ArchitectureTemplate {
            name: "java-layered".to_string(),
            description: "Spring-style layered service".to_string(),
            layers: vec![
                LayerSpec::new("model", "src/main/java/app/model", "*Entity.java"),
                LayerSpec::new("dto", "src/main/java/app/dto", "*Dto.java"),
                LayerSpec::new("repository", "src/main/java/app/repository", "*Repository.java"),
                LayerSpec::new("service", "src/main/java/app/service", "*Service.java"),
                LayerSpec::new("controller", "src/main/java/app/controller", "*Controller.java"),
            ],
        };
        templates.insert(java.name.clone(), java);

        let rust = ArchitectureTemplate {
            name: "rust-hexagonal".to_string(),
            description: "Ports and adapters crate layout".to_string(),
            layers: vec![
                LayerSpec::new("domain", "src/domain", "*.rs"),
                LayerSpec::new("ports", "src/ports", "*_port.rs"),
                LayerSpec::new("adapters", "src/adapters", "*_adapter.rs"),
                LayerSpec::new("application", "src/application", "*_service.rs"),
                LayerSpec::new("dto", "src/dto", "*_dto.rs").auxiliary(),
            ],
        };
        templates.insert(rust.name.clone(), rust);

        let node = ArchitectureTemplate {
            name: "node-mvc".to_string(),
            description: "Express-style model/view/controller".to_string(),
            layers: vec![
                LayerSpec::new("model", "src/models", "*.model.ts"),
                LayerSpec::new("service", "src/services", "*.service.ts"),
                LayerSpec::new("controller", "src/controllers", "*.controller.ts"),
                LayerSpec::new("route", "src/routes", "*.routes.ts"),
                LayerSpec::new("dto", "src/dto", "*.dto.ts").auxiliary(),
            ],
        };
        templates.insert(node.name.clone(), node);

        Self { templates }
    }

    pub fn get(&self, name: &str) -> Option<&ArchitectureTemplate> {
        self.templates.get(name)
    }

    pub fn add(&mut self, template: ArchitectureTemplate) {
        self.templates.insert(template.name.clone(), template);
    }

    /// Sorted template names
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve a catalog name, or load from disk when `reference` names a file
    pub fn resolve(&self, reference: &str) -> Result<ArchitectureTemplate> {
        if let Some(template) = self.get(reference) {
            return Ok(template.clone());
        }
        let path = Path::new(reference);
        if path.is_file() {
            return ArchitectureTemplate::from_file(path);
        }
        Err(WardenError::Template(TemplateError::Unknown(
            reference.to_string(),
        )))
    }
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crud_template() -> CompiledTemplate {
        TemplateCatalog::new()
            .get("java-layered")
            .unwrap()
            .compile()
            .unwrap()
    }

    #[test]
    fn test_builtin_templates_compile() {
        let catalog = TemplateCatalog::new();
        for name in catalog.names() {
            assert!(catalog.get(name).unwrap().compile().is_ok(), "{name}");
        }
        assert_eq!(catalog.names(), vec!["java-layered", "node-mvc", "rust-hexagonal"]);
    }

    #[test]
    fn test_glob_matching() {
        let template = crud_template();
        let controller = template.layer("controller").unwrap();
        assert!(controller.matches_filename("OrderController.java"));
        assert!(!controller.matches_filename("OrderController.kt"));
        assert!(!controller.matches_filename("OrderControllerTest.javax"));
    }

    #[test]
    fn test_planned_files() {
        let template = crud_template();
        let planned = template.planned_files("Order");
        assert_eq!(planned.len(), 5);
        assert!(planned.contains(&"src/main/java/app/controller/OrderController.java".to_string()));
        assert!(planned.contains(&"src/main/java/app/model/OrderEntity.java".to_string()));
    }

    #[test]
    fn test_layer_for_path_prefers_deepest() {
        let template = ArchitectureTemplate::new(
            "nested",
            vec![
                LayerSpec::new("app", "src", "*.rs"),
                LayerSpec::new("api", "src/api", "*_api.rs"),
            ],
        )
        .compile()
        .unwrap();

        assert_eq!(template.layer_for_path("src/api/user_api.rs").unwrap().name(), "api");
        assert_eq!(template.layer_for_path("src/lib.rs").unwrap().name(), "app");
        assert!(template.layer_for_path("srcx/lib.rs").is_none());
    }

    #[test]
    fn test_catch_all_does_not_count_as_second_layer() {
        let template = TemplateCatalog::new()
            .get("rust-hexagonal")
            .unwrap()
            .compile()
            .unwrap();

        let layers = template.layers_for_filename("billing_port.rs");
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].name(), "ports");
        assert_eq!(template.layers_for_filename("invoice.rs")[0].name(), "domain");
    }

    #[test]
    fn test_malformed_templates_rejected() {
        let dup = ArchitectureTemplate::new(
            "dup",
            vec![
                LayerSpec::new("model", "src/model", "*.rs"),
                LayerSpec::new("model", "src/other", "*.rs"),
            ],
        );
        assert_eq!(dup.validate(), Err(TemplateError::DuplicateLayer("model".into())));

        let escape = ArchitectureTemplate::new("esc", vec![LayerSpec::new("x", "../x", "*.rs")]);
        assert!(matches!(escape.validate(), Err(TemplateError::InvalidPrefix { .. })));

        let pattern = ArchitectureTemplate::new("pat", vec![LayerSpec::new("x", "src", "a/b")]);
        assert!(matches!(pattern.validate(), Err(TemplateError::InvalidPattern { .. })));

        let unnamed = ArchitectureTemplate::new(" ", vec![]);
        assert_eq!(unnamed.validate(), Err(TemplateError::MissingName));
    }

    #[test]
    fn test_template_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            r#"
            name = "custom"

            [[layers]]
            name = "handlers"
            path_prefix = "src/handlers/"
            filename_pattern = "*_handler.rs"

            [[layers]]
            name = "dto"
            path_prefix = "src/dto"
            filename_pattern = "*_dto.rs"
            required = false
            "#,
        )
        .unwrap();

        let template = TemplateCatalog::new()
            .resolve(path.to_str().unwrap())
            .unwrap();
        assert_eq!(template.layers.len(), 2);
        assert!(!template.layers[1].required);
        assert_eq!(template.layers[0].directory(), "src/handlers");
    }
}
