//! Live layout scanning

use crate::error::{Result, WardenError};
use crate::template::CompiledTemplate;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use walkdir::WalkDir;

/// A file found under one of the template's layer directories
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutEntry {
    /// Workdir-relative path with forward slashes
    pub path: String,
    /// Layer owning the file by directory
    pub dir_layer: Option<String>,
    /// Layers whose naming pattern the file satisfies, most specific first
    pub name_layers: Vec<String>,
}

/// Snapshot of the actual layout, as far as the template cares
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layout {
    /// Layers whose directory exists
    pub present_layers: BTreeSet<String>,
    pub files: Vec<LayoutEntry>,
}

impl Layout {
    pub fn files_in(&self, layer: &str) -> impl Iterator<Item = &LayoutEntry> {
        let layer = layer.to_string();
        self.files
            .iter()
            .filter(move |f| f.dir_layer.as_deref() == Some(layer.as_str()))
    }
}

/// Scan the subtree of `workdir` covered by the template
///
/// A missing or non-directory `workdir` is an error rather than a finding.
pub fn scan(workdir: &Path, template: &CompiledTemplate) -> Result<Layout> {
    if !workdir.is_dir() {
        return Err(WardenError::WorkdirNotFound(workdir.to_path_buf()));
    }

    let mut present_layers = BTreeSet::new();
    let mut files = BTreeMap::new();

    for layer in &template.layers {
        let dir = workdir.join(&layer.directory);
        if !dir.is_dir() {
            continue;
        }
        present_layers.insert(layer.name().to_string());

        for entry in WalkDir::new(&dir)
            .into_iter()
            .filter_entry(|e| !is_hidden(e.file_name().to_string_lossy().as_ref()))
        {
            let entry = entry.map_err(|e| {
                WardenError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = match entry.path().strip_prefix(workdir) {
                Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };
            if files.contains_key(&relative) {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().to_string();
            let layout_entry = LayoutEntry {
                dir_layer: template
                    .layer_for_path(&relative)
                    .map(|l| l.name().to_string()),
                name_layers: template
                    .layers_for_filename(&file_name)
                    .into_iter()
                    .map(|l| l.name().to_string())
                    .collect(),
                path: relative.clone(),
            };
            files.insert(relative, layout_entry);
        }
    }

    Ok(Layout {
        present_layers,
        files: files.into_values().collect(),
    })
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.') && name != "." && name != ".."
}
