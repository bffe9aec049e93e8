use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use glue::{ProgramDescriptor, Setting, UniformValues};
use serde::{Deserialize, Serialize};

/// Filter document as saved by the editor.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterDocument {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub settings: Vec<Setting>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertex_shader: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment_shader: Option<String>,
}

impl FilterDocument {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read filter {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse filter {}", path.display()))
    }

    /// Label for log lines: the name, else the id, else a placeholder.
    pub fn label(&self) -> &str {
        [self.name.as_str(), self.id.as_str()]
            .into_iter()
            .find(|label| !label.is_empty())
            .unwrap_or("untitled filter")
    }

    pub fn descriptor(&self) -> ProgramDescriptor {
        let descriptor = match self.fragment_shader.as_deref() {
            Some(fragment) if !fragment.trim().is_empty() => ProgramDescriptor::new(fragment),
            _ => ProgramDescriptor::default(),
        };
        let descriptor = match self.vertex_shader.as_deref() {
            Some(vertex) => descriptor.with_vertex(vertex),
            None => descriptor,
        };
        descriptor.with_settings(self.settings.clone())
    }

    pub fn default_values(&self) -> UniformValues {
        self.settings
            .iter()
            .map(|setting| (setting.key.clone(), setting.default_uniform()))
            .collect()
    }
}
