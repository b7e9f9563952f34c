//! Plugin manifests and node-definition files.
//!
//! A *project* directory carries a `project.toml` (or `project.json`)
//! supplying defaults for every plugin beneath it: version, description,
//! author, category colors. Each plugin's definition file may shallow-
//! override those defaults and declares the plugin's node types plus the
//! symbols binding them to compiled-in implementations.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::NodeSpec;

// ═══════════════════════════════════════════════════════════════════════════════
// Project Manifest
// ═══════════════════════════════════════════════════════════════════════════════

/// Defaults shared by every plugin in a project directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectManifest {
    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub author: Option<String>,

    /// Category name -> display color for the canvas palette.
    #[serde(default)]
    pub category_colors: HashMap<String, String>,
}

impl ProjectManifest {
    /// Load `project.toml` (then `project.json`) from a project directory.
    /// A missing manifest yields the defaults.
    pub fn load_from_dir(dir: &Path) -> Result<Self, ManifestError> {
        let toml_path = dir.join("project.toml");
        if toml_path.exists() {
            let content = read(&toml_path)?;
            return toml::from_str(&content).map_err(|e| ManifestError::Parse {
                path: toml_path.display().to_string(),
                details: e.to_string(),
            });
        }

        let json_path = dir.join("project.json");
        if json_path.exists() {
            let content = read(&json_path)?;
            return serde_json::from_str(&content).map_err(|e| ManifestError::Parse {
                path: json_path.display().to_string(),
                details: e.to_string(),
            });
        }

        Ok(Self::default())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Plugin Definition File
// ═══════════════════════════════════════════════════════════════════════════════

/// One node declared by a definition file: its spec plus the symbol of its
/// `run` implementation. A node without a `run` symbol is spec-only (a
/// container type meaningful only to the executor's control logic).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,

    #[serde(flatten)]
    pub spec: NodeSpec,
}

/// The contents of a plugin definition file (`<plugin>.toml` for a simple
/// plugin, `<plugin>/plugin.toml` for a complex one).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginDefinition {
    /// Shallow overrides of the project manifest.
    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub author: Option<String>,

    #[serde(default)]
    pub category_colors: HashMap<String, String>,

    /// Symbol of the plugin's lifecycle hooks, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hooks: Option<String>,

    /// Node types this plugin declares.
    #[serde(default, rename = "node")]
    pub nodes: Vec<NodeDefinition>,
}

impl PluginDefinition {
    /// Parse a definition from TOML text.
    pub fn from_toml(path: &Path, content: &str) -> Result<Self, ManifestError> {
        toml::from_str(content).map_err(|e| ManifestError::Parse {
            path: path.display().to_string(),
            details: e.to_string(),
        })
    }

    /// Load a definition file from disk.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = read(path)?;
        Self::from_toml(path, &content)
    }

    /// Validate the declaration shape before installation.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.nodes.is_empty() {
            return Err(ManifestError::Invalid(
                "definition file declares no nodes".into(),
            ));
        }
        for node in &self.nodes {
            if node.spec.node_type.is_empty() {
                return Err(ManifestError::Invalid("node with empty type".into()));
            }
            if node.spec.label.is_empty() {
                return Err(ManifestError::Invalid(format!(
                    "node '{}' has an empty label",
                    node.spec.node_type
                )));
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Merged Manifest
// ═══════════════════════════════════════════════════════════════════════════════

/// The effective metadata of a plugin: project defaults with the plugin's
/// own fields layered on top (shallow override, field by field).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginManifest {
    pub version: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub category_colors: HashMap<String, String>,
}

impl PluginManifest {
    pub fn merged(project: &ProjectManifest, plugin: &PluginDefinition) -> Self {
        let mut category_colors = project.category_colors.clone();
        category_colors.extend(plugin.category_colors.clone());
        Self {
            version: plugin.version.clone().or_else(|| project.version.clone()),
            description: plugin
                .description
                .clone()
                .or_else(|| project.description.clone()),
            author: plugin.author.clone().or_else(|| project.author.clone()),
            category_colors,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Errors that can occur when working with manifests and definition files.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("definition file not found: {0}")]
    NotFound(String),

    #[error("failed to parse {path}: {details}")]
    Parse { path: String, details: String },

    #[error("invalid definition: {0}")]
    Invalid(String),

    #[error("io error: {0}")]
    Io(String),
}

fn read(path: &Path) -> Result<String, ManifestError> {
    std::fs::read_to_string(path)
        .map_err(|e| ManifestError::Io(format!("failed to read {}: {}", path.display(), e)))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
