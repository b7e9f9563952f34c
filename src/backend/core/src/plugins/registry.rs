//! Plugin discovery and registration.
//!
//! The [`NodeRegistry`] owns the authoritative mapping from node type to
//! (spec, executor). It scans the two-tier plugin tree, applies the state
//! file, drives the activate / deactivate / delete lifecycle with optional
//! per-plugin hooks, and hands out immutable [`RegistrySnapshot`]s for the
//! validator and executor.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::manifest::{ManifestError, PluginDefinition, PluginManifest, ProjectManifest};
use super::state::{PluginStates, STATE_FILE_NAME};
use super::{ExecutorTable, NodeExecutor, NodeSpec};

// ═══════════════════════════════════════════════════════════════════════════════
// Plugin State
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle state of a plugin inside the registry.
///
/// `Deleted` is terminal: the files are removed and the entry purged, so
/// there is no variant for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    /// Loaded; its node types are in the registry maps.
    Active,
    /// Marked inactive in the state file; definitions parsed for
    /// diagnostics but nothing installed.
    Inactive,
    /// Discovery or activation failed; see the record's error message.
    Error,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Registered Plugin
// ═══════════════════════════════════════════════════════════════════════════════

/// A plugin known to the registry.
#[derive(Debug, Clone, Serialize)]
pub struct PluginRecord {
    /// `"<project>/<plugin>"`.
    pub id: String,
    /// Project directory name.
    pub project: String,
    /// Plugin name within the project.
    pub name: String,
    /// Filesystem path: the definition file for a simple plugin, the
    /// plugin directory for a complex one.
    pub path: PathBuf,
    /// Effective metadata (project defaults, plugin overrides).
    pub manifest: PluginManifest,
    /// Current lifecycle state.
    pub state: PluginState,
    /// Load error, when `state` is [`PluginState::Error`].
    pub error: Option<String>,
    /// Node types this plugin declares.
    pub node_types: Vec<String>,
    /// When the plugin was first discovered.
    pub discovered_at: DateTime<Utc>,
    /// When the plugin last changed state.
    pub updated_at: DateTime<Utc>,

    #[serde(skip)]
    definition_path: PathBuf,
    #[serde(skip)]
    hooks_symbol: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Registry Errors
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("plugin not found: {0}")]
    PluginNotFound(String),

    #[error("plugin '{0}' must be inactive before deletion")]
    DeleteWhileActive(String),

    #[error("failed to load plugin '{id}': {details}")]
    Load { id: String, details: String },

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// ═══════════════════════════════════════════════════════════════════════════════
// Snapshot
// ═══════════════════════════════════════════════════════════════════════════════

/// An immutable view of the registry taken at a point in time.
///
/// Executions hold the snapshot they started with; later registry
/// mutations never perturb an in-flight run. The snapshot also remembers
/// which node types belong to *inactive* plugins so the executor can
/// distinguish "activate the plugin" from "plugin missing entirely".
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    specs: HashMap<String, Arc<NodeSpec>>,
    executors: HashMap<String, NodeExecutor>,
    inactive_types: HashMap<String, String>,
}

impl RegistrySnapshot {
    /// An empty snapshot, the starting point for programmatic assembly.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Register a node type directly (hosts and tests assembling a
    /// snapshot without a plugin tree on disk).
    pub fn register<F>(&mut self, spec: NodeSpec, run: F)
    where
        F: Fn(&mut super::RunContext, Vec<crate::value::Value>) -> anyhow::Result<super::RunOutput>
            + Send
            + Sync
            + 'static,
    {
        let spec = Arc::new(spec);
        self.executors.insert(
            spec.node_type.clone(),
            NodeExecutor::new(spec.clone(), Arc::new(run)),
        );
        self.specs.insert(spec.node_type.clone(), spec);
    }

    /// Register a container-only type (spec without executor).
    pub fn register_spec_only(&mut self, spec: NodeSpec) {
        self.specs.insert(spec.node_type.clone(), Arc::new(spec));
    }

    /// Record that `node_type` belongs to an inactive plugin.
    pub fn mark_inactive_type(
        &mut self,
        node_type: impl Into<String>,
        plugin_id: impl Into<String>,
    ) {
        self.inactive_types
            .insert(node_type.into(), plugin_id.into());
    }

    pub fn spec(&self, node_type: &str) -> Option<&Arc<NodeSpec>> {
        self.specs.get(node_type)
    }

    pub fn executor(&self, node_type: &str) -> Option<&NodeExecutor> {
        self.executors.get(node_type)
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.specs.contains_key(node_type)
    }

    /// The owning inactive plugin, if `node_type` is known but unloaded.
    pub fn inactive_owner(&self, node_type: &str) -> Option<&str> {
        self.inactive_types.get(node_type).map(String::as_str)
    }

    pub fn node_types(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Node Registry
// ═══════════════════════════════════════════════════════════════════════════════

/// Central registry that manages all plugins and their node types.
///
/// Thread-safe via interior `RwLock`; every public operation observes or
/// produces a consistent state, and `snapshot()` never sees a transition
/// half-applied.
#[derive(Debug, Clone)]
pub struct NodeRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

#[derive(Debug)]
struct RegistryInner {
    /// Root of the two-tier plugin tree.
    root: PathBuf,
    /// Path of `plugins_state.json`.
    state_path: PathBuf,
    /// Compiled-in implementations resolvable by symbol.
    table: ExecutorTable,
    /// Map of plugin id -> record.
    plugins: HashMap<String, PluginRecord>,
    /// Map of node type -> spec.
    specs: HashMap<String, Arc<NodeSpec>>,
    /// Map of node type -> wrapped executor.
    executors: HashMap<String, NodeExecutor>,
    /// Map of node type -> owning active plugin id.
    owners: HashMap<String, String>,
    /// The state file contents.
    states: PluginStates,
}

impl NodeRegistry {
    /// Create a registry rooted at `root`, resolving implementation
    /// symbols against `table`.
    pub fn new(root: impl Into<PathBuf>, table: ExecutorTable) -> Self {
        let root = root.into();
        let state_path = root.join(STATE_FILE_NAME);
        Self {
            inner: Arc::new(RwLock::new(RegistryInner {
                root,
                state_path,
                table,
                plugins: HashMap::new(),
                specs: HashMap::new(),
                executors: HashMap::new(),
                owners: HashMap::new(),
                states: PluginStates::default(),
            })),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Discovery
    // ─────────────────────────────────────────────────────────────────────────

    /// Scan the plugin tree and register any plugins not yet known.
    /// Returns the ids of newly discovered plugins.
    pub async fn discover(&self) -> Result<Vec<String>, RegistryError> {
        let mut inner = self.inner.write().await;
        inner.states = PluginStates::load(&inner.state_path).await;
        let discovered = inner.discover().await?;
        info!(count = discovered.len(), "Plugin discovery complete");
        Ok(discovered)
    }

    /// Drop every plugin-sourced entry and re-run discovery.
    pub async fn reload(&self) -> Result<Vec<String>, RegistryError> {
        let mut inner = self.inner.write().await;
        inner.plugins.clear();
        inner.specs.clear();
        inner.executors.clear();
        inner.owners.clear();
        inner.states = PluginStates::load(&inner.state_path).await;
        let discovered = inner.discover().await?;
        info!(count = discovered.len(), "Registry reloaded");
        Ok(discovered)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// An atomic snapshot of the current node-type maps.
    pub async fn snapshot(&self) -> RegistrySnapshot {
        let inner = self.inner.read().await;
        let mut inactive_types = HashMap::new();
        for record in inner.plugins.values() {
            if record.state == PluginState::Inactive {
                for node_type in &record.node_types {
                    inactive_types.insert(node_type.clone(), record.id.clone());
                }
            }
        }
        RegistrySnapshot {
            specs: inner.specs.clone(),
            executors: inner.executors.clone(),
            inactive_types,
        }
    }

    /// All known plugins, ordered by id.
    pub async fn list(&self) -> Vec<PluginRecord> {
        let inner = self.inner.read().await;
        let mut records: Vec<PluginRecord> = inner.plugins.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    pub async fn get(&self, plugin_id: &str) -> Result<PluginRecord, RegistryError> {
        let inner = self.inner.read().await;
        inner
            .plugins
            .get(plugin_id)
            .cloned()
            .ok_or_else(|| RegistryError::PluginNotFound(plugin_id.to_string()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Activate a plugin: clear its inactive marker, load its definitions,
    /// install its node types, and run `on_activate`.
    ///
    /// Idempotent on an already-active plugin.
    pub async fn activate(&self, plugin_id: &str) -> Result<PluginRecord, RegistryError> {
        let mut inner = self.inner.write().await;
        let record = inner
            .plugins
            .get(plugin_id)
            .ok_or_else(|| RegistryError::PluginNotFound(plugin_id.to_string()))?;

        if record.state == PluginState::Active {
            return Ok(record.clone());
        }

        inner.states.clear(plugin_id);
        let (states, state_path) = (inner.states.clone(), inner.state_path.clone());
        states.save(&state_path).await?;

        if let Err(e) = inner.install(plugin_id).await {
            let details = e.to_string();
            if let Some(record) = inner.plugins.get_mut(plugin_id) {
                record.state = PluginState::Error;
                record.error = Some(details.clone());
                record.updated_at = Utc::now();
            }
            return Err(RegistryError::Load {
                id: plugin_id.to_string(),
                details,
            });
        }

        inner.run_hook(plugin_id, Hook::Activate).await;
        info!(plugin = plugin_id, "Plugin activated");
        Ok(inner.plugins[plugin_id].clone())
    }

    /// Deactivate a plugin: persist the inactive marker, remove its node
    /// types from the maps, and run `on_deactivate`.
    ///
    /// Idempotent on an already-inactive plugin.
    pub async fn deactivate(&self, plugin_id: &str) -> Result<PluginRecord, RegistryError> {
        let mut inner = self.inner.write().await;
        let record = inner
            .plugins
            .get(plugin_id)
            .ok_or_else(|| RegistryError::PluginNotFound(plugin_id.to_string()))?;

        if record.state == PluginState::Inactive {
            return Ok(record.clone());
        }

        inner.states.set_inactive(plugin_id);
        let (states, state_path) = (inner.states.clone(), inner.state_path.clone());
        states.save(&state_path).await?;

        inner.uninstall_types(plugin_id);
        if let Some(record) = inner.plugins.get_mut(plugin_id) {
            record.state = PluginState::Inactive;
            record.error = None;
            record.updated_at = Utc::now();
        }

        inner.run_hook(plugin_id, Hook::Deactivate).await;
        info!(plugin = plugin_id, "Plugin deactivated");
        Ok(inner.plugins[plugin_id].clone())
    }

    /// Delete a plugin: run `on_uninstall`, remove its files, purge its
    /// state entry. Requires the plugin to be inactive.
    pub async fn delete(&self, plugin_id: &str) -> Result<PluginRecord, RegistryError> {
        let mut inner = self.inner.write().await;
        let record = inner
            .plugins
            .get(plugin_id)
            .ok_or_else(|| RegistryError::PluginNotFound(plugin_id.to_string()))?;

        if record.state != PluginState::Inactive {
            return Err(RegistryError::DeleteWhileActive(plugin_id.to_string()));
        }
        let path = record.path.clone();

        inner.run_hook(plugin_id, Hook::Uninstall).await;

        if path.is_dir() {
            tokio::fs::remove_dir_all(&path).await?;
        } else if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }

        inner.states.clear(plugin_id);
        let (states, state_path) = (inner.states.clone(), inner.state_path.clone());
        states.save(&state_path).await?;

        let removed = inner.plugins.remove(plugin_id).unwrap();
        info!(plugin = plugin_id, "Plugin deleted");
        Ok(removed)
    }

    /// Activate every plugin in a project. Returns the affected ids.
    pub async fn activate_project(&self, project: &str) -> Result<Vec<String>, RegistryError> {
        let ids = self.project_plugin_ids(project).await;
        for id in &ids {
            self.activate(id).await?;
        }
        Ok(ids)
    }

    /// Deactivate every plugin in a project. Returns the affected ids.
    pub async fn deactivate_project(&self, project: &str) -> Result<Vec<String>, RegistryError> {
        let ids = self.project_plugin_ids(project).await;
        for id in &ids {
            self.deactivate(id).await?;
        }
        Ok(ids)
    }

    async fn project_plugin_ids(&self, project: &str) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut ids: Vec<String> = inner
            .plugins
            .values()
            .filter(|r| r.project == project)
            .map(|r| r.id.clone())
            .collect();
        ids.sort();
        ids
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Inner Implementation
// ═══════════════════════════════════════════════════════════════════════════════

enum Hook {
    Activate,
    Deactivate,
    Uninstall,
}

impl RegistryInner {
    /// Scan the tree, registering plugins not yet known.
    async fn discover(&mut self) -> Result<Vec<String>, RegistryError> {
        if !self.root.exists() {
            info!(dir = %self.root.display(), "Plugin root does not exist, skipping discovery");
            return Ok(vec![]);
        }

        let mut discovered = Vec::new();
        for project_dir in sorted_dirs(&self.root).await? {
            let project = dir_name(&project_dir);
            let project_manifest = match ProjectManifest::load_from_dir(&project_dir) {
                Ok(m) => m,
                Err(e) => {
                    warn!(
                        project = %project,
                        error = %e,
                        "Skipping project with invalid manifest"
                    );
                    continue;
                }
            };

            let nodes_dir = project_dir.join("nodes");
            if !nodes_dir.is_dir() {
                continue;
            }

            for entry in sorted_entries(&nodes_dir).await? {
                let Some((name, definition_path)) = plugin_entry(&entry) else {
                    continue;
                };
                let id = format!("{project}/{name}");
                if self.plugins.contains_key(&id) {
                    continue; // already registered
                }

                let now = Utc::now();
                let mut record = PluginRecord {
                    id: id.clone(),
                    project: project.clone(),
                    name,
                    path: entry.clone(),
                    manifest: PluginManifest::default(),
                    state: PluginState::Active,
                    error: None,
                    node_types: Vec::new(),
                    discovered_at: now,
                    updated_at: now,
                    definition_path,
                    hooks_symbol: None,
                };

                match PluginDefinition::load(&record.definition_path)
                    .and_then(|def| def.validate().map(|()| def))
                {
                    Ok(def) => {
                        record.manifest = PluginManifest::merged(&project_manifest, &def);
                        record.node_types =
                            def.nodes.iter().map(|n| n.spec.node_type.clone()).collect();
                        record.hooks_symbol = def.hooks.clone();

                        if self.states.is_inactive(&id) {
                            // Definitions parsed for diagnostics only; the
                            // module is not loaded.
                            record.state = PluginState::Inactive;
                            self.plugins.insert(id.clone(), record);
                        } else {
                            self.plugins.insert(id.clone(), record);
                            if let Err(e) = self.install(&id).await {
                                warn!(plugin = %id, error = %e, "Plugin failed to load");
                                let record = self.plugins.get_mut(&id).unwrap();
                                record.state = PluginState::Error;
                                record.error = Some(e.to_string());
                            }
                        }
                    }
                    Err(e) => {
                        warn!(plugin = %id, error = %e, "Plugin definition failed to parse");
                        record.state = PluginState::Error;
                        record.error = Some(e.to_string());
                        self.plugins.insert(id.clone(), record);
                    }
                }

                discovered.push(id);
            }
        }

        Ok(discovered)
    }

    /// Load a plugin's definitions and install its node types.
    async fn install(&mut self, plugin_id: &str) -> Result<(), RegistryError> {
        let record = self
            .plugins
            .get(plugin_id)
            .ok_or_else(|| RegistryError::PluginNotFound(plugin_id.to_string()))?;
        let definition_path = record.definition_path.clone();
        let project_dir = record
            .path
            .parent()
            .and_then(Path::parent)
            .map(Path::to_path_buf);

        let def = PluginDefinition::load(&definition_path)?;
        def.validate()?;
        let project_manifest = match project_dir {
            Some(dir) => ProjectManifest::load_from_dir(&dir).unwrap_or_default(),
            None => ProjectManifest::default(),
        };

        // Resolve every symbol before touching the maps, so installation
        // is all-or-nothing for the plugin.
        let mut installs: Vec<(Arc<NodeSpec>, Option<NodeExecutor>)> = Vec::new();
        for node in &def.nodes {
            if let Some(owner) = self.owners.get(&node.spec.node_type) {
                if owner != plugin_id {
                    return Err(RegistryError::Load {
                        id: plugin_id.to_string(),
                        details: format!(
                            "node type '{}' is already registered by plugin '{}'",
                            node.spec.node_type, owner
                        ),
                    });
                }
            }
            let spec = Arc::new(node.spec.clone());
            let executor = match &node.run {
                Some(symbol) => {
                    let run = self.table.run_fn(symbol).ok_or_else(|| RegistryError::Load {
                        id: plugin_id.to_string(),
                        details: format!("unresolved run symbol '{symbol}'"),
                    })?;
                    Some(NodeExecutor::new(spec.clone(), run))
                }
                None => None,
            };
            installs.push((spec, executor));
        }

        if let Some(symbol) = &def.hooks {
            if self.table.hooks(symbol).is_none() {
                return Err(RegistryError::Load {
                    id: plugin_id.to_string(),
                    details: format!("unresolved hooks symbol '{symbol}'"),
                });
            }
        }

        for (spec, executor) in installs {
            let node_type = spec.node_type.clone();
            self.specs.insert(node_type.clone(), spec);
            if let Some(executor) = executor {
                self.executors.insert(node_type.clone(), executor);
            }
            self.owners.insert(node_type, plugin_id.to_string());
        }

        let record = self.plugins.get_mut(plugin_id).unwrap();
        record.manifest = PluginManifest::merged(&project_manifest, &def);
        record.node_types = def.nodes.iter().map(|n| n.spec.node_type.clone()).collect();
        record.hooks_symbol = def.hooks.clone();
        record.state = PluginState::Active;
        record.error = None;
        record.updated_at = Utc::now();
        Ok(())
    }

    /// Remove every node type owned by a plugin from the maps.
    fn uninstall_types(&mut self, plugin_id: &str) {
        let Some(record) = self.plugins.get(plugin_id) else {
            return;
        };
        for node_type in record.node_types.clone() {
            if self.owners.get(&node_type).map(String::as_str) == Some(plugin_id) {
                self.specs.remove(&node_type);
                self.executors.remove(&node_type);
                self.owners.remove(&node_type);
            }
        }
    }

    /// Run a lifecycle hook, logging and suppressing failures.
    async fn run_hook(&self, plugin_id: &str, hook: Hook) {
        let Some(record) = self.plugins.get(plugin_id) else {
            return;
        };
        let Some(symbol) = &record.hooks_symbol else {
            return;
        };
        let Some(hooks) = self.table.hooks(symbol) else {
            return;
        };

        let (name, result) = match hook {
            Hook::Activate => ("on_activate", hooks.on_activate().await),
            Hook::Deactivate => ("on_deactivate", hooks.on_deactivate().await),
            Hook::Uninstall => ("on_uninstall", hooks.on_uninstall().await),
        };
        if let Err(e) = result {
            warn!(plugin = plugin_id, hook = name, error = %e, "Plugin hook failed");
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Directory Helpers
// ═══════════════════════════════════════════════════════════════════════════════

/// Identify a plugin entry: a `.toml` file is a simple plugin; a directory
/// with a `plugin.toml` entry module is a complex one. Returns the plugin
/// name and the definition-file path.
fn plugin_entry(path: &Path) -> Option<(String, PathBuf)> {
    if path.is_file() {
        if path.extension().and_then(|e| e.to_str()) == Some("toml") {
            let name = path.file_stem()?.to_str()?.to_string();
            return Some((name, path.to_path_buf()));
        }
        return None;
    }
    let entry = path.join("plugin.toml");
    if entry.is_file() {
        return Some((dir_name(path), entry));
    }
    None
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}

async fn sorted_entries(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        if dir_name(&path).starts_with('.') {
            continue;
        }
        entries.push(path);
    }
    entries.sort();
    Ok(entries)
}

async fn sorted_dirs(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    Ok(sorted_entries(dir)
        .await?
        .into_iter()
        .filter(|p| p.is_dir())
        .collect())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
