//! The process-wide plugin state file.
//!
//! `plugins_state.json` records only non-default states: a plugin id maps
//! to the literal string `"inactive"`. An absent entry means the plugin is
//! active. The file is rewritten atomically (write to a temp sibling, then
//! rename) so readers never observe a torn state.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default file name, resolved relative to the plugin root.
pub const STATE_FILE_NAME: &str = "plugins_state.json";

/// Non-default states a plugin can be stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoredState {
    Inactive,
}

/// In-memory view of the state file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginStates {
    entries: BTreeMap<String, StoredState>,
}

impl PluginStates {
    /// Load the state file. A missing file is empty; a corrupt file is
    /// logged and treated as empty.
    pub async fn load(path: &Path) -> Self {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(_) => return Self::default(),
        };

        match serde_json::from_str(&content) {
            Ok(states) => states,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Corrupt plugin state file, treating as empty"
                );
                Self::default()
            }
        }
    }

    /// Persist the state file atomically (write-then-rename).
    pub async fn save(&self, path: &Path) -> std::io::Result<()> {
        let content = serde_json::to_string_pretty(&self)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, path).await
    }

    pub fn is_inactive(&self, plugin_id: &str) -> bool {
        matches!(self.entries.get(plugin_id), Some(StoredState::Inactive))
    }

    pub fn set_inactive(&mut self, plugin_id: impl Into<String>) {
        self.entries.insert(plugin_id.into(), StoredState::Inactive);
    }

    /// Remove any stored state, returning the plugin to the default
    /// (active) interpretation.
    pub fn clear(&mut self, plugin_id: &str) {
        self.entries.remove(plugin_id);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let states = PluginStates::load(&tmp.path().join(STATE_FILE_NAME)).await;
        assert!(states.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join(STATE_FILE_NAME);
        tokio::fs::write(&path, "{not json").await.unwrap();
        let states = PluginStates::load(&path).await;
        assert!(states.is_empty());
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join(STATE_FILE_NAME);

        let mut states = PluginStates::default();
        states.set_inactive("sorting/bubble");
        states.save(&path).await.unwrap();

        let reloaded = PluginStates::load(&path).await;
        assert!(reloaded.is_inactive("sorting/bubble"));
        assert!(!reloaded.is_inactive("sorting/other"));

        // The wire format is the literal mapping the front-end reads.
        let raw: serde_json::Value =
            serde_json::from_str(&tokio::fs::read_to_string(&path).await.unwrap()).unwrap();
        assert_eq!(raw["sorting/bubble"], "inactive");
    }

    #[tokio::test]
    async fn test_clear_returns_to_active() {
        let mut states = PluginStates::default();
        states.set_inactive("p/x");
        states.clear("p/x");
        assert!(!states.is_inactive("p/x"));
    }
}
