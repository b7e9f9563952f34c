//! Integration tests for plugin discovery, lifecycle, and snapshots.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use canvasflow_core::dag::{execute, ExecutionOptions};
use canvasflow_core::plugins::{
    ExecutorTable, NodeRegistry, PluginHooks, PluginState, PluginStates, RunOutput,
};
use canvasflow_core::value::Value;
use canvasflow_core::workflow::{Workflow, WorkflowEdge, WorkflowNode};
use serde_json::json;
use tempfile::TempDir;

const SORTING_PROJECT_TOML: &str = r##"
version = "2.0.0"
description = "Sorting algorithms"
author = "canvasflow"

[category_colors]
sorting = "#3366ff"
"##;

const BUBBLE_TOML: &str = r#"
description = "One bubble-sort pass"
hooks = "sorting.hooks"

[[node]]
type = "sorting/bubble_pass"
label = "Bubble Pass"
category = "sorting"
run = "sorting.bubble_pass"

[[node.inputs]]
name = "items"
type = "ARRAY"
required = true

[[node.outputs]]
name = "items"
type = "ARRAY"

[[node.outputs]]
name = "swapped"
type = "NUMBER"
"#;

const MATH_RANGE_TOML: &str = r#"
[[node]]
type = "math/range"
label = "Range"
category = "math"
run = "std.range"

[[node.inputs]]
name = "count"
type = "NUMBER"
required = true

[[node.inputs]]
name = "start"
type = "NUMBER"

[[node.outputs]]
name = "out"
type = "ARRAY"
"#;

#[derive(Debug, Default)]
struct CountingHooks {
    activated: AtomicUsize,
    deactivated: AtomicUsize,
    uninstalled: AtomicUsize,
}

#[async_trait]
impl PluginHooks for CountingHooks {
    async fn on_activate(&self) -> anyhow::Result<()> {
        self.activated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_deactivate(&self) -> anyhow::Result<()> {
        self.deactivated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_uninstall(&self) -> anyhow::Result<()> {
        self.uninstalled.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("cleanup hiccup; must be suppressed")
    }
}

fn table_with_sorting(hooks: Arc<CountingHooks>) -> ExecutorTable {
    let mut table = ExecutorTable::with_builtins();
    table.register_run("sorting.bubble_pass", |_, mut args| {
        let mut items: Vec<f64> = args
            .remove(0)
            .as_array()
            .unwrap_or_default()
            .iter()
            .filter_map(Value::as_f64)
            .collect();
        let mut swapped = 0.0;
        for i in 1..items.len() {
            if items[i - 1] > items[i] {
                items.swap(i - 1, i);
                swapped += 1.0;
            }
        }
        Ok(RunOutput::Tuple(vec![
            Value::from_json(json!(items)),
            Value::number(swapped),
        ]))
    });
    table.register_hooks("sorting.hooks", hooks);
    table
}

fn write_tree(root: &Path) {
    let sorting_nodes = root.join("sorting").join("nodes");
    fs::create_dir_all(&sorting_nodes).unwrap();
    fs::write(root.join("sorting").join("project.toml"), SORTING_PROJECT_TOML).unwrap();
    fs::write(sorting_nodes.join("bubble.toml"), BUBBLE_TOML).unwrap();

    // math/range is a complex plugin (directory with entry module).
    let range_dir = root.join("math").join("nodes").join("range");
    fs::create_dir_all(&range_dir).unwrap();
    fs::write(range_dir.join("plugin.toml"), MATH_RANGE_TOML).unwrap();
}

#[tokio::test]
async fn test_two_tier_discovery_and_manifest_merge() {
    let tmp = TempDir::new().unwrap();
    write_tree(tmp.path());

    let registry = NodeRegistry::new(tmp.path(), table_with_sorting(Arc::default()));
    let discovered = registry.discover().await.unwrap();
    assert_eq!(discovered.len(), 2);

    let records = registry.list().await;
    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["math/range", "sorting/bubble"]);

    // Project defaults flow into the plugin manifest; the plugin's own
    // description overrides.
    let bubble = registry.get("sorting/bubble").await.unwrap();
    assert_eq!(bubble.manifest.version.as_deref(), Some("2.0.0"));
    assert_eq!(bubble.manifest.description.as_deref(), Some("One bubble-sort pass"));
    assert_eq!(bubble.manifest.category_colors["sorting"], "#3366ff");
    assert_eq!(bubble.node_types, vec!["sorting/bubble_pass"]);
}

#[tokio::test]
async fn test_snapshot_executes_discovered_nodes() {
    let tmp = TempDir::new().unwrap();
    write_tree(tmp.path());

    let registry = NodeRegistry::new(tmp.path(), table_with_sorting(Arc::default()));
    registry.discover().await.unwrap();
    let snapshot = registry.snapshot().await;

    let workflow = Workflow::new("sort-two")
        .with_node(WorkflowNode::new("r", "math/range").with_param("count", json!(4)))
        .with_node(WorkflowNode::new("s", "sorting/bubble_pass"))
        .with_edge(WorkflowEdge::new("e1", "r", "out", "s", "items"));

    let mut handle = execute(workflow, snapshot, ExecutionOptions::default());
    handle.collect_events().await;

    // 0..4 is already sorted: one pass, zero swaps.
    let outputs = handle.node_outputs("s").unwrap();
    assert_eq!(outputs["items"], Value::from_json(json!([0.0, 1.0, 2.0, 3.0])));
    assert_eq!(outputs["swapped"], Value::number(0.0));
}

#[tokio::test]
async fn test_running_execution_keeps_its_snapshot() {
    let tmp = TempDir::new().unwrap();
    write_tree(tmp.path());

    let registry = NodeRegistry::new(tmp.path(), table_with_sorting(Arc::default()));
    registry.discover().await.unwrap();
    let snapshot = registry.snapshot().await;

    // Deactivate after the snapshot was taken.
    registry.deactivate("sorting/bubble").await.unwrap();

    let workflow = Workflow::new("still-works")
        .with_node(WorkflowNode::new("r", "math/range").with_param("count", json!(2)))
        .with_node(WorkflowNode::new("s", "sorting/bubble_pass"))
        .with_edge(WorkflowEdge::new("e1", "r", "out", "s", "items"));

    let mut handle = execute(workflow, snapshot, ExecutionOptions::default());
    handle.collect_events().await;
    assert!(handle.summary().unwrap().success);

    // A fresh snapshot sees the deactivation and attributes the type.
    let fresh = registry.snapshot().await;
    assert!(!fresh.contains("sorting/bubble_pass"));
    assert_eq!(
        fresh.inactive_owner("sorting/bubble_pass"),
        Some("sorting/bubble")
    );
}

#[tokio::test]
async fn test_hooks_fire_and_failures_are_suppressed() {
    let tmp = TempDir::new().unwrap();
    write_tree(tmp.path());
    let hooks = Arc::new(CountingHooks::default());

    let registry = NodeRegistry::new(tmp.path(), table_with_sorting(hooks.clone()));
    registry.discover().await.unwrap();

    registry.deactivate("sorting/bubble").await.unwrap();
    assert_eq!(hooks.deactivated.load(Ordering::SeqCst), 1);

    registry.activate("sorting/bubble").await.unwrap();
    assert_eq!(hooks.activated.load(Ordering::SeqCst), 1);

    registry.deactivate("sorting/bubble").await.unwrap();

    // on_uninstall fails, but deletion still proceeds.
    let removed = registry.delete("sorting/bubble").await.unwrap();
    assert_eq!(hooks.uninstalled.load(Ordering::SeqCst), 1);
    assert_eq!(removed.state, PluginState::Inactive);
    assert!(registry.get("sorting/bubble").await.is_err());
}

#[tokio::test]
async fn test_state_file_round_trip_through_lifecycle() {
    let tmp = TempDir::new().unwrap();
    write_tree(tmp.path());
    let state_path = tmp.path().join("plugins_state.json");

    let registry = NodeRegistry::new(tmp.path(), table_with_sorting(Arc::default()));
    registry.discover().await.unwrap();
    registry.deactivate("sorting/bubble").await.unwrap();

    // A second registry (fresh process) honors the persisted state.
    let registry2 = NodeRegistry::new(tmp.path(), table_with_sorting(Arc::default()));
    registry2.discover().await.unwrap();
    let record = registry2.get("sorting/bubble").await.unwrap();
    assert_eq!(record.state, PluginState::Inactive);
    assert!(!registry2.snapshot().await.contains("sorting/bubble_pass"));

    // Reactivation clears the entry.
    registry2.activate("sorting/bubble").await.unwrap();
    let states = PluginStates::load(&state_path).await;
    assert!(!states.is_inactive("sorting/bubble"));
}

#[tokio::test]
async fn test_delete_removes_complex_plugin_directory() {
    let tmp = TempDir::new().unwrap();
    write_tree(tmp.path());

    let registry = NodeRegistry::new(tmp.path(), table_with_sorting(Arc::default()));
    registry.discover().await.unwrap();

    registry.deactivate("math/range").await.unwrap();
    registry.delete("math/range").await.unwrap();

    assert!(!tmp.path().join("math").join("nodes").join("range").exists());
}
