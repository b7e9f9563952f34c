//! Workflow Executor - runs a workflow against a registry snapshot.
//!
//! The executor is responsible for:
//! - Scheduling nodes in topological order over the non-feedback subgraph
//! - Routing edge values from outputs to inputs, stacking multi-fan-in
//! - Applying muted / unavailable / breakpoint semantics
//! - Driving the three loop constructs
//! - Emitting the execution event stream
//!
//! A single execution is single-threaded cooperative: exactly one node is
//! active at any instant, and control transfers only at node boundaries.
//! The event channel is bounded, so a stalled consumer backpressures the
//! run at emission points.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::event::{ExecErrorKind, ExecutionEvent, UnavailableReason};
use super::{is_feedback_edge, GraphError, WorkflowGraph};
use crate::plugins::{NodeSpec, RegistrySnapshot, RunContext};
use crate::value::{summarize_outputs, NodeOutputs, PortValues, Value};
use crate::workflow::{
    is_loop_type, Workflow, WorkflowNode, LOOP_END, LOOP_GROUP, LOOP_NODE, LOOP_START,
};

/// Status of a node within one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Not yet reached.
    Pending,
    /// Currently executing.
    Running,
    /// Finished and its outputs are final.
    Completed,
    /// Its executor raised, or its type was unavailable.
    Errored,
    /// Muted: invocation skipped, inputs passed through.
    Skipped,
    /// Never ran because an upstream error halted the run.
    Blocked,
    /// Paused at a breakpoint, waiting for resume.
    Breakpoint,
}

/// Options for a single execution.
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Node ids to pause at before invocation.
    pub breakpoints: HashSet<String>,
    /// Cancellation signal, polled at every node boundary. A fresh token
    /// is created by default; pass one in to cancel from outside.
    pub cancel: CancellationToken,
    /// Deadline after which the cancellation signal fires.
    pub timeout: Option<Duration>,
    /// Iteration count for loop constructs that configure none.
    pub default_iterations: u32,
    /// Bound of the event channel; the producer blocks when full.
    pub event_buffer_size: usize,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            breakpoints: HashSet::new(),
            cancel: CancellationToken::new(),
            timeout: None,
            default_iterations: 10,
            event_buffer_size: 256,
        }
    }
}

impl ExecutionOptions {
    pub fn with_breakpoint(mut self, node_id: impl Into<String>) -> Self {
        self.breakpoints.insert(node_id.into());
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Final tally of one execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionSummary {
    pub total: usize,
    pub completed: usize,
    pub errored: usize,
    pub skipped: usize,
    pub blocked: usize,
    pub pending: usize,
    pub total_ms: u64,
    pub success: bool,
}

/// State shared between the running worker and the handle.
#[derive(Debug, Default)]
struct Shared {
    outputs: parking_lot::RwLock<NodeOutputs>,
    statuses: parking_lot::RwLock<BTreeMap<String, NodeStatus>>,
    summary: parking_lot::RwLock<Option<ExecutionSummary>>,
}

// =============================================================================
// Handle
// =============================================================================

/// A running (or finished) execution.
///
/// Events arrive lazily through [`next_event`](Self::next_event); the
/// results map fills in as nodes complete and is final once the stream
/// ends. Partial results survive cancellation and errors.
#[derive(Debug)]
pub struct ExecutionHandle {
    id: Uuid,
    events: mpsc::Receiver<ExecutionEvent>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    resume_tx: mpsc::UnboundedSender<String>,
}

impl ExecutionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next event, or `None` once the execution has finished.
    pub async fn next_event(&mut self) -> Option<ExecutionEvent> {
        self.events.recv().await
    }

    /// Drain the stream to completion, collecting every remaining event.
    pub async fn collect_events(&mut self) -> Vec<ExecutionEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        events
    }

    /// The event stream as a `Stream`, giving up breakpoint/cancel control.
    pub fn into_stream(self) -> ReceiverStream<ExecutionEvent> {
        ReceiverStream::new(self.events)
    }

    /// Request cancellation. Level-triggered: the executor stops at the
    /// next node boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Resume a node waiting at a breakpoint.
    pub fn resume(&self, node_id: impl Into<String>) {
        let _ = self.resume_tx.send(node_id.into());
    }

    /// Snapshot of all outputs produced so far.
    pub fn results(&self) -> NodeOutputs {
        self.shared.outputs.read().clone()
    }

    pub fn node_outputs(&self, node_id: &str) -> Option<PortValues> {
        self.shared.outputs.read().get(node_id).cloned()
    }

    pub fn status(&self, node_id: &str) -> Option<NodeStatus> {
        self.shared.statuses.read().get(node_id).copied()
    }

    pub fn statuses(&self) -> BTreeMap<String, NodeStatus> {
        self.shared.statuses.read().clone()
    }

    /// The final tally, present once the stream has ended.
    pub fn summary(&self) -> Option<ExecutionSummary> {
        self.shared.summary.read().clone()
    }
}

// =============================================================================
// Executor
// =============================================================================

/// Runs a workflow against a registry snapshot.
pub struct WorkflowExecutor {
    workflow: Arc<Workflow>,
    snapshot: Arc<RegistrySnapshot>,
    options: ExecutionOptions,
}

impl WorkflowExecutor {
    pub fn new(workflow: Workflow, snapshot: RegistrySnapshot) -> Self {
        Self {
            workflow: Arc::new(workflow),
            snapshot: Arc::new(snapshot),
            options: ExecutionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    /// Start the execution on a background task and return its handle.
    pub fn spawn(self) -> ExecutionHandle {
        let (events_tx, events_rx) = mpsc::channel(self.options.event_buffer_size.max(1));
        let (resume_tx, resume_rx) = mpsc::unbounded_channel();
        let cancel = self.options.cancel.clone();
        let shared = Arc::new(Shared::default());
        let id = Uuid::new_v4();

        if let Some(timeout) = self.options.timeout {
            let deadline_token = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = deadline_token.cancelled() => {}
                    _ = tokio::time::sleep(timeout) => deadline_token.cancel(),
                }
            });
        }

        let workflow = self.workflow.clone();
        let snapshot = self.snapshot.clone();
        let options = self.options;
        let worker_shared = shared.clone();
        let worker_cancel = cancel.clone();

        tokio::spawn(async move {
            let graph = match WorkflowGraph::build(&workflow) {
                Ok(graph) => graph,
                Err(GraphError::Cycle { node_id }) => {
                    // Fatal before any node starts: the validator missed a
                    // top-level cycle.
                    let _ = events_tx
                        .send(ExecutionEvent::start(workflow.nodes.len()))
                        .await;
                    let _ = events_tx
                        .send(ExecutionEvent::node_error(
                            node_id.clone(),
                            format!("workflow contains a cycle involving node '{node_id}'"),
                            String::new(),
                            ExecErrorKind::Cycle,
                            None,
                        ))
                        .await;
                    return;
                }
            };

            let mut worker = Worker::new(
                workflow,
                snapshot,
                options,
                graph,
                worker_shared,
                events_tx,
                worker_cancel,
                resume_rx,
            );
            worker.run(id).await;
        });

        ExecutionHandle {
            id,
            events: events_rx,
            shared,
            cancel,
            resume_tx,
        }
    }
}

/// Convenience form: `execute(workflow, snapshot, options)`.
pub fn execute(
    workflow: Workflow,
    snapshot: RegistrySnapshot,
    options: ExecutionOptions,
) -> ExecutionHandle {
    WorkflowExecutor::new(workflow, snapshot)
        .with_options(options)
        .spawn()
}

// =============================================================================
// Worker
// =============================================================================

/// Control flow after a node: keep scheduling or halt the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Halt,
}

/// How the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Finish {
    Running,
    Complete,
    Error,
    Cancelled,
    /// The consumer dropped the handle; stop quietly.
    Abandoned,
}

pub(crate) struct Worker {
    pub(crate) workflow: Arc<Workflow>,
    pub(crate) snapshot: Arc<RegistrySnapshot>,
    pub(crate) options: ExecutionOptions,
    pub(crate) graph: WorkflowGraph,
    shared: Arc<Shared>,
    events: mpsc::Sender<ExecutionEvent>,
    cancel: CancellationToken,
    resume: mpsc::UnboundedReceiver<String>,

    /// Non-feedback edge indices by target node, in insertion order.
    pub(crate) edges_in: HashMap<String, Vec<usize>>,
    /// Non-feedback edge indices by source node, in insertion order.
    pub(crate) edges_out: HashMap<String, Vec<usize>>,
    /// Feedback edge indices (back-edges and loop-group write-backs) by target.
    pub(crate) feedback_in: HashMap<String, Vec<usize>>,
    /// loop_start id -> loop_end id, from `params.pair_id`.
    pub(crate) loop_pairs: HashMap<String, String>,
    /// Nodes driven by a loop driver; skipped by outer scheduling.
    pub(crate) claimed: HashSet<String>,
    /// Iteration index of the innermost loop currently driving.
    pub(crate) loop_index: Option<u32>,
    pub(crate) finish: Finish,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    fn new(
        workflow: Arc<Workflow>,
        snapshot: Arc<RegistrySnapshot>,
        options: ExecutionOptions,
        graph: WorkflowGraph,
        shared: Arc<Shared>,
        events: mpsc::Sender<ExecutionEvent>,
        cancel: CancellationToken,
        resume: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        let mut edges_in: HashMap<String, Vec<usize>> = HashMap::new();
        let mut edges_out: HashMap<String, Vec<usize>> = HashMap::new();
        let mut feedback_in: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, edge) in workflow.edges.iter().enumerate() {
            if is_feedback_edge(&workflow, edge) {
                feedback_in.entry(edge.target.clone()).or_default().push(idx);
            } else {
                edges_in.entry(edge.target.clone()).or_default().push(idx);
                edges_out.entry(edge.source.clone()).or_default().push(idx);
            }
        }

        let loop_pairs = workflow
            .nodes
            .iter()
            .filter(|n| n.node_type == LOOP_END)
            .filter_map(|end| {
                let start = end.param("pair_id")?.as_str()?;
                Some((start.to_string(), end.id.clone()))
            })
            .collect();

        Self {
            workflow,
            snapshot,
            options,
            graph,
            shared,
            events,
            cancel,
            resume,
            edges_in,
            edges_out,
            feedback_in,
            loop_pairs,
            claimed: HashSet::new(),
            loop_index: None,
            finish: Finish::Running,
        }
    }

    async fn run(&mut self, execution_id: Uuid) {
        let started = Instant::now();
        {
            let mut statuses = self.shared.statuses.write();
            for node in &self.workflow.nodes {
                statuses.insert(node.id.clone(), NodeStatus::Pending);
            }
        }

        tracing::info!(
            execution_id = %execution_id,
            workflow = %self.workflow.name,
            nodes = self.workflow.nodes.len(),
            "Starting workflow execution"
        );

        if !self.emit(ExecutionEvent::start(self.workflow.nodes.len())).await {
            return;
        }

        let order: Vec<String> = self.graph.top_level().to_vec();
        for node_id in order {
            if self.claimed.contains(&node_id) {
                continue;
            }
            if self.run_node(&node_id).await == Flow::Halt {
                break;
            }
        }

        let total_ms = started.elapsed().as_millis() as u64;
        match self.finish {
            Finish::Running => {
                self.finish = Finish::Complete;
                let _ = self.emit(ExecutionEvent::complete(total_ms)).await;
            }
            Finish::Error => self.mark_unreached_blocked(),
            _ => {}
        }

        self.store_summary(total_ms);

        tracing::info!(
            execution_id = %execution_id,
            total_ms,
            outcome = ?self.finish,
            "Workflow execution finished"
        );
    }

    // -------------------------------------------------------------------------
    // Node dispatch
    // -------------------------------------------------------------------------

    /// Run one node (or the loop construct it anchors). Boxed because the
    /// loop drivers recurse back into node scheduling.
    pub(crate) fn run_node<'a>(&'a mut self, node_id: &'a str) -> BoxFuture<'a, Flow> {
        Box::pin(async move {
            // Cancellation checkpoint: every node boundary.
            if self.cancel.is_cancelled() {
                return self.halt_cancelled().await;
            }

            let Some(node) = self.workflow.node(node_id).cloned() else {
                return Flow::Continue;
            };

            if node.muted {
                return self.run_muted(&node).await;
            }

            match node.node_type.as_str() {
                LOOP_GROUP => self.run_loop_group(&node).await,
                LOOP_START => self.run_paired_loop(&node).await,
                LOOP_NODE => self.run_back_edge_loop(&node).await,
                LOOP_END => {
                    // Reached only when no loop_start claimed it.
                    self.fail_node(
                        &node.id,
                        format!("loop_end '{}' has no paired loop_start", node.id),
                        String::new(),
                        ExecErrorKind::Runtime,
                        None,
                    )
                    .await
                }
                _ => self.run_plugin_node(&node).await,
            }
        })
    }

    /// Standard node: availability, breakpoint, invoke.
    async fn run_plugin_node(&mut self, node: &WorkflowNode) -> Flow {
        let node_type = node.node_type.as_str();
        let Some(executor) = self.snapshot.executor(node_type).cloned() else {
            if self.snapshot.contains(node_type) {
                // A container-only spec reached the scheduler.
                return self
                    .fail_node(
                        &node.id,
                        format!("node type '{node_type}' has no executor"),
                        String::new(),
                        ExecErrorKind::Runtime,
                        None,
                    )
                    .await;
            }
            let (reason, message) = match self.snapshot.inactive_owner(node_type) {
                Some(owner) => (
                    UnavailableReason::Inactive,
                    format!("node type '{node_type}' belongs to inactive plugin '{owner}'"),
                ),
                None => (
                    UnavailableReason::Unknown,
                    format!("unknown node type '{node_type}'"),
                ),
            };
            return self
                .fail_node(
                    &node.id,
                    message,
                    String::new(),
                    ExecErrorKind::Unavailable,
                    Some(reason),
                )
                .await;
        };

        if !self.maybe_breakpoint(&node.id).await {
            return Flow::Halt;
        }

        let edge_inputs = self.gather_inputs(&node.id);
        self.set_status(&node.id, NodeStatus::Running);
        if !self
            .emit(ExecutionEvent::node_start(
                &node.id,
                node_type,
                self.loop_index,
            ))
            .await
        {
            return Flow::Halt;
        }

        let started = Instant::now();
        let mut ctx = RunContext::new(&node.id);
        let result = catch_unwind(AssertUnwindSafe(|| {
            executor.execute(&mut ctx, &node.params, &edge_inputs)
        }));
        let duration_ms = started.elapsed().as_millis() as u64;

        for (level, message) in ctx.take_logs() {
            if !self
                .emit(ExecutionEvent::log(Some(node.id.clone()), level, message))
                .await
            {
                return Flow::Halt;
            }
        }

        match result {
            Ok(Ok(outputs)) => {
                let summary = summarize_outputs(&outputs);
                self.store_outputs(&node.id, outputs);
                self.set_status(&node.id, NodeStatus::Completed);
                if !self
                    .emit(ExecutionEvent::node_complete(
                        &node.id,
                        summary,
                        duration_ms,
                        self.loop_index,
                    ))
                    .await
                {
                    return Flow::Halt;
                }
                Flow::Continue
            }
            Ok(Err(err)) => {
                self.fail_node(
                    &node.id,
                    err.to_string(),
                    err.trace(),
                    ExecErrorKind::Runtime,
                    None,
                )
                .await
            }
            Err(panic) => {
                let message = panic_message(panic);
                self.fail_node(
                    &node.id,
                    message.clone(),
                    message,
                    ExecErrorKind::Runtime,
                    None,
                )
                .await
            }
        }
    }

    /// Muted node: pass inputs through to same-named outputs without
    /// invoking anything. A muted loop_group performs zero iterations.
    async fn run_muted(&mut self, node: &WorkflowNode) -> Flow {
        let edge_inputs = self.gather_inputs(&node.id);
        let spec = self.snapshot.spec(&node.node_type).cloned();
        let merged = self.merged_inputs(node, spec.as_deref(), edge_inputs);

        let outputs: PortValues = match &spec {
            Some(spec) => spec
                .ports_out
                .iter()
                .filter_map(|port| merged.get(&port.name).map(|v| (port.name.clone(), v.clone())))
                .collect(),
            // Loop constructs and unknown types mirror their input names;
            // `iterations` is a control input, not state.
            None => {
                let mut outputs = merged;
                if is_loop_type(&node.node_type) {
                    outputs.remove("iterations");
                }
                outputs
            }
        };

        if !self
            .emit(ExecutionEvent::node_start(
                &node.id,
                &node.node_type,
                self.loop_index,
            ))
            .await
        {
            return Flow::Halt;
        }
        let summary = summarize_outputs(&outputs);
        self.store_outputs(&node.id, outputs);
        self.set_status(&node.id, NodeStatus::Skipped);
        if !self
            .emit(ExecutionEvent::node_complete(
                &node.id,
                summary,
                0,
                self.loop_index,
            ))
            .await
        {
            return Flow::Halt;
        }
        Flow::Continue
    }

    // -------------------------------------------------------------------------
    // Inputs
    // -------------------------------------------------------------------------

    /// Collect edge-borne inputs for a node: every incoming non-feedback
    /// source value, stacked in edge insertion order when a port is fed by
    /// more than one edge, unwrapped when fed by exactly one.
    pub(crate) fn gather_inputs(&self, node_id: &str) -> PortValues {
        let mut per_port: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        if let Some(edge_indices) = self.edges_in.get(node_id) {
            let outputs = self.shared.outputs.read();
            for &idx in edge_indices {
                let edge = &self.workflow.edges[idx];
                let Some(value) = outputs
                    .get(&edge.source)
                    .and_then(|ports| ports.get(&edge.source_port))
                else {
                    continue;
                };
                per_port
                    .entry(edge.target_port.clone())
                    .or_default()
                    .push(value.clone());
            }
        }

        per_port
            .into_iter()
            .map(|(port, mut values)| {
                let value = if values.len() == 1 {
                    values.remove(0)
                } else {
                    Value::Stack(values)
                };
                (port, value)
            })
            .collect()
    }

    /// Layer params and port defaults under edge inputs: edge > param >
    /// default. Without a spec (loop constructs), every non-null param not
    /// already fed by an edge is included.
    pub(crate) fn merged_inputs(
        &self,
        node: &WorkflowNode,
        spec: Option<&NodeSpec>,
        edge_inputs: PortValues,
    ) -> PortValues {
        let mut merged = edge_inputs;
        match spec {
            Some(spec) => {
                for port in &spec.ports_in {
                    if merged.contains_key(&port.name) {
                        continue;
                    }
                    if let Some(param) = node.param(&port.name) {
                        merged.insert(port.name.clone(), Value::from_json(param.clone()));
                    } else if let Some(default) = &port.default {
                        merged.insert(port.name.clone(), Value::from_json(default.clone()));
                    }
                }
            }
            None => {
                for (name, param) in &node.params {
                    if !merged.contains_key(name) && !param.is_null() {
                        merged.insert(name.clone(), Value::from_json(param.clone()));
                    }
                }
            }
        }
        merged
    }

    /// Iteration count for a loop construct: connected edge beats params
    /// beats the configured default.
    pub(crate) fn resolve_iterations(&self, merged: &PortValues) -> u32 {
        merged
            .get("iterations")
            .and_then(Value::as_f64)
            .map(|n| n.max(0.0) as u32)
            .unwrap_or(self.options.default_iterations)
    }

    // -------------------------------------------------------------------------
    // Breakpoints & cancellation
    // -------------------------------------------------------------------------

    /// Pause at a breakpoint if one is set for this node. Returns false if
    /// the run was cancelled (or abandoned) while waiting.
    pub(crate) async fn maybe_breakpoint(&mut self, node_id: &str) -> bool {
        if !self.options.breakpoints.contains(node_id) {
            return true;
        }

        self.set_status(node_id, NodeStatus::Breakpoint);
        if !self.emit(ExecutionEvent::node_breakpoint(node_id)).await {
            return false;
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.halt_cancelled().await;
                    return false;
                }
                resumed = self.resume.recv() => match resumed {
                    Some(id) if id == node_id => return true,
                    Some(_) => continue,
                    None => {
                        // No resume channel wired: block until cancellation.
                        self.cancel.cancelled().await;
                        self.halt_cancelled().await;
                        return false;
                    }
                }
            }
        }
    }

    /// Emit `cancelled` (once) and halt.
    pub(crate) async fn halt_cancelled(&mut self) -> Flow {
        if self.finish == Finish::Running {
            self.finish = Finish::Cancelled;
            let _ = self.emit(ExecutionEvent::cancelled()).await;
        }
        Flow::Halt
    }

    // -------------------------------------------------------------------------
    // Bookkeeping
    // -------------------------------------------------------------------------

    /// Emit an event; returns false when the consumer is gone.
    pub(crate) async fn emit(&mut self, event: ExecutionEvent) -> bool {
        if self.events.send(event).await.is_err() {
            if self.finish == Finish::Running {
                self.finish = Finish::Abandoned;
            }
            return false;
        }
        true
    }

    pub(crate) async fn fail_node(
        &mut self,
        node_id: &str,
        error: String,
        stack_trace: String,
        kind: ExecErrorKind,
        reason: Option<UnavailableReason>,
    ) -> Flow {
        tracing::warn!(node_id, error = %error, ?kind, "Node failed");
        self.set_status(node_id, NodeStatus::Errored);
        self.finish = Finish::Error;
        let _ = self
            .emit(ExecutionEvent::node_error(
                node_id,
                error,
                stack_trace,
                kind,
                reason,
            ))
            .await;
        Flow::Halt
    }

    pub(crate) fn cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// One stored output value, cloned out of the shared map.
    pub(crate) fn output_value(&self, node_id: &str, port: &str) -> Option<Value> {
        self.shared
            .outputs
            .read()
            .get(node_id)
            .and_then(|ports| ports.get(port))
            .cloned()
    }

    pub(crate) fn node_outputs(&self, node_id: &str) -> Option<PortValues> {
        self.shared.outputs.read().get(node_id).cloned()
    }

    pub(crate) fn store_outputs(&self, node_id: &str, outputs: PortValues) {
        self.shared
            .outputs
            .write()
            .insert(node_id.to_string(), outputs);
    }

    pub(crate) fn set_status(&self, node_id: &str, status: NodeStatus) {
        self.shared
            .statuses
            .write()
            .insert(node_id.to_string(), status);
    }

    fn mark_unreached_blocked(&self) {
        let mut statuses = self.shared.statuses.write();
        for status in statuses.values_mut() {
            if *status == NodeStatus::Pending {
                *status = NodeStatus::Blocked;
            }
        }
    }

    fn store_summary(&self, total_ms: u64) {
        let statuses = self.shared.statuses.read();
        let mut summary = ExecutionSummary {
            total: statuses.len(),
            total_ms,
            success: self.finish == Finish::Complete,
            ..Default::default()
        };
        for status in statuses.values() {
            match status {
                NodeStatus::Completed => summary.completed += 1,
                NodeStatus::Errored => summary.errored += 1,
                NodeStatus::Skipped => summary.skipped += 1,
                NodeStatus::Blocked => summary.blocked += 1,
                _ => summary.pending += 1,
            }
        }
        drop(statuses);
        *self.shared.summary.write() = Some(summary);
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("plugin panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("plugin panicked: {message}")
    } else {
        "plugin panicked".to_string()
    }
}
