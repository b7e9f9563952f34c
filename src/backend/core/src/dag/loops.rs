//! The three loop constructs.
//!
//! Each driver owns one iteration semantics:
//!
//! - **Container** (`loop_group`): iterates the children referencing it via
//!   `parent_id`; state lives on the group's ports, write-back edges from
//!   children update it between iterations.
//! - **Paired** (`loop_start` / `loop_end`): iterates the subgraph between
//!   the pair; values arriving at `loop_end.in_k` feed the next iteration's
//!   `loop_start.out_k`.
//! - **Back-edge** (`loop_node`): iterates its downstream subgraph; values
//!   returning on `feedback_*` back-edges become the next `loop_*` outputs,
//!   and the final state is published on `done_*`.
//!
//! Drivers emit `node_start` / `node_complete` once around the whole loop;
//! body-node events carry the current `loop_index`.

use std::collections::HashSet;
use std::time::Instant;

use super::event::ExecutionEvent;
use super::executor::{Flow, NodeStatus, Worker};
use crate::value::{summarize_outputs, PortValues, Value};
use crate::workflow::{WorkflowNode, LOOP_END, LOOP_GROUP, LOOP_NODE, LOOP_START};

impl Worker {
    // -------------------------------------------------------------------------
    // (a) Container loop
    // -------------------------------------------------------------------------

    pub(crate) async fn run_loop_group(&mut self, node: &WorkflowNode) -> Flow {
        let group_id = node.id.clone();
        let outer_index = self.loop_index;

        if !self.maybe_breakpoint(&group_id).await {
            return Flow::Halt;
        }

        let edge_inputs = self.gather_inputs(&group_id);
        let merged = self.merged_inputs(node, None, edge_inputs);
        let iterations = self.resolve_iterations(&merged);

        // Inputs double as the initial state carried on the group's
        // output-named ports.
        let mut state: PortValues = merged;
        state.remove("iterations");

        let children: Vec<String> = self.graph.children_of(&group_id).to_vec();

        self.set_status(&group_id, NodeStatus::Running);
        if !self
            .emit(ExecutionEvent::node_start(&group_id, LOOP_GROUP, outer_index))
            .await
        {
            return Flow::Halt;
        }
        let started = Instant::now();

        for index in 0..iterations {
            if self.cancel_requested() {
                self.loop_index = outer_index;
                return self.halt_cancelled().await;
            }
            self.loop_index = Some(index);
            self.store_outputs(&group_id, state.clone());

            for child in &children {
                if self.run_node(child).await == Flow::Halt {
                    self.loop_index = outer_index;
                    return Flow::Halt;
                }
            }

            self.apply_feedback(&group_id, None, &mut state);
        }
        self.loop_index = outer_index;

        let summary = summarize_outputs(&state);
        self.store_outputs(&group_id, state);
        self.set_status(&group_id, NodeStatus::Completed);
        let duration_ms = started.elapsed().as_millis() as u64;
        if !self
            .emit(ExecutionEvent::node_complete(
                &group_id,
                summary,
                duration_ms,
                outer_index,
            ))
            .await
        {
            return Flow::Halt;
        }
        Flow::Continue
    }

    // -------------------------------------------------------------------------
    // (b) Paired loop
    // -------------------------------------------------------------------------

    pub(crate) async fn run_paired_loop(&mut self, node: &WorkflowNode) -> Flow {
        let start_id = node.id.clone();
        let outer_index = self.loop_index;

        let Some(end_id) = self.loop_pairs.get(&start_id).cloned() else {
            return self
                .fail_node(
                    &start_id,
                    format!("loop_start '{start_id}' has no paired loop_end"),
                    String::new(),
                    super::ExecErrorKind::Runtime,
                    None,
                )
                .await;
        };

        if !self.maybe_breakpoint(&start_id).await {
            return Flow::Halt;
        }

        // The iterated subgraph: reachable from the start without passing
        // through the end. Claim it so outer scheduling skips it.
        let body = self.reachable_body(&start_id, |edge_idx| {
            self.workflow.edges[edge_idx].target != end_id
        });
        self.claimed.extend(body.iter().cloned());
        self.claimed.insert(end_id.clone());

        let edge_inputs = self.gather_inputs(&start_id);
        let merged = self.merged_inputs(node, None, edge_inputs);
        let iterations = self.resolve_iterations(&merged);

        // Positional convention: in_k seeds out_k, loop_end.in_k feeds the
        // next iteration's out_k.
        let mut state: PortValues = merged
            .iter()
            .filter_map(|(port, value)| {
                port.strip_prefix("in_")
                    .map(|slot| (slot.to_string(), value.clone()))
            })
            .collect();

        self.set_status(&start_id, NodeStatus::Running);
        if !self
            .emit(ExecutionEvent::node_start(&start_id, LOOP_START, outer_index))
            .await
        {
            return Flow::Halt;
        }
        let started = Instant::now();

        for index in 0..iterations {
            if self.cancel_requested() {
                self.loop_index = outer_index;
                return self.halt_cancelled().await;
            }
            self.loop_index = Some(index);

            let outputs: PortValues = state
                .iter()
                .map(|(slot, value)| (format!("out_{slot}"), value.clone()))
                .collect();
            self.store_outputs(&start_id, outputs);

            for body_id in &body {
                if self.run_node(body_id).await == Flow::Halt {
                    self.loop_index = outer_index;
                    return Flow::Halt;
                }
            }

            // Values arriving at the end node feed back by slot index.
            for (port, value) in self.gather_inputs(&end_id) {
                if let Some(slot) = port.strip_prefix("in_") {
                    state.insert(slot.to_string(), value);
                }
            }
        }
        self.loop_index = outer_index;
        let duration_ms = started.elapsed().as_millis() as u64;

        let start_outputs = self.node_outputs(&start_id).unwrap_or_default();
        self.set_status(&start_id, NodeStatus::Completed);
        if !self
            .emit(ExecutionEvent::node_complete(
                &start_id,
                summarize_outputs(&start_outputs),
                duration_ms,
                outer_index,
            ))
            .await
        {
            return Flow::Halt;
        }

        // The end node publishes the final state and unblocks downstream.
        let end_outputs: PortValues = state
            .iter()
            .map(|(slot, value)| (format!("out_{slot}"), value.clone()))
            .collect();
        if !self
            .emit(ExecutionEvent::node_start(&end_id, LOOP_END, outer_index))
            .await
        {
            return Flow::Halt;
        }
        let summary = summarize_outputs(&end_outputs);
        self.store_outputs(&end_id, end_outputs);
        self.set_status(&end_id, NodeStatus::Completed);
        if !self
            .emit(ExecutionEvent::node_complete(&end_id, summary, 0, outer_index))
            .await
        {
            return Flow::Halt;
        }
        Flow::Continue
    }

    // -------------------------------------------------------------------------
    // (c) Back-edge loop
    // -------------------------------------------------------------------------

    pub(crate) async fn run_back_edge_loop(&mut self, node: &WorkflowNode) -> Flow {
        let loop_id = node.id.clone();
        let outer_index = self.loop_index;

        if !self.maybe_breakpoint(&loop_id).await {
            return Flow::Halt;
        }

        let edge_inputs = self.gather_inputs(&loop_id);
        let merged = self.merged_inputs(node, None, edge_inputs);
        let iterations = self.resolve_iterations(&merged);

        // State slots: one per init_* input, plus any feedback_* port a
        // back-edge targets.
        let mut state: PortValues = merged
            .iter()
            .filter_map(|(port, value)| {
                port.strip_prefix("init_")
                    .map(|slot| (slot.to_string(), value.clone()))
            })
            .collect();
        for &edge_idx in self.feedback_in.get(&loop_id).into_iter().flatten() {
            if let Some(slot) = self.workflow.edges[edge_idx]
                .target_port
                .strip_prefix("feedback_")
            {
                state.entry(slot.to_string()).or_insert(Value::Null);
            }
        }

        // The iterated subgraph hangs off the loop_* bank; consumers fed
        // only by done_* stay with the outer scheduler.
        let body = self.back_edge_body(&loop_id);
        self.claimed.extend(body.iter().cloned());

        self.set_status(&loop_id, NodeStatus::Running);
        if !self
            .emit(ExecutionEvent::node_start(&loop_id, LOOP_NODE, outer_index))
            .await
        {
            return Flow::Halt;
        }
        let started = Instant::now();

        for index in 0..iterations {
            if self.cancel_requested() {
                self.loop_index = outer_index;
                return self.halt_cancelled().await;
            }
            self.loop_index = Some(index);

            let outputs: PortValues = state
                .iter()
                .map(|(slot, value)| (format!("loop_{slot}"), value.clone()))
                .collect();
            self.store_outputs(&loop_id, outputs);

            for body_id in &body {
                if self.run_node(body_id).await == Flow::Halt {
                    self.loop_index = outer_index;
                    return Flow::Halt;
                }
            }

            self.apply_feedback(&loop_id, Some("feedback_"), &mut state);
        }
        self.loop_index = outer_index;

        // Final values move to the done_* bank; loop_* ceases producing.
        let done: PortValues = state
            .iter()
            .map(|(slot, value)| (format!("done_{slot}"), value.clone()))
            .collect();
        let summary = summarize_outputs(&done);
        self.store_outputs(&loop_id, done);
        self.set_status(&loop_id, NodeStatus::Completed);
        let duration_ms = started.elapsed().as_millis() as u64;
        if !self
            .emit(ExecutionEvent::node_complete(
                &loop_id,
                summary,
                duration_ms,
                outer_index,
            ))
            .await
        {
            return Flow::Halt;
        }
        Flow::Continue
    }

    // -------------------------------------------------------------------------
    // Shared helpers
    // -------------------------------------------------------------------------

    /// Fold values arriving on feedback edges into the state map. With a
    /// prefix, the target port must carry it and the slot is the suffix;
    /// without, the target port names the slot directly (loop-group
    /// write-backs).
    fn apply_feedback(&self, target_id: &str, prefix: Option<&str>, state: &mut PortValues) {
        let Some(edge_indices) = self.feedback_in.get(target_id) else {
            return;
        };
        for &idx in edge_indices {
            let edge = &self.workflow.edges[idx];
            let slot = match prefix {
                Some(prefix) => match edge.target_port.strip_prefix(prefix) {
                    Some(slot) => slot,
                    None => continue,
                },
                None => edge.target_port.as_str(),
            };
            if let Some(value) = self.output_value(&edge.source, &edge.source_port) {
                state.insert(slot.to_string(), value);
            }
        }
    }

    /// Nodes reachable from `from` over non-feedback edges, following only
    /// edges `admit` accepts, excluding `from` itself. Returned in
    /// top-level topological order.
    fn reachable_body<F>(&self, from: &str, admit: F) -> Vec<String>
    where
        F: Fn(usize) -> bool,
    {
        let mut members: HashSet<String> = HashSet::new();
        let mut frontier = vec![from.to_string()];
        while let Some(current) = frontier.pop() {
            for &edge_idx in self.edges_out.get(&current).into_iter().flatten() {
                if !admit(edge_idx) {
                    continue;
                }
                let target = &self.workflow.edges[edge_idx].target;
                if target != from && members.insert(target.clone()) {
                    frontier.push(target.clone());
                }
            }
        }

        self.graph
            .top_level()
            .iter()
            .filter(|id| members.contains(*id))
            .cloned()
            .collect()
    }

    /// The back-edge loop's body: reachable through edges leaving the
    /// `loop_*` bank.
    fn back_edge_body(&self, loop_id: &str) -> Vec<String> {
        let mut seeds: HashSet<String> = HashSet::new();
        for &edge_idx in self.edges_out.get(loop_id).into_iter().flatten() {
            let edge = &self.workflow.edges[edge_idx];
            if edge.source_port.starts_with("loop_") {
                seeds.insert(edge.target.clone());
            }
        }

        let mut members = seeds.clone();
        let mut frontier: Vec<String> = seeds.into_iter().collect();
        while let Some(current) = frontier.pop() {
            for &edge_idx in self.edges_out.get(&current).into_iter().flatten() {
                let target = &self.workflow.edges[edge_idx].target;
                if target != loop_id && members.insert(target.clone()) {
                    frontier.push(target.clone());
                }
            }
        }

        self.graph
            .top_level()
            .iter()
            .filter(|id| members.contains(*id))
            .cloned()
            .collect()
    }
}
