//! Render tree - topologically sorted, deduplicated nodes upstream of one output.
//!
//! Built by a depth-first traversal: every connected input (in slot order)
//! is visited before the node itself is appended, so each node appears once
//! and strictly after all of its transitive inputs.
//!
//! The tree is a disposable view. It is NOT kept in sync with graph edits;
//! callers `rebuild()` after a structural change and `refresh_render_inputs()`
//! between frames of one sequence.

use std::sync::Arc;

use indexmap::IndexMap;
use log::{debug, trace};

use crate::entities::node::{Node, NodeId, Status};
use crate::entities::output::RenderOutput;

pub struct RenderTree {
    output: RenderOutput,
    /// Inputs before outputs, keyed by identity
    sorted: IndexMap<NodeId, Arc<dyn Node>>,
    is_viewer: bool,
    is_plugin_hosted: bool,
    was_ever_built: bool,
}

impl std::fmt::Debug for RenderTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTree")
            .field("output", &self.output)
            .field("nodes", &self.node_names())
            .field("was_ever_built", &self.was_ever_built)
            .finish()
    }
}

impl RenderTree {
    pub fn new(output: RenderOutput) -> Self {
        Self {
            output,
            sorted: IndexMap::new(),
            is_viewer: false,
            is_plugin_hosted: false,
            was_ever_built: false,
        }
    }

    pub fn output(&self) -> &RenderOutput {
        &self.output
    }

    /// Cached at the last rebuild.
    pub fn is_output_a_viewer(&self) -> bool {
        self.is_viewer
    }

    /// Cached at the last rebuild.
    pub fn is_output_plugin_hosted(&self) -> bool {
        self.is_plugin_hosted
    }

    pub fn was_ever_built(&self) -> bool {
        self.was_ever_built
    }

    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    /// Nodes in render order (inputs first).
    pub fn nodes(&self) -> Vec<Arc<dyn Node>> {
        self.sorted.values().cloned().collect()
    }

    pub fn node_names(&self) -> Vec<String> {
        self.sorted.values().map(|n| n.name()).collect()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.sorted.contains_key(&id)
    }

    /// Tear down and rebuild from the output's current inputs.
    pub fn rebuild(&mut self) {
        self.is_viewer = self.output.is_viewer();
        self.is_plugin_hosted = self.output.node().is_plugin_hosted();

        self.clear();
        let root = Arc::clone(self.output.node());
        self.fill(&root);
        self.was_ever_built = true;

        debug!(
            "Render tree for {} rebuilt: [{}]",
            root.name(),
            self.node_names().join(" -> ")
        );
    }

    fn clear(&mut self) {
        for node in self.sorted.values() {
            node.clear_persistent_message();
        }
        self.sorted.clear();
    }

    fn fill(&mut self, node: &Arc<dyn Node>) {
        node.update_render_inputs();
        for input in node.render_inputs().iter().flatten() {
            self.fill(input);
        }
        let id = node.id();
        if !self.sorted.contains_key(&id) {
            trace!("Render tree: append {}", node.name());
            self.sorted.insert(id, Arc::clone(node));
        }
    }

    /// Re-snapshot inputs of the nodes already sorted, without re-sorting.
    pub fn refresh_render_inputs(&self) {
        for node in self.sorted.values() {
            node.update_render_inputs();
        }
    }

    /// Tell every node a bounded sequential pass starts. Stops at the first refusal.
    pub fn begin_sequential_render(&self, first: i32, last: i32, view: usize) -> Result<(), String> {
        for node in self.sorted.values() {
            if node.begin_sequence_render(first, last, view) == Status::Failed {
                return Err(node.name());
            }
        }
        Ok(())
    }

    /// Tell every node the bounded sequential pass ended. Stops at the first refusal.
    pub fn end_sequential_render(&self, first: i32, last: i32, view: usize) -> Result<(), String> {
        for node in self.sorted.values() {
            if node.end_sequence_render(first, last, view) == Status::Failed {
                return Err(node.name());
            }
        }
        Ok(())
    }

    pub fn set_nodes_knobs_frozen(&self, frozen: bool) {
        for node in self.sorted.values() {
            node.set_knobs_frozen(frozen);
        }
    }

    pub fn clear_persistent_messages(&self) {
        for node in self.sorted.values() {
            node.clear_persistent_message();
        }
    }
}
