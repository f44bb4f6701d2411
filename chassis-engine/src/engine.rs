//
// Copyright (c) The chassis-agent Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::HashMap;

use crate::debug::Debug;
use crate::node::{ChangeResult, Node, NodeState};

/// A node plus its declared inputs, handed to [`Engine::new`].
pub struct NodeDescriptor<C> {
    pub name: &'static str,
    pub inputs: &'static [&'static str],
    pub node: Box<dyn Node<C>>,
}

struct Slot<C> {
    inputs: &'static [&'static str],
    node: Box<dyn Node<C>>,
    state: NodeState,
    visited: bool,
}

/// The incremental processing engine: a table-driven registry of nodes
/// wired up by name, traversed depth-first from a configured root on every
/// iteration.
pub struct Engine<C> {
    slots: Vec<Slot<C>>,
    index: HashMap<&'static str, usize>,
    root: usize,
    force_recompute: bool,
    aborted: bool,
}

impl<C> Engine<C> {
    /// Builds the engine from a flat list of node descriptors, resolving
    /// input edges by name. Panics if an input name is undeclared or the
    /// root is not among the registered nodes — both are startup-time
    /// programmer errors, not runtime conditions.
    pub fn new(root: &'static str, descriptors: Vec<NodeDescriptor<C>>) -> Self {
        let mut index = HashMap::with_capacity(descriptors.len());
        let mut slots = Vec::with_capacity(descriptors.len());
        for (i, descriptor) in descriptors.into_iter().enumerate() {
            index.insert(descriptor.name, i);
            slots.push(Slot {
                inputs: descriptor.inputs,
                node: descriptor.node,
                state: NodeState::Valid,
                visited: false,
            });
        }
        for slot in &slots {
            for input in slot.inputs {
                assert!(
                    index.contains_key(input),
                    "engine node declares undeclared input {input}"
                );
            }
        }
        let root_idx = *index
            .get(root)
            .unwrap_or_else(|| panic!("engine root {root} is not a registered node"));

        // First iteration always starts from a full recompute: there is no
        // prior tracked-data state to incrementally apply against.
        Engine {
            slots,
            index,
            root: root_idx,
            force_recompute: true,
            aborted: false,
        }
    }

    /// Forces a full recompute on the next iteration (SB/OF reconnection,
    /// transaction failure, or an explicit `recompute` command).
    pub fn request_recompute(&mut self) {
        self.force_recompute = true;
    }

    pub fn force_recompute_pending(&self) -> bool {
        self.force_recompute
    }

    /// Runs one engine iteration to completion and returns the root node's
    /// resulting state.
    pub fn run_iteration(&mut self, ctx: &mut C) -> NodeState {
        let force = self.force_recompute;
        Debug::IterationStart {
            force_recompute: force,
        }
        .log();
        self.force_recompute = false;
        self.aborted = false;
        for slot in &mut self.slots {
            slot.visited = false;
        }

        let root = self.root;
        let state = self.run_node(root, force, ctx);

        for slot in &mut self.slots {
            slot.node.clear_tracked_data();
        }
        if self.aborted {
            Debug::IterationAborted.log();
            self.force_recompute = true;
        }
        state
    }

    fn run_node(&mut self, idx: usize, force: bool, ctx: &mut C) -> NodeState {
        if self.slots[idx].visited {
            return self.slots[idx].state;
        }
        self.slots[idx].visited = true;

        let inputs = self.slots[idx].inputs;
        // Leaf nodes have no producer to signal a change, so they always
        // recompute: it is their own `run` that decides, from the tracked
        // rows pulled this iteration, whether anything actually changed.
        let mut needs_recompute = force || inputs.is_empty();
        let mut any_input_updated = false;

        for &input_name in inputs {
            let input_idx = self.index[&input_name];
            let input_state = self.run_node(input_idx, force, ctx);
            if input_state == NodeState::Updated {
                any_input_updated = true;
                let handled = {
                    let (input_slot, node_slot) = split_pair(&mut self.slots, input_idx, idx);
                    let tracked = input_slot.node.tracked_data();
                    node_slot.node.handle_change(input_name, tracked, ctx)
                };
                if handled == ChangeResult::CannotHandle {
                    needs_recompute = true;
                }
            }
        }

        let state = if needs_recompute {
            Debug::NodeRun(self.slots[idx].node.name()).log();
            let result = self.slots[idx].node.run(ctx);
            if result == NodeState::Aborted {
                self.aborted = true;
            }
            result
        } else if any_input_updated {
            NodeState::Updated
        } else {
            NodeState::Unchanged
        };
        Debug::NodeResult(self.slots[idx].node.name(), state).log();
        self.slots[idx].state = state;
        state
    }
}

/// Splits `slots` into an immutable reference at `a` and a mutable
/// reference at `b`. Panics if `a == b` — a node can never be its own
/// input, since the registry forbids self-referencing edges implicitly by
/// construction (the DAG is acyclic).
fn split_pair<C>(slots: &mut [Slot<C>], a: usize, b: usize) -> (&Slot<C>, &mut Slot<C>) {
    assert_ne!(a, b, "engine node cannot be its own input");
    if a < b {
        let (left, right) = slots.split_at_mut(b);
        (&left[a], &mut right[0])
    } else {
        let (left, right) = slots.split_at_mut(a);
        (&right[0], &mut left[b])
    }
}
