//
// Copyright (c) The chassis-agent Contributors
//
// SPDX-License-Identifier: MIT
//

use std::any::Any;

/// State of a node after a given iteration.
///
/// `Valid` is the state every node starts in before the engine has run it
/// for the first time; afterwards a node only ever reports `Updated`,
/// `Unchanged`, or `Aborted`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeState {
    Valid,
    Updated,
    Unchanged,
    Aborted,
}

/// Outcome of feeding one input's tracked change into a node's change
/// handler.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChangeResult {
    Handled,
    CannotHandle,
}

/// A single computation node in the engine's dependency DAG.
///
/// `C` is the shared context threaded through every node's `run` and
/// `handle_change` call (IDL handles, the flow installer, and whatever
/// else the concrete workspace wires together); `chassis-engine` itself
/// stays agnostic of what `C` actually is.
pub trait Node<C>: Send {
    fn name(&self) -> &'static str;

    /// Fully rebuilds this node's internal data from its inputs. Must not
    /// fail: a node that cannot make progress reports `NodeState::Aborted`
    /// rather than returning an error.
    fn run(&mut self, ctx: &mut C) -> NodeState;

    /// Attempts to apply one input's tracked change incrementally. The
    /// default always declines, which forces the engine to fall back to
    /// `run` — the correct behavior for a node that has not implemented an
    /// incremental path for that input yet.
    fn handle_change(&mut self, input: &str, tracked: &dyn Any, ctx: &mut C) -> ChangeResult {
        let _ = (input, tracked, ctx);
        ChangeResult::CannotHandle
    }

    /// This node's tracked-data record for the iteration just completed,
    /// read by consumers' `handle_change`.
    fn tracked_data(&self) -> &dyn Any;

    /// Drops the tracked-data record, called on every node at the end of
    /// every iteration regardless of whether the node ran.
    fn clear_tracked_data(&mut self);
}
