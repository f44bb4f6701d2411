//
// Copyright (c) The chassis-agent Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::debug;

use crate::node::NodeState;

#[derive(Debug)]
pub enum Debug<'a> {
    IterationStart { force_recompute: bool },
    NodeRun(&'a str),
    NodeResult(&'a str, NodeState),
    IterationAborted,
}

impl Debug<'_> {
    pub(crate) fn log(&self) {
        match self {
            Debug::IterationStart { force_recompute } => {
                debug!(%force_recompute, "starting engine iteration");
            }
            Debug::NodeRun(name) => {
                debug!(node = %name, "running node");
            }
            Debug::NodeResult(name, state) => {
                debug!(node = %name, ?state, "node completed");
            }
            Debug::IterationAborted => {
                debug!("engine iteration aborted, scheduling recompute");
            }
        }
    }
}
