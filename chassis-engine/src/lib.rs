//
// Copyright (c) The chassis-agent Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod debug;
pub mod engine;
pub mod node;

pub use engine::{Engine, NodeDescriptor};
pub use node::{ChangeResult, Node, NodeState};
