//
// Copyright (c) The chassis-agent Contributors
//
// SPDX-License-Identifier: MIT
//

//! Flow-output composition: logical and physical translation into the
//! shared lflow table, rendered into the OpenFlow table an `ofctrl`
//! collaborator installs.

pub mod flow_output;
pub mod lflow;
pub mod named_set;
pub mod physical;

pub use flow_output::FlowOutputBuilder;
pub use lflow::LogicalTranslator;
pub use named_set::NamedSetIndex;
