//
// Copyright (c) The chassis-agent Contributors
//
// SPDX-License-Identifier: MIT
//

use chassis_idl::sb::LogicalFlowRow;

/// The hash key a logical-flow table entry is keyed by.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct LflowKey {
    pub stage: String,
    pub priority: u16,
    pub match_: String,
    pub actions: String,
    pub controller_meter: Option<String>,
}

impl LflowKey {
    pub fn from_row(row: &LogicalFlowRow) -> Self {
        LflowKey {
            stage: row.stage.clone(),
            priority: row.priority,
            match_: row.match_.clone(),
            actions: row.actions.clone(),
            controller_meter: row.controller_meter.clone(),
        }
    }
}
