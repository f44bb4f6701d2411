//
// Copyright (c) The chassis-agent Contributors
//
// SPDX-License-Identifier: MIT
//

use chassis_utils::RowUuid;

pub mod dpg;
pub mod key;
#[cfg(feature = "par-build")]
pub mod sharded;
pub mod table;

pub use dpg::DpgTable;
pub use key::LflowKey;
pub use table::{DatapathTarget, LflowEntry, LflowTable};

/// Resolves a dense datapath-bitmap index back to the SB row UUID it
/// stands for. Implemented by whatever owns the datapath arena
/// (`chassis-binding`'s `runtime_data`); kept as a trait here so this
/// crate stays decoupled from that arena's concrete type.
pub trait DatapathIndex {
    fn datapath_uuid(&self, index: u32) -> RowUuid;
}
