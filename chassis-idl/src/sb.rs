//
// Copyright (c) The chassis-agent Contributors
//
// SPDX-License-Identifier: MIT
//

//! Southbound database rows and the `SbIdl` trait contract.
//!
//! The wire-level transport is out of scope for this crate; this module
//! only defines the row shapes and the interface the engine depends on,
//! plus an in-memory test double used by the test suites of
//! `chassis-engine`, `chassis-binding` and `chassis-flows`.

use std::collections::BTreeMap;

use chassis_utils::{MacAddr, RowUuid};
use serde::{Deserialize, Serialize};

use crate::tracked::Table;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum DatapathKind {
    #[default]
    Switch,
    Router,
}

#[derive(Clone, Debug)]
pub struct LogicalDatapath {
    pub uuid: RowUuid,
    pub tunnel_key: u32,
    pub kind: DatapathKind,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum PortType {
    Vif,
    Patch,
    L3Gateway,
    Localnet,
    ChassisRedirect,
    External,
}

#[derive(Clone, Debug)]
pub struct PortBinding {
    pub uuid: RowUuid,
    pub logical_port: String,
    pub datapath: RowUuid,
    pub ptype: PortType,
    pub options: BTreeMap<String, String>,
    pub requested_chassis: Option<String>,
    pub chassis: Option<String>,
    pub up: bool,
    pub nat_addresses: Vec<String>,
    pub ha_chassis_group: Option<RowUuid>,
    /// Name of the peer port-binding for a patch-port pair.
    pub peer: Option<String>,
}

impl PortBinding {
    pub fn new(logical_port: impl Into<String>, datapath: RowUuid, ptype: PortType) -> Self {
        PortBinding {
            uuid: RowUuid::new_v4(),
            logical_port: logical_port.into(),
            datapath,
            ptype,
            options: BTreeMap::new(),
            requested_chassis: None,
            chassis: None,
            up: false,
            nat_addresses: Vec::new(),
            ha_chassis_group: None,
            peer: None,
        }
    }

    pub fn plug_type(&self) -> Option<&str> {
        self.options.get("plug-type").map(String::as_str)
    }
}

/// An SB `logical_flow` row, as synced by `chassis_lflow`.
#[derive(Clone, Debug)]
pub struct LogicalFlowRow {
    pub uuid: RowUuid,
    pub stage: String,
    pub priority: u16,
    pub match_: String,
    pub actions: String,
    pub controller_meter: Option<String>,
    pub datapath: Option<RowUuid>,
    pub datapath_group: Option<RowUuid>,
    /// Debug hint: UUID of the row that produced this flow.
    pub stage_hint: Option<RowUuid>,
}

#[derive(Clone, Debug)]
pub struct DatapathGroupRow {
    pub uuid: RowUuid,
    pub datapaths: Vec<RowUuid>,
}

#[derive(Clone, Debug)]
pub struct MacBinding {
    pub uuid: RowUuid,
    pub logical_port: String,
    pub datapath: RowUuid,
    pub ip: String,
    pub mac: MacAddr,
}

#[derive(Clone, Debug, Default)]
pub struct AddressSet {
    pub name: String,
    pub addresses: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct PortGroup {
    pub name: String,
    pub ports: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct MulticastGroup {
    pub uuid: RowUuid,
    pub datapath: RowUuid,
    pub name: String,
    pub ports: Vec<String>,
}

/// Full southbound snapshot with per-table change tracking.
#[derive(Default)]
pub struct SbSnapshot {
    pub datapaths: Table<LogicalDatapath>,
    pub port_bindings: Table<PortBinding>,
    pub logical_flows: Table<LogicalFlowRow>,
    pub datapath_groups: Table<DatapathGroupRow>,
    pub mac_bindings: Table<MacBinding>,
    pub address_sets: Table<AddressSet>,
    pub port_groups: Table<PortGroup>,
    pub multicast_groups: Table<MulticastGroup>,
}

impl SbSnapshot {
    /// Clears the NEW/UPDATED/DELETED bookkeeping on every table. Called by
    /// the engine once per iteration.
    pub fn clear_tracking(&mut self) {
        self.datapaths.clear_tracking();
        self.port_bindings.clear_tracking();
        self.logical_flows.clear_tracking();
        self.datapath_groups.clear_tracking();
        self.mac_bindings.clear_tracking();
        self.address_sets.clear_tracking();
        self.port_groups.clear_tracking();
        self.multicast_groups.clear_tracking();
    }
}

/// A write to be committed to the SB database in a single transaction per
/// iteration.
#[derive(Debug, Default)]
pub struct SbTxn {
    pub set_chassis: Vec<(RowUuid, Option<String>)>,
    pub set_up: Vec<(RowUuid, bool)>,
    pub delete_mac_bindings: Vec<RowUuid>,
    pub comment: Option<String>,
}

impl SbTxn {
    pub fn is_empty(&self) -> bool {
        self.set_chassis.is_empty()
            && self.set_up.is_empty()
            && self.delete_mac_bindings.is_empty()
    }
}

#[derive(Debug)]
pub enum IdlError {
    TryAgain,
    NotConnected,
}

impl std::fmt::Display for IdlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdlError::TryAgain => write!(f, "transaction conflict, try again"),
            IdlError::NotConnected => write!(f, "not connected to database"),
        }
    }
}

impl std::error::Error for IdlError {}

/// Southbound IDL client contract.
pub trait SbIdl {
    fn snapshot(&self) -> &SbSnapshot;

    fn snapshot_mut(&mut self) -> &mut SbSnapshot;

    /// Whether the SB connection is currently writable.
    fn is_writable(&self) -> bool;

    /// Commits a transaction. On `IdlError::TryAgain`, the caller must keep
    /// its in-memory state and retry on the next iteration.
    fn commit(&mut self, txn: SbTxn) -> Result<(), IdlError>;

    /// Monotonic sequence number that changes on reconnection, used to force
    /// a full recompute.
    fn seqno(&self) -> u64;
}

/// In-memory `SbIdl` test double.
#[derive(Default)]
pub struct MemSbIdl {
    pub snapshot: SbSnapshot,
    pub writable: bool,
    pub seqno: u64,
}

impl MemSbIdl {
    pub fn new() -> Self {
        MemSbIdl {
            snapshot: SbSnapshot::default(),
            writable: true,
            seqno: 0,
        }
    }
}

impl SbIdl for MemSbIdl {
    fn snapshot(&self) -> &SbSnapshot {
        &self.snapshot
    }

    fn snapshot_mut(&mut self) -> &mut SbSnapshot {
        &mut self.snapshot
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    fn commit(&mut self, txn: SbTxn) -> Result<(), IdlError> {
        if !self.writable {
            return Err(IdlError::NotConnected);
        }
        for (uuid, chassis) in txn.set_chassis {
            self.snapshot.port_bindings.update(uuid, |pb| pb.chassis = chassis);
        }
        for (uuid, up) in txn.set_up {
            self.snapshot.port_bindings.update(uuid, |pb| pb.up = up);
        }
        for uuid in txn.delete_mac_bindings {
            self.snapshot.mac_bindings.remove(uuid);
        }
        Ok(())
    }

    fn seqno(&self) -> u64 {
        self.seqno
    }
}
