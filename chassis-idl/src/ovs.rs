//
// Copyright (c) The chassis-agent Contributors
//
// SPDX-License-Identifier: MIT
//

//! Local vswitch IDL rows and the `OvsIdl` trait contract.

use std::collections::BTreeMap;

use chassis_utils::RowUuid;

use crate::sb::IdlError;
use crate::tracked::Table;

#[derive(Clone, Debug)]
pub struct Interface {
    pub uuid: RowUuid,
    pub name: String,
    pub external_ids: BTreeMap<String, String>,
    pub ofport: Option<u32>,
}

impl Interface {
    pub fn iface_id(&self) -> Option<&str> {
        self.external_ids.get("iface-id").map(String::as_str)
    }
}

#[derive(Clone, Debug, Default)]
pub struct Bridge {
    pub name: String,
    pub external_ids: BTreeMap<String, String>,
    pub datapath_type: String,
}

impl Bridge {
    /// Returns the live ct-zone entries persisted under `ct-zone-<user>`
    /// keys, used by `chassis_binding::ctzone::CtZoneAllocator::restore` to
    /// round-trip state across a restart.
    pub fn ct_zones(&self) -> BTreeMap<String, u16> {
        self.external_ids
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix("ct-zone-")
                    .and_then(|user| v.parse::<u16>().ok().map(|zone| (user.to_owned(), zone)))
            })
            .collect()
    }
}

#[derive(Default)]
pub struct OvsSnapshot {
    pub interfaces: Table<Interface>,
    pub bridge: Bridge,
}

impl OvsSnapshot {
    pub fn clear_tracking(&mut self) {
        self.interfaces.clear_tracking();
    }
}

pub trait OvsIdl {
    fn snapshot(&self) -> &OvsSnapshot;

    fn snapshot_mut(&mut self) -> &mut OvsSnapshot;

    /// Writes the given `ct-zone-<user>` entries into the bridge's
    /// `external_ids` in a single transaction.
    fn commit_ct_zones(&mut self, zones: &BTreeMap<String, u16>) -> Result<(), IdlError>;

    fn seqno(&self) -> u64;
}

#[derive(Default)]
pub struct MemOvsIdl {
    pub snapshot: OvsSnapshot,
    pub writable: bool,
    pub seqno: u64,
}

impl MemOvsIdl {
    pub fn new() -> Self {
        MemOvsIdl {
            snapshot: OvsSnapshot::default(),
            writable: true,
            seqno: 0,
        }
    }
}

impl OvsIdl for MemOvsIdl {
    fn snapshot(&self) -> &OvsSnapshot {
        &self.snapshot
    }

    fn snapshot_mut(&mut self) -> &mut OvsSnapshot {
        &mut self.snapshot
    }

    fn commit_ct_zones(&mut self, zones: &BTreeMap<String, u16>) -> Result<(), IdlError> {
        if !self.writable {
            return Err(IdlError::NotConnected);
        }
        self.snapshot
            .bridge
            .external_ids
            .retain(|k, _| !k.starts_with("ct-zone-"));
        for (user, zone) in zones {
            self.snapshot
                .bridge
                .external_ids
                .insert(format!("ct-zone-{user}"), zone.to_string());
        }
        Ok(())
    }

    fn seqno(&self) -> u64 {
        self.seqno
    }
}
