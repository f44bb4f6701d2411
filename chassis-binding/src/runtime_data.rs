//
// Copyright (c) The chassis-agent Contributors
//
// SPDX-License-Identifier: MIT
//

//! Local datapaths, local port bindings, and the claim state machine.

use std::collections::{HashMap, HashSet};

use chassis_idl::ovs::OvsSnapshot;
use chassis_idl::sb::{SbSnapshot, SbTxn};
use chassis_utils::RowUuid;

#[derive(Clone, Debug)]
pub struct LocalDatapath {
    pub uuid: RowUuid,
    pub tunnel_key: u32,
}

/// A dense, reusable index space for local datapaths: plain `u32` indices
/// so they can be used directly as [`chassis_lflow::DatapathBitmap`] bit
/// positions, with a free-list so a destroyed datapath's slot is reused
/// rather than leaking.
#[derive(Default)]
pub struct DatapathArena {
    slots: Vec<Option<LocalDatapath>>,
    free: Vec<u32>,
    by_uuid: HashMap<RowUuid, u32>,
}

impl DatapathArena {
    pub fn get_or_create(&mut self, uuid: RowUuid, tunnel_key: u32) -> u32 {
        if let Some(&idx) = self.by_uuid.get(&uuid) {
            return idx;
        }
        let idx = if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = Some(LocalDatapath { uuid, tunnel_key });
            idx
        } else {
            self.slots.push(Some(LocalDatapath { uuid, tunnel_key }));
            (self.slots.len() - 1) as u32
        };
        self.by_uuid.insert(uuid, idx);
        idx
    }

    pub fn remove(&mut self, uuid: RowUuid) {
        if let Some(idx) = self.by_uuid.remove(&uuid) {
            self.slots[idx as usize] = None;
            self.free.push(idx);
        }
    }

    pub fn get(&self, idx: u32) -> Option<&LocalDatapath> {
        self.slots.get(idx as usize).and_then(Option::as_ref)
    }

    pub fn index_of(&self, uuid: RowUuid) -> Option<u32> {
        self.by_uuid.get(&uuid).copied()
    }

    pub fn len(&self) -> usize {
        self.by_uuid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_uuid.is_empty()
    }
}

impl chassis_lflow::DatapathIndex for DatapathArena {
    fn datapath_uuid(&self, index: u32) -> RowUuid {
        self.get(index)
            .map(|dp| dp.uuid)
            .expect("bitmap index must refer to a live local datapath")
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BindingState {
    Unclaimed,
    ClaimPending,
    Claimed,
    ReleasePending,
    Released,
}

#[derive(Clone, Debug)]
pub struct LocalBinding {
    pub pb_uuid: RowUuid,
    pub datapath: u32,
    pub state: BindingState,
}

#[derive(Clone, Debug, Default)]
pub struct TrackedPorts {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
}

impl TrackedPorts {
    pub fn has_changes(&self) -> bool {
        !self.created.is_empty() || !self.updated.is_empty() || !self.deleted.is_empty()
    }
}

/// Builds, from SB port-bindings and local vswitch interfaces, the set of
/// logical ports located on this chassis and drives their claim state
/// machines.
#[derive(Default)]
pub struct RuntimeData {
    pub datapaths: DatapathArena,
    bindings: HashMap<String, LocalBinding>,
    tracked: TrackedPorts,
}

impl RuntimeData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn binding(&self, logical_port: &str) -> Option<&LocalBinding> {
        self.bindings.get(logical_port)
    }

    pub fn bindings(&self) -> impl Iterator<Item = (&str, &LocalBinding)> {
        self.bindings.iter().map(|(port, b)| (port.as_str(), b))
    }

    pub fn tracked(&self) -> &TrackedPorts {
        &self.tracked
    }

    pub fn clear_tracked(&mut self) {
        self.tracked = TrackedPorts::default();
    }

    /// Runs one iteration of the claim/release state machine and returns
    /// the SB writes it wants committed.
    pub fn run(
        &mut self,
        chassis: &str,
        sb: &SbSnapshot,
        ovs: &OvsSnapshot,
        of_caught_up: bool,
        sb_writable: bool,
    ) -> SbTxn {
        self.tracked = TrackedPorts::default();
        let mut txn = SbTxn::default();

        let pb_by_port: HashMap<&str, RowUuid> = sb
            .port_bindings
            .iter()
            .map(|(_, pb)| (pb.logical_port.as_str(), pb.uuid))
            .collect();

        // Step 1: interface appearance -> UNCLAIMED -> CLAIM_PENDING.
        for (_, iface) in ovs.interfaces.iter() {
            let Some(iface_id) = iface.iface_id() else {
                continue;
            };
            if self.bindings.contains_key(iface_id) {
                continue;
            }
            let Some(&pb_uuid) = pb_by_port.get(iface_id) else {
                continue;
            };
            let pb = sb.port_bindings.get(pb_uuid).expect("just looked up");
            if let Some(requested) = pb.requested_chassis.as_deref() {
                if requested != chassis {
                    continue;
                }
            }
            let ld_tunnel_key = sb
                .datapaths
                .get(pb.datapath)
                .map(|ld| ld.tunnel_key)
                .unwrap_or(0);
            let dp_idx = self.datapaths.get_or_create(pb.datapath, ld_tunnel_key);
            self.bindings.insert(
                iface_id.to_owned(),
                LocalBinding {
                    pb_uuid,
                    datapath: dp_idx,
                    state: BindingState::ClaimPending,
                },
            );
            self.tracked.created.push(iface_id.to_owned());
            if sb_writable {
                txn.set_chassis.push((pb_uuid, Some(chassis.to_owned())));
                txn.set_up.push((pb_uuid, false));
            }
        }

        // Step 2: CLAIM_PENDING -> CLAIMED once SB reflects us and the OF
        // channel has caught up with the flows this claim installed.
        for (port, binding) in self.bindings.iter_mut() {
            if binding.state != BindingState::ClaimPending {
                continue;
            }
            let Some(pb) = sb.port_bindings.get(binding.pb_uuid) else {
                continue;
            };
            if pb.chassis.as_deref() == Some(chassis) && of_caught_up {
                binding.state = BindingState::Claimed;
                self.tracked.updated.push(port.clone());
                if sb_writable {
                    txn.set_up.push((binding.pb_uuid, true));
                }
            }
        }

        // Step 3: CLAIMED -> RELEASE_PENDING on interface removal or PB
        // revocation (only CLAIMED bindings are eligible, so a same-run
        // claim+release pair can never reach this branch and produce a
        // second write).
        let present: HashSet<&str> =
            ovs.interfaces.iter().filter_map(|(_, i)| i.iface_id()).collect();
        for (port, binding) in self.bindings.iter_mut() {
            if binding.state != BindingState::Claimed {
                continue;
            }
            let revoked = sb
                .port_bindings
                .get(binding.pb_uuid)
                .is_none_or(|pb| pb.chassis.as_deref() != Some(chassis));
            if !present.contains(port.as_str()) || revoked {
                binding.state = BindingState::ReleasePending;
                self.tracked.updated.push(port.clone());
                if sb_writable {
                    txn.set_chassis.push((binding.pb_uuid, None));
                }
            }
        }

        // Step 4: drop bindings whose PB is gone, or whose release has
        // been committed (SB writable so the clear actually took effect).
        let mut gone = Vec::new();
        for (port, binding) in &self.bindings {
            let pb_exists = sb.port_bindings.get(binding.pb_uuid).is_some();
            if !pb_exists {
                gone.push(port.clone());
            } else if binding.state == BindingState::ReleasePending && sb_writable {
                gone.push(port.clone());
            }
        }
        for port in gone {
            self.bindings.remove(&port);
            self.tracked.deleted.push(port);
        }

        txn
    }
}
