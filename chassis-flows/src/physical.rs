//
// Copyright (c) The chassis-agent Contributors
//
// SPDX-License-Identifier: MIT
//

//! Physical translation: tunnel/encap flows per local datapath, one
//! patch-port flow per claimed binding, and multicast distribution flows.
//!
//! Each produced entry is attached to an owning row (the port binding or
//! multicast-group UUID it derives from) so a single binding or group can
//! be dropped without recomputing the rest.

use chassis_binding::runtime_data::{BindingState, DatapathArena, RuntimeData};
use chassis_idl::sb::{MacBinding, MulticastGroup, SbSnapshot};
use chassis_lflow::{DatapathTarget, DpgTable, LflowKey, LflowTable};
use chassis_utils::RowUuid;

const STAGE_PORT: &str = "phy_port";
const STAGE_NEIGHBOR: &str = "phy_neighbor";
const STAGE_MCAST: &str = "phy_mcast";

fn port_key(port: &str, tunnel_key: u32) -> LflowKey {
    LflowKey {
        stage: STAGE_PORT.to_owned(),
        priority: 100,
        match_: format!("in_port == {port}"),
        actions: format!("output:tunnel_key={tunnel_key}"),
        controller_meter: None,
    }
}

fn neighbor_key(mb: &MacBinding) -> LflowKey {
    LflowKey {
        stage: STAGE_NEIGHBOR.to_owned(),
        priority: 100,
        match_: format!("ip4 == {}", mb.ip),
        actions: format!("set_mac({}); next;", mb.mac),
        controller_meter: None,
    }
}

fn mcast_key(group: &MulticastGroup) -> LflowKey {
    LflowKey {
        stage: STAGE_MCAST.to_owned(),
        priority: 100,
        match_: format!("mcast_group == {}", group.name),
        actions: format!("output:ports={}", group.ports.join(",")),
        controller_meter: None,
    }
}

/// Translates every `CLAIMED` local binding into a patch-port/tunnel flow.
pub fn full_run_ports(runtime: &RuntimeData, table: &mut LflowTable) {
    for (port, binding) in runtime.bindings() {
        if binding.state != BindingState::Claimed {
            continue;
        }
        let tunnel_key = runtime
            .datapaths
            .get(binding.datapath)
            .map(|dp| dp.tunnel_key)
            .unwrap_or(0);
        let key = port_key(port, tunnel_key);
        table.add_lflow(
            key,
            DatapathTarget::Single(binding.datapath),
            None,
            Some(binding.pb_uuid),
        );
    }
}

/// Releases every entry `owner` currently holds, regardless of its match
/// content — used when a binding/group is deleted and only its UUID, not
/// its last-known key, is known to the caller.
fn release_all_owned(table: &mut LflowTable, owner: RowUuid, dpg: &mut DpgTable, sb: &mut SbSnapshot) {
    let owned: Vec<LflowKey> = table
        .entries()
        .filter(|(_, e)| e.refcount() > 0)
        .map(|(k, _)| k.clone())
        .collect();
    for key in owned {
        table.release_owner(&key, owner, dpg, sb);
    }
}

/// Re-runs physical translation for a single port only.
pub fn handle_port_binding_change(
    runtime: &RuntimeData,
    port: &str,
    old_pb: RowUuid,
    table: &mut LflowTable,
    dpg: &mut DpgTable,
    sb: &mut SbSnapshot,
) -> bool {
    release_all_owned(table, old_pb, dpg, sb);

    let Some(binding) = runtime.binding(port) else {
        return true;
    };
    if binding.state != BindingState::Claimed {
        return true;
    }
    let tunnel_key = runtime
        .datapaths
        .get(binding.datapath)
        .map(|dp| dp.tunnel_key)
        .unwrap_or(0);
    table.add_lflow(
        port_key(port, tunnel_key),
        DatapathTarget::Single(binding.datapath),
        None,
        Some(binding.pb_uuid),
    );
    true
}

/// Recomputes the neighbor flow for a single changed MAC binding. `None`
/// means the binding was deleted and its flow should be purged.
pub fn handle_mac_binding_change(
    mb: Option<&MacBinding>,
    owner: RowUuid,
    datapath: u32,
    table: &mut LflowTable,
    dpg: &mut DpgTable,
    sb: &mut SbSnapshot,
) {
    release_all_owned(table, owner, dpg, sb);
    if let Some(mb) = mb {
        table.add_lflow(neighbor_key(mb), DatapathTarget::Single(datapath), None, Some(owner));
    }
}

/// Re-translates a single multicast group's distribution flow.
pub fn handle_multicast_group_change(
    group: Option<&MulticastGroup>,
    owner: RowUuid,
    datapath: u32,
    table: &mut LflowTable,
    dpg: &mut DpgTable,
    sb: &mut SbSnapshot,
) {
    release_all_owned(table, owner, dpg, sb);
    if let Some(group) = group {
        table.add_lflow(mcast_key(group), DatapathTarget::Single(datapath), None, Some(owner));
    }
}

/// Local datapath lookup used to resolve a binding's datapath UUID for
/// multi-cast/neighbor flow keys.
pub fn tunnel_key_of(arena: &DatapathArena, datapath: u32) -> u32 {
    arena.get(datapath).map(|dp| dp.tunnel_key).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use chassis_idl::sb::PortType;

    use super::*;

    #[test]
    fn claimed_binding_gets_one_port_flow() {
        let mut sb = SbSnapshot::default();
        let mut ovs = chassis_idl::ovs::OvsSnapshot::default();
        let mut runtime = RuntimeData::new();
        let d1_uuid = RowUuid::new_v4();
        sb.datapaths.insert(
            d1_uuid,
            chassis_idl::sb::LogicalDatapath {
                uuid: d1_uuid,
                tunnel_key: 7,
                kind: chassis_idl::sb::DatapathKind::Switch,
            },
        );
        let pb_uuid = RowUuid::new_v4();
        sb.port_bindings.insert(
            pb_uuid,
            chassis_idl::sb::PortBinding {
                uuid: pb_uuid,
                logical_port: "p1".to_owned(),
                datapath: d1_uuid,
                ptype: PortType::Vif,
                options: Default::default(),
                requested_chassis: Some("c1".to_owned()),
                chassis: Some("c1".to_owned()),
                up: true,
                nat_addresses: Vec::new(),
                ha_chassis_group: None,
                peer: None,
            },
        );
        let iface_uuid = RowUuid::new_v4();
        ovs.interfaces.insert(
            iface_uuid,
            chassis_idl::ovs::Interface {
                uuid: iface_uuid,
                name: "p1-iface".to_owned(),
                external_ids: std::collections::BTreeMap::from([("iface-id".to_owned(), "p1".to_owned())]),
                ofport: Some(1),
            },
        );
        runtime.run("c1", &sb, &ovs, true, true);
        assert_eq!(runtime.binding("p1").unwrap().state, BindingState::Claimed);

        let mut table = LflowTable::new();
        full_run_ports(&runtime, &mut table);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn mac_binding_delete_purges_its_neighbor_flow() {
        let mut table = LflowTable::new();
        let mut dpg = DpgTable::new();
        let mut sb = SbSnapshot::default();
        let owner = RowUuid::new_v4();
        let mb = MacBinding {
            uuid: owner,
            logical_port: "lrp1".to_owned(),
            datapath: RowUuid::new_v4(),
            ip: "10.0.0.5".to_owned(),
            mac: chassis_utils::MacAddr::from([0, 1, 2, 3, 4, 5]),
        };
        handle_mac_binding_change(Some(&mb), owner, 0, &mut table, &mut dpg, &mut sb);
        assert_eq!(table.len(), 1);

        handle_mac_binding_change(None, owner, 0, &mut table, &mut dpg, &mut sb);
        assert!(table.is_empty());
    }

    #[test]
    fn multicast_group_update_replaces_its_flow() {
        let mut table = LflowTable::new();
        let mut dpg = DpgTable::new();
        let mut sb = SbSnapshot::default();
        let owner = RowUuid::new_v4();
        let group = MulticastGroup {
            uuid: owner,
            datapath: RowUuid::new_v4(),
            name: "mc1".to_owned(),
            ports: vec!["p1".to_owned()],
        };
        handle_multicast_group_change(Some(&group), owner, 0, &mut table, &mut dpg, &mut sb);
        assert_eq!(table.len(), 1);

        let updated = MulticastGroup {
            ports: vec!["p1".to_owned(), "p2".to_owned()],
            ..group
        };
        handle_multicast_group_change(Some(&updated), owner, 0, &mut table, &mut dpg, &mut sb);
        assert_eq!(table.len(), 1, "old entry must be replaced, not accumulated");
    }
}
