//
// Copyright (c) The chassis-agent Contributors
//
// SPDX-License-Identifier: MIT
//

//! Top-level flow-output composition: runs logical-flow translation and
//! physical translation into the shared lflow table, syncs it to SB, and
//! renders the OpenFlow table and extend tables `ofctrl` consumes.
//!
//! The wire-level table/group/meter id assignment is out of scope (the OF
//! codec itself is a collaborator, not something this crate rewrites); a
//! flow's table number is derived from its stage name so distinct stages
//! never collide, which is sufficient for the composition semantics this
//! crate owns.

use std::collections::{hash_map::DefaultHasher, HashSet};
use std::hash::{Hash, Hasher};

use chassis_binding::runtime_data::RuntimeData;
use chassis_idl::ofctrl::{ExtendTables, FlowEntry, FlowTable};
use chassis_idl::sb::{MacBinding, MulticastGroup, SbSnapshot};
use chassis_lflow::{DpgTable, LflowTable};
use chassis_utils::RowUuid;

use crate::lflow::LogicalTranslator;
use crate::physical;

fn table_number(stage: &str) -> u8 {
    let mut hasher = DefaultHasher::new();
    stage.hash(&mut hasher);
    (hasher.finish() % 256) as u8
}

/// Owns the shared lflow table plus the logical translator's named-set
/// index, and composes the two translation passes into one OpenFlow table.
#[derive(Default)]
pub struct FlowOutputBuilder {
    logical: LogicalTranslator,
    lflow_table: LflowTable,
    dpg: DpgTable,
}

impl FlowOutputBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lflow_table(&self) -> &LflowTable {
        &self.lflow_table
    }

    /// Full recompute: re-translates every relevant logical flow and every
    /// claimed local binding's physical flow, syncs the result to SB, and
    /// renders the OpenFlow output.
    ///
    /// A full recompute is a full *rebuild*, not an incremental add: the
    /// shared lflow table is a persistent field, so the previous run's
    /// entries are drained (releasing their dp-group references) before
    /// re-translating. Without this, an edited match or a deleted
    /// `logical_flow` row leaves a stale entry behind forever, and
    /// `sync_to_sb` never deletes the SB row it still matches by key.
    pub fn full_run(
        &mut self,
        sb: &mut SbSnapshot,
        local_datapaths: &HashSet<RowUuid>,
        runtime: &RuntimeData,
        resolve_index: &dyn Fn(RowUuid) -> Option<u32>,
    ) -> (FlowTable, ExtendTables) {
        self.lflow_table.clear(&mut self.dpg, sb);
        self.logical.full_run(sb, local_datapaths, resolve_index, &mut self.lflow_table);
        physical::full_run_ports(runtime, &mut self.lflow_table);
        self.sync_and_render(sb, runtime)
    }

    /// Handler: address-set/port-group change. Returns `false` to request a
    /// full recompute if the incremental path could not account for the
    /// delta.
    pub fn handle_named_set_change(
        &mut self,
        sb: &mut SbSnapshot,
        names: &[String],
        resolve_index: &dyn Fn(RowUuid) -> Option<u32>,
    ) -> bool {
        self.logical.retranslate_names(sb, names, resolve_index, &mut self.lflow_table, &mut self.dpg)
    }

    /// Handler: a single port binding changed. `old_pb` is the owner UUID
    /// any previously-installed physical flow for this port was tagged
    /// with (irrelevant for a brand-new port, since nothing is owned yet).
    pub fn handle_port_binding_change(&mut self, sb: &mut SbSnapshot, runtime: &RuntimeData, port: &str, old_pb: RowUuid) -> bool {
        physical::handle_port_binding_change(runtime, port, old_pb, &mut self.lflow_table, &mut self.dpg, sb)
    }

    pub fn handle_mac_binding_change(&mut self, sb: &mut SbSnapshot, mb: Option<&MacBinding>, owner: RowUuid, datapath: u32) {
        physical::handle_mac_binding_change(mb, owner, datapath, &mut self.lflow_table, &mut self.dpg, sb)
    }

    pub fn handle_multicast_group_change(&mut self, sb: &mut SbSnapshot, group: Option<&MulticastGroup>, owner: RowUuid, datapath: u32) {
        physical::handle_multicast_group_change(group, owner, datapath, &mut self.lflow_table, &mut self.dpg, sb)
    }

    /// Finishes an incremental handler pass: resolves dp-groups, syncs to
    /// SB, and renders the OpenFlow output. Call once per iteration after
    /// whichever handlers ran.
    pub fn sync_and_render(&mut self, sb: &mut SbSnapshot, runtime: &RuntimeData) -> (FlowTable, ExtendTables) {
        self.lflow_table.resolve_groups(&mut self.dpg, sb);
        self.dpg.bind_sb_rows(sb, &runtime.datapaths);
        self.lflow_table.sync_to_sb(&self.dpg, &runtime.datapaths, sb);
        self.render()
    }

    fn render(&self) -> (FlowTable, ExtendTables) {
        let mut flows = Vec::new();
        let mut meters = Vec::new();
        for (key, entry) in self.lflow_table.entries() {
            let cookie = entry.source.map(|s| s.as_cookie()).unwrap_or(0);
            let meter = key.controller_meter.as_ref().and_then(|m| m.parse::<u32>().ok());
            if let Some(meter) = meter {
                meters.push(meter);
            }
            flows.push(FlowEntry {
                cookie,
                table: table_number(&key.stage),
                priority: key.priority,
                matches: key.match_.clone(),
                actions: key.actions.clone(),
                meter,
            });
        }
        let groups: Vec<u32> = (0..self.dpg.len() as u32).collect();
        (FlowTable { flows }, ExtendTables { groups, meters })
    }
}

#[cfg(test)]
mod tests {
    use chassis_idl::sb::{AddressSet, LogicalFlowRow};

    use super::*;

    fn no_datapaths(_: RowUuid) -> Option<u32> {
        None
    }

    #[test]
    fn full_run_renders_translated_flows() {
        let mut sb = SbSnapshot::default();
        let f1 = RowUuid::new_v4();
        sb.logical_flows.insert(
            f1,
            LogicalFlowRow {
                uuid: f1,
                stage: "ls_in_acl".to_owned(),
                priority: 100,
                match_: "ip4".to_owned(),
                actions: "next;".to_owned(),
                controller_meter: None,
                datapath: None,
                datapath_group: None,
                stage_hint: None,
            },
        );
        let runtime = RuntimeData::new();
        let mut builder = FlowOutputBuilder::new();
        let (flows, _extend) = builder.full_run(&mut sb, &HashSet::new(), &runtime, &no_datapaths);
        assert_eq!(flows.flows.len(), 1);
        assert_eq!(sb.logical_flows.len(), 1);
    }

    #[test]
    fn named_set_delta_is_handled_incrementally() {
        let mut sb = SbSnapshot::default();
        let as_uuid = RowUuid::new_v4();
        sb.address_sets.insert(
            as_uuid,
            AddressSet {
                name: "as1".to_owned(),
                addresses: vec!["10.0.0.1".to_owned()],
            },
        );
        let f1 = RowUuid::new_v4();
        sb.logical_flows.insert(
            f1,
            LogicalFlowRow {
                uuid: f1,
                stage: "ls_in_acl".to_owned(),
                priority: 100,
                match_: "ip4.src == $as1".to_owned(),
                actions: "next;".to_owned(),
                controller_meter: None,
                datapath: None,
                datapath_group: None,
                stage_hint: None,
            },
        );
        let runtime = RuntimeData::new();
        let mut builder = FlowOutputBuilder::new();
        builder.full_run(&mut sb, &HashSet::new(), &runtime, &no_datapaths);

        sb.address_sets.update(as_uuid, |a| a.addresses.push("10.0.0.2".to_owned()));
        let handled = builder.handle_named_set_change(&mut sb, &["as1".to_owned()], &no_datapaths);
        assert!(handled);
        let (flows, _) = builder.sync_and_render(&mut sb, &runtime);
        assert_eq!(flows.flows.len(), 1);
    }

    #[test]
    fn second_full_run_removes_stale_entry_for_edited_match() {
        let mut sb = SbSnapshot::default();
        let f1 = RowUuid::new_v4();
        sb.logical_flows.insert(
            f1,
            LogicalFlowRow {
                uuid: f1,
                stage: "ls_in_acl".to_owned(),
                priority: 100,
                match_: "ip4".to_owned(),
                actions: "next;".to_owned(),
                controller_meter: None,
                datapath: None,
                datapath_group: None,
                stage_hint: None,
            },
        );
        let runtime = RuntimeData::new();
        let mut builder = FlowOutputBuilder::new();
        builder.full_run(&mut sb, &HashSet::new(), &runtime, &no_datapaths);
        assert_eq!(sb.logical_flows.len(), 1);

        sb.logical_flows.update(f1, |row| row.match_ = "ip6".to_owned());
        let (flows, _) = builder.full_run(&mut sb, &HashSet::new(), &runtime, &no_datapaths);
        assert_eq!(flows.flows.len(), 1, "the old ip4 entry must not linger alongside the new ip6 one");
        assert_eq!(sb.logical_flows.len(), 1, "the stale SB row for the old match must be deleted, not left behind");
        assert_eq!(sb.logical_flows.iter().next().unwrap().1.match_, "ip6");
    }

    #[test]
    fn second_full_run_removes_row_for_deleted_logical_flow() {
        let mut sb = SbSnapshot::default();
        let f1 = RowUuid::new_v4();
        sb.logical_flows.insert(
            f1,
            LogicalFlowRow {
                uuid: f1,
                stage: "ls_in_acl".to_owned(),
                priority: 100,
                match_: "ip4".to_owned(),
                actions: "next;".to_owned(),
                controller_meter: None,
                datapath: None,
                datapath_group: None,
                stage_hint: None,
            },
        );
        let runtime = RuntimeData::new();
        let mut builder = FlowOutputBuilder::new();
        builder.full_run(&mut sb, &HashSet::new(), &runtime, &no_datapaths);
        assert_eq!(sb.logical_flows.len(), 1);

        sb.logical_flows.remove(f1);
        let (flows, _) = builder.full_run(&mut sb, &HashSet::new(), &runtime, &no_datapaths);
        assert!(flows.flows.is_empty());
        assert!(sb.logical_flows.is_empty(), "the table must not grow unbounded once a row disappears");
    }
}
