//
// Copyright (c) The chassis-agent Contributors
//
// SPDX-License-Identifier: MIT
//

//! Logical-flow translation: expands named-set references in SB
//! `logical_flow` matches and feeds the result into the shared lflow
//! table, keyed for dp-group dedup by `chassis_lflow`.

use std::collections::{HashMap, HashSet};

use chassis_idl::sb::{LogicalFlowRow, SbSnapshot};
use chassis_lflow::{DatapathTarget, DpgTable, LflowKey, LflowTable};
use chassis_utils::{DatapathBitmap, RowUuid};

use crate::named_set::{extract_refs, NamedSetIndex};

fn resolve_set(sb: &SbSnapshot, name: &str) -> Option<String> {
    if let Some((_, set)) = sb.address_sets.iter().find(|(_, a)| a.name == name) {
        return Some(format!("{{{}}}", set.addresses.join(", ")));
    }
    if let Some((_, group)) = sb.port_groups.iter().find(|(_, g)| g.name == name) {
        return Some(format!("{{{}}}", group.ports.join(", ")));
    }
    None
}

fn resolve_match(sb: &SbSnapshot, match_: &str, index: &mut NamedSetIndex, row: RowUuid) -> String {
    let mut resolved = match_.to_owned();
    for name in extract_refs(match_) {
        index.add_ref(row, name);
        if let Some(expansion) = resolve_set(sb, name) {
            resolved = resolved.replace(&format!("${name}"), &expansion);
        }
    }
    resolved
}

fn is_relevant(row: &LogicalFlowRow, local_datapaths: &HashSet<RowUuid>) -> bool {
    match row.datapath {
        Some(dp) => local_datapaths.contains(&dp),
        None => true,
    }
}

fn bitmap_for(row: &LogicalFlowRow, resolve_index: &dyn Fn(RowUuid) -> Option<u32>) -> DatapathBitmap {
    match row.datapath.and_then(resolve_index) {
        Some(index) => DatapathBitmap::with_bit(index),
        None => DatapathBitmap::new(),
    }
}

fn key_for(row: &LogicalFlowRow, resolved_match: String) -> LflowKey {
    LflowKey {
        stage: row.stage.clone(),
        priority: row.priority,
        match_: resolved_match,
        actions: row.actions.clone(),
        controller_meter: row.controller_meter.clone(),
    }
}

/// Translates SB `logical_flow` rows into `chassis_lflow` entries,
/// tracking named-set references so an address-set/port-group delta can
/// re-translate just the rows it touches.
#[derive(Default)]
pub struct LogicalTranslator {
    named_sets: NamedSetIndex,
    row_keys: HashMap<RowUuid, LflowKey>,
}

impl LogicalTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translates every SB `logical_flow` row relevant to a local datapath
    /// (or global, carrying no datapath at all) from scratch.
    pub fn full_run(
        &mut self,
        sb: &SbSnapshot,
        local_datapaths: &HashSet<RowUuid>,
        resolve_index: &dyn Fn(RowUuid) -> Option<u32>,
        table: &mut LflowTable,
    ) {
        self.row_keys.clear();
        self.named_sets.clear();
        let rows: Vec<LogicalFlowRow> = sb
            .logical_flows
            .iter()
            .filter(|(_, row)| is_relevant(row, local_datapaths))
            .map(|(_, row)| row.clone())
            .collect();
        for row in &rows {
            let resolved_match = resolve_match(sb, &row.match_, &mut self.named_sets, row.uuid);
            let key = key_for(row, resolved_match);
            self.row_keys.insert(row.uuid, key.clone());
            table.add_lflow(key, DatapathTarget::Set(bitmap_for(row, resolve_index)), Some(row.uuid), None);
        }
    }

    /// Re-translates only the logical-flow rows that reference one of
    /// `names`. Returns `false` (escalate to a full recompute) if any
    /// affected row has no cached key to remove — a state that should
    /// never arise once `full_run` has populated the cache, but is treated
    /// as "cannot handle" rather than a panic since it is driven by
    /// external data.
    pub fn retranslate_names(
        &mut self,
        sb: &mut SbSnapshot,
        names: &[String],
        resolve_index: &dyn Fn(RowUuid) -> Option<u32>,
        table: &mut LflowTable,
        dpg: &mut DpgTable,
    ) -> bool {
        let mut affected: HashSet<RowUuid> = HashSet::new();
        for name in names {
            affected.extend(self.named_sets.affected(name));
        }
        for uuid in affected {
            let Some(old_key) = self.row_keys.remove(&uuid) else {
                return false;
            };
            table.remove_key(&old_key, dpg, sb);
            let Some(row) = sb.logical_flows.get(uuid).cloned() else {
                self.named_sets.clear_row(uuid);
                continue;
            };
            self.named_sets.clear_row(uuid);
            let resolved_match = resolve_match(sb, &row.match_, &mut self.named_sets, uuid);
            let key = key_for(&row, resolved_match);
            self.row_keys.insert(uuid, key.clone());
            table.add_lflow(key, DatapathTarget::Set(bitmap_for(&row, resolve_index)), Some(uuid), None);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use chassis_idl::sb::AddressSet;

    use super::*;

    struct Identity;
    impl chassis_lflow::DatapathIndex for Identity {
        fn datapath_uuid(&self, _index: u32) -> RowUuid {
            RowUuid::new_v4()
        }
    }

    fn flow_row(uuid: RowUuid, match_: &str) -> LogicalFlowRow {
        LogicalFlowRow {
            uuid,
            stage: "ls_in_acl".to_owned(),
            priority: 1000,
            match_: match_.to_owned(),
            actions: "next;".to_owned(),
            controller_meter: None,
            datapath: None,
            datapath_group: None,
            stage_hint: None,
        }
    }

    fn no_datapaths(_: RowUuid) -> Option<u32> {
        None
    }

    #[test]
    fn s5_address_set_delta_retranslates_only_referencing_row() {
        let mut sb = SbSnapshot::default();
        let as_uuid = RowUuid::new_v4();
        sb.address_sets.insert(
            as_uuid,
            AddressSet {
                name: "as1".to_owned(),
                addresses: vec!["10.0.0.1".to_owned(), "10.0.0.2".to_owned()],
            },
        );
        let f1 = RowUuid::new_v4();
        sb.logical_flows.insert(f1, flow_row(f1, "ip4.src == $as1"));
        let f2 = RowUuid::new_v4();
        sb.logical_flows.insert(f2, flow_row(f2, "ip4.src == 10.9.9.9"));

        let mut translator = LogicalTranslator::new();
        let mut table = LflowTable::new();
        let mut dpg = DpgTable::new();
        translator.full_run(&sb, &HashSet::new(), &no_datapaths, &mut table);
        table.resolve_groups(&mut dpg, &mut sb);
        dpg.bind_sb_rows(&mut sb, &Identity);
        table.sync_to_sb(&dpg, &Identity, &mut sb);
        assert_eq!(sb.logical_flows.len(), 2);

        sb.address_sets.update(as_uuid, |a| {
            a.addresses = vec!["10.0.0.1".to_owned(), "10.0.0.3".to_owned()];
        });
        sb.clear_tracking();

        let handled = translator.retranslate_names(&mut sb, &["as1".to_owned()], &no_datapaths, &mut table, &mut dpg);
        assert!(handled);
        assert!(translator.row_keys.contains_key(&f2), "f2 never referenced as1, its key must be untouched");

        table.resolve_groups(&mut dpg, &mut sb);
        dpg.bind_sb_rows(&mut sb, &Identity);
        sb.clear_tracking();
        table.sync_to_sb(&dpg, &Identity, &mut sb);

        assert_eq!(sb.logical_flows.created().count(), 1);
        assert_eq!(sb.logical_flows.updated().count(), 0, "f2 never referenced as1 and must be left untouched");
        assert_eq!(sb.logical_flows.deleted().count(), 1);
        assert_eq!(sb.logical_flows.len(), 2);
    }

    #[test]
    fn unaffected_name_returns_true_with_no_changes() {
        let mut sb = SbSnapshot::default();
        let f1 = RowUuid::new_v4();
        sb.logical_flows.insert(f1, flow_row(f1, "ip4.src == 10.0.0.1"));
        let mut translator = LogicalTranslator::new();
        let mut table = LflowTable::new();
        let mut dpg = DpgTable::new();
        translator.full_run(&sb, &HashSet::new(), &no_datapaths, &mut table);

        let handled = translator.retranslate_names(&mut sb, &["unrelated".to_owned()], &no_datapaths, &mut table, &mut dpg);
        assert!(handled);
        assert_eq!(table.len(), 1);
    }
}
