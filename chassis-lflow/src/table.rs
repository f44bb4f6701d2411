//
// Copyright (c) The chassis-agent Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{HashMap, HashSet};

use chassis_idl::sb::{LogicalFlowRow, SbSnapshot};
use chassis_utils::{DatapathBitmap, RowUuid};
use generational_arena::Index;

use crate::dpg::DpgTable;
use crate::key::LflowKey;
use crate::DatapathIndex;

/// The datapath(s) a single `add_lflow` call contributes to an entry.
#[derive(Clone, Debug)]
pub enum DatapathTarget {
    Single(u32),
    Set(DatapathBitmap),
}

impl DatapathTarget {
    fn into_bitmap(self) -> DatapathBitmap {
        match self {
            DatapathTarget::Single(index) => DatapathBitmap::with_bit(index),
            DatapathTarget::Set(bitmap) => bitmap,
        }
    }
}

pub struct LflowEntry {
    pub bitmap: DatapathBitmap,
    pub source: Option<RowUuid>,
    dpg: Option<Index>,
    resolved_bitmap: DatapathBitmap,
    owners: HashSet<RowUuid>,
}

impl LflowEntry {
    fn new() -> Self {
        LflowEntry {
            bitmap: DatapathBitmap::new(),
            source: None,
            dpg: None,
            resolved_bitmap: DatapathBitmap::new(),
            owners: HashSet::new(),
        }
    }

    /// Number of distinct owning lflow-refs attached to this entry. An
    /// entry that no `add_lflow` call ever attached an owner to keeps a
    /// refcount of zero for its whole life — it is never swept by a
    /// background pass, only an explicit `reset_owner` call can free an
    /// entry, and only once every owner it ever had has detached.
    pub fn refcount(&self) -> usize {
        self.owners.len()
    }

    pub fn datapath_group(&self) -> Option<Index> {
        self.dpg
    }
}

/// The shared, deduplicated logical-flow table: a hash-keyed multiset of
/// entries, each carrying the set of datapaths it applies to and the set
/// of owning resources (lflow-refs) that contributed to it.
#[derive(Default)]
pub struct LflowTable {
    entries: HashMap<LflowKey, LflowEntry>,
}

impl LflowTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &LflowKey) -> Option<&LflowEntry> {
        self.entries.get(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&LflowKey, &LflowEntry)> {
        self.entries.iter()
    }

    /// Adds a contribution to the entry keyed by `key`: unions in the given
    /// datapath(s) and, if `owner` is supplied and does not already own
    /// this entry, attaches it and bumps the refcount.
    pub fn add_lflow(
        &mut self,
        key: LflowKey,
        target: DatapathTarget,
        source: Option<RowUuid>,
        owner: Option<RowUuid>,
    ) {
        let entry = self.entries.entry(key).or_insert_with(LflowEntry::new);
        entry.bitmap.union_with(&target.into_bitmap());
        if let Some(source) = source {
            entry.source = Some(source);
        }
        if let Some(owner) = owner {
            entry.owners.insert(owner);
        }
    }

    /// Detaches `owner` from every entry it owns under `key`, decrementing
    /// the refcount; frees the entry (and its datapath-group reference) if
    /// the refcount reaches zero.
    pub fn release_owner(&mut self, key: &LflowKey, owner: RowUuid, dpg_table: &mut DpgTable, sb: &mut SbSnapshot) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        entry.owners.remove(&owner);
        if entry.owners.is_empty() {
            if let Some(dpg) = entry.dpg.take() {
                dpg_table.release(dpg, sb);
            }
            self.entries.remove(key);
        }
    }

    /// Removes an entry outright regardless of ownership, freeing its
    /// datapath-group reference if it held one. Used by callers that key
    /// entries by content rather than by owning resource (e.g. a named-set
    /// delta invalidating a handful of logical-flow translations) and so
    /// have no owner to release.
    pub fn remove_key(&mut self, key: &LflowKey, dpg_table: &mut DpgTable, sb: &mut SbSnapshot) {
        if let Some(mut entry) = self.entries.remove(key) {
            if let Some(dpg) = entry.dpg.take() {
                dpg_table.release(dpg, sb);
            }
        }
    }

    /// Drops every entry, releasing each one's datapath-group reference.
    /// A full recompute must call this before re-translating: otherwise a
    /// logical flow whose match changed, or whose row was deleted, leaves
    /// its old entry behind forever, and `sync_to_sb` never deletes the
    /// stale SB row that entry still matches by key.
    pub fn clear(&mut self, dpg_table: &mut DpgTable, sb: &mut SbSnapshot) {
        for (_, mut entry) in self.entries.drain() {
            if let Some(dpg) = entry.dpg.take() {
                dpg_table.release(dpg, sb);
            }
        }
    }

    /// Merges another table's entries into this one. Used to fold the
    /// per-shard tables built by [`crate::sharded::ShardedBuilder`] back
    /// into a single table; this is the only point the table is
    /// rebalanced when parallel build is used.
    pub fn absorb(&mut self, other: LflowTable) {
        for (key, other_entry) in other.entries {
            let entry = self.entries.entry(key).or_insert_with(LflowEntry::new);
            entry.bitmap.union_with(&other_entry.bitmap);
            if other_entry.source.is_some() {
                entry.source = other_entry.source;
            }
            entry.owners.extend(other_entry.owners);
        }
    }

    /// Resolves each entry's datapath-group reference against its current
    /// bitmap, acquiring/releasing groups in `dpg_table` as bitmaps change.
    /// Entries whose bitmap carries exactly one bit never hold a group —
    /// they attach directly to that single datapath.
    pub fn resolve_groups(&mut self, dpg_table: &mut DpgTable, sb: &mut SbSnapshot) {
        for entry in self.entries.values_mut() {
            if entry.bitmap == entry.resolved_bitmap {
                continue;
            }
            if let Some(old) = entry.dpg.take() {
                dpg_table.release(old, sb);
            }
            entry.dpg = entry
                .bitmap
                .single_bit()
                .is_none()
                .then(|| dpg_table.acquire(entry.bitmap.clone()));
            entry.resolved_bitmap = entry.bitmap.clone();
        }
    }

    /// Syncs the in-memory table to the SB `logical_flow` table: existing
    /// rows are updated in place or deleted if their entry is gone; unseen
    /// entries are inserted fresh. Must run after [`Self::resolve_groups`]
    /// and [`DpgTable::bind_sb_rows`] so every entry's group already has an
    /// SB UUID bound.
    pub fn sync_to_sb(&self, dpg_table: &DpgTable, datapaths: &dyn DatapathIndex, sb: &mut SbSnapshot) {
        let mut seen: HashSet<LflowKey> = HashSet::new();
        let existing: Vec<RowUuid> = sb.logical_flows.iter().map(|(uuid, _)| uuid).collect();
        for uuid in existing {
            let key = {
                let row = sb.logical_flows.get(uuid).expect("row just listed");
                LflowKey::from_row(row)
            };
            if let Some(entry) = self.entries.get(&key) {
                seen.insert(key);
                let (datapath, datapath_group) = self.resolve_fields(entry, dpg_table, datapaths);
                let source = entry.source;
                let row = sb.logical_flows.get(uuid).expect("row just listed");
                let unchanged =
                    row.datapath == datapath && row.datapath_group == datapath_group && row.stage_hint == source;
                if !unchanged {
                    sb.logical_flows.update(uuid, |row| {
                        row.datapath = datapath;
                        row.datapath_group = datapath_group;
                        row.stage_hint = source;
                    });
                }
            } else {
                sb.logical_flows.remove(uuid);
            }
        }

        for (key, entry) in &self.entries {
            if seen.contains(key) {
                continue;
            }
            let (datapath, datapath_group) = self.resolve_fields(entry, dpg_table, datapaths);
            let uuid = RowUuid::new_v4();
            sb.logical_flows.insert(
                uuid,
                LogicalFlowRow {
                    uuid,
                    stage: key.stage.clone(),
                    priority: key.priority,
                    match_: key.match_.clone(),
                    actions: key.actions.clone(),
                    controller_meter: key.controller_meter.clone(),
                    datapath,
                    datapath_group,
                    stage_hint: entry.source,
                },
            );
        }
    }

    fn resolve_fields(
        &self,
        entry: &LflowEntry,
        dpg_table: &DpgTable,
        datapaths: &dyn DatapathIndex,
    ) -> (Option<RowUuid>, Option<RowUuid>) {
        if let Some(index) = entry.bitmap.single_bit() {
            (Some(datapaths.datapath_uuid(index)), None)
        } else {
            let dpg_uuid = entry
                .dpg
                .and_then(|idx| dpg_table.sb_uuid_of(idx))
                .expect("resolve_groups + bind_sb_rows must run before sync_to_sb");
            (None, Some(dpg_uuid))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Identity;
    impl DatapathIndex for Identity {
        fn datapath_uuid(&self, _index: u32) -> RowUuid {
            RowUuid::new_v4()
        }
    }

    fn key(priority: u16) -> LflowKey {
        LflowKey {
            stage: "ls_in_acl".to_owned(),
            priority,
            match_: "ip4".to_owned(),
            actions: "next;".to_owned(),
            controller_meter: None,
        }
    }

    #[test]
    fn single_datapath_never_creates_a_group() {
        let mut table = LflowTable::new();
        let mut dpg = DpgTable::new();
        let mut sb = SbSnapshot::default();
        table.add_lflow(key(100), DatapathTarget::Single(1), None, None);
        table.resolve_groups(&mut dpg, &mut sb);
        dpg.bind_sb_rows(&mut sb, &Identity);
        table.sync_to_sb(&dpg, &Identity, &mut sb);

        assert_eq!(sb.logical_flows.len(), 1);
        assert_eq!(sb.datapath_groups.len(), 0);
    }

    #[test]
    fn shared_bitmap_reuses_one_group() {
        let mut table = LflowTable::new();
        let mut dpg = DpgTable::new();
        let mut sb = SbSnapshot::default();
        let bitmap = DatapathBitmap::from_iter([1, 2]);
        table.add_lflow(key(100), DatapathTarget::Set(bitmap.clone()), None, None);
        table.add_lflow(key(200), DatapathTarget::Set(bitmap), None, None);
        table.resolve_groups(&mut dpg, &mut sb);
        dpg.bind_sb_rows(&mut sb, &Identity);
        table.sync_to_sb(&dpg, &Identity, &mut sb);

        assert_eq!(sb.logical_flows.len(), 2);
        assert_eq!(sb.datapath_groups.len(), 1);
        assert_eq!(dpg.len(), 1);
    }

    #[test]
    fn owner_release_frees_entry_and_group() {
        let mut table = LflowTable::new();
        let mut dpg = DpgTable::new();
        let mut sb = SbSnapshot::default();
        let owner = RowUuid::new_v4();
        let bitmap = DatapathBitmap::from_iter([3, 4, 5]);
        let k = key(50);
        table.add_lflow(k.clone(), DatapathTarget::Set(bitmap), None, Some(owner));
        table.resolve_groups(&mut dpg, &mut sb);
        dpg.bind_sb_rows(&mut sb, &Identity);
        table.sync_to_sb(&dpg, &Identity, &mut sb);
        assert_eq!(table.get(&k).unwrap().refcount(), 1);
        assert_eq!(sb.logical_flows.len(), 1);

        table.release_owner(&k, owner, &mut dpg, &mut sb);
        assert!(table.get(&k).is_none());
        assert_eq!(dpg.len(), 0);

        table.sync_to_sb(&dpg, &Identity, &mut sb);
        assert_eq!(sb.logical_flows.len(), 0);
        assert_eq!(sb.datapath_groups.len(), 0);
    }

    #[test]
    fn stale_sb_row_with_no_matching_entry_is_deleted() {
        let mut table = LflowTable::new();
        let dpg = DpgTable::new();
        let mut sb = SbSnapshot::default();
        let uuid = RowUuid::new_v4();
        sb.logical_flows.insert(
            uuid,
            LogicalFlowRow {
                uuid,
                stage: "ls_in_acl".to_owned(),
                priority: 1,
                match_: "ip4".to_owned(),
                actions: "drop;".to_owned(),
                controller_meter: None,
                datapath: None,
                datapath_group: None,
                stage_hint: None,
            },
        );
        table.sync_to_sb(&dpg, &Identity, &mut sb);
        assert!(sb.logical_flows.is_empty());
    }

    #[test]
    fn absorb_merges_shards() {
        let mut a = LflowTable::new();
        let mut b = LflowTable::new();
        a.add_lflow(key(1), DatapathTarget::Single(1), None, None);
        b.add_lflow(key(1), DatapathTarget::Single(2), None, None);
        a.absorb(b);
        assert_eq!(a.len(), 1);
        let merged = a.get(&key(1)).unwrap();
        assert_eq!(merged.bitmap.popcount(), 2);
    }

    #[test]
    fn unowned_entries_never_swept_by_zero_refcount() {
        let mut table = LflowTable::new();
        table.add_lflow(key(1), DatapathTarget::Single(1), None, None);
        let k = key(1);
        assert_eq!(table.get(&k).unwrap().refcount(), 0);
        assert!(table.get(&k).is_some(), "no owner ever attached, so nothing can free it");
    }

    #[test]
    fn clear_drops_entries_and_releases_groups() {
        let mut table = LflowTable::new();
        let mut dpg = DpgTable::new();
        let mut sb = SbSnapshot::default();
        let bitmap = DatapathBitmap::from_iter([1, 2]);
        table.add_lflow(key(100), DatapathTarget::Set(bitmap), None, None);
        table.resolve_groups(&mut dpg, &mut sb);
        dpg.bind_sb_rows(&mut sb, &Identity);
        assert_eq!(dpg.len(), 1);

        table.clear(&mut dpg, &mut sb);
        assert!(table.is_empty());
        assert_eq!(dpg.len(), 0, "clear must release every entry's datapath-group reference");
    }
}
