//
// Copyright (c) The chassis-agent Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{HashMap, HashSet};

use chassis_idl::sb::{DatapathGroupRow, SbSnapshot};
use chassis_utils::{DatapathBitmap, RowUuid};
use generational_arena::{Arena, Index};

use crate::DatapathIndex;

struct DpgRecord {
    bitmap: DatapathBitmap,
    refcount: u32,
    sb_uuid: Option<RowUuid>,
}

/// The deduplicated table of datapath groups. Groups are identified by
/// their bitmap: two lflow entries that apply to the same set of
/// datapaths share one group, and the group is freed once its last
/// referrer drops it.
#[derive(Default)]
pub struct DpgTable {
    arena: Arena<DpgRecord>,
    index: HashMap<DatapathBitmap, Index>,
}

impl DpgTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn refcount(&self, idx: Index) -> u32 {
        self.arena.get(idx).map_or(0, |r| r.refcount)
    }

    pub fn bitmap(&self, idx: Index) -> Option<&DatapathBitmap> {
        self.arena.get(idx).map(|r| &r.bitmap)
    }

    /// Finds or creates the group for `bitmap`, incrementing its refcount.
    pub fn acquire(&mut self, bitmap: DatapathBitmap) -> Index {
        if let Some(&idx) = self.index.get(&bitmap) {
            self.arena[idx].refcount += 1;
            return idx;
        }
        let idx = self.arena.insert(DpgRecord {
            bitmap: bitmap.clone(),
            refcount: 1,
            sb_uuid: None,
        });
        self.index.insert(bitmap, idx);
        idx
    }

    /// Drops one reference to the group at `idx`. When the refcount
    /// reaches zero, the group (and its bound SB row, if any) is freed.
    pub fn release(&mut self, idx: Index, sb: &mut SbSnapshot) {
        let Some(record) = self.arena.get_mut(idx) else {
            return;
        };
        record.refcount = record.refcount.saturating_sub(1);
        if record.refcount == 0 {
            if let Some(uuid) = record.sb_uuid {
                sb.datapath_groups.remove(uuid);
            }
            self.index.remove(&record.bitmap);
            self.arena.remove(idx);
        }
    }

    /// Binds every live group that lacks an SB row yet to one: reusing an
    /// SB `datapath_group` row not already claimed by another live group
    /// where possible, otherwise inserting a fresh row. Must run after all
    /// `acquire`/`release` calls for the iteration and before the
    /// logical-flow sync pass, so entries can read `sb_uuid_of`.
    pub fn bind_sb_rows(&mut self, sb: &mut SbSnapshot, datapaths: &dyn DatapathIndex) {
        let claimed: HashSet<RowUuid> =
            self.arena.iter().filter_map(|(_, r)| r.sb_uuid).collect();
        let mut reusable: Vec<RowUuid> = sb
            .datapath_groups
            .iter()
            .map(|(uuid, _)| uuid)
            .filter(|uuid| !claimed.contains(uuid))
            .collect();

        for (_, record) in self.arena.iter_mut() {
            if record.sb_uuid.is_some() {
                continue;
            }
            let dp_uuids: Vec<RowUuid> =
                record.bitmap.iter().map(|i| datapaths.datapath_uuid(i)).collect();
            if let Some(reuse_uuid) = reusable.pop() {
                sb.datapath_groups
                    .update(reuse_uuid, |row| row.datapaths = dp_uuids);
                record.sb_uuid = Some(reuse_uuid);
            } else {
                let uuid = RowUuid::new_v4();
                sb.datapath_groups.insert(
                    uuid,
                    DatapathGroupRow {
                        uuid,
                        datapaths: dp_uuids,
                    },
                );
                record.sb_uuid = Some(uuid);
            }
        }

        // Any SB row still unclaimed at this point belongs to no live
        // group; the invariant that the in-memory and SB tables agree
        // means it must go.
        let still_claimed: HashSet<RowUuid> =
            self.arena.iter().filter_map(|(_, r)| r.sb_uuid).collect();
        let stale: Vec<RowUuid> = sb
            .datapath_groups
            .iter()
            .map(|(uuid, _)| uuid)
            .filter(|uuid| !still_claimed.contains(uuid))
            .collect();
        for uuid in stale {
            sb.datapath_groups.remove(uuid);
        }
    }

    pub fn sb_uuid_of(&self, idx: Index) -> Option<RowUuid> {
        self.arena.get(idx).and_then(|r| r.sb_uuid)
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

    #[test]
    fn reuse_by_bitmap() {
        let mut table = DpgTable::new();
        let a = DatapathBitmap::from_iter([1, 2, 3]);
        let idx1 = table.acquire(a.clone());
        let idx2 = table.acquire(a);
        assert_eq!(idx1, idx2);
        assert_eq!(table.refcount(idx1), 2);
    }

    #[test]
    fn freed_at_zero_refcount() {
        let mut table = DpgTable::new();
        let mut sb = SbSnapshot::default();
        let bitmap = DatapathBitmap::from_iter([5, 6]);
        let idx = table.acquire(bitmap);
        table.bind_sb_rows(&mut sb, &Identity);
        assert_eq!(sb.datapath_groups.len(), 1);

        table.release(idx, &mut sb);
        assert_eq!(table.len(), 0);
        assert_eq!(sb.datapath_groups.len(), 0);
    }

    #[test]
    fn reuses_unclaimed_sb_row() {
        let mut table = DpgTable::new();
        let mut sb = SbSnapshot::default();
        let first = table.acquire(DatapathBitmap::from_iter([1]));
        table.bind_sb_rows(&mut sb, &Identity);
        let first_uuid = table.sb_uuid_of(first).unwrap();

        table.release(first, &mut sb);
        assert!(sb.datapath_groups.get(first_uuid).is_none());

        let second = table.acquire(DatapathBitmap::from_iter([2, 3]));
        table.bind_sb_rows(&mut sb, &Identity);
        assert_eq!(sb.datapath_groups.len(), 1);
        assert!(table.sb_uuid_of(second).is_some());
    }
}
