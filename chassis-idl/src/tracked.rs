//
// Copyright (c) The chassis-agent Contributors
//
// SPDX-License-Identifier: MIT
//

//! Per-table change tracking: `is_new` / `is_updated` / `is_deleted`.
//!
//! A [`Table`] holds the current snapshot of a database table plus the
//! NEW/UPDATED/DELETED bookkeeping accumulated since the last time
//! [`Table::clear_tracking`] was called (done by the engine at the end of
//! every iteration).

use std::collections::HashMap;

use chassis_utils::RowUuid;

#[derive(Clone, Debug)]
pub struct Table<T> {
    rows: HashMap<RowUuid, T>,
    created: Vec<RowUuid>,
    updated: Vec<RowUuid>,
    deleted: HashMap<RowUuid, T>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Table {
            rows: HashMap::new(),
            created: Vec::new(),
            updated: Vec::new(),
            deleted: HashMap::new(),
        }
    }
}

impl<T> Table<T> {
    pub fn insert(&mut self, uuid: RowUuid, row: T) {
        self.rows.insert(uuid, row);
        self.created.push(uuid);
    }

    pub fn update(&mut self, uuid: RowUuid, f: impl FnOnce(&mut T)) {
        if let Some(row) = self.rows.get_mut(&uuid) {
            f(row);
            self.updated.push(uuid);
        }
    }

    pub fn remove(&mut self, uuid: RowUuid) {
        if let Some(row) = self.rows.remove(&uuid) {
            self.deleted.insert(uuid, row);
        }
    }

    pub fn get(&self, uuid: RowUuid) -> Option<&T> {
        self.rows.get(&uuid)
    }

    pub fn iter(&self) -> impl Iterator<Item = (RowUuid, &T)> {
        self.rows.iter().map(|(uuid, row)| (*uuid, row))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_new(&self, uuid: RowUuid) -> bool {
        self.created.contains(&uuid)
    }

    pub fn is_updated(&self, uuid: RowUuid) -> bool {
        self.updated.contains(&uuid)
    }

    pub fn is_deleted(&self, uuid: RowUuid) -> bool {
        self.deleted.contains_key(&uuid)
    }

    pub fn created(&self) -> impl Iterator<Item = RowUuid> + '_ {
        self.created.iter().copied()
    }

    pub fn updated(&self) -> impl Iterator<Item = RowUuid> + '_ {
        self.updated.iter().copied()
    }

    pub fn deleted(&self) -> impl Iterator<Item = (RowUuid, &T)> {
        self.deleted.iter().map(|(uuid, row)| (*uuid, row))
    }

    pub fn has_changes(&self) -> bool {
        !self.created.is_empty() || !self.updated.is_empty() || !self.deleted.is_empty()
    }

    /// Clears the NEW/UPDATED/DELETED bookkeeping, keeping the row snapshot.
    /// Called by the engine once per iteration.
    pub fn clear_tracking(&mut self) {
        self.created.clear();
        self.updated.clear();
        self.deleted.clear();
    }
}
