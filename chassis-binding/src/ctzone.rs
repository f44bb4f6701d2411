//
// Copyright (c) The chassis-agent Contributors
//
// SPDX-License-Identifier: MIT
//

//! Conntrack-zone allocator: one 16-bit zone id per `user` (a local
//! logical port, or `{lrID}_dnat` / `{lrID}_snat` per logical router),
//! persisted in the integration bridge's `external_ids`.

use std::collections::BTreeMap;

const MAX_ZONES: u32 = 1 << 16;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PendingState {
    OfQueued,
    DbQueued,
    DbSent,
}

#[derive(Clone, Debug)]
pub struct PendingEntry {
    pub state: PendingState,
    pub zone: u16,
    pub add: bool,
}

/// Bitmap of in-use zones (bit 0 reserved) plus the `user -> zone` map and
/// its pending-commit state machine.
pub struct CtZoneAllocator {
    words: Vec<u64>,
    by_user: BTreeMap<String, u16>,
    pending: BTreeMap<String, PendingEntry>,
    scan_cursor: u32,
}

impl Default for CtZoneAllocator {
    fn default() -> Self {
        let mut allocator = CtZoneAllocator {
            words: vec![0; (MAX_ZONES / 64) as usize],
            by_user: BTreeMap::new(),
            pending: BTreeMap::new(),
            scan_cursor: 1,
        };
        allocator.mark_used(0);
        allocator
    }
}

impl CtZoneAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn zone_of(&self, user: &str) -> Option<u16> {
        self.by_user.get(user).copied()
    }

    pub fn pending(&self) -> &BTreeMap<String, PendingEntry> {
        &self.pending
    }

    pub fn live_count(&self) -> usize {
        self.by_user.len()
    }

    /// Repopulates the map and bitmap from the bridge's persisted
    /// `ct-zone-<user>` entries. Issues no OF flush for restored zones.
    pub fn restore(&mut self, persisted: &BTreeMap<String, u16>) {
        self.by_user.clear();
        self.words.fill(0);
        self.mark_used(0);
        for (user, &zone) in persisted {
            self.mark_used(zone as u32);
            self.by_user.insert(user.clone(), zone);
        }
    }

    fn mark_used(&mut self, zone: u32) {
        self.words[(zone / 64) as usize] |= 1 << (zone % 64);
    }

    fn mark_free(&mut self, zone: u32) {
        self.words[(zone / 64) as usize] &= !(1 << (zone % 64));
    }

    fn is_used(&self, zone: u32) -> bool {
        self.words[(zone / 64) as usize] & (1 << (zone % 64)) != 0
    }

    fn alloc(&mut self) -> Option<u16> {
        for offset in 0..MAX_ZONES {
            let candidate = (self.scan_cursor + offset) % MAX_ZONES;
            if candidate == 0 {
                continue;
            }
            if !self.is_used(candidate) {
                self.mark_used(candidate);
                self.scan_cursor = (candidate + 1) % MAX_ZONES;
                return Some(candidate as u16);
            }
        }
        None
    }

    /// Runs one allocation pass against the desired set of `user` names,
    /// queuing additions and removals. Returns `false` if a needed zone
    /// could not be allocated (zones exhausted); the caller should warn,
    /// rate-limited, and skip the affected user.
    pub fn run(&mut self, desired: &[String]) -> bool {
        let desired_set: std::collections::BTreeSet<&str> =
            desired.iter().map(String::as_str).collect();
        let mut ok = true;

        let current: Vec<String> = self.by_user.keys().cloned().collect();
        for user in current {
            if !desired_set.contains(user.as_str()) {
                if let Some(zone) = self.by_user.remove(&user) {
                    self.mark_free(zone as u32);
                    self.pending.insert(
                        user,
                        PendingEntry {
                            state: PendingState::DbQueued,
                            zone,
                            add: false,
                        },
                    );
                }
            }
        }

        for &user in &desired_set {
            if self.by_user.contains_key(user) {
                continue;
            }
            match self.alloc() {
                Some(zone) => {
                    self.by_user.insert(user.to_owned(), zone);
                    self.pending.insert(
                        user.to_owned(),
                        PendingEntry {
                            state: PendingState::OfQueued,
                            zone,
                            add: true,
                        },
                    );
                }
                None => {
                    tracing::warn!(%user, "conntrack zones exhausted, skipping allocation");
                    ok = false;
                }
            }
        }
        ok
    }

    /// Transitions every `DB_QUEUED` entry to `DB_SENT`, returning the
    /// `user -> zone` snapshot to persist to the bridge's `external_ids`
    /// in the same vswitch transaction.
    pub fn commit_db_queued(&mut self) -> BTreeMap<String, u16> {
        for entry in self.pending.values_mut() {
            if entry.state == PendingState::DbQueued {
                entry.state = PendingState::DbSent;
            }
        }
        self.by_user.clone()
    }

    /// Call after the vswitch transaction that wrote `commit_db_queued`'s
    /// snapshot succeeds: removes every `DB_SENT` entry.
    pub fn ack_commit(&mut self) {
        self.pending
            .retain(|_, entry| entry.state != PendingState::DbSent);
    }

    /// Call if that vswitch transaction fails: rolls `DB_SENT` back to
    /// `DB_QUEUED` for retry.
    pub fn rollback_commit(&mut self) {
        for entry in self.pending.values_mut() {
            if entry.state == PendingState::DbSent {
                entry.state = PendingState::DbQueued;
            }
        }
    }

    /// Entries the OF installer still needs to act on.
    pub fn of_queued(&self) -> impl Iterator<Item = (&str, &PendingEntry)> {
        self.pending
            .iter()
            .filter(|(_, e)| e.state == PendingState::OfQueued)
            .map(|(user, e)| (user.as_str(), e))
    }

    pub fn mark_of_sent(&mut self, user: &str) {
        if let Some(entry) = self.pending.get_mut(user) {
            if entry.state == PendingState::OfQueued {
                entry.state = PendingState::DbQueued;
            }
        }
    }
}
