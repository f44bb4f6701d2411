//
// Copyright (c) The chassis-agent Contributors
//
// SPDX-License-Identifier: MIT
//

//! MAC-binding ager: deletes SB MAC-binding rows whose installed flows
//! show no activity for a configured threshold.
//!
//! Keyed by the binding's row UUID plus a generation counter rather than a
//! held reference to the SB row, so it stays correct across PB deletions
//! (the UUID key simply stops showing up in the next dump instead of
//! dangling).

use chassis_idl::ofctrl::{mac_binding_cookie, OfCtrl};
use chassis_idl::sb::{MacBinding, SbSnapshot, SbTxn};
use chassis_utils::RowUuid;
use std::collections::{HashMap, HashSet};

struct AgeEntry {
    last_check_ms: u64,
    idle_age_ms: u64,
    generation: u64,
}

/// `threshold_ms == 0` disables aging entirely.
pub struct MacBindingAger {
    threshold_ms: u64,
    entries: HashMap<RowUuid, AgeEntry>,
    generation: u64,
}

impl MacBindingAger {
    pub fn new(threshold_ms: u64) -> Self {
        MacBindingAger {
            threshold_ms,
            entries: HashMap::new(),
            generation: 0,
        }
    }

    pub fn idle_age_ms(&self, uuid: RowUuid) -> Option<u64> {
        self.entries.get(&uuid).map(|e| e.idle_age_ms)
    }

    /// Runs one ager pass: refreshes the generation for every MAC binding
    /// belonging to `chassis`, reaps entries that dropped out, checks
    /// idle-age via flow stats for entries due for a check, and returns
    /// the SB transaction deleting any binding that crossed the threshold.
    pub fn run(&mut self, chassis_bindings: &[RowUuid], sb: &SbSnapshot, of: &dyn OfCtrl, now_ms: u64) -> SbTxn {
        let mut txn = SbTxn::default();
        if self.threshold_ms == 0 {
            return txn;
        }
        self.generation += 1;
        let generation = self.generation;

        let mut just_appeared: HashSet<RowUuid> = HashSet::new();
        for &uuid in chassis_bindings {
            // A freshly-appeared binding starts with last_check_ms at 0
            // rather than now_ms (the UUID+generation form carries no
            // creation timestamp of its own), and is always checked on the
            // pass it appears instead of waiting a full threshold first.
            self.entries.entry(uuid).or_insert_with(|| {
                just_appeared.insert(uuid);
                AgeEntry { last_check_ms: 0, idle_age_ms: 0, generation }
            });
            if let Some(entry) = self.entries.get_mut(&uuid) {
                entry.generation = generation;
            }
        }

        self.entries.retain(|_, entry| entry.generation == self.generation);

        let stale: Vec<RowUuid> = self
            .entries
            .iter()
            .filter(|(uuid, e)| {
                just_appeared.contains(uuid) || now_ms.saturating_sub(e.last_check_ms) + e.idle_age_ms >= self.threshold_ms
            })
            .map(|(uuid, _)| *uuid)
            .collect();

        for uuid in stale {
            let cookie = mac_binding_cookie(uuid);
            let stats = of.dump_flows(cookie, u64::MAX);
            // Exactly two rows expected (one per direction); any other
            // multiplicity is a structural violation that is skipped, not
            // fatal, per the general error-handling taxonomy.
            if stats.len() != 2 {
                continue;
            }
            let idle_age_ms = stats.iter().map(|s| s.idle_age_s).min().unwrap_or(0) * 1000;
            let entry = self.entries.get_mut(&uuid).expect("just filtered from entries");
            entry.idle_age_ms = idle_age_ms;
            entry.last_check_ms = now_ms;

            if idle_age_ms >= self.threshold_ms {
                if sb.mac_bindings.get(uuid).is_some() {
                    txn.delete_mac_bindings.push(uuid);
                }
                self.entries.remove(&uuid);
            }
        }

        txn
    }
}

pub fn local_mac_bindings(sb: &SbSnapshot, local_datapaths: &[RowUuid]) -> Vec<RowUuid> {
    sb.mac_bindings
        .iter()
        .filter(|(_, mb)| local_datapaths.contains(&mb.datapath))
        .map(|(uuid, _)| uuid)
        .collect()
}

#[allow(dead_code)]
fn _type_hint(_: &MacBinding) {}

#[cfg(test)]
mod tests {
    use chassis_idl::ofctrl::{FlowStat, MemOfCtrl};

    use super::*;

    #[test]
    fn s4_mac_binding_aging() {
        let mut sb = SbSnapshot::default();
        let uuid = RowUuid::new_v4();
        sb.mac_bindings.insert(
            uuid,
            MacBinding {
                uuid,
                logical_port: "lrp1".to_owned(),
                datapath: RowUuid::new_v4(),
                ip: "10.0.0.5".to_owned(),
                mac: chassis_utils::MacAddr::from([0, 1, 2, 3, 4, 5]),
            },
        );
        let mut of = MemOfCtrl::new();
        let cookie = mac_binding_cookie(uuid);
        of.stats = vec![
            FlowStat { cookie, idle_age_s: 59 },
            FlowStat { cookie, idle_age_s: 61 },
        ];

        let mut ager = MacBindingAger::new(60_000);
        let txn = ager.run(&[uuid], &sb, &of, 0);
        assert!(txn.delete_mac_bindings.is_empty());
        assert_eq!(ager.idle_age_ms(uuid), Some(59_000));

        of.stats = vec![
            FlowStat { cookie, idle_age_s: 61 },
            FlowStat { cookie, idle_age_s: 61 },
        ];
        let txn2 = ager.run(&[uuid], &sb, &of, 61_000);
        assert_eq!(txn2.delete_mac_bindings, vec![uuid]);
    }

    #[test]
    fn threshold_zero_disables_aging() {
        let sb = SbSnapshot::default();
        let of = MemOfCtrl::new();
        let mut ager = MacBindingAger::new(0);
        let uuid = RowUuid::new_v4();
        let txn = ager.run(&[uuid], &sb, &of, 1_000_000);
        assert!(txn.delete_mac_bindings.is_empty());
    }

    #[test]
    fn wrong_row_multiplicity_skips_update() {
        let sb = SbSnapshot::default();
        let uuid = RowUuid::new_v4();
        let mut of = MemOfCtrl::new();
        let cookie = mac_binding_cookie(uuid);
        of.stats = vec![FlowStat { cookie, idle_age_s: 100 }];

        let mut ager = MacBindingAger::new(1);
        ager.run(&[uuid], &sb, &of, 0);
        assert_eq!(ager.idle_age_ms(uuid), Some(0));
    }

    #[test]
    fn dangling_uuid_is_reaped_not_dereferenced() {
        let sb = SbSnapshot::default();
        let of = MemOfCtrl::new();
        let mut ager = MacBindingAger::new(60_000);
        let uuid = RowUuid::new_v4();
        ager.run(&[uuid], &sb, &of, 0);
        assert!(ager.idle_age_ms(uuid).is_some());

        // The binding vanished from the chassis (e.g. its PB was deleted);
        // the next pass must drop the entry via the generation counter,
        // never by dereferencing a stale pointer.
        ager.run(&[], &sb, &of, 0);
        assert_eq!(ager.idle_age_ms(uuid), None);
    }
}
