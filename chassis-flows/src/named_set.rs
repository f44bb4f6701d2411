//
// Copyright (c) The chassis-agent Contributors
//
// SPDX-License-Identifier: MIT
//

//! Reverse index from a named set (address set or port group) to the
//! logical-flow rows whose match expands a `$name` reference to it.
//!
//! Populated during translation and consulted on an address-set/port-group
//! delta so only the affected rows get re-translated instead of the whole
//! table.

use std::collections::{HashMap, HashSet};

use chassis_utils::RowUuid;

#[derive(Default)]
pub struct NamedSetIndex {
    by_name: HashMap<String, HashSet<RowUuid>>,
    by_row: HashMap<RowUuid, HashSet<String>>,
}

impl NamedSetIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every reference this row held, so a re-translation can
    /// re-register from scratch without accumulating stale names.
    pub fn clear_row(&mut self, row: RowUuid) {
        if let Some(names) = self.by_row.remove(&row) {
            for name in names {
                if let Some(rows) = self.by_name.get_mut(&name) {
                    rows.remove(&row);
                    if rows.is_empty() {
                        self.by_name.remove(&name);
                    }
                }
            }
        }
    }

    pub fn add_ref(&mut self, row: RowUuid, name: &str) {
        self.by_name.entry(name.to_owned()).or_default().insert(row);
        self.by_row.entry(row).or_default().insert(name.to_owned());
    }

    /// Rows whose translation consulted `name`.
    pub fn affected(&self, name: &str) -> HashSet<RowUuid> {
        self.by_name.get(name).cloned().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Drops every reference this index holds. Used before a from-scratch
    /// retranslation pass so a deleted row's references don't linger
    /// forever (`clear_row` only reaches rows a caller still knows about).
    pub fn clear(&mut self) {
        self.by_name.clear();
        self.by_row.clear();
    }
}

/// Extracts `$name` tokens from a match expression. The match language
/// itself is out of scope; this only needs to find the named-set
/// references a match string embeds.
pub fn extract_refs(match_: &str) -> Vec<&str> {
    match_
        .split(|c: char| !c.is_alphanumeric() && c != '_' && c != '$')
        .filter_map(|tok| tok.strip_prefix('$'))
        .filter(|name| !name.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_multiple_refs() {
        let refs = extract_refs("ip4.src == $as1 && ip4.dst == $as2");
        assert_eq!(refs, vec!["as1", "as2"]);
    }

    #[test]
    fn reref_after_clear_drops_old_name() {
        let mut index = NamedSetIndex::new();
        let row = RowUuid::new_v4();
        index.add_ref(row, "as1");
        assert!(index.affected("as1").contains(&row));

        index.clear_row(row);
        index.add_ref(row, "as2");
        assert!(index.affected("as1").is_empty());
        assert!(index.affected("as2").contains(&row));
    }

    #[test]
    fn unrelated_name_delta_leaves_index_untouched() {
        let mut index = NamedSetIndex::new();
        let row = RowUuid::new_v4();
        index.add_ref(row, "as1");
        assert!(index.affected("unrelated").is_empty());
        assert!(index.affected("as1").contains(&row));
    }

    #[test]
    fn clear_drops_every_reference() {
        let mut index = NamedSetIndex::new();
        let row = RowUuid::new_v4();
        index.add_ref(row, "as1");
        index.clear();
        assert!(index.affected("as1").is_empty());
        assert!(index.is_empty());
    }
}
