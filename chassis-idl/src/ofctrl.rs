//
// Copyright (c) The chassis-agent Contributors
//
// SPDX-License-Identifier: MIT
//

//! OpenFlow channel contract: flow add/modify/delete, flow-stats dump
//! filtered by `(cookie, cookie_mask)`, group/meter add/delete, barrier.
//! The wire codec itself is out of scope; matches and actions are carried
//! as opaque strings produced by the translation layer.

use chassis_utils::RowUuid;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FlowEntry {
    pub cookie: u64,
    pub table: u8,
    pub priority: u16,
    pub matches: String,
    pub actions: String,
    pub meter: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct FlowTable {
    pub flows: Vec<FlowEntry>,
}

#[derive(Clone, Debug, Default)]
pub struct ExtendTables {
    pub groups: Vec<u32>,
    pub meters: Vec<u32>,
}

/// A single flow-stats row as returned by a cookie-filtered dump.
#[derive(Clone, Copy, Debug)]
pub struct FlowStat {
    pub cookie: u64,
    pub idle_age_s: u64,
}

#[derive(Debug)]
pub enum OfError {
    NotConnected,
    CannotPut,
}

impl std::fmt::Display for OfError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OfError::NotConnected => write!(f, "OpenFlow channel not connected"),
            OfError::CannotPut => write!(f, "OpenFlow channel has in-flight messages"),
        }
    }
}

impl std::error::Error for OfError {}

/// OpenFlow channel contract, including the `cur_cfg`/`nb_cfg` catch-up pair.
pub trait OfCtrl {
    fn is_connected(&self) -> bool;

    /// Whether there are in-flight OF messages; while false, `put` must be
    /// deferred.
    fn can_put(&self) -> bool;

    fn put(&mut self, table: FlowTable, extend: ExtendTables) -> Result<(), OfError>;

    /// Dumps flow stats filtered by `(cookie, cookie_mask)`. Used by the
    /// MAC-binding ager.
    fn dump_flows(&self, cookie: u64, cookie_mask: u64) -> Vec<FlowStat>;

    fn barrier(&mut self) -> Result<(), OfError>;

    /// Publishes that processing has caught up with configuration version
    /// `nb_cfg`.
    fn advance_cur_cfg(&mut self, nb_cfg: u64);

    fn cur_cfg(&self) -> u64;
}

/// Derives the cookie filter for a MAC binding's flows.
pub fn mac_binding_cookie(uuid: RowUuid) -> u64 {
    uuid.as_cookie()
}

#[derive(Default)]
pub struct MemOfCtrl {
    pub connected: bool,
    pub in_flight: bool,
    pub installed: FlowTable,
    pub stats: Vec<FlowStat>,
    pub nb_cfg: u64,
    pub cur_cfg: u64,
}

impl MemOfCtrl {
    pub fn new() -> Self {
        MemOfCtrl {
            connected: true,
            in_flight: false,
            installed: FlowTable::default(),
            stats: Vec::new(),
            nb_cfg: 0,
            cur_cfg: 0,
        }
    }
}

impl OfCtrl for MemOfCtrl {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn can_put(&self) -> bool {
        !self.in_flight
    }

    fn put(&mut self, table: FlowTable, _extend: ExtendTables) -> Result<(), OfError> {
        if !self.connected {
            return Err(OfError::NotConnected);
        }
        if self.in_flight {
            return Err(OfError::CannotPut);
        }
        self.installed = table;
        Ok(())
    }

    fn dump_flows(&self, cookie: u64, cookie_mask: u64) -> Vec<FlowStat> {
        self.stats
            .iter()
            .copied()
            .filter(|s| s.cookie & cookie_mask == cookie & cookie_mask)
            .collect()
    }

    fn barrier(&mut self) -> Result<(), OfError> {
        Ok(())
    }

    fn advance_cur_cfg(&mut self, nb_cfg: u64) {
        self.cur_cfg = nb_cfg;
    }

    fn cur_cfg(&self) -> u64 {
        self.cur_cfg
    }
}
