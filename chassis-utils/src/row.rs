//
// Copyright (c) The chassis-agent Contributors
//
// SPDX-License-Identifier: MIT
//

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a database row (SB, NB, or vswitch IDL), used as the stable
/// key that survives a row's lifetime across incremental engine runs.
///
/// Flow cookies are derived from this value so flow stats can be mapped
/// back to their originating row.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct RowUuid(Uuid);

impl RowUuid {
    pub fn new_v4() -> Self {
        RowUuid(Uuid::new_v4())
    }

    pub fn nil() -> Self {
        RowUuid(Uuid::nil())
    }

    /// Derives an OpenFlow cookie from this row's identity. Mirrors how the
    /// flow-installer maps `(cookie, cookie_mask)` dumps back to the SB row
    /// that produced them.
    pub fn as_cookie(&self) -> u64 {
        let bytes = self.0.as_bytes();
        u64::from_be_bytes(bytes[0..8].try_into().unwrap())
    }
}

impl From<Uuid> for RowUuid {
    fn from(uuid: Uuid) -> Self {
        RowUuid(uuid)
    }
}

impl std::fmt::Display for RowUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
