use serde::{Deserialize, Serialize};
use tally_storage::{DBBytes, DBInt, DBSerde, KVTable, CF_HEADS, CF_KEYS};

/// address → leaf index side table, keyed by `namespace ‖ address`.
pub(crate) struct KeysKV;

impl KVTable<DBBytes, DBInt> for KeysKV {
    const CF_NAME: &'static str = CF_KEYS;
}

/// Census head records, keyed by `tag ‖ raw key`.
pub(crate) struct HeadsKV;

impl KVTable<DBBytes, DBSerde<HeadRecord>> for HeadsKV {
    const CF_NAME: &'static str = CF_HEADS;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct HeadRecord {
    /// Unix timestamp in milliseconds; drives working-census purging.
    pub created_at_ms: u64,
    /// Current root for contract-bound censuses.
    pub root: Option<[u8; 32]>,
    /// Upstream events already consumed for contract-bound censuses;
    /// paginated importers resume from here.
    pub processed_events: u64,
}

impl HeadRecord {
    pub fn new(created_at_ms: u64) -> Self {
        Self {
            created_at_ms,
            root: None,
            processed_events: 0,
        }
    }
}
