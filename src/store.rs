//! In-memory store of completed request/response snapshots.
//!
//! Populated by the pipeline's lowest-priority `after-request` hook, so
//! every record reflects the fully finalized snapshot. Unbounded by design:
//! callers needing bounds clear it periodically.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::types::{RequestDescriptor, ResponseSnapshot, StoredRecord};

/// Keyed store of completed exchanges. Same-id saves overwrite.
pub struct RequestStore {
    records: RwLock<HashMap<Uuid, StoredRecord>>,
}

impl Default for RequestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Save a completed exchange under its request id, overwriting any
    /// previous record for that id.
    pub fn save(&self, request: RequestDescriptor, response: ResponseSnapshot) {
        let record = StoredRecord {
            request,
            response,
            saved_at: Utc::now(),
        };
        match self.records.write() {
            Ok(mut map) => {
                map.insert(record.request.id, record);
            }
            Err(e) => warn!(error = %e, "request store lock poisoned in save"),
        }
    }

    /// Fetch one record by request id.
    pub fn get(&self, id: Uuid) -> Option<StoredRecord> {
        match self.records.read() {
            Ok(map) => map.get(&id).cloned(),
            Err(e) => {
                warn!(error = %e, "request store lock poisoned in get");
                None
            }
        }
    }

    /// Every stored record, keyed by request id.
    pub fn get_all(&self) -> HashMap<Uuid, StoredRecord> {
        match self.records.read() {
            Ok(map) => map.clone(),
            Err(e) => {
                warn!(error = %e, "request store lock poisoned in get_all");
                HashMap::new()
            }
        }
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        match self.records.read() {
            Ok(map) => map.len(),
            Err(e) => {
                warn!(error = %e, "request store lock poisoned in len");
                0
            }
        }
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every stored record.
    pub fn clear(&self) {
        match self.records.write() {
            Ok(mut map) => map.clear(),
            Err(e) => warn!(error = %e, "request store lock poisoned in clear"),
        }
    }
}
