//! Device registry - the authoritative map of known devices
//!
//! One `RwLock` guards both the map and the revision counter. Every write
//! bumps the revision and stamps it on the record it touches, which lets the
//! health monitor and discovery rounds detect writes that happened while they
//! were evaluating a snapshot.

use crate::domain::types::DeviceRecord;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

#[derive(Default)]
struct Inner {
    devices: FxHashMap<String, DeviceRecord>,
    revision: u64,
}

impl Inner {
    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }
}

/// Opaque marker captured when a discovery round starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundToken {
    revision: u64,
}

/// An entry selected for eviction together with the revision it was evaluated at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionCandidate {
    pub id: String,
    pub revision: u64,
}

impl From<&DeviceRecord> for EvictionCandidate {
    fn from(record: &DeviceRecord) -> Self {
        Self { id: record.id.clone(), revision: record.revision }
    }
}

#[derive(Default)]
pub struct DeviceRegistry {
    inner: RwLock<Inner>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record (last writer wins)
    pub fn upsert(&self, mut record: DeviceRecord) {
        let mut inner = self.inner.write();
        record.revision = inner.next_revision();
        debug!(device_id = %record.id, kind = %record.kind, revision = %record.revision, "registry_upsert");
        inner.devices.insert(record.id.clone(), record);
    }

    pub fn get(&self, id: &str) -> Option<DeviceRecord> {
        self.inner.read().devices.get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<DeviceRecord> {
        let mut inner = self.inner.write();
        let removed = inner.devices.remove(id);
        if removed.is_some() {
            inner.next_revision();
        }
        removed
    }

    /// Clone of every record, sorted by id
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        let mut records: Vec<DeviceRecord> = self.inner.read().devices.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    pub fn len(&self) -> usize {
        self.inner.read().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().devices.is_empty()
    }

    /// Current revision counter
    pub fn revision(&self) -> u64 {
        self.inner.read().revision
    }

    /// Swap the whole map in one write; readers see either the old map or the new one
    pub fn replace_all(&self, devices: FxHashMap<String, DeviceRecord>) {
        let mut inner = self.inner.write();
        let revision = inner.next_revision();
        inner.devices = devices
            .into_iter()
            .map(|(id, mut record)| {
                record.revision = revision;
                (id, record)
            })
            .collect();
    }

    pub fn begin_round(&self) -> RoundToken {
        RoundToken { revision: self.inner.read().revision }
    }

    /// Replace the map with a round's results
    ///
    /// Records written after `token` was taken (registrations that arrived
    /// during the window) survive and override the round's entry for the same
    /// id. Everything else from before the round is dropped.
    pub fn commit_round(
        &self,
        token: RoundToken,
        found: FxHashMap<String, DeviceRecord>,
    ) -> usize {
        let mut inner = self.inner.write();
        let revision = inner.next_revision();

        let mut next: FxHashMap<String, DeviceRecord> = found
            .into_iter()
            .map(|(id, mut record)| {
                record.revision = revision;
                (id, record)
            })
            .collect();

        let mut kept = 0usize;
        for (id, record) in inner.devices.drain() {
            if record.revision > token.revision {
                kept += 1;
                next.insert(id, record);
            }
        }

        if kept > 0 {
            debug!(kept = %kept, "round_kept_concurrent_registrations");
        }
        inner.devices = next;
        inner.devices.len()
    }

    /// Refresh `last_seen` without bumping the revision
    pub fn touch(&self, id: &str, at: DateTime<Utc>) -> bool {
        let mut inner = self.inner.write();
        match inner.devices.get_mut(id) {
            Some(record) => {
                record.last_seen = Some(at);
                true
            }
            None => false,
        }
    }

    /// Remove candidates whose revision is unchanged since they were evaluated
    ///
    /// Returns the ids actually removed.
    pub fn evict(&self, candidates: &[EvictionCandidate]) -> Vec<String> {
        if candidates.is_empty() {
            return Vec::new();
        }
        let mut inner = self.inner.write();
        let mut removed = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let unchanged = inner
                .devices
                .get(&candidate.id)
                .is_some_and(|r| r.revision == candidate.revision);
            if unchanged {
                inner.devices.remove(&candidate.id);
                removed.push(candidate.id.clone());
            } else {
                debug!(device_id = %candidate.id, "eviction_skipped_rewritten");
            }
        }
        if !removed.is_empty() {
            inner.next_revision();
        }
        removed
    }
}
