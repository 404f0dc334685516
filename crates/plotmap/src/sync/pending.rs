use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::parcel::{PlotId, WorldId};

static PENDING_LOCK_POISON_WARNED: AtomicBool = AtomicBool::new(false);

fn warn_pending_lock_poison_once(label: &'static str) {
    if PENDING_LOCK_POISON_WARNED
        .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
        .is_ok()
    {
        warn!(label, "pending lock poisoned; recovered inner value");
    }
}

pub type PendingKey = (WorldId, PlotId);

#[derive(Debug, Clone)]
pub struct PendingRecord {
    pub members: Vec<PlotId>,
    pub recorded_at: Instant,
}

/// Bridges a destructive operation's begin event, which still sees the full
/// pre-state, to its completed event, which carries only the residual base
/// identity. One instance exists per operation kind.
///
/// This is the only engine state touched from more than one thread: begin
/// runs on whatever thread raised the event, completion on the worker.
pub struct PendingOps {
    label: &'static str,
    records: Mutex<HashMap<PendingKey, PendingRecord>>,
}

impl PendingOps {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Records the member list for `(world, base)`. A begin for a key that is
    /// already outstanding replaces the old record; that collision is logged
    /// because it means a completed event never arrived.
    pub fn begin(&self, world: WorldId, base: PlotId, members: Vec<PlotId>, now: Instant) {
        let replaced = self.lock().insert(
            (world.clone(), base),
            PendingRecord {
                members,
                recorded_at: now,
            },
        );
        if let Some(old) = replaced {
            warn!(
                label = self.label,
                %world,
                %base,
                dropped_members = old.members.len(),
                "pending_record_replaced"
            );
        }
    }

    /// Consumes and returns the record for `(world, base)`. `None` means the
    /// matching begin was never seen; the information is permanently lost and
    /// the caller is expected to log and drop the operation.
    pub fn complete(&self, world: &WorldId, base: PlotId) -> Option<Vec<PlotId>> {
        self.lock()
            .remove(&(world.clone(), base))
            .map(|record| record.members)
    }

    /// Removes and returns records older than `max_age`. A record that
    /// outlives its completion window is a logic error in the event stream.
    pub fn take_stale(&self, now: Instant, max_age: Duration) -> Vec<(PendingKey, PendingRecord)> {
        let mut records = self.lock();
        let stale_keys: Vec<PendingKey> = records
            .iter()
            .filter(|(_, record)| now.duration_since(record.recorded_at) > max_age)
            .map(|(key, _)| key.clone())
            .collect();
        stale_keys
            .into_iter()
            .filter_map(|key| records.remove(&key).map(|record| (key, record)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PendingKey, PendingRecord>> {
        match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn_pending_lock_poison_once(self.label);
                poisoned.into_inner()
            }
        }
    }
}
