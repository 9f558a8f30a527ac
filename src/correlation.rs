use chashmap::CHashMap;
use futures::channel::oneshot;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::CallError;

/// Result delivered to a pending call: the reply values after the error slot.
pub type Outcome = Result<Vec<Value>, CallError>;

/// Pending outbound calls keyed by correlation id.
///
/// Every entry is removed exactly once, either by [CorrelationTable::resolve]
/// or by [CorrelationTable::drain_all].
pub(crate) struct CorrelationTable {
    next_id: AtomicU32,
    pending: CHashMap<u32, oneshot::Sender<Outcome>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            pending: CHashMap::new(),
        }
    }

    /// Store `respond` under a fresh id. Ids start at 1 and skip 0 and any id
    /// that is still pending when the counter wraps.
    pub fn allocate(&self, respond: oneshot::Sender<Outcome>) -> u32 {
        let id = loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 && !self.pending.contains_key(&id) {
                break id;
            }
        };
        self.pending.insert(id, respond);
        id
    }

    /// Complete the call with `id`. Returns false if no such call is pending.
    pub fn resolve(&self, id: u32, outcome: Outcome) -> bool {
        match self.pending.remove(&id) {
            Some(respond) => {
                // The caller may have dropped the receiving future.
                let _ = respond.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Remove the call with `id` without completing it.
    pub fn forget(&self, id: u32) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Complete every pending call with `error`. Returns the number of calls
    /// drained.
    pub fn drain_all(&self, error: CallError) -> usize {
        let snapshot = self.pending.clear();
        let mut drained = 0;
        for (id, respond) in snapshot {
            tracing::trace!(id, "draining pending call");
            let _ = respond.send(Err(error.clone()));
            drained += 1;
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

impl std::fmt::Debug for CorrelationTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationTable")
            .field("next_id", &self.next_id)
            .field("pending", &self.pending.len())
            .finish()
    }
}
