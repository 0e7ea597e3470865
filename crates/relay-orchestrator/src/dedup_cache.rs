use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use relay_core::current_unix_timestamp_ms;

#[derive(Debug, Default)]
struct DedupState {
    seen: HashMap<String, u64>,
    order: VecDeque<(String, u64)>,
}

#[derive(Debug)]
/// Bounded, time-bounded set of admitted inbound message ids.
pub struct DedupCache {
    ttl_ms: u64,
    capacity: usize,
    state: Mutex<DedupState>,
}

impl DedupCache {
    pub fn new(ttl_ms: u64, capacity: usize) -> Self {
        Self {
            ttl_ms,
            capacity: capacity.max(1),
            state: Mutex::new(DedupState::default()),
        }
    }

    /// Returns `false` when `message_id` was already admitted inside the
    /// retention window; otherwise records it and returns `true`.
    pub fn admit(&self, message_id: &str) -> bool {
        self.admit_at(message_id, current_unix_timestamp_ms())
    }

    pub fn admit_at(&self, message_id: &str, now_unix_ms: u64) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.evict(&mut state, now_unix_ms);
        if let Some(seen_at) = state.seen.get(message_id) {
            if now_unix_ms.saturating_sub(*seen_at) < self.ttl_ms {
                return false;
            }
        }
        state.seen.insert(message_id.to_string(), now_unix_ms);
        state.order.push_back((message_id.to_string(), now_unix_ms));
        while state.seen.len() > self.capacity {
            if !Self::pop_oldest(&mut state) {
                break;
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .seen
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict(&self, state: &mut DedupState, now_unix_ms: u64) {
        while let Some((_, seen_at)) = state.order.front() {
            if now_unix_ms.saturating_sub(*seen_at) < self.ttl_ms {
                break;
            }
            Self::pop_oldest(state);
        }
    }

    fn pop_oldest(state: &mut DedupState) -> bool {
        let Some((id, seen_at)) = state.order.pop_front() else {
            return false;
        };
        if state.seen.get(&id) == Some(&seen_at) {
            state.seen.remove(&id);
        }
        true
    }
}
