use relay_core::current_unix_timestamp_ms;

use crate::contact::ContactKey;
use crate::keyed_shards::KeyedShards;

#[derive(Debug, Clone, Copy, Default)]
struct PauseSlot {
    paused_at_unix_ms: Option<u64>,
    epoch: u64,
}

#[derive(Debug)]
/// Per-contact mute state with TTL and an epoch that invalidates in-flight work.
pub struct PauseRegistry {
    ttl_ms: u64,
    slots: KeyedShards<PauseSlot>,
}

impl PauseRegistry {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            ttl_ms,
            slots: KeyedShards::default(),
        }
    }

    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    pub fn pause(&self, key: &ContactKey) -> u64 {
        self.pause_at(key, current_unix_timestamp_ms())
    }

    /// Sets the pause timestamp and bumps the epoch; returns the new epoch.
    pub fn pause_at(&self, key: &ContactKey, now_unix_ms: u64) -> u64 {
        self.slots.with_key(key, |slots| {
            let slot = slots.entry(key.clone()).or_default();
            slot.paused_at_unix_ms = Some(now_unix_ms);
            slot.epoch = slot.epoch.saturating_add(1);
            slot.epoch
        })
    }

    pub fn resume(&self, key: &ContactKey) -> bool {
        self.resume_at(key, current_unix_timestamp_ms())
    }

    /// Clears the pause and bumps the epoch. Returns whether an unexpired
    /// pause was actually cleared.
    pub fn resume_at(&self, key: &ContactKey, now_unix_ms: u64) -> bool {
        self.slots.with_key(key, |slots| {
            let slot = slots.entry(key.clone()).or_default();
            let was_paused = slot
                .paused_at_unix_ms
                .is_some_and(|paused_at| self.is_active(paused_at, now_unix_ms));
            slot.paused_at_unix_ms = None;
            slot.epoch = slot.epoch.saturating_add(1);
            was_paused
        })
    }

    pub fn is_paused(&self, key: &ContactKey) -> bool {
        self.is_paused_at(key, current_unix_timestamp_ms())
    }

    pub fn is_paused_at(&self, key: &ContactKey, now_unix_ms: u64) -> bool {
        self.slots.with_key(key, |slots| {
            let Some(slot) = slots.get_mut(key) else {
                return false;
            };
            match slot.paused_at_unix_ms {
                Some(paused_at) if self.is_active(paused_at, now_unix_ms) => true,
                Some(_) => {
                    // expiry does not change the epoch
                    slot.paused_at_unix_ms = None;
                    false
                }
                None => false,
            }
        })
    }

    pub fn current_epoch(&self, key: &ContactKey) -> u64 {
        self.slots
            .with_key(key, |slots| slots.get(key).map_or(0, |slot| slot.epoch))
    }

    /// Drops expired pause timestamps across all shards; epochs are kept.
    pub fn sweep_expired(&self, now_unix_ms: u64) -> usize {
        let mut cleared = 0;
        self.slots.for_each_shard(|slots| {
            for slot in slots.values_mut() {
                if let Some(paused_at) = slot.paused_at_unix_ms {
                    if !self.is_active(paused_at, now_unix_ms) {
                        slot.paused_at_unix_ms = None;
                        cleared += 1;
                    }
                }
            }
        });
        cleared
    }

    fn is_active(&self, paused_at_unix_ms: u64, now_unix_ms: u64) -> bool {
        now_unix_ms.saturating_sub(paused_at_unix_ms) < self.ttl_ms
    }
}
