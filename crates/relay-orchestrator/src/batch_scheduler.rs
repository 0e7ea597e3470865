use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::contact::ContactKey;
use crate::keyed_shards::KeyedShards;
use crate::pause_registry::PauseRegistry;

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, PartialEq, Eq)]
/// Batch whose quiet window elapsed; handed to the `BatchHandler`.
pub struct ReadyBatch {
    pub contact: ContactKey,
    pub fragments: Vec<String>,
    pub captured_epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates supported `EnqueueOutcome` values.
pub enum EnqueueOutcome {
    Created,
    Appended { fragments: usize },
    Restarted,
    DroppedPaused,
}

#[async_trait]
/// Receives batches once their quiet window elapses.
pub trait BatchHandler: Send + Sync {
    async fn on_batch_ready(&self, batch: ReadyBatch);
}

struct PendingBatch {
    fragments: Vec<String>,
    captured_epoch: u64,
    timer_seq: u64,
    timer: JoinHandle<()>,
}

struct SchedulerShared {
    registry: Arc<PauseRegistry>,
    handler: Arc<dyn BatchHandler>,
    quiet_window: Duration,
    pending: KeyedShards<PendingBatch>,
    next_seq: AtomicU64,
    in_flight: AtomicUsize,
}

#[derive(Clone)]
/// Per-contact debounce buffer with a resettable quiet-window timer.
pub struct BatchScheduler {
    shared: Arc<SchedulerShared>,
}

impl BatchScheduler {
    pub fn new(
        registry: Arc<PauseRegistry>,
        quiet_window: Duration,
        handler: Arc<dyn BatchHandler>,
    ) -> Self {
        Self {
            shared: Arc::new(SchedulerShared {
                registry,
                handler,
                quiet_window,
                pending: KeyedShards::default(),
                next_seq: AtomicU64::new(1),
                in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// Appends `fragment` to the contact's pending batch and (re)arms its
    /// timer. Must run inside a tokio runtime.
    pub fn enqueue(&self, contact: &ContactKey, fragment: &str) -> EnqueueOutcome {
        let shared = &self.shared;
        if shared.registry.is_paused(contact) {
            tracing::debug!(contact = %contact, "fragment dropped: contact paused");
            return EnqueueOutcome::DroppedPaused;
        }
        let epoch = shared.registry.current_epoch(contact);
        let seq = shared.next_seq.fetch_add(1, Ordering::SeqCst);

        let outcome = shared.pending.with_key(contact, |pending| {
            if let Some(batch) = pending.get_mut(contact) {
                if batch.captured_epoch == epoch {
                    batch.timer.abort();
                    batch.fragments.push(fragment.to_string());
                    batch.timer_seq = seq;
                    batch.timer = arm_timer(shared, contact.clone(), seq);
                    return EnqueueOutcome::Appended {
                        fragments: batch.fragments.len(),
                    };
                }
            }
            let restarted = match pending.remove(contact) {
                Some(stale) => {
                    stale.timer.abort();
                    true
                }
                None => false,
            };
            pending.insert(
                contact.clone(),
                PendingBatch {
                    fragments: vec![fragment.to_string()],
                    captured_epoch: epoch,
                    timer_seq: seq,
                    timer: arm_timer(shared, contact.clone(), seq),
                },
            );
            if restarted {
                EnqueueOutcome::Restarted
            } else {
                EnqueueOutcome::Created
            }
        });
        tracing::debug!(contact = %contact, epoch, ?outcome, "fragment enqueued");
        outcome
    }

    /// Removes and cancels the contact's pending batch; returns whether one existed.
    pub fn discard(&self, contact: &ContactKey) -> bool {
        let removed = self
            .shared
            .pending
            .with_key(contact, |pending| pending.remove(contact));
        match removed {
            Some(batch) => {
                batch.timer.abort();
                tracing::debug!(contact = %contact, fragments = batch.fragments.len(), "pending batch discarded");
                true
            }
            None => false,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.shared.pending.len()
    }

    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_idle(&self) -> bool {
        // pending first: a firing timer bumps in_flight before it removes its batch
        self.pending_len() == 0 && self.in_flight() == 0
    }

    /// Polls until no batch is pending or running; false when `timeout` elapsed first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_idle() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(IDLE_POLL_INTERVAL).await;
        }
    }
}

fn arm_timer(shared: &Arc<SchedulerShared>, contact: ContactKey, seq: u64) -> JoinHandle<()> {
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        tokio::time::sleep(shared.quiet_window).await;
        fire(shared, contact, seq).await;
    })
}

async fn fire(shared: Arc<SchedulerShared>, contact: ContactKey, seq: u64) {
    let taken = shared.pending.with_key(&contact, |pending| {
        match pending.get(&contact) {
            Some(batch) if batch.timer_seq == seq => {
                shared.in_flight.fetch_add(1, Ordering::SeqCst);
                pending.remove(&contact)
            }
            _ => None,
        }
    });
    let Some(batch) = taken else {
        return;
    };

    let ready = ReadyBatch {
        contact: contact.clone(),
        fragments: batch.fragments,
        captured_epoch: batch.captured_epoch,
    };
    let handler = Arc::clone(&shared.handler);
    let joined = tokio::spawn(async move { handler.on_batch_ready(ready).await }).await;
    if let Err(error) = joined {
        tracing::error!(contact = %contact, error = %error, "turn task failed");
    }
    shared.in_flight.fetch_sub(1, Ordering::SeqCst);
}
