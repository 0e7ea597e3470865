use std::sync::Arc;

use async_trait::async_trait;
use relay_core::{current_unix_timestamp_ms, local_calendar_day};
use tokio::sync::{broadcast, Mutex};

use crate::batch_scheduler::{BatchHandler, ReadyBatch};
use crate::config::OrchestratorConfig;
use crate::contact::ContactKey;
use crate::generator::{ReplyGenerator, ReplyPayload};
use crate::keyed_shards::KeyedShards;
use crate::order::OrderFields;
use crate::order_logger::{OrderLogOutcome, OrderLogger};
use crate::pause_registry::PauseRegistry;
use crate::safe_sender::{DeliveryStatus, SafeSender};
use crate::store::{render_history, ConversationTurn, TranscriptStore};
use crate::transport::{ChatTransport, OutboundContent, Presence};
use crate::welcome::DailyWelcomeMarks;

const TURN_REPORT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Checkpoint at which a turn noticed it had gone stale.
pub enum TurnStage {
    Fire,
    Welcome,
    Generation,
    Media,
    Text,
}

#[derive(Debug, Clone, PartialEq)]
/// Enumerates supported `TurnOutcome` values.
pub enum TurnOutcome {
    Delivered {
        media_sent: usize,
        used_fallback: bool,
        order: Option<OrderLogOutcome>,
    },
    Aborted {
        stage: TurnStage,
    },
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
/// Broadcast once per processed batch.
pub struct TurnReport {
    pub contact: ContactKey,
    pub outcome: TurnOutcome,
}

/// Snapshot of the pause state a turn was scheduled under.
struct TurnGuard<'a> {
    registry: &'a PauseRegistry,
    contact: &'a ContactKey,
    captured_epoch: u64,
}

impl TurnGuard<'_> {
    fn is_current(&self) -> bool {
        !self.registry.is_paused(self.contact)
            && self.registry.current_epoch(self.contact) == self.captured_epoch
    }
}

/// Collaborators a `TurnProcessor` drives.
pub struct TurnDependencies {
    pub registry: Arc<PauseRegistry>,
    pub sender: SafeSender,
    pub transport: Arc<dyn ChatTransport>,
    pub generator: Arc<dyn ReplyGenerator>,
    pub transcripts: Arc<dyn TranscriptStore>,
    pub order_logger: OrderLogger,
}

/// Turns one elapsed batch into a reply: welcome, generation, media, text, order.
pub struct TurnProcessor {
    config: OrchestratorConfig,
    deps: TurnDependencies,
    welcome: DailyWelcomeMarks,
    turn_locks: KeyedShards<Arc<Mutex<()>>>,
    reports: broadcast::Sender<TurnReport>,
}

impl TurnProcessor {
    pub fn new(config: OrchestratorConfig, deps: TurnDependencies) -> Self {
        let (reports, _) = broadcast::channel(TURN_REPORT_CAPACITY);
        Self {
            config,
            deps,
            welcome: DailyWelcomeMarks::new(),
            turn_locks: KeyedShards::default(),
            reports,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TurnReport> {
        self.reports.subscribe()
    }

    #[tracing::instrument(skip_all, fields(contact = %batch.contact, epoch = batch.captured_epoch))]
    pub async fn process(&self, batch: ReadyBatch) -> TurnOutcome {
        let lock = self.turn_lock(&batch.contact);
        let outcome = {
            let _serialized = lock.lock().await;
            let outcome = self.run_turn(&batch).await;
            if let TurnOutcome::Aborted { stage } = &outcome {
                if *stage != TurnStage::Fire {
                    // Composing was already signalled; clear it.
                    self.signal_presence(&batch.contact, Presence::Paused).await;
                }
            }
            outcome
        };
        drop(lock);
        self.release_turn_lock(&batch.contact);

        match &outcome {
            TurnOutcome::Aborted { stage } => {
                tracing::info!(?stage, "turn aborted: contact paused or stale");
            }
            TurnOutcome::Delivered {
                media_sent,
                used_fallback,
                ..
            } => {
                tracing::info!(media_sent, used_fallback, "turn delivered");
            }
            TurnOutcome::Empty => tracing::debug!("turn had no text"),
        }
        let _ = self.reports.send(TurnReport {
            contact: batch.contact.clone(),
            outcome: outcome.clone(),
        });
        outcome
    }

    async fn run_turn(&self, batch: &ReadyBatch) -> TurnOutcome {
        let contact = &batch.contact;
        let guard = TurnGuard {
            registry: &self.deps.registry,
            contact,
            captured_epoch: batch.captured_epoch,
        };
        if !guard.is_current() {
            return TurnOutcome::Aborted {
                stage: TurnStage::Fire,
            };
        }
        let combined = join_fragments(&batch.fragments);
        if combined.is_empty() {
            return TurnOutcome::Empty;
        }

        self.signal_presence(contact, Presence::Composing).await;

        let today = local_calendar_day(current_unix_timestamp_ms());
        if !self.welcome.is_marked(contact, &today) {
            if let Err(stage) = self.deliver(&guard, TurnStage::Welcome, self.welcome_unit()).await {
                return TurnOutcome::Aborted { stage };
            }
            self.welcome.mark(contact, &today);
        }

        let history = match self
            .deps
            .transcripts
            .recent_turns(contact, self.config.history_limit)
            .await
        {
            Ok(turns) => turns,
            Err(error) => {
                tracing::warn!(error = %error, "history unavailable; generating without it");
                Vec::new()
            }
        };
        let (reply, used_fallback) = match self
            .deps
            .generator
            .generate(&combined, contact, &render_history(&history))
            .await
        {
            Ok(reply) => (reply, false),
            Err(error) => {
                tracing::warn!(error = %error, "reply generation failed; sending fallback");
                (ReplyPayload::text_only(self.config.fallback_text.clone()), true)
            }
        };
        if !guard.is_current() {
            return TurnOutcome::Aborted {
                stage: TurnStage::Generation,
            };
        }

        let mut media_sent = 0;
        for media in &reply.media {
            let content = OutboundContent::media_url(media.url.clone(), media.caption.clone());
            match self.deliver(&guard, TurnStage::Media, content).await {
                Ok(status) if status.delivered() => media_sent += 1,
                Ok(_) => {}
                Err(stage) => return TurnOutcome::Aborted { stage },
            }
        }

        let reply_text = if reply.text.trim().is_empty() {
            self.config.fallback_text.clone()
        } else {
            reply.text.trim().to_string()
        };
        if let Err(stage) = self
            .deliver(&guard, TurnStage::Text, OutboundContent::text(reply_text.clone()))
            .await
        {
            return TurnOutcome::Aborted { stage };
        }
        self.signal_presence(contact, Presence::Paused).await;

        let turn = ConversationTurn {
            user_text: combined.clone(),
            reply_text: reply_text.clone(),
            reply_media: reply.media.clone(),
            order: reply.order.clone(),
            created_unix_ms: current_unix_timestamp_ms(),
        };
        if let Err(error) = self
            .deps
            .transcripts
            .append_turn(contact, turn, self.config.history_max_turns)
            .await
        {
            tracing::warn!(error = %error, "failed to persist conversation turn");
        }

        let order = if used_fallback {
            None
        } else {
            self.log_order(contact, reply.order.as_ref(), &combined, &reply_text)
                .await
        };
        TurnOutcome::Delivered {
            media_sent,
            used_fallback,
            order,
        }
    }

    /// Paces, re-checks the guard, then sends. `Err` carries the abort stage.
    async fn deliver(
        &self,
        guard: &TurnGuard<'_>,
        stage: TurnStage,
        content: OutboundContent,
    ) -> Result<DeliveryStatus, TurnStage> {
        tokio::time::sleep(self.config.pacing_delay()).await;
        if !guard.is_current() {
            return Err(stage);
        }
        match self.deps.sender.send(guard.contact, &content).await {
            DeliveryStatus::SkippedPaused => Err(stage),
            status => Ok(status),
        }
    }

    async fn log_order(
        &self,
        contact: &ContactKey,
        raw_order: Option<&serde_json::Value>,
        user_message: &str,
        reply_message: &str,
    ) -> Option<OrderLogOutcome> {
        let fields = match OrderFields::from_value(raw_order?) {
            Ok(fields) => fields,
            Err(error) => {
                tracing::debug!(error = %error, "order payload ignored");
                return None;
            }
        };
        match self
            .deps
            .order_logger
            .record(contact, fields, user_message, reply_message)
            .await
        {
            Ok(outcome) => Some(outcome),
            Err(error) => {
                tracing::warn!(error = %error, "failed to persist order");
                None
            }
        }
    }

    fn welcome_unit(&self) -> OutboundContent {
        match self.config.welcome_media_url.as_deref() {
            Some(url) => {
                OutboundContent::media_url(url.trim(), Some(self.config.welcome_text.clone()))
            }
            None => OutboundContent::text(self.config.welcome_text.clone()),
        }
    }

    async fn signal_presence(&self, contact: &ContactKey, presence: Presence) {
        if !self.config.presence_enabled {
            return;
        }
        if let Err(error) = self.deps.transport.send_presence(contact, presence).await {
            tracing::debug!(?presence, error = %error, "presence update failed");
        }
    }

    fn turn_lock(&self, contact: &ContactKey) -> Arc<Mutex<()>> {
        self.turn_locks.with_key(contact, |locks| {
            Arc::clone(locks.entry(contact.clone()).or_default())
        })
    }

    /// Drops the contact's lock entry once no other turn holds or awaits it.
    fn release_turn_lock(&self, contact: &ContactKey) {
        self.turn_locks.with_key(contact, |locks| {
            if locks
                .get(contact)
                .is_some_and(|lock| Arc::strong_count(lock) == 1)
            {
                locks.remove(contact);
            }
        });
    }

    #[cfg(test)]
    pub(crate) fn tracked_turn_locks(&self) -> usize {
        self.turn_locks.len()
    }
}

#[async_trait]
impl BatchHandler for TurnProcessor {
    async fn on_batch_ready(&self, batch: ReadyBatch) {
        self.process(batch).await;
    }
}

/// Joins trimmed fragments with single spaces, skipping blanks.
pub fn join_fragments(fragments: &[String]) -> String {
    fragments
        .iter()
        .map(|fragment| fragment.trim())
        .filter(|fragment| !fragment.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests;
