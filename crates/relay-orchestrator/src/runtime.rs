use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use relay_core::current_unix_timestamp_ms;
use tokio::sync::broadcast;

use crate::batch_scheduler::{BatchHandler, BatchScheduler, EnqueueOutcome};
use crate::command_interpreter::{CommandInterpreter, CommandOutcome};
use crate::config::{ConfigError, OrchestratorConfig};
use crate::contact::ContactKey;
use crate::dedup_cache::DedupCache;
use crate::generator::ReplyGenerator;
use crate::media::{HttpMediaFetcher, MediaFetcher};
use crate::order_logger::OrderLogger;
use crate::pause_registry::PauseRegistry;
use crate::safe_sender::SafeSender;
use crate::store::{InMemoryStore, OrderStore, TranscriptStore};
use crate::transport::{ChatTransport, InboundEvent};
use crate::turn_processor::{TurnDependencies, TurnProcessor, TurnReport};

const PAUSE_SWEEP_INTERVAL_MS: u64 = 60_000;

/// External collaborators injected into the orchestrator.
pub struct OrchestratorDeps {
    pub transport: Arc<dyn ChatTransport>,
    pub generator: Arc<dyn ReplyGenerator>,
    pub transcripts: Arc<dyn TranscriptStore>,
    pub orders: Arc<dyn OrderStore>,
    /// Defaults to an `HttpMediaFetcher` using the configured timeout.
    pub media_fetcher: Option<Arc<dyn MediaFetcher>>,
}

impl OrchestratorDeps {
    pub fn in_memory(
        transport: Arc<dyn ChatTransport>,
        generator: Arc<dyn ReplyGenerator>,
    ) -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self {
            transport,
            generator,
            transcripts: Arc::clone(&store) as Arc<dyn TranscriptStore>,
            orders: store,
            media_fetcher: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// What the ingress path did with one inbound event.
pub enum InboundDisposition {
    IgnoredEmpty,
    IgnoredAddress,
    IgnoredOperatorMessage,
    Operator(CommandOutcome),
    Duplicate,
    Enqueued(EnqueueOutcome),
}

/// Ingress entry point: command interpretation, dedup, pause admission, batching.
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: Arc<PauseRegistry>,
    dedup: DedupCache,
    scheduler: BatchScheduler,
    commands: CommandInterpreter,
    processor: Arc<TurnProcessor>,
    last_sweep_unix_ms: AtomicU64,
    synthetic_ids: AtomicU64,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, deps: OrchestratorDeps) -> Result<Self, ConfigError> {
        config.validate()?;
        let registry = Arc::new(PauseRegistry::new(config.pause_ttl_ms));
        let fetcher = deps
            .media_fetcher
            .unwrap_or_else(|| {
                Arc::new(HttpMediaFetcher::new(config.media_fetch_timeout())) as Arc<dyn MediaFetcher>
            });
        let sender = SafeSender::new(
            Arc::clone(&registry),
            Arc::clone(&deps.transport),
            fetcher,
        );
        let processor = Arc::new(TurnProcessor::new(
            config.clone(),
            TurnDependencies {
                registry: Arc::clone(&registry),
                sender,
                transport: Arc::clone(&deps.transport),
                generator: deps.generator,
                transcripts: deps.transcripts,
                order_logger: OrderLogger::new(deps.orders, config.order_bucket_ms),
            },
        ));
        let scheduler = BatchScheduler::new(
            Arc::clone(&registry),
            config.quiet_window(),
            Arc::clone(&processor) as Arc<dyn BatchHandler>,
        );
        let commands = CommandInterpreter::new(
            Arc::clone(&registry),
            scheduler.clone(),
            deps.transport,
            config.command_ack_enabled,
        );
        Ok(Self {
            dedup: DedupCache::new(config.dedup_ttl_ms, config.dedup_capacity),
            config,
            registry,
            scheduler,
            commands,
            processor,
            last_sweep_unix_ms: AtomicU64::new(0),
            synthetic_ids: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn pause_registry(&self) -> &Arc<PauseRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &BatchScheduler {
        &self.scheduler
    }

    pub fn subscribe_turns(&self) -> broadcast::Receiver<TurnReport> {
        self.processor.subscribe()
    }

    /// Routes one inbound event. Never blocks on turn processing; operator
    /// acknowledgements are the only awaited sends.
    pub async fn handle_inbound(&self, event: InboundEvent) -> InboundDisposition {
        let text = event.text.trim();
        if text.is_empty() {
            return InboundDisposition::IgnoredEmpty;
        }
        let contact = ContactKey::from_address(&event.contact);
        let now_unix_ms = current_unix_timestamp_ms();
        self.sweep_pauses(now_unix_ms);

        if event.from_me {
            return match self.commands.handle(contact.as_ref(), text).await {
                Some(outcome) => InboundDisposition::Operator(outcome),
                None => InboundDisposition::IgnoredOperatorMessage,
            };
        }

        let Some(contact) = contact else {
            tracing::debug!(address = %event.contact, "inbound event without a contact ignored");
            return InboundDisposition::IgnoredAddress;
        };
        let message_id = event
            .message_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                let seq = self.synthetic_ids.fetch_add(1, Ordering::Relaxed);
                format!("{contact}:{now_unix_ms}:{seq}")
            });
        if !self.dedup.admit_at(&message_id, now_unix_ms) {
            tracing::debug!(contact = %contact, message_id = %message_id, "duplicate inbound event ignored");
            return InboundDisposition::Duplicate;
        }
        self.commands.note_inbound(&contact);

        InboundDisposition::Enqueued(self.scheduler.enqueue(&contact, text))
    }

    /// Waits for pending and running turns to finish; false on timeout.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.scheduler.wait_idle(timeout).await
    }

    fn sweep_pauses(&self, now_unix_ms: u64) {
        let last = self.last_sweep_unix_ms.load(Ordering::Relaxed);
        if now_unix_ms.saturating_sub(last) < PAUSE_SWEEP_INTERVAL_MS {
            return;
        }
        if self
            .last_sweep_unix_ms
            .compare_exchange(last, now_unix_ms, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            let cleared = self.registry.sweep_expired(now_unix_ms);
            if cleared > 0 {
                tracing::debug!(cleared, "expired pauses swept");
            }
        }
    }
}
