//! Conversation message orchestrator.
//!
//! Sits between a chat transport and a text-generation collaborator: inbound
//! fragments are deduplicated, debounced per contact into a single turn, and
//! answered through a pause-aware sender. Operators mute or resume the bot per
//! contact from their own chat; completed purchases are logged once per
//! contact and time bucket.

pub mod batch_scheduler;
pub mod command_interpreter;
pub mod config;
pub mod contact;
pub mod dedup_cache;
pub mod generator;
pub mod jsonl_store;
mod keyed_shards;
pub mod media;
pub mod order;
pub mod order_logger;
pub mod pause_registry;
pub mod runtime;
pub mod safe_sender;
pub mod store;
pub mod transport;
pub mod turn_processor;
pub mod welcome;

#[cfg(test)]
mod test_support;

pub use batch_scheduler::{BatchHandler, BatchScheduler, EnqueueOutcome, ReadyBatch};
pub use command_interpreter::{
    parse_operator_directive, CommandInterpreter, CommandOutcome, DirectiveKind,
    OperatorDirective,
};
pub use config::{ConfigError, OrchestratorConfig};
pub use contact::{normalize_command_text, ContactKey};
pub use dedup_cache::DedupCache;
pub use generator::{
    parse_reply_payload, GenerationError, LlmReplyGenerator, LlmReplySettings, ReplyGenerator,
    ReplyMedia, ReplyPayload, StaticReplyGenerator,
};
pub use jsonl_store::JsonlConversationStore;
pub use media::{HttpMediaFetcher, MediaFetcher};
pub use order::{OrderFields, OrderRecord, OrderValidationError};
pub use order_logger::{OrderLogOutcome, OrderLogger};
pub use pause_registry::PauseRegistry;
pub use runtime::{InboundDisposition, Orchestrator, OrchestratorDeps};
pub use safe_sender::{DeliveryStatus, SafeSender};
pub use store::{ConversationTurn, InMemoryStore, OrderStore, StoreError, TranscriptStore};
pub use transport::{
    ChatTransport, InboundEvent, MediaSource, OutboundContent, Presence, TransportError,
};
pub use turn_processor::{TurnOutcome, TurnProcessor, TurnReport, TurnStage};
pub use welcome::DailyWelcomeMarks;
