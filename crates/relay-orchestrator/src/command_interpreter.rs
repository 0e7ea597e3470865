use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use regex::Regex;

use crate::batch_scheduler::BatchScheduler;
use crate::contact::{normalize_command_text, ContactKey};
use crate::pause_registry::PauseRegistry;
use crate::transport::ChatTransport;

pub const PAUSE_ACK_TEXT: &str =
    "🛑 Bot pausado aquí por 2 horas. Mandá \"bot-play\" en este chat para reanudar antes.";
pub const RESUME_ACK_TEXT: &str = "▶️ Bot reanudado en este chat.";
pub const ALREADY_ACTIVE_ACK_TEXT: &str = "▶️ El bot ya estaba activo en este chat.";

const MIN_TARGET_DIGITS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates supported `DirectiveKind` values.
pub enum DirectiveKind {
    Pause,
    Resume,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Parsed operator directive with its optional explicit target.
pub struct OperatorDirective {
    pub kind: DirectiveKind,
    pub target: Option<ContactKey>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Enumerates supported `CommandOutcome` values.
pub enum CommandOutcome {
    Paused {
        target: ContactKey,
        discarded_batch: bool,
    },
    Resumed {
        target: ContactKey,
        was_paused: bool,
    },
    MissingTarget(DirectiveKind),
}

fn directive_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^/?\s*bot(?:-|\s*)(pause|play|resume)\b(.*)$").ok())
        .as_ref()
}

/// Matches `bot-pause` / `bot-play` / `bot-resume` (any spacing, optional
/// leading slash) on normalized text. Digits after the directive (at least
/// six) name an explicit target.
pub fn parse_operator_directive(raw: &str) -> Option<OperatorDirective> {
    let normalized = normalize_command_text(raw);
    let captures = directive_pattern()?.captures(&normalized)?;
    let kind = match captures.get(1)?.as_str() {
        "pause" => DirectiveKind::Pause,
        _ => DirectiveKind::Resume,
    };
    let rest = captures.get(2).map_or("", |rest| rest.as_str());
    let digits = rest
        .chars()
        .filter(char::is_ascii_digit)
        .collect::<String>();
    let target = if digits.len() >= MIN_TARGET_DIGITS {
        ContactKey::from_address(&digits)
    } else {
        None
    };
    Some(OperatorDirective { kind, target })
}

/// Applies operator directives to the pause registry and pending batches.
pub struct CommandInterpreter {
    registry: Arc<PauseRegistry>,
    scheduler: BatchScheduler,
    transport: Arc<dyn ChatTransport>,
    ack_enabled: bool,
    last_inbound: Mutex<Option<ContactKey>>,
}

impl CommandInterpreter {
    pub fn new(
        registry: Arc<PauseRegistry>,
        scheduler: BatchScheduler,
        transport: Arc<dyn ChatTransport>,
        ack_enabled: bool,
    ) -> Self {
        Self {
            registry,
            scheduler,
            transport,
            ack_enabled,
            last_inbound: Mutex::new(None),
        }
    }

    /// Remembers the most recent customer contact for untargeted directives.
    pub fn note_inbound(&self, contact: &ContactKey) {
        *self
            .last_inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(contact.clone());
    }

    pub fn last_inbound(&self) -> Option<ContactKey> {
        self.last_inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Handles one self-originated message. Returns `None` when the text is
    /// not a directive.
    pub async fn handle(&self, chat: Option<&ContactKey>, text: &str) -> Option<CommandOutcome> {
        let directive = parse_operator_directive(text)?;
        let Some(target) = directive
            .target
            .or_else(|| chat.cloned())
            .or_else(|| self.last_inbound())
        else {
            tracing::warn!(directive = ?directive.kind, "operator directive has no target contact");
            return Some(CommandOutcome::MissingTarget(directive.kind));
        };

        let (outcome, ack) = match directive.kind {
            DirectiveKind::Pause => {
                self.registry.pause(&target);
                let discarded_batch = self.scheduler.discard(&target);
                tracing::info!(contact = %target, discarded_batch, "contact paused by operator");
                (
                    CommandOutcome::Paused {
                        target: target.clone(),
                        discarded_batch,
                    },
                    PAUSE_ACK_TEXT,
                )
            }
            DirectiveKind::Resume => {
                let was_paused = self.registry.resume(&target);
                tracing::info!(contact = %target, was_paused, "contact resumed by operator");
                let ack = if was_paused {
                    RESUME_ACK_TEXT
                } else {
                    ALREADY_ACTIVE_ACK_TEXT
                };
                (
                    CommandOutcome::Resumed {
                        target: target.clone(),
                        was_paused,
                    },
                    ack,
                )
            }
        };

        if self.ack_enabled {
            if let Err(error) = self.transport.send_text(&target, ack).await {
                tracing::warn!(contact = %target, error = %error, "operator acknowledgement failed");
            }
        }
        Some(outcome)
    }
}
