use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::contact::ContactKey;
use crate::generator::ReplyMedia;
use crate::order::OrderRecord;

#[derive(Debug, Error)]
/// Enumerates supported `StoreError` values.
pub enum StoreError {
    #[error("store io failed: {0}")]
    Io(String),
    #[error("store payload is invalid: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<anyhow::Error> for StoreError {
    fn from(error: anyhow::Error) -> Self {
        Self::Io(format!("{error:#}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// One completed exchange kept in the per-contact transcript.
pub struct ConversationTurn {
    pub user_text: String,
    pub reply_text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reply_media: Vec<ReplyMedia>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Value>,
    pub created_unix_ms: u64,
}

#[async_trait]
/// Bounded per-contact transcript persistence.
pub trait TranscriptStore: Send + Sync {
    async fn append_turn(
        &self,
        contact: &ContactKey,
        turn: ConversationTurn,
        max_turns: usize,
    ) -> Result<(), StoreError>;

    /// Most recent turns, oldest first.
    async fn recent_turns(
        &self,
        contact: &ContactKey,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, StoreError>;
}

#[async_trait]
/// Append-only order persistence.
pub trait OrderStore: Send + Sync {
    async fn append_order(&self, record: &OrderRecord) -> Result<(), StoreError>;

    async fn last_order(&self, contact: &ContactKey) -> Result<Option<OrderRecord>, StoreError>;
}

/// Renders turns as `Cliente:` / `Asistente:` lines for the generator.
pub fn render_history(turns: &[ConversationTurn]) -> String {
    let mut lines = Vec::with_capacity(turns.len() * 2);
    for turn in turns {
        lines.push(format!("Cliente: {}", turn.user_text.trim()));
        lines.push(format!("Asistente: {}", turn.reply_text.trim()));
    }
    lines.join("\n")
}

pub(crate) fn push_bounded(
    turns: &mut VecDeque<ConversationTurn>,
    turn: ConversationTurn,
    max_turns: usize,
) {
    turns.push_back(turn);
    while turns.len() > max_turns.max(1) {
        turns.pop_front();
    }
}

pub(crate) fn tail(turns: &VecDeque<ConversationTurn>, limit: usize) -> Vec<ConversationTurn> {
    let skip = turns.len().saturating_sub(limit);
    turns.iter().skip(skip).cloned().collect()
}

#[derive(Debug, Default)]
/// Process-local transcript and order store.
pub struct InMemoryStore {
    transcripts: Mutex<HashMap<ContactKey, VecDeque<ConversationTurn>>>,
    orders: Mutex<Vec<OrderRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn orders(&self) -> Vec<OrderRecord> {
        self.orders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl TranscriptStore for InMemoryStore {
    async fn append_turn(
        &self,
        contact: &ContactKey,
        turn: ConversationTurn,
        max_turns: usize,
    ) -> Result<(), StoreError> {
        let mut transcripts = self
            .transcripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        push_bounded(
            transcripts.entry(contact.clone()).or_default(),
            turn,
            max_turns,
        );
        Ok(())
    }

    async fn recent_turns(
        &self,
        contact: &ContactKey,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, StoreError> {
        let transcripts = self
            .transcripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(transcripts
            .get(contact)
            .map(|turns| tail(turns, limit))
            .unwrap_or_default())
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn append_order(&self, record: &OrderRecord) -> Result<(), StoreError> {
        self.orders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }

    async fn last_order(&self, contact: &ContactKey) -> Result<Option<OrderRecord>, StoreError> {
        Ok(self
            .orders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|record| &record.contact == contact)
            .cloned())
    }
}
