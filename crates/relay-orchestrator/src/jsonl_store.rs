use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use relay_core::{write_text_atomic, JsonlEventLog};

use crate::contact::ContactKey;
use crate::keyed_shards::KeyedShards;
use crate::order::OrderRecord;
use crate::store::{push_bounded, tail, ConversationTurn, OrderStore, StoreError, TranscriptStore};

const TRANSCRIPTS_DIR: &str = "transcripts";
const ORDERS_FILE: &str = "orders.jsonl";

/// File-backed store: one JSON transcript per contact, orders appended to
/// `orders.jsonl`.
pub struct JsonlConversationStore {
    root: PathBuf,
    orders: JsonlEventLog,
    last_orders: Mutex<HashMap<ContactKey, OrderRecord>>,
    transcript_locks: KeyedShards<Arc<Mutex<()>>>,
}

impl JsonlConversationStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(TRANSCRIPTS_DIR))
            .with_context(|| format!("failed to create {}", root.display()))?;
        let orders = JsonlEventLog::open(root.join(ORDERS_FILE))?;
        let (rows, skipped) = orders.read_tolerant()?;
        if skipped > 0 {
            tracing::warn!(path = %orders.path().display(), skipped, "skipped malformed order rows");
        }
        let mut last_orders = HashMap::new();
        for row in rows {
            match serde_json::from_value::<OrderRecord>(row) {
                Ok(record) => {
                    last_orders.insert(record.contact.clone(), record);
                }
                Err(error) => {
                    tracing::warn!(path = %orders.path().display(), error = %error, "ignoring unreadable order row");
                }
            }
        }
        Ok(Self {
            root,
            orders,
            last_orders: Mutex::new(last_orders),
            transcript_locks: KeyedShards::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn transcript_path(&self, contact: &ContactKey) -> PathBuf {
        self.root
            .join(TRANSCRIPTS_DIR)
            .join(format!("{}.json", contact.as_str()))
    }

    fn load_transcript(&self, contact: &ContactKey) -> Result<VecDeque<ConversationTurn>> {
        let path = self.transcript_path(contact);
        if !path.exists() {
            return Ok(VecDeque::new());
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if raw.trim().is_empty() {
            return Ok(VecDeque::new());
        }
        serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }
}

#[async_trait]
impl TranscriptStore for JsonlConversationStore {
    async fn append_turn(
        &self,
        contact: &ContactKey,
        turn: ConversationTurn,
        max_turns: usize,
    ) -> Result<(), StoreError> {
        let lock = self.transcript_locks.with_key(contact, |locks| {
            Arc::clone(locks.entry(contact.clone()).or_default())
        });
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut turns = self.load_transcript(contact)?;
        push_bounded(&mut turns, turn, max_turns);
        let encoded = serde_json::to_string_pretty(&turns)?;
        write_text_atomic(&self.transcript_path(contact), &encoded)?;
        Ok(())
    }

    async fn recent_turns(
        &self,
        contact: &ContactKey,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, StoreError> {
        let turns = self.load_transcript(contact)?;
        Ok(tail(&turns, limit))
    }
}

#[async_trait]
impl OrderStore for JsonlConversationStore {
    async fn append_order(&self, record: &OrderRecord) -> Result<(), StoreError> {
        self.orders.append(&serde_json::to_value(record)?)?;
        self.last_orders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.contact.clone(), record.clone());
        Ok(())
    }

    async fn last_order(&self, contact: &ContactKey) -> Result<Option<OrderRecord>, StoreError> {
        Ok(self
            .last_orders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(contact)
            .cloned())
    }
}
