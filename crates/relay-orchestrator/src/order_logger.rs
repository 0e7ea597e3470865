use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use relay_core::{current_unix_timestamp_ms, time_bucket};

use crate::contact::ContactKey;
use crate::order::{OrderFields, OrderRecord};
use crate::store::{OrderStore, StoreError};

#[derive(Debug, Clone, PartialEq)]
/// Enumerates supported `OrderLogOutcome` values.
pub enum OrderLogOutcome {
    Recorded(OrderRecord),
    Duplicate { bucket: u64 },
}

/// Idempotent order persistence keyed by (contact, time bucket).
pub struct OrderLogger {
    store: Arc<dyn OrderStore>,
    bucket_width_ms: u64,
    reserved: Mutex<HashSet<(ContactKey, u64)>>,
}

impl OrderLogger {
    pub fn new(store: Arc<dyn OrderStore>, bucket_width_ms: u64) -> Self {
        Self {
            store,
            bucket_width_ms,
            reserved: Mutex::new(HashSet::new()),
        }
    }

    pub async fn record(
        &self,
        contact: &ContactKey,
        fields: OrderFields,
        user_message: &str,
        reply_message: &str,
    ) -> Result<OrderLogOutcome, StoreError> {
        self.record_at(
            contact,
            fields,
            user_message,
            reply_message,
            current_unix_timestamp_ms(),
        )
        .await
    }

    pub async fn record_at(
        &self,
        contact: &ContactKey,
        fields: OrderFields,
        user_message: &str,
        reply_message: &str,
        now_unix_ms: u64,
    ) -> Result<OrderLogOutcome, StoreError> {
        let bucket = time_bucket(now_unix_ms, self.bucket_width_ms);
        let reservation = (contact.clone(), bucket);
        if !self.reserve(&reservation) {
            return Ok(OrderLogOutcome::Duplicate { bucket });
        }

        match self.store.last_order(contact).await {
            Ok(Some(last)) if time_bucket(last.created_unix_ms, self.bucket_width_ms) == bucket => {
                return Ok(OrderLogOutcome::Duplicate { bucket });
            }
            Ok(_) => {}
            Err(error) => {
                self.release(&reservation);
                return Err(error);
            }
        }

        let record = OrderRecord {
            contact: contact.clone(),
            bucket,
            fields,
            user_message: user_message.to_string(),
            reply_message: reply_message.to_string(),
            created_unix_ms: now_unix_ms,
        };
        if let Err(error) = self.store.append_order(&record).await {
            self.release(&reservation);
            return Err(error);
        }
        tracing::info!(contact = %contact, bucket, product = %record.fields.product, "order recorded");
        Ok(OrderLogOutcome::Recorded(record))
    }

    // Only the current and previous buckets can still collide.
    fn reserve(&self, reservation: &(ContactKey, u64)) -> bool {
        let mut reserved = self.reserved.lock().unwrap_or_else(PoisonError::into_inner);
        let floor = reservation.1.saturating_sub(1);
        reserved.retain(|(_, bucket)| *bucket >= floor);
        reserved.insert(reservation.clone())
    }

    fn release(&self, reservation: &(ContactKey, u64)) {
        self.reserved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(reservation);
    }
}
