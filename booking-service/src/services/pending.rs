//! Pending prepaid bookings, keyed by gateway transaction id.
//!
//! An entry lives from a successful payment initiation until the gateway
//! confirms or rejects the payment. `claim` is a one-shot read-and-delete, so
//! at most one confirmation can ever promote a given entry. The winner leaves
//! a short-lived settling marker behind until its record is durable, which
//! lets a concurrent confirmation tell "being settled" from "never existed".

use crate::models::{GatewayKind, TripDraft};
use crate::services::repository::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;

const KEY_PREFIX: &str = "pending_booking:";
const SETTLING_SUFFIX: &str = ":settling";

/// Upper bound on how long a claimed entry counts as being settled.
pub const SETTLING_TTL: Duration = Duration::from_secs(60);

// Remove the payload and leave the settling marker in one step.
const CLAIM_SCRIPT: &str = r"
local payload = redis.call('GET', KEYS[1])
if payload then
  redis.call('DEL', KEYS[1])
  redis.call('SET', KEYS[2], '1', 'EX', ARGV[1])
end
return payload
";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransaction {
    pub transaction_id: String,
    pub gateway: GatewayKind,
    pub trip: TripDraft,
    pub advance_amount: f64,
    pub created_at: DateTime<Utc>,
}

impl PendingTransaction {
    pub fn new(
        transaction_id: String,
        gateway: GatewayKind,
        trip: TripDraft,
        advance_amount: f64,
    ) -> Self {
        Self {
            transaction_id,
            gateway,
            trip,
            advance_amount,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait PendingTransactionStore: Send + Sync {
    /// Store a pending booking. Fails with [`StoreError::Duplicate`] if the id is live.
    async fn put(&self, pending: &PendingTransaction) -> Result<(), StoreError>;

    /// Atomically fetch and remove the entry.
    async fn take(&self, transaction_id: &str) -> Result<Option<PendingTransaction>, StoreError>;

    /// Like [`take`](Self::take), but marks the transaction as settling for
    /// up to [`SETTLING_TTL`] so concurrent confirmations can wait for the
    /// winner instead of reporting missing data.
    async fn claim(&self, transaction_id: &str) -> Result<Option<PendingTransaction>, StoreError>;

    /// True while a claim on the transaction is still in flight.
    async fn is_settling(&self, transaction_id: &str) -> Result<bool, StoreError>;

    /// Clear the settling marker once the claim is resolved.
    async fn release(&self, transaction_id: &str) -> Result<(), StoreError>;

    /// Read without consuming, for status queries.
    async fn peek(&self, transaction_id: &str) -> Result<Option<PendingTransaction>, StoreError>;
}

/// Redis-backed store. Entries expire after `ttl` so abandoned checkouts are
/// collected without a sweeper.
#[derive(Clone)]
pub struct RedisPendingStore {
    connection: ConnectionManager,
    ttl: Duration,
    claim_script: redis::Script,
}

impl RedisPendingStore {
    pub async fn connect(client: redis::Client, ttl: Duration) -> Result<Self, StoreError> {
        let connection = ConnectionManager::new(client).await.map_err(|e| {
            tracing::error!("Failed to connect to Redis: {}", e);
            StoreError::Backend(e.into())
        })?;
        Ok(Self {
            connection,
            ttl,
            claim_script: redis::Script::new(CLAIM_SCRIPT),
        })
    }

    fn key(transaction_id: &str) -> String {
        format!("{}{}", KEY_PREFIX, transaction_id)
    }

    fn settling_key(transaction_id: &str) -> String {
        format!("{}{}{}", KEY_PREFIX, transaction_id, SETTLING_SUFFIX)
    }
}

fn decode(raw: Option<String>) -> Result<Option<PendingTransaction>, StoreError> {
    raw.map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|e| StoreError::Backend(e.into()))
}

#[async_trait]
impl PendingTransactionStore for RedisPendingStore {
    async fn put(&self, pending: &PendingTransaction) -> Result<(), StoreError> {
        let payload = serde_json::to_string(pending).map_err(|e| StoreError::Backend(e.into()))?;
        let mut con = self.connection.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(Self::key(&pending.transaction_id))
            .arg(payload)
            .arg("EX")
            .arg(self.ttl.as_secs().max(1))
            .arg("NX")
            .query_async(&mut con)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;

        match reply {
            Some(_) => Ok(()),
            None => Err(StoreError::Duplicate),
        }
    }

    async fn take(&self, transaction_id: &str) -> Result<Option<PendingTransaction>, StoreError> {
        let mut con = self.connection.clone();
        let raw: Option<String> = redis::cmd("GETDEL")
            .arg(Self::key(transaction_id))
            .query_async(&mut con)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        decode(raw)
    }

    async fn claim(&self, transaction_id: &str) -> Result<Option<PendingTransaction>, StoreError> {
        let mut con = self.connection.clone();
        let raw: Option<String> = self
            .claim_script
            .key(Self::key(transaction_id))
            .key(Self::settling_key(transaction_id))
            .arg(SETTLING_TTL.as_secs())
            .invoke_async(&mut con)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        decode(raw)
    }

    async fn is_settling(&self, transaction_id: &str) -> Result<bool, StoreError> {
        let mut con = self.connection.clone();
        let exists: bool = redis::cmd("EXISTS")
            .arg(Self::settling_key(transaction_id))
            .query_async(&mut con)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(exists)
    }

    async fn release(&self, transaction_id: &str) -> Result<(), StoreError> {
        let mut con = self.connection.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(Self::settling_key(transaction_id))
            .query_async(&mut con)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(())
    }

    async fn peek(&self, transaction_id: &str) -> Result<Option<PendingTransaction>, StoreError> {
        let mut con = self.connection.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(Self::key(transaction_id))
            .query_async(&mut con)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        decode(raw)
    }
}

/// Process-local store for tests and single-node development. Entries older
/// than `ttl` are treated as absent; [`spawn_sweeper`](Self::spawn_sweeper)
/// removes them.
pub struct InMemoryPendingStore {
    entries: DashMap<String, PendingTransaction>,
    settling: DashMap<String, DateTime<Utc>>,
    ttl: Duration,
}

impl Default for InMemoryPendingStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

impl InMemoryPendingStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            settling: DashMap::new(),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_expired(&self, pending: &PendingTransaction) -> bool {
        older_than(pending.created_at, self.ttl)
    }

    /// Drop abandoned entries and stale settling markers. Returns how many
    /// entries were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, pending| !self.is_expired(pending));
        self.settling
            .retain(|_, claimed_at| !older_than(*claimed_at, SETTLING_TTL));
        before - self.entries.len()
    }

    /// Purge on a fixed interval until the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let purged = store.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, remaining = store.len(), "Purged abandoned pending bookings");
                }
            }
        })
    }
}

fn older_than(at: DateTime<Utc>, limit: Duration) -> bool {
    Utc::now()
        .signed_duration_since(at)
        .to_std()
        .map(|age| age > limit)
        .unwrap_or(false)
}

#[async_trait]
impl PendingTransactionStore for InMemoryPendingStore {
    async fn put(&self, pending: &PendingTransaction) -> Result<(), StoreError> {
        use dashmap::mapref::entry::Entry;

        match self.entries.entry(pending.transaction_id.clone()) {
            Entry::Occupied(mut occupied) => {
                if self.is_expired(occupied.get()) {
                    occupied.insert(pending.clone());
                    Ok(())
                } else {
                    Err(StoreError::Duplicate)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(pending.clone());
                Ok(())
            }
        }
    }

    async fn take(&self, transaction_id: &str) -> Result<Option<PendingTransaction>, StoreError> {
        Ok(self
            .entries
            .remove(transaction_id)
            .map(|(_, pending)| pending)
            .filter(|pending| !self.is_expired(pending)))
    }

    async fn claim(&self, transaction_id: &str) -> Result<Option<PendingTransaction>, StoreError> {
        use dashmap::mapref::entry::Entry;

        // The marker goes in while the entry's shard is still locked, so a
        // racing claimer sees either the payload or the marker.
        match self.entries.entry(transaction_id.to_string()) {
            Entry::Occupied(occupied) => {
                if self.is_expired(occupied.get()) {
                    occupied.remove();
                    return Ok(None);
                }
                self.settling.insert(transaction_id.to_string(), Utc::now());
                Ok(Some(occupied.remove()))
            }
            Entry::Vacant(_) => Ok(None),
        }
    }

    async fn is_settling(&self, transaction_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .settling
            .get(transaction_id)
            .map_or(false, |claimed_at| !older_than(*claimed_at, SETTLING_TTL)))
    }

    async fn release(&self, transaction_id: &str) -> Result<(), StoreError> {
        self.settling.remove(transaction_id);
        Ok(())
    }

    async fn peek(&self, transaction_id: &str) -> Result<Option<PendingTransaction>, StoreError> {
        Ok(self
            .entries
            .get(transaction_id)
            .map(|entry| entry.value().clone())
            .filter(|pending| !self.is_expired(pending)))
    }
}
