use crate::models::{BookingStatus, FareRecord};
use async_trait::async_trait;
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{FindOneAndUpdateOptions, IndexOptions, ReturnDocument};
use mongodb::{bson::doc, Collection, Database, IndexModel};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;

const DUPLICATE_KEY_CODE: i32 = 11000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record already exists for this transaction")]
    Duplicate,

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        if let ErrorKind::Write(WriteFailure::WriteError(ref write_error)) = *err.kind {
            if write_error.code == DUPLICATE_KEY_CODE {
                return StoreError::Duplicate;
            }
        }
        StoreError::Backend(err.into())
    }
}

/// Durable storage for fare records.
#[async_trait]
pub trait FareStore: Send + Sync {
    async fn insert(&self, record: &FareRecord) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<FareRecord>, StoreError>;

    /// Look a record up by the key a payment was settled under: either the
    /// confirmed transaction id or the gateway order id.
    async fn find_by_settlement_key(&self, key: &str) -> Result<Option<FareRecord>, StoreError>;

    async fn update_status(
        &self,
        id: &str,
        status: BookingStatus,
    ) -> Result<Option<FareRecord>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct MongoFareStore {
    db: Database,
    bookings: Collection<FareRecord>,
}

impl MongoFareStore {
    pub fn new(db: &Database) -> Self {
        Self {
            db: db.clone(),
            bookings: db.collection("bookings"),
        }
    }

    pub async fn init_indexes(&self) -> Result<(), StoreError> {
        // Unique so a replayed confirmation can never promote twice
        let transaction_index = IndexModel::builder()
            .keys(doc! { "transactionId": 1 })
            .options(
                IndexOptions::builder()
                    .name("booking_transaction_idx".to_string())
                    .unique(true)
                    .sparse(true)
                    .build(),
            )
            .build();

        let order_index = IndexModel::builder()
            .keys(doc! { "gatewayOrderId": 1 })
            .options(
                IndexOptions::builder()
                    .name("booking_gateway_order_idx".to_string())
                    .unique(true)
                    .sparse(true)
                    .build(),
            )
            .build();

        let mobile_index = IndexModel::builder()
            .keys(doc! { "mobile": 1, "createdAt": -1 })
            .options(
                IndexOptions::builder()
                    .name("booking_mobile_idx".to_string())
                    .build(),
            )
            .build();

        self.bookings
            .create_indexes([transaction_index, order_index, mobile_index], None)
            .await?;

        tracing::info!("Booking indexes initialized");
        Ok(())
    }
}

#[async_trait]
impl FareStore for MongoFareStore {
    async fn insert(&self, record: &FareRecord) -> Result<(), StoreError> {
        self.bookings.insert_one(record, None).await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<FareRecord>, StoreError> {
        let record = self.bookings.find_one(doc! { "_id": id }, None).await?;
        Ok(record)
    }

    async fn find_by_settlement_key(&self, key: &str) -> Result<Option<FareRecord>, StoreError> {
        let filter = doc! {
            "$or": [
                { "transactionId": key },
                { "gatewayOrderId": key }
            ]
        };
        let record = self.bookings.find_one(filter, None).await?;
        Ok(record)
    }

    async fn update_status(
        &self,
        id: &str,
        status: BookingStatus,
    ) -> Result<Option<FareRecord>, StoreError> {
        let update = doc! {
            "$set": {
                "status": mongodb::bson::to_bson(&status).map_err(anyhow::Error::from)?,
                "updatedAt": mongodb::bson::DateTime::now()
            }
        };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        let record = self
            .bookings
            .find_one_and_update(doc! { "_id": id }, update, options)
            .await?;
        Ok(record)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.db.run_command(doc! { "ping": 1 }, None).await?;
        Ok(())
    }
}

/// Process-local fare store used by tests and local development.
#[derive(Default)]
pub struct InMemoryFareStore {
    records: RwLock<HashMap<String, FareRecord>>,
    unavailable: AtomicBool,
}

impl InMemoryFareStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail, to exercise persistence outages.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store offline".to_string()));
        }
        Ok(())
    }
}

fn shares_settlement_key(a: &FareRecord, b: &FareRecord) -> bool {
    let same = |x: &Option<String>, y: &Option<String>| matches!((x, y), (Some(x), Some(y)) if x == y);
    same(&a.transaction_id, &b.transaction_id) || same(&a.gateway_order_id, &b.gateway_order_id)
}

#[async_trait]
impl FareStore for InMemoryFareStore {
    async fn insert(&self, record: &FareRecord) -> Result<(), StoreError> {
        self.check_available()?;
        let mut records = self.records.write().await;
        if records.contains_key(&record.id)
            || records.values().any(|r| shares_settlement_key(r, record))
        {
            return Err(StoreError::Duplicate);
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<FareRecord>, StoreError> {
        self.check_available()?;
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn find_by_settlement_key(&self, key: &str) -> Result<Option<FareRecord>, StoreError> {
        self.check_available()?;
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|r| {
                r.transaction_id.as_deref() == Some(key) || r.gateway_order_id.as_deref() == Some(key)
            })
            .cloned())
    }

    async fn update_status(
        &self,
        id: &str,
        status: BookingStatus,
    ) -> Result<Option<FareRecord>, StoreError> {
        self.check_available()?;
        let mut records = self.records.write().await;
        Ok(records.get_mut(id).map(|record| {
            record.status = status;
            record.updated_at = mongodb::bson::DateTime::now();
            record.clone()
        }))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}
