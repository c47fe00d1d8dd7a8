//! Local invoice cache.
//!
//! One record per KSeF invoice id, upserted on every successful remote fetch. Records are never
//! removed by normal operation; [`InvoiceStore::prune_cached_before`] exists for an explicitly
//! configured retention only.

use ::redis::RedisError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::Report;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use crate::invoice::{Direction, InvoiceSummary};

type Result<T> = std::result::Result<T, StoreError>;

/// Cached invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceRecord {
    pub id: String,
    pub direction: Direction,
    #[serde(default)]
    pub invoice_number: Option<String>,
    pub counterpart_name: String,
    #[serde(default)]
    pub counterpart_tax_id: Option<String>,
    pub net_amount: f64,
    pub gross_amount: f64,
    pub currency: String,
    #[serde(default)]
    pub issue_date: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    pub status: String,
    /// Serialized full invoice metadata.
    pub payload: String,
    pub cached_at: DateTime<Utc>,
}

impl From<&InvoiceRecord> for InvoiceSummary {
    fn from(record: &InvoiceRecord) -> Self {
        InvoiceSummary {
            id: record.id.clone(),
            direction: record.direction,
            invoice_number: record.invoice_number.clone(),
            counterpart_name: record.counterpart_name.clone(),
            counterpart_tax_id: record.counterpart_tax_id.clone(),
            amount: record.gross_amount,
            net_amount: record.net_amount,
            currency: record.currency.clone(),
            issue_date: record.issue_date.clone(),
            due_date: record.due_date.clone(),
            status: record.status.clone(),
            cached_at: Some(record.cached_at),
        }
    }
}

/// Error type for invoice store operations.
#[derive(Debug)]
pub struct StoreError {
    error: Report,
}

impl StoreError {
    pub fn new<T>(error: T) -> Self
    where
        T: StdError + Send + Sync + 'static,
    {
        Self {
            error: Report::new(error),
        }
    }
}

impl StdError for StoreError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.error.source()
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl From<RedisError> for StoreError {
    fn from(error: RedisError) -> Self {
        Self::new(error)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        Self::new(error)
    }
}

/// Abstract interface for invoice cache backends.
#[async_trait]
pub trait InvoiceStore: Send + Sync + 'static {
    /// Inserts the record or replaces the one with the same id.
    async fn upsert(&self, record: &InvoiceRecord) -> Result<()>;

    /// Records of one direction, most recently cached first.
    async fn query_by_direction(
        &self,
        direction: Direction,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<InvoiceRecord>>;

    /// Loads a single record by id.
    async fn get(&self, id: &str) -> Result<Option<InvoiceRecord>>;

    /// Returns the number of cached records.
    async fn count(&self) -> Result<usize>;

    /// Removes records cached strictly before `cutoff`, returning how many were removed.
    async fn prune_cached_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

#[cfg(test)]
pub(crate) fn sample_record(
    id: &str,
    direction: Direction,
    cached_at: DateTime<Utc>,
) -> InvoiceRecord {
    InvoiceRecord {
        id: id.to_string(),
        direction,
        invoice_number: Some(format!("FV/{id}")),
        counterpart_name: "ACME Sp. z o.o.".to_string(),
        counterpart_tax_id: Some("5265877635".to_string()),
        net_amount: 100.0,
        gross_amount: 123.0,
        currency: "PLN".to_string(),
        issue_date: Some("2025-01-15".to_string()),
        due_date: None,
        status: "Accepted".to_string(),
        payload: "{}".to_string(),
        cached_at,
    }
}
