use crate::cache::{InvoiceRecord, InvoiceStore, Result};
use crate::invoice::Direction;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

/// An in-memory invoice store.
///
/// Useful for testing and when no durable backend is configured.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: Arc<DashMap<String, InvoiceRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InvoiceStore for MemoryStore {
    async fn upsert(&self, record: &InvoiceRecord) -> Result<()> {
        self.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn query_by_direction(
        &self,
        direction: Direction,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<InvoiceRecord>> {
        let mut matching: Vec<InvoiceRecord> = self
            .records
            .iter()
            .filter(|entry| entry.value().direction == direction)
            .map(|entry| entry.value().clone())
            .collect();

        // Newest first; ties broken by id so paging is stable.
        matching.sort_by(|a, b| b.cached_at.cmp(&a.cached_at).then_with(|| a.id.cmp(&b.id)));

        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }

    async fn get(&self, id: &str) -> Result<Option<InvoiceRecord>> {
        Ok(self.records.get(id).map(|entry| entry.value().clone()))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.len())
    }

    async fn prune_cached_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        // Counted inside retain: concurrent upserts may grow the map meanwhile.
        let mut removed = 0;
        self.records.retain(|_, record| {
            let keep = record.cached_at >= cutoff;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}
