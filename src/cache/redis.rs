use crate::cache::{InvoiceRecord, InvoiceStore, Result};
use crate::invoice::Direction;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, aio::ConnectionManager};
use tracing::debug;

const DEFAULT_NAMESPACE: &str = "ksef";
const DIRECTIONS: [Direction; 2] = [Direction::Received, Direction::Sent];

/// A Redis invoice store.
///
/// Each record is a JSON string under `<ns>:invoice:<id>`; each direction keeps a sorted set of
/// ids under `<ns>:invoices:<direction>` scored by the `cachedAt` timestamp in milliseconds.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    namespace: String,
}

impl RedisStore {
    /// Creates a new Redis store from a connection manager.
    pub fn new(conn: ConnectionManager) -> Self {
        Self::with_namespace(conn, DEFAULT_NAMESPACE)
    }

    /// Creates a store whose keys live under `namespace` instead of `ksef`.
    pub fn with_namespace(conn: ConnectionManager, namespace: impl Into<String>) -> Self {
        Self {
            conn,
            namespace: namespace.into(),
        }
    }

    fn record_key(&self, id: &str) -> String {
        record_key(&self.namespace, id)
    }

    fn index_key(&self, direction: Direction) -> String {
        index_key(&self.namespace, direction)
    }
}

fn record_key(namespace: &str, id: &str) -> String {
    format!("{namespace}:invoice:{id}")
}

fn index_key(namespace: &str, direction: Direction) -> String {
    format!("{namespace}:invoices:{direction}")
}

#[async_trait]
impl InvoiceStore for RedisStore {
    async fn upsert(&self, record: &InvoiceRecord) -> Result<()> {
        let mut conn = self.conn.clone();

        // The id leaves every other direction index in the same transaction, so concurrent
        // upserts of one id cannot leave it indexed twice.
        let mut pipe = redis::pipe();
        pipe.atomic();
        for direction in DIRECTIONS.into_iter().filter(|d| *d != record.direction) {
            pipe.zrem(self.index_key(direction), &record.id).ignore();
        }
        pipe.set(self.record_key(&record.id), serde_json::to_string(record)?)
            .ignore()
            .zadd(
                self.index_key(record.direction),
                &record.id,
                record.cached_at.timestamp_millis(),
            )
            .ignore();

        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn query_by_direction(
        &self,
        direction: Direction,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<InvoiceRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();

        let start = isize::try_from(offset).unwrap_or(isize::MAX);
        let stop = isize::try_from(offset.saturating_add(limit - 1)).unwrap_or(isize::MAX);
        let index = self.index_key(direction);
        let ids: Vec<String> = conn.zrevrange(&index, start, stop).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| self.record_key(id)).collect();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await?;

        // Entries indexed under the wrong direction are skipped, not removed: a concurrent
        // upsert may be moving the id back into this index.
        let mut records = Vec::with_capacity(values.len());
        for json in values.into_iter().flatten() {
            let record: InvoiceRecord = serde_json::from_str(&json)?;
            if record.direction == direction {
                records.push(record);
            } else {
                debug!(id = %record.id, %direction, "Skipping record of another direction");
            }
        }

        Ok(records)
    }

    async fn get(&self, id: &str) -> Result<Option<InvoiceRecord>> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(self.record_key(id)).await?;
        Ok(json.map(|json| serde_json::from_str(&json)).transpose()?)
    }

    async fn count(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let mut total = 0;
        for direction in DIRECTIONS {
            let count: usize = conn.zcard(self.index_key(direction)).await?;
            total += count;
        }
        Ok(total)
    }

    async fn prune_cached_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.conn.clone();
        let max = format!("({}", cutoff.timestamp_millis());
        let mut removed = 0;

        for direction in DIRECTIONS {
            let index = self.index_key(direction);
            let ids: Vec<String> = conn.zrangebyscore(&index, "-inf", &max).await?;
            if ids.is_empty() {
                continue;
            }

            let keys: Vec<String> = ids.iter().map(|id| self.record_key(id)).collect();
            let mut pipe = redis::pipe();
            pipe.atomic().del(&keys).ignore().zrem(&index, &ids).ignore();
            let _: () = pipe.query_async(&mut conn).await?;
            removed += ids.len();
        }

        Ok(removed)
    }
}
