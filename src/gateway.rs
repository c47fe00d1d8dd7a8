//! Invoice access with local-cache fallback.
//!
//! [`InvoiceGateway::list_invoices`] serves a fresh cache page without touching the network,
//! refreshes from KSeF otherwise, and degrades to whatever is cached when authentication or the
//! remote call fails.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::auth::{AuthError, AuthSession};
use crate::cache::{InvoiceRecord, InvoiceStore, StoreError};
use crate::invoice::{Direction, InvoiceSummary};
use crate::ksef::models::{DateRange, InvoiceMetadata, MetadataQuery};
use crate::ksef::{ApiError, InvoicePayload, KsefClient, PayloadUnrecognized, unwrap_response};

/// Name shown when the metadata carries no seller or buyer name.
pub const UNKNOWN_COUNTERPART: &str = "Unknown counterparty";
pub const DEFAULT_CURRENCY: &str = "PLN";
pub const DEFAULT_STATUS: &str = "Accepted";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// A cached page whose newest entry is younger than this is served as is.
    pub freshness: Duration,
    /// Trailing window of the remote metadata query.
    pub lookback: Duration,
    /// Records cached longer ago than this are pruned after a remote refresh.
    pub retention: Option<Duration>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            freshness: Duration::from_secs(5 * 60),
            lookback: Duration::from_secs(30 * 24 * 60 * 60),
            retention: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("KSeF request failed: {0}")]
    Api(#[from] ApiError),

    #[error(transparent)]
    PayloadUnrecognized(#[from] PayloadUnrecognized),

    #[error("Invoice cache error: {0}")]
    Cache(#[from] StoreError),
}

/// Where the invoices of a page came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageSource {
    /// Fresh cache hit; no network call was made.
    Cache,
    /// Fetched from KSeF just now.
    Remote,
    /// Remote refresh failed; the page holds whatever was cached.
    Fallback { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvoicePage {
    pub invoices: Vec<InvoiceSummary>,
    pub source: PageSource,
}

impl InvoicePage {
    /// The failure to show the user: only when the remote failed and nothing was cached.
    pub fn error(&self) -> Option<&str> {
        match &self.source {
            PageSource::Fallback { reason } if self.invoices.is_empty() => Some(reason),
            _ => None,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self.source, PageSource::Fallback { .. })
    }
}

pub struct InvoiceGateway {
    client: KsefClient,
    session: Arc<AuthSession>,
    store: Arc<dyn InvoiceStore>,
    config: GatewayConfig,
}

impl InvoiceGateway {
    pub fn new(
        client: KsefClient,
        session: Arc<AuthSession>,
        store: Arc<dyn InvoiceStore>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            client,
            session,
            store,
            config,
        }
    }

    pub fn session(&self) -> &Arc<AuthSession> {
        &self.session
    }

    pub fn store(&self) -> &Arc<dyn InvoiceStore> {
        &self.store
    }

    /// Lists invoices of one direction. Never fails: remote problems fall back to the cache.
    pub async fn list_invoices(
        &self,
        direction: Direction,
        limit: usize,
        offset: usize,
    ) -> InvoicePage {
        let cached = match self.store.query_by_direction(direction, limit, offset).await {
            Ok(records) => records,
            Err(e) => {
                warn!("Failed to read invoice cache: {}", e);
                Vec::new()
            }
        };

        let now = Utc::now();
        if self.is_fresh(&cached, now) {
            debug!(%direction, count = cached.len(), "Serving invoices from fresh cache");
            return page(&cached, PageSource::Cache);
        }

        let access_token = match self.session.ensure_valid().await {
            Ok(token) => token,
            Err(e) => {
                warn!("Authentication failed, serving cached invoices: {}", e);
                return page(
                    &cached,
                    PageSource::Fallback {
                        reason: e.to_string(),
                    },
                );
            }
        };

        match self
            .fetch_remote(&access_token, direction, limit, offset, now)
            .await
        {
            Ok(records) => {
                info!(%direction, count = records.len(), "Fetched invoice metadata from KSeF");
                self.store_records(&records).await;
                page(&records, PageSource::Remote)
            }
            Err(e) => {
                if e.is_unauthorized() {
                    info!("Access token rejected, invalidating session");
                    self.session.invalidate();
                }
                warn!("Invoice metadata query failed, serving cached invoices: {}", e);
                page(
                    &cached,
                    PageSource::Fallback {
                        reason: e.to_string(),
                    },
                )
            }
        }
    }

    /// Downloads and unwraps one invoice, or `None` on any failure.
    pub async fn invoice_details(&self, ksef_number: &str) -> Option<InvoicePayload> {
        match self.fetch_invoice_details(ksef_number).await {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!(ksef_number, "Failed to fetch invoice details: {}", e);
                None
            }
        }
    }

    /// Downloads and unwraps one invoice.
    pub async fn fetch_invoice_details(
        &self,
        ksef_number: &str,
    ) -> Result<InvoicePayload, GatewayError> {
        let access_token = self.session.ensure_valid().await?;

        let raw = match self.client.fetch_invoice(&access_token, ksef_number).await {
            Ok(raw) => raw,
            Err(e) => {
                if e.is_unauthorized() {
                    self.session.invalidate();
                }
                return Err(e.into());
            }
        };
        debug!(
            ksef_number,
            bytes = raw.bytes.len(),
            content_type = raw.content_type.as_deref().unwrap_or("-"),
            "Downloaded invoice"
        );

        Ok(unwrap_response(&raw.bytes, raw.content_type.as_deref())?)
    }

    fn is_fresh(&self, cached: &[InvoiceRecord], now: DateTime<Utc>) -> bool {
        let freshness = TimeDelta::from_std(self.config.freshness).unwrap_or(TimeDelta::MAX);
        cached
            .iter()
            .map(|record| record.cached_at)
            .max()
            .is_some_and(|newest| now.signed_duration_since(newest) < freshness)
    }

    async fn fetch_remote(
        &self,
        access_token: &str,
        direction: Direction,
        limit: usize,
        offset: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<InvoiceRecord>, ApiError> {
        let lookback = TimeDelta::from_std(self.config.lookback).unwrap_or(TimeDelta::days(30));
        let query = MetadataQuery {
            subject_type: direction.subject_type(),
            date_range: DateRange::permanent_storage(now - lookback, now),
        };

        let page = self
            .client
            .query_invoice_metadata(access_token, &query, limit, offset)
            .await?;

        Ok(page
            .invoices
            .iter()
            .filter_map(|meta| to_record(meta, direction, now))
            .collect())
    }

    async fn store_records(&self, records: &[InvoiceRecord]) {
        for record in records {
            if let Err(e) = self.store.upsert(record).await {
                warn!(id = %record.id, "Failed to cache invoice: {}", e);
            }
        }

        let Some(retention) = self.config.retention else {
            return;
        };
        let Ok(retention) = TimeDelta::from_std(retention) else {
            return;
        };
        match self.store.prune_cached_before(Utc::now() - retention).await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "Pruned invoices past retention"),
            Err(e) => warn!("Failed to prune invoice cache: {}", e),
        }
    }
}

impl std::fmt::Debug for InvoiceGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvoiceGateway")
            .field("client", &self.client)
            .field("session", &self.session)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn page(records: &[InvoiceRecord], source: PageSource) -> InvoicePage {
    InvoicePage {
        invoices: records.iter().map(InvoiceSummary::from).collect(),
        source,
    }
}

/// Maps one metadata record. Records without a KSeF number cannot be cached and are skipped.
pub(crate) fn to_record(
    meta: &InvoiceMetadata,
    direction: Direction,
    cached_at: DateTime<Utc>,
) -> Option<InvoiceRecord> {
    let id = meta.ksef_number.as_deref().map(str::trim).filter(|id| !id.is_empty())?;

    let counterpart = match direction {
        Direction::Received => meta.seller.as_ref(),
        Direction::Sent => meta.buyer.as_ref(),
    };
    let gross_amount = meta.gross_amount.unwrap_or_default();
    let net_amount = meta
        .net_amount
        .or_else(|| Some(gross_amount - meta.vat_amount?))
        .unwrap_or_default();

    Some(InvoiceRecord {
        id: id.to_string(),
        direction,
        invoice_number: meta.invoice_number.clone(),
        counterpart_name: counterpart
            .and_then(|party| party.display_name())
            .unwrap_or(UNKNOWN_COUNTERPART)
            .to_string(),
        counterpart_tax_id: counterpart
            .and_then(|party| party.tax_id())
            .map(str::to_string),
        net_amount,
        gross_amount,
        currency: meta
            .currency
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(DEFAULT_CURRENCY)
            .to_string(),
        issue_date: meta.issue_date.clone(),
        due_date: meta.payment_due_date.clone(),
        status: meta
            .status
            .clone()
            .unwrap_or_else(|| DEFAULT_STATUS.to_string()),
        payload: serde_json::to_string(meta).unwrap_or_default(),
        cached_at,
    })
}
