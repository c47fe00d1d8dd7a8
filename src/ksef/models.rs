//! Request and response bodies of the KSeF API.
//!
//! Response types are deliberately lenient: every field the client relies on is optional so
//! that missing data surfaces as a step-specific error rather than a decode failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// One entry of `GET /security/public-key-certificates`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyCertificate {
    #[serde(default)]
    pub usage: Vec<String>,
    #[serde(default)]
    pub certificate: String,
    #[serde(default)]
    pub valid_from: Option<String>,
    #[serde(default)]
    pub valid_to: Option<String>,
}

/// The certificate list is a bare array; some deployments wrap it in an object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum CertificateList {
    Bare(Vec<PublicKeyCertificate>),
    Wrapped {
        #[serde(default)]
        certificates: Vec<PublicKeyCertificate>,
    },
}

impl From<CertificateList> for Vec<PublicKeyCertificate> {
    fn from(list: CertificateList) -> Self {
        match list {
            CertificateList::Bare(certs) | CertificateList::Wrapped { certificates: certs } => {
                certs
            }
        }
    }
}

/// Response of `POST /auth/challenge`.
///
/// The timestamp arrives either as milliseconds (`timestampMs`) or as an ISO datetime
/// (`timestamp`); both are kept raw and normalised by
/// [`Challenge::from_response`](super::challenge::Challenge::from_response).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse {
    #[serde(default)]
    pub challenge: Option<String>,
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub timestamp_ms: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextIdentifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl ContextIdentifier {
    pub fn nip(value: impl Into<String>) -> Self {
        Self {
            kind: "Nip".to_string(),
            value: value.into(),
        }
    }
}

/// Body of `POST /auth/ksef-token`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KsefTokenRequest {
    pub challenge: String,
    pub context_identifier: ContextIdentifier,
    pub encrypted_token: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub valid_until: Option<String>,
}

/// Response of `POST /auth/ksef-token`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthInitResponse {
    #[serde(default)]
    pub reference_number: Option<String>,
    #[serde(default)]
    pub authentication_token: Option<TokenInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusInfo {
    pub code: i64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub details: Option<Vec<String>>,
}

/// Response of `GET /auth/{referenceNumber}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthStatusResponse {
    #[serde(default)]
    pub status: Option<StatusInfo>,
}

/// Response of `POST /auth/token/redeem`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemResponse {
    #[serde(default)]
    pub access_token: Option<TokenInfo>,
}

/// Invoice role of the authenticated taxpayer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubjectType {
    /// Issuer side.
    Subject1,
    /// Recipient side.
    Subject2,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub date_type: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DateRange {
    pub fn permanent_storage(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            date_type: "PermanentStorage".to_string(),
            from,
            to,
        }
    }
}

/// Body of `POST /invoices/query/metadata`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataQuery {
    pub subject_type: SubjectType,
    pub date_range: DateRange,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartyIdentifier {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Seller or buyer as reported in invoice metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceParty {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<PartyIdentifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl InvoiceParty {
    pub fn tax_id(&self) -> Option<&str> {
        self.nip
            .as_deref()
            .or_else(|| self.identifier.as_ref()?.value.as_deref())
            .filter(|id| !id.is_empty())
    }

    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().map(str::trim).filter(|n| !n.is_empty())
    }
}

/// One record of the metadata listing. Unknown fields are preserved in `extra` so the
/// whole record can be stored as the cached payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceMetadata {
    #[serde(default, alias = "ksefReferenceNumber")]
    pub ksef_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller: Option<InvoiceParty>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer: Option<InvoiceParty>,
    #[serde(
        default,
        deserialize_with = "lenient_amount",
        skip_serializing_if = "Option::is_none"
    )]
    pub net_amount: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_amount",
        skip_serializing_if = "Option::is_none"
    )]
    pub gross_amount: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_amount",
        skip_serializing_if = "Option::is_none"
    )]
    pub vat_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Response of `POST /invoices/query/metadata`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceMetadataPage {
    #[serde(default)]
    pub invoices: Vec<InvoiceMetadata>,
}

/// Amounts arrive as JSON numbers or as decimal strings (with either separator).
fn lenient_amount<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    })
}
