//! Normalisation of invoice response bodies.
//!
//! The invoice endpoint is inconsistent about its representation: plain XML, a JSON envelope
//! carrying a base64 package (gzip, zip, or bare text), or bare text. [`unwrap_response`] accepts
//! all of them without knowing in advance which one a response uses.
//!
//! Package decoding is best-effort and layered. Each strategy is tried independently and a failure
//! silently falls through to the next one.

use std::io::{Cursor, Read};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use flate2::read::GzDecoder;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use zip::ZipArchive;

/// Envelope fields that may carry a base64 package, in lookup order.
pub const PACKAGE_FIELDS: &[&str] = &[
    "invoicePackage",
    "package",
    "invoiceFile",
    "file",
    "invoice",
    "content",
    "data",
];

const XML_PROLOG: &str = "<?xml";

/// Unwrapped invoice content.
#[derive(Debug, Clone, PartialEq)]
pub enum InvoicePayload {
    /// Text starting with an XML prolog.
    Xml(String),
    /// Structured JSON that carried no recognisable package.
    Json(Value),
    /// Any other text.
    Text(String),
    /// Bytes that are not valid UTF-8.
    Binary(Vec<u8>),
}

impl InvoicePayload {
    pub fn as_xml(&self) -> Option<&str> {
        match self {
            InvoicePayload::Xml(xml) => Some(xml),
            _ => None,
        }
    }

    /// Bytes for raw export, exactly as they were unwrapped.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            InvoicePayload::Xml(text) | InvoicePayload::Text(text) => text.as_bytes().to_vec(),
            InvoicePayload::Json(value) => serde_json::to_vec_pretty(value).unwrap_or_default(),
            InvoicePayload::Binary(bytes) => bytes.clone(),
        }
    }

    /// File extension matching the payload kind.
    pub fn extension(&self) -> &'static str {
        match self {
            InvoicePayload::Xml(_) => "xml",
            InvoicePayload::Json(_) => "json",
            InvoicePayload::Text(_) => "txt",
            InvoicePayload::Binary(_) => "bin",
        }
    }

    fn from_text(text: String) -> Self {
        if has_xml_prolog(&text) {
            InvoicePayload::Xml(text)
        } else {
            InvoicePayload::Text(text)
        }
    }
}

/// Every strategy was exhausted: the body was empty or only whitespace.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Response body could not be interpreted as an invoice")]
pub struct PayloadUnrecognized;

/// Extract the canonical invoice content from a raw response body.
pub fn unwrap_response(
    raw: &[u8],
    content_type: Option<&str>,
) -> Result<InvoicePayload, PayloadUnrecognized> {
    let text = std::str::from_utf8(raw).ok();

    if content_type.is_some_and(is_json_content_type) {
        if let Some(Ok(value)) = text.map(serde_json::from_str::<Value>) {
            return Ok(unwrap_json(value));
        }
    }

    match text {
        // Decoded text with nothing in it carries no invoice.
        Some(text) if text.trim().is_empty() => Err(PayloadUnrecognized),
        Some(text) if has_xml_prolog(text) => Ok(InvoicePayload::Xml(text.to_string())),
        Some(text) => Ok(InvoicePayload::Text(text.to_string())),
        None => Ok(InvoicePayload::Binary(raw.to_vec())),
    }
}

fn unwrap_json(value: Value) -> InvoicePayload {
    if let Value::Object(map) = &value {
        for field in PACKAGE_FIELDS {
            let Some(Value::String(package)) = map.get(*field) else {
                continue;
            };
            if let Some(text) = decode_package(package) {
                debug!(field, "Decoded packaged invoice from JSON envelope");
                return InvoicePayload::from_text(text);
            }
        }
    }

    match value {
        Value::String(text) if has_xml_prolog(&text) => InvoicePayload::Xml(text),
        other => InvoicePayload::Json(other),
    }
}

/// Decode a base64 package: gzip, then zip (first entry), then bare UTF-8 text.
pub fn decode_package(base64_text: &str) -> Option<String> {
    let compact: String = base64_text
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let bytes = STANDARD.decode(compact).ok()?;

    if let Some(text) = gunzip(&bytes).filter(|text| has_xml_prolog(text)) {
        return Some(text);
    }

    if let Some(text) = first_zip_entry(&bytes).filter(|text| !text.is_empty()) {
        return Some(text);
    }

    String::from_utf8(bytes)
        .ok()
        .filter(|text| !text.trim().is_empty())
}

fn gunzip(bytes: &[u8]) -> Option<String> {
    let mut out = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut out).ok()?;
    String::from_utf8(out).ok()
}

fn first_zip_entry(bytes: &[u8]) -> Option<String> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).ok()?;
    let mut entry = archive.by_index(0).ok()?;
    let mut out = Vec::new();
    entry.read_to_end(&mut out).ok()?;
    String::from_utf8(out).ok()
}

fn has_xml_prolog(text: &str) -> bool {
    text.trim_start_matches('\u{feff}')
        .trim_start()
        .starts_with(XML_PROLOG)
}

fn is_json_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime == "application/json" || mime.ends_with("+json") || mime == "text/json"
}
