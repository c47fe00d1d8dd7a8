use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ksef::models::SubjectType;

/// Whether the taxpayer received or issued an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Received,
    Sent,
}

impl Direction {
    /// The API role queried for this direction.
    pub fn subject_type(self) -> SubjectType {
        match self {
            Direction::Sent => SubjectType::Subject1,
            Direction::Received => SubjectType::Subject2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Received => "received",
            Direction::Sent => "sent",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "received" | "subject2" => Ok(Direction::Received),
            "sent" | "subject1" => Ok(Direction::Sent),
            other => Err(format!("unknown invoice direction: {other}")),
        }
    }
}

/// Headline view of an invoice, as shown in listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceSummary {
    pub id: String,
    pub direction: Direction,
    pub invoice_number: Option<String>,
    pub counterpart_name: String,
    pub counterpart_tax_id: Option<String>,
    /// Gross amount.
    pub amount: f64,
    pub net_amount: f64,
    pub currency: String,
    pub issue_date: Option<String>,
    pub due_date: Option<String>,
    pub status: String,
    /// When the record was written to the local cache; for a fresh remote page, the fetch time.
    pub cached_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_subject_mapping() {
        assert_eq!(Direction::Sent.subject_type(), SubjectType::Subject1);
        assert_eq!(Direction::Received.subject_type(), SubjectType::Subject2);
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!("Received".parse::<Direction>(), Ok(Direction::Received));
        assert_eq!("sent".parse::<Direction>(), Ok(Direction::Sent));
        assert_eq!("Subject1".parse::<Direction>(), Ok(Direction::Sent));
        assert!("both".parse::<Direction>().is_err());
        assert_eq!(
            serde_json::to_string(&Direction::Received).unwrap(),
            "\"received\""
        );
    }
}
