//! Shared vocabulary of the hosted checkout protocol.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A flat form payload: field name to string value.
///
/// Both the outbound redirect form and the inbound callback body are carried
/// as a `FieldMap`. Ordering of the map is irrelevant to signing; the order
/// comes from the field-name list.
pub type FieldMap = BTreeMap<String, String>;

/// How much of the stay is charged up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentOption {
    /// The whole stay.
    #[default]
    Full,
    /// Only the first night, as a deposit.
    FirstNight,
    /// A guest-chosen number of nights, as a deposit.
    Partial,
}

impl PaymentOption {
    /// Parse the wire form. Anything unrecognised means [`PaymentOption::Full`].
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim() {
            "first-night" => Self::FirstNight,
            "partial" => Self::Partial,
            _ => Self::Full,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::FirstNight => "first-night",
            Self::Partial => "partial",
        }
    }

    /// `true` when the option settles less than the full stay.
    pub fn is_deposit(&self) -> bool {
        !matches!(self, Self::Full)
    }
}

impl fmt::Display for PaymentOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processor outcome classification returned in the `decision` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Accept,
    Decline,
    Review,
    Error,
    Cancel,
    /// A value the processor sent that we don't recognise.
    Other(String),
}

impl Decision {
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "ACCEPT" => Self::Accept,
            "DECLINE" => Self::Decline,
            "REVIEW" => Self::Review,
            "ERROR" => Self::Error,
            "CANCEL" => Self::Cancel,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Accept => "ACCEPT",
            Self::Decline => "DECLINE",
            Self::Review => "REVIEW",
            Self::Error => "ERROR",
            Self::Cancel => "CANCEL",
            Self::Other(raw) => raw,
        }
    }
}
