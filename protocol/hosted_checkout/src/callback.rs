//! Intake of the processor's signed callback.
//!
//! A callback body is untrusted until [`CallbackValidator::validate`] has
//! recomputed its signature over the processor's own `signed_field_names`.
//! Only signed fields are read after that gate, and the decision and the
//! reference number must be among them. Nothing in here ever fails because of
//! an unknown decision or reason code.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, warn};

use crate::signature::Signer;
use crate::types::{Decision, FieldMap, PaymentOption};

pub const CODE_INVALID_SIGNATURE: &str = "INVALID_SIGNATURE";
pub const CODE_CANCELLED: &str = "CANCELLED";
pub const CODE_UNKNOWN: &str = "UNKNOWN";

/// Fields that decide what a callback does; a payload that leaves them
/// unsigned is not trusted.
const REQUIRED_SIGNED_FIELDS: [&str; 2] = ["decision", "req_reference_number"];

/// Why a payload did not pass the authenticity gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureFailure {
    MissingSignedFieldNames,
    MissingSignature,
    Mismatch,
    UnsignedRequiredField,
}

impl SignatureFailure {
    /// Same code for every variant; callers must not learn which check failed.
    pub fn code(&self) -> &'static str {
        CODE_INVALID_SIGNATURE
    }
}

/// Bookkeeping carried through the round trip in `merchant_defined_data1..3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MerchantData {
    pub payment_option: PaymentOption,
    pub nights_to_pay: u32,
    pub total_nights: u32,
}

impl MerchantData {
    fn from_fields(fields: &FieldMap) -> Self {
        let number = |name: &str| {
            fields
                .get(name)
                .and_then(|v| v.trim().parse::<u32>().ok())
                .unwrap_or(0)
        };
        Self {
            payment_option: fields
                .get("merchant_defined_data1")
                .map(|v| PaymentOption::parse_lenient(v))
                .unwrap_or_default(),
            nights_to_pay: number("merchant_defined_data2"),
            total_nights: number("merchant_defined_data3"),
        }
    }
}

/// A callback whose signature checked out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifiedCallback {
    pub decision: Decision,
    pub reason_code: Option<String>,
    pub reference_number: Option<String>,
    pub transaction_id: Option<String>,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub card_type: String,
    pub auth_code: Option<String>,
    pub merchant: MerchantData,
    pub raw: FieldMap,
}

impl VerifiedCallback {
    pub fn success(&self) -> bool {
        self.decision == Decision::Accept
    }

    /// Result code: the reason code for accepts and declines, `CANCELLED` for
    /// cancellations, the reason code or `UNKNOWN` otherwise.
    pub fn code(&self) -> String {
        match self.decision {
            Decision::Cancel => CODE_CANCELLED.to_string(),
            _ => self
                .reason_code
                .clone()
                .unwrap_or_else(|| CODE_UNKNOWN.to_string()),
        }
    }

    pub fn message(&self) -> String {
        match &self.decision {
            Decision::Accept => "Payment accepted".to_string(),
            Decision::Decline => decline_reason(self.reason_code.as_deref().unwrap_or("")),
            Decision::Cancel => "Payment cancelled by the customer".to_string(),
            other => format!("Processing error: {}", other.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CallbackOutcome {
    Rejected { failure: SignatureFailure },
    Verified(VerifiedCallback),
}

impl CallbackOutcome {
    pub fn success(&self) -> bool {
        matches!(self, Self::Verified(cb) if cb.success())
    }

    pub fn code(&self) -> String {
        match self {
            Self::Rejected { failure } => failure.code().to_string(),
            Self::Verified(cb) => cb.code(),
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Rejected { .. } => "Invalid signature - payload may have been tampered with".to_string(),
            Self::Verified(cb) => cb.message(),
        }
    }

    pub fn verified(&self) -> Option<&VerifiedCallback> {
        match self {
            Self::Verified(cb) => Some(cb),
            Self::Rejected { .. } => None,
        }
    }
}

/// Checks callback authenticity with the shared secret.
#[derive(Debug, Clone)]
pub struct CallbackValidator {
    signer: Signer,
}

impl CallbackValidator {
    pub fn new(signer: Signer) -> Self {
        Self { signer }
    }

    /// Authenticate `payload` and map it to a structured outcome.
    pub fn validate(&self, payload: &FieldMap) -> CallbackOutcome {
        let signed = match self.check_signature(payload) {
            Ok(signed) => signed,
            Err(failure) => {
                warn!(
                    reference = payload.get("req_reference_number").map(String::as_str).unwrap_or(""),
                    ?failure,
                    "Callback rejected by signature check"
                );
                return CallbackOutcome::Rejected { failure };
            }
        };

        let decision = Decision::from_wire(field(&signed, "decision").unwrap_or(""));
        let callback = VerifiedCallback {
            reason_code: field(&signed, "reason_code").map(String::from),
            reference_number: field(&signed, "req_reference_number").map(String::from),
            transaction_id: field(&signed, "transaction_id").map(String::from),
            amount: field(&signed, "req_amount")
                .or_else(|| field(&signed, "auth_amount"))
                .and_then(|v| Decimal::from_str(v.trim()).ok()),
            currency: field(&signed, "req_currency").map(String::from),
            card_type: field(&signed, "req_card_type")
                .unwrap_or("unknown")
                .to_string(),
            auth_code: field(&signed, "auth_code").map(String::from),
            merchant: MerchantData::from_fields(&signed),
            raw: payload.clone(),
            decision,
        };

        debug!(
            decision = callback.decision.as_str(),
            reason = callback.reason_code.as_deref().unwrap_or(""),
            reference = callback.reference_number.as_deref().unwrap_or(""),
            "Callback signature verified"
        );

        CallbackOutcome::Verified(callback)
    }

    /// Verify the signature and return the signed subset of `payload`.
    fn check_signature(&self, payload: &FieldMap) -> Result<FieldMap, SignatureFailure> {
        let names = field(payload, "signed_field_names")
            .ok_or(SignatureFailure::MissingSignedFieldNames)?;
        let presented = field(payload, "signature").ok_or(SignatureFailure::MissingSignature)?;

        let order: Vec<&str> = names.split(',').map(str::trim).collect();
        if !self.signer.verify(&order, payload, presented) {
            return Err(SignatureFailure::Mismatch);
        }
        if REQUIRED_SIGNED_FIELDS
            .iter()
            .any(|required| !order.contains(required))
        {
            return Err(SignatureFailure::UnsignedRequiredField);
        }

        Ok(order
            .iter()
            .filter_map(|name| payload.get_key_value(*name))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// Non-empty field value.
fn field<'a>(payload: &'a FieldMap, name: &str) -> Option<&'a str> {
    payload
        .get(name)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

/// Human-readable text for a processor reason code.
pub fn decline_reason(reason_code: &str) -> String {
    let known = match reason_code {
        "100" => "Transaction successful",
        "102" => "Card refused - check with your bank",
        "200" => "Insufficient funds",
        "201" => "Expired card",
        "202" => "Card reported lost or stolen",
        "203" => "Invalid card",
        "204" => "Transaction amount limit exceeded",
        "205" => "Card not accepted",
        "207" => "Invalid CVV code",
        "208" => "Inactive card",
        "210" => "Credit limit exceeded",
        "221" => "Transaction cancelled",
        "230" => "Transaction refused by the bank",
        "231" => "Invalid card number",
        "234" => "Technical problem - please retry",
        "400" => "Fraud detected",
        "520" => "Missing information",
        _ => return format!("Transaction declined (code: {reason_code})"),
    };
    known.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decline_reason_lookup() {
        assert_eq!(decline_reason("200"), "Insufficient funds");
        assert_eq!(decline_reason("201"), "Expired card");
        assert_eq!(decline_reason("400"), "Fraud detected");
        assert_eq!(decline_reason("999"), "Transaction declined (code: 999)");
        assert_eq!(decline_reason(""), "Transaction declined (code: )");
    }

    #[test]
    fn merchant_data_defaults() {
        let fields = FieldMap::new();
        let data = MerchantData::from_fields(&fields);
        assert_eq!(data.payment_option, PaymentOption::Full);
        assert_eq!(data.nights_to_pay, 0);
        assert_eq!(data.total_nights, 0);

        let mut fields = FieldMap::new();
        fields.insert("merchant_defined_data1".into(), "partial".into());
        fields.insert("merchant_defined_data2".into(), "two".into());
        fields.insert("merchant_defined_data3".into(), "4".into());
        let data = MerchantData::from_fields(&fields);
        assert_eq!(data.payment_option, PaymentOption::Partial);
        assert_eq!(data.nights_to_pay, 0);
        assert_eq!(data.total_nights, 4);
    }

    #[test]
    fn rejected_outcome_hides_failure_kind() {
        for failure in [
            SignatureFailure::MissingSignature,
            SignatureFailure::MissingSignedFieldNames,
            SignatureFailure::Mismatch,
        ] {
            let outcome = CallbackOutcome::Rejected { failure };
            assert_eq!(outcome.code(), "INVALID_SIGNATURE");
            assert!(!outcome.success());
            assert!(outcome.verified().is_none());
        }
    }
}
