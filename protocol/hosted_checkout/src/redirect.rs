//! Signed form fields for the processor's hosted payment page.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ProtocolError, Result};
use crate::signature::Signer;
use crate::types::{FieldMap, PaymentOption};

/// Every outbound field, in the order the processor expects them signed.
pub const SIGNED_FIELD_NAMES: [&str; 24] = [
    "access_key",
    "profile_id",
    "transaction_uuid",
    "signed_field_names",
    "unsigned_field_names",
    "signed_date_time",
    "locale",
    "transaction_type",
    "reference_number",
    "amount",
    "currency",
    "payment_method",
    "override_custom_receipt_page",
    "override_custom_cancel_page",
    "bill_to_forename",
    "bill_to_surname",
    "bill_to_email",
    "bill_to_address_line1",
    "bill_to_address_city",
    "bill_to_address_country",
    "merchant_defined_data1",
    "merchant_defined_data2",
    "merchant_defined_data3",
    "merchant_defined_data4",
];

pub const DEFAULT_LOCALE: &str = "fr-FR";
const DEFAULT_ADDRESS: &str = "Hotel Address";
const DEFAULT_CITY: &str = "Douala";
const DEFAULT_COUNTRY: &str = "CM";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingContact {
    pub forename: String,
    pub surname: String,
    pub email: String,
    pub address_line1: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectRequest {
    pub reservation_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub billing: BillingContact,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub payment_option: PaymentOption,
    pub nights_to_pay: u32,
    pub nights: u32,
    pub room_name: String,
}

impl RedirectRequest {
    fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        if self.reservation_id.trim().is_empty() {
            errors.push("missing reservation id");
        }
        if self.amount <= Decimal::ZERO {
            errors.push("amount must be positive");
        }
        if self.currency.trim().is_empty() {
            errors.push("missing currency");
        }
        if self.billing.email.trim().is_empty() {
            errors.push("missing billing email");
        }
        if self.nights_to_pay < 1 || self.nights_to_pay > self.nights {
            errors.push("nights to pay outside of the stay");
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::Validation(errors.join(", ")))
        }
    }
}

/// The complete form the browser posts to the hosted page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedForm {
    pub transaction_uuid: String,
    pub fields: FieldMap,
}

/// Builds signed redirect forms for one merchant profile.
#[derive(Debug, Clone)]
pub struct RedirectBuilder {
    access_key: String,
    profile_id: String,
    receipt_url: String,
    cancel_url: String,
    locale: String,
    signer: Signer,
}

impl RedirectBuilder {
    pub fn new(
        access_key: impl Into<String>,
        profile_id: impl Into<String>,
        signer: Signer,
        receipt_url: impl Into<String>,
        cancel_url: impl Into<String>,
    ) -> Self {
        Self {
            access_key: access_key.into(),
            profile_id: profile_id.into(),
            receipt_url: receipt_url.into(),
            cancel_url: cancel_url.into(),
            locale: DEFAULT_LOCALE.to_string(),
            signer,
        }
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    /// Assemble and sign the form. `now` feeds both the correlation id and
    /// `signed_date_time`.
    pub fn build(&self, request: &RedirectRequest, now: DateTime<Utc>) -> Result<SignedForm> {
        request.validate()?;

        let transaction_uuid = format!("{}-{}", request.reservation_id, now.timestamp_millis());
        let billing = &request.billing;

        let mut fields = FieldMap::new();
        let mut put = |name: &str, value: String| {
            fields.insert(name.to_string(), value);
        };

        put("access_key", self.access_key.clone());
        put("profile_id", self.profile_id.clone());
        put("transaction_uuid", transaction_uuid.clone());
        put("signed_field_names", SIGNED_FIELD_NAMES.join(","));
        put("unsigned_field_names", String::new());
        put("signed_date_time", now.format("%Y-%m-%dT%H:%M:%SZ").to_string());
        put("locale", self.locale.clone());
        put("transaction_type", "authorization".to_string());
        put("reference_number", request.reservation_id.clone());
        put("amount", format!("{:.2}", request.amount.round_dp(2)));
        put("currency", request.currency.clone());
        put("payment_method", "card".to_string());
        put("override_custom_receipt_page", self.receipt_url.clone());
        put("override_custom_cancel_page", self.cancel_url.clone());
        put("bill_to_forename", billing.forename.clone());
        put("bill_to_surname", billing.surname.clone());
        put("bill_to_email", billing.email.clone());
        put(
            "bill_to_address_line1",
            non_blank(&billing.address_line1).unwrap_or(DEFAULT_ADDRESS).to_string(),
        );
        put(
            "bill_to_address_city",
            non_blank(&billing.city).unwrap_or(DEFAULT_CITY).to_string(),
        );
        put(
            "bill_to_address_country",
            non_blank(&billing.country).unwrap_or(DEFAULT_COUNTRY).to_string(),
        );
        put("merchant_defined_data1", request.payment_option.as_str().to_string());
        put("merchant_defined_data2", request.nights_to_pay.to_string());
        put("merchant_defined_data3", request.nights.to_string());
        put("merchant_defined_data4", payment_description(request));

        let signature = self.signer.sign(&SIGNED_FIELD_NAMES, &fields);
        fields.insert("signature".to_string(), signature);

        debug!(
            reference = %request.reservation_id,
            transaction_uuid = %transaction_uuid,
            amount = %request.amount,
            option = %request.payment_option,
            "Signed checkout form built"
        );

        Ok(SignedForm {
            transaction_uuid,
            fields,
        })
    }
}

/// Human-readable line shown on the hosted page and echoed back to us.
pub fn payment_description(request: &RedirectRequest) -> String {
    let room = if request.room_name.trim().is_empty() {
        "Room"
    } else {
        request.room_name.as_str()
    };
    let dates = format!("{} to {}", request.check_in, request.check_out);
    match request.payment_option {
        PaymentOption::FirstNight => {
            format!("First night - {room} ({} nights total, {dates})", request.nights)
        }
        PaymentOption::Partial => format!(
            "{} of {} nights - {room} ({dates})",
            request.nights_to_pay, request.nights
        ),
        PaymentOption::Full => format!("Full stay - {room} ({} nights, {dates})", request.nights),
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
