//! Persistent records: rooms, users, reservations and payments.
//!
//! Status enums are stored as their snake_case string; amounts as decimal
//! strings. Rows that carry decimals implement [`FromRow`] by hand.

use std::str::FromStr;

use chrono::NaiveDate;
use hosted_checkout::PaymentOption;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

pub const DEFAULT_CURRENCY: &str = "XAF";

// ─────────────────────────────────────────────────────────
// Status vocabularies
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Pending,
    PendingPayment,
    Confirmed,
    PartiallyPaid,
    Cancelled,
    Completed,
    PaymentFailed,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::PendingPayment => "pending_payment",
            Self::Confirmed => "confirmed",
            Self::PartiallyPaid => "partially_paid",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
            Self::PaymentFailed => "payment_failed",
        }
    }

    /// Already settled (fully or by deposit); a new checkout makes no sense.
    pub fn is_paid(&self) -> bool {
        matches!(self, Self::Confirmed | Self::PartiallyPaid | Self::Completed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed)
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => Self::Pending,
            "pending_payment" => Self::PendingPayment,
            "confirmed" => Self::Confirmed,
            "partially_paid" => Self::PartiallyPaid,
            "cancelled" => Self::Cancelled,
            "completed" => Self::Completed,
            "payment_failed" => Self::PaymentFailed,
            other => return Err(format!("unknown reservation status `{other}`")),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::PartiallyRefunded => "partially_refunded",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => Self::Pending,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "refunded" => Self::Refunded,
            "partially_refunded" => Self::PartiallyRefunded,
            other => return Err(format!("unknown payment status `{other}`")),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    Full,
    Deposit,
    Refund,
}

impl PaymentKind {
    pub fn for_option(option: PaymentOption) -> Self {
        if option.is_deposit() {
            Self::Deposit
        } else {
            Self::Full
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Deposit => "deposit",
            Self::Refund => "refund",
        }
    }
}

impl FromStr for PaymentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "full" => Self::Full,
            "deposit" => Self::Deposit,
            "refund" => Self::Refund,
            other => return Err(format!("unknown payment type `{other}`")),
        })
    }
}

/// Status of the payment summary embedded in a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl DetailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }
}

impl FromStr for DetailStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => Self::Pending,
            "paid" => Self::Paid,
            "failed" => Self::Failed,
            "refunded" => Self::Refunded,
            other => return Err(format!("unknown payment detail status `{other}`")),
        })
    }
}

// ─────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────

/// Contact details of a guest booking without an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestContact {
    pub name: String,
    pub surname: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
}

impl GuestContact {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() || self.surname.trim().is_empty() {
            return Err("guest name and surname are required".to_string());
        }
        let email = self.email.trim();
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
            _ => Err(format!("invalid guest email `{email}`")),
        }
    }

    /// `abc…@domain` form for logs.
    pub fn masked_email(&self) -> String {
        mask_email(&self.email)
    }
}

pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let head: String = local.chars().take(3).collect();
            format!("{head}…@{domain}")
        }
        None => "…".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    pub number: String,
    pub name: String,
    pub price: Decimal,
    pub currency: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub surname: String,
    pub email: String,
    pub phone: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub created_at: i64,
}

/// Payment summary embedded in a reservation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetail {
    pub amount: Decimal,
    pub currency: String,
    pub method: String,
    pub status: DetailStatus,
    pub transaction_id: Option<String>,
    pub auth_code: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub paid_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: String,
    pub room_id: String,
    pub client_id: Option<String>,
    pub guest: Option<GuestContact>,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub nights: u32,
    pub adults: u32,
    pub children: u32,
    pub guests: u32,
    pub payment_option: PaymentOption,
    pub nights_to_pay: u32,
    pub total_amount: Decimal,
    pub amount_paid: Decimal,
    pub currency: String,
    pub status: ReservationStatus,
    pub source: String,
    pub special_requests: String,
    pub payment_detail: Option<PaymentDetail>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: String,
    pub reservation_id: String,
    pub client_id: Option<String>,
    pub guest: Option<GuestContact>,
    pub amount: Decimal,
    pub currency: String,
    #[serde(rename = "type")]
    pub kind: PaymentKind,
    pub method: String,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub gateway: String,
    pub gateway_response: Option<serde_json::Value>,
    pub card_brand: Option<String>,
    pub refund_of: Option<String>,
    pub refunded_amount: Decimal,
    pub refund_due: bool,
    pub reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

// ─────────────────────────────────────────────────────────
// Row decoding
// ─────────────────────────────────────────────────────────

fn decode_err(column: &str, message: String) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: message.into(),
    }
}

fn decimal(row: &SqliteRow, column: &str) -> Result<Decimal, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str(&raw).map_err(|e| decode_err(column, e.to_string()))
}

fn optional_decimal(row: &SqliteRow, column: &str) -> Result<Option<Decimal>, sqlx::Error> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|v| Decimal::from_str(&v).map_err(|e| decode_err(column, e.to_string())))
        .transpose()
}

fn parsed<T: FromStr<Err = String>>(row: &SqliteRow, column: &str) -> Result<T, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e| decode_err(column, e))
}

fn count(row: &SqliteRow, column: &str) -> Result<u32, sqlx::Error> {
    let raw: i64 = row.try_get(column)?;
    u32::try_from(raw).map_err(|e| decode_err(column, e.to_string()))
}

fn guest(row: &SqliteRow) -> Result<Option<GuestContact>, sqlx::Error> {
    let email: Option<String> = row.try_get("guest_email")?;
    let Some(email) = email else {
        return Ok(None);
    };
    Ok(Some(GuestContact {
        name: row.try_get::<Option<String>, _>("guest_name")?.unwrap_or_default(),
        surname: row
            .try_get::<Option<String>, _>("guest_surname")?
            .unwrap_or_default(),
        email,
        phone: row.try_get("guest_phone")?,
    }))
}

impl<'r> FromRow<'r, SqliteRow> for Room {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Room {
            id: row.try_get("id")?,
            number: row.try_get("number")?,
            name: row.try_get("name")?,
            price: decimal(row, "price")?,
            currency: row.try_get("currency")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl<'r> FromRow<'r, SqliteRow> for Reservation {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let detail_status: Option<String> = row.try_get("detail_status")?;
        let payment_detail = match detail_status {
            Some(status) => Some(PaymentDetail {
                amount: optional_decimal(row, "detail_amount")?.unwrap_or_default(),
                currency: row
                    .try_get::<Option<String>, _>("detail_currency")?
                    .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
                method: row
                    .try_get::<Option<String>, _>("detail_method")?
                    .unwrap_or_else(|| "card".to_string()),
                status: status
                    .parse()
                    .map_err(|e| decode_err("detail_status", e))?,
                transaction_id: row.try_get("detail_transaction_id")?,
                auth_code: row.try_get("detail_auth_code")?,
                error_code: row.try_get("detail_error_code")?,
                error_message: row.try_get("detail_error_message")?,
                paid_at: row.try_get("detail_paid_at")?,
            }),
            None => None,
        };

        Ok(Reservation {
            id: row.try_get("id")?,
            room_id: row.try_get("room_id")?,
            client_id: row.try_get("client_id")?,
            guest: guest(row)?,
            check_in: row.try_get("check_in")?,
            check_out: row.try_get("check_out")?,
            nights: count(row, "nights")?,
            adults: count(row, "adults")?,
            children: count(row, "children")?,
            guests: count(row, "guests")?,
            payment_option: PaymentOption::parse_lenient(&row.try_get::<String, _>("payment_option")?),
            nights_to_pay: count(row, "nights_to_pay")?,
            total_amount: decimal(row, "total_amount")?,
            amount_paid: decimal(row, "amount_paid")?,
            currency: row.try_get("currency")?,
            status: parsed(row, "status")?,
            source: row.try_get("source")?,
            special_requests: row.try_get("special_requests")?,
            payment_detail,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl<'r> FromRow<'r, SqliteRow> for Payment {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let gateway_response: Option<String> = row.try_get("gateway_response")?;
        let gateway_response = gateway_response
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|e| decode_err("gateway_response", e.to_string()))?;

        Ok(Payment {
            id: row.try_get("id")?,
            reservation_id: row.try_get("reservation_id")?,
            client_id: row.try_get("client_id")?,
            guest: guest(row)?,
            amount: decimal(row, "amount")?,
            currency: row.try_get("currency")?,
            kind: parsed(row, "kind")?,
            method: row.try_get("method")?,
            status: parsed(row, "status")?,
            transaction_id: row.try_get("transaction_id")?,
            gateway: row.try_get("gateway")?,
            gateway_response,
            card_brand: row.try_get("card_brand")?,
            refund_of: row.try_get("refund_of")?,
            refunded_amount: decimal(row, "refunded_amount")?,
            refund_due: row.try_get("refund_due")?,
            reason: row.try_get("reason")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_storage_form() {
        for status in [
            ReservationStatus::Pending,
            ReservationStatus::PendingPayment,
            ReservationStatus::Confirmed,
            ReservationStatus::PartiallyPaid,
            ReservationStatus::Cancelled,
            ReservationStatus::Completed,
            ReservationStatus::PaymentFailed,
        ] {
            assert_eq!(status.as_str().parse::<ReservationStatus>(), Ok(status));
        }
        assert!("archived".parse::<ReservationStatus>().is_err());
        assert_eq!(
            "partially_refunded".parse::<PaymentStatus>(),
            Ok(PaymentStatus::PartiallyRefunded)
        );
    }

    #[test]
    fn payment_kind_follows_option() {
        assert_eq!(PaymentKind::for_option(PaymentOption::Full), PaymentKind::Full);
        assert_eq!(PaymentKind::for_option(PaymentOption::FirstNight), PaymentKind::Deposit);
        assert_eq!(PaymentKind::for_option(PaymentOption::Partial), PaymentKind::Deposit);
    }

    #[test]
    fn guest_contact_validation() {
        let mut guest = GuestContact {
            name: "Ngono".into(),
            surname: "Awa".into(),
            email: "awa@example.cm".into(),
            phone: None,
        };
        assert!(guest.validate().is_ok());
        guest.email = "awa-at-example".into();
        assert!(guest.validate().is_err());
        guest.email = "awa@example.cm".into();
        guest.surname = " ".into();
        assert!(guest.validate().is_err());
    }

    #[test]
    fn emails_are_masked() {
        assert_eq!(mask_email("awa.ngono@example.cm"), "awa…@example.cm");
        assert_eq!(mask_email("garbage"), "…");
    }
}
