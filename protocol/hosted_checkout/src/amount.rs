//! Amount due for a stay under a given payment option.
//!
//! The same function is used when a reservation is priced and again when the
//! processor reports an authorized amount, so the two can never disagree on
//! rounding or clamping.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::{ProtocolError, Result};
use crate::types::PaymentOption;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AmountDue {
    pub amount: Decimal,
    pub nights_to_pay: u32,
}

/// Derive the amount to charge now and how many nights it covers.
///
/// * `full`: every night.
/// * `first-night`: one night; `requested_nights` is ignored.
/// * `partial`: `requested_nights` clamped to `[1, nights]` (absent = 1).
pub fn amount_due(
    price_per_night: Decimal,
    nights: u32,
    option: PaymentOption,
    requested_nights: Option<u32>,
) -> Result<AmountDue> {
    if price_per_night <= Decimal::ZERO {
        return Err(ProtocolError::Validation(format!(
            "price per night must be positive, got {price_per_night}"
        )));
    }
    if nights == 0 {
        return Err(ProtocolError::Validation(
            "a stay must cover at least one night".to_string(),
        ));
    }

    let nights_to_pay = match option {
        PaymentOption::Full => nights,
        PaymentOption::FirstNight => 1,
        PaymentOption::Partial => requested_nights.unwrap_or(1).clamp(1, nights),
    };

    Ok(AmountDue {
        amount: price_per_night * Decimal::from(nights_to_pay),
        nights_to_pay,
    })
}
