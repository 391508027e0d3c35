//! Payment and reservation state machine.
//!
//! ```text
//!  initiate ──► payment: pending ──┬─ ACCEPT ─────────► completed
//!                                  │   reservation ──► confirmed | partially_paid
//!                                  ├─ DECLINE/CANCEL/REVIEW ─► failed
//!                                  │   reservation stays pending_payment
//!                                  └─ ERROR ──────────► failed
//!                                      reservation ──► payment_failed
//! ```
//!
//! Processor results are matched to the reservation's single `pending`
//! payment, never to an id supplied by the caller. Every pending → final move
//! is conditional, so a replayed or concurrent delivery becomes a no-op.

use hosted_checkout::{amount_due, Decision, PaymentOption, VerifiedCallback};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, error, info, warn};

use crate::accounts::{self, IssuedCredentials};
use crate::db;
use crate::errors::{AppError, Result};
use crate::models::{
    DetailStatus, Payment, PaymentDetail, PaymentKind, PaymentStatus, Reservation,
    ReservationStatus,
};

pub const REASON_SUPERSEDED: &str = "superseded";

/// A processor verdict on one attempt, from a hosted-page callback or a
/// direct charge.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorResult {
    pub reservation_id: String,
    pub decision: Decision,
    pub code: String,
    pub message: String,
    pub transaction_id: Option<String>,
    pub amount: Option<Decimal>,
    pub card_brand: Option<String>,
    pub auth_code: Option<String>,
    pub raw: serde_json::Value,
}

impl ProcessorResult {
    pub fn from_callback(callback: &VerifiedCallback) -> Result<Self> {
        let reservation_id = callback
            .reference_number
            .clone()
            .ok_or_else(|| AppError::Validation("callback has no reference number".to_string()))?;

        // The signature is not worth keeping once it has been checked.
        let mut raw = callback.raw.clone();
        raw.remove("signature");

        Ok(Self {
            reservation_id,
            decision: callback.decision.clone(),
            code: callback.code(),
            message: callback.message(),
            transaction_id: callback.transaction_id.clone(),
            amount: callback.amount,
            card_brand: Some(card_brand(&callback.card_type).to_string()),
            auth_code: callback.auth_code.clone(),
            raw: serde_json::to_value(raw)?,
        })
    }

    pub fn accepted(&self) -> bool {
        self.decision == Decision::Accept
    }
}

/// Card brand name for a processor card type code.
pub fn card_brand(card_type: &str) -> &'static str {
    match card_type {
        "001" => "visa",
        "002" => "mastercard",
        "003" => "amex",
        "004" => "discover",
        _ => "unknown",
    }
}

/// What a processor result did to the books.
#[derive(Debug, Clone)]
pub enum Transition {
    Settled {
        reservation: Reservation,
        payment: Payment,
        /// Login created for a guest on this settlement; shown once.
        credentials: Option<IssuedCredentials>,
    },
    Failed {
        reservation: Reservation,
        payment: Payment,
        code: String,
        message: String,
    },
    /// The processor captured an attempt the guest left open before the
    /// reservation was cancelled. Booked, and flagged for refund.
    RefundDue {
        reservation: Reservation,
        payment: Payment,
    },
    /// Nothing was pending any more: a replay, or a concurrent delivery won.
    Ignored { reservation: Reservation },
}

// ─────────────────────────────────────────────────────────
// Initiation
// ─────────────────────────────────────────────────────────

/// Open a new attempt: stale pending payments are superseded, a fresh pending
/// payment is inserted and the reservation goes back to `pending_payment`.
pub async fn begin_checkout(
    pool: &SqlitePool,
    reservation_id: &str,
    gateway: &str,
    now: i64,
) -> Result<(Reservation, Payment)> {
    let mut tx = db::begin_write(pool).await?;

    let reservation = db::get_reservation(&mut *tx, reservation_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Reservation".to_string()))?;
    if reservation.status.is_paid() || reservation.status.is_terminal() {
        return Err(AppError::Validation(format!(
            "reservation is {} and cannot be paid again",
            reservation.status.as_str()
        )));
    }

    if let Some(room) = db::get_room(&mut *tx, &reservation.room_id).await? {
        let expected = amount_due(
            room.price,
            reservation.nights,
            reservation.payment_option,
            Some(reservation.nights_to_pay),
        )?;
        if expected.amount != reservation.total_amount {
            warn!(
                reservation_id,
                stored = %reservation.total_amount,
                recomputed = %expected.amount,
                "Stored amount differs from current room price"
            );
        }
    }

    let superseded =
        db::fail_pending_payments_for(&mut *tx, reservation_id, REASON_SUPERSEDED, false, now)
            .await?;
    if superseded > 0 {
        debug!(reservation_id, superseded, "Stale pending payment superseded");
    }

    let payment = Payment {
        id: uuid::Uuid::new_v4().to_string(),
        reservation_id: reservation.id.clone(),
        client_id: reservation.client_id.clone(),
        guest: reservation.guest.clone(),
        amount: reservation.total_amount,
        currency: reservation.currency.clone(),
        kind: PaymentKind::for_option(reservation.payment_option),
        method: "card".to_string(),
        status: PaymentStatus::Pending,
        transaction_id: None,
        gateway: gateway.to_string(),
        gateway_response: None,
        card_brand: None,
        refund_of: None,
        refunded_amount: Decimal::ZERO,
        refund_due: false,
        reason: None,
        created_at: now,
        updated_at: now,
    };
    match db::insert_payment(&mut *tx, &payment).await {
        Ok(()) => {}
        Err(AppError::Database(err)) if db::is_unique_violation(&err) => {
            return Err(AppError::Conflict(
                "a payment is already in progress for this reservation".to_string(),
            ));
        }
        Err(err) => return Err(err),
    }

    let detail = PaymentDetail {
        amount: payment.amount,
        currency: payment.currency.clone(),
        method: payment.method.clone(),
        status: DetailStatus::Pending,
        transaction_id: None,
        auth_code: None,
        error_code: None,
        error_message: None,
        paid_at: None,
    };
    if db::reopen_for_checkout(&mut *tx, reservation_id, &detail, now).await? == 0 {
        warn!(reservation_id, "Dates taken by another reservation; checkout refused");
        return Err(AppError::Conflict(
            "room is already booked for the selected dates".to_string(),
        ));
    }
    tx.commit().await?;

    info!(
        reservation_id,
        payment_id = %payment.id,
        amount = %payment.amount,
        kind = payment.kind.as_str(),
        gateway,
        "Payment initiated"
    );

    let reservation = db::get_reservation(pool, reservation_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Reservation".to_string()))?;
    Ok((reservation, payment))
}

// ─────────────────────────────────────────────────────────
// Settlement
// ─────────────────────────────────────────────────────────

/// Apply a processor verdict to the reservation's pending payment.
pub async fn apply_result(pool: &SqlitePool, result: &ProcessorResult, now: i64) -> Result<Transition> {
    let transition = if result.accepted() {
        settle(pool, result, now).await?
    } else {
        fail(pool, result, now).await?
    };

    match transition {
        Transition::Settled {
            reservation,
            payment,
            credentials: None,
        } if reservation.client_id.is_none() => {
            provision_guest_account(pool, reservation, payment, now).await
        }
        other => Ok(other),
    }
}

async fn settle(pool: &SqlitePool, result: &ProcessorResult, now: i64) -> Result<Transition> {
    let reservation_id = result.reservation_id.as_str();
    let mut tx = db::begin_write(pool).await?;

    let reservation = db::get_reservation(&mut *tx, reservation_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Reservation".to_string()))?;
    let Some(pending) = db::find_pending_payment(&mut *tx, reservation_id).await? else {
        if reservation.status == ReservationStatus::Cancelled {
            return capture_after_cancel(tx, reservation, result, now).await;
        }
        info!(reservation_id, "No pending payment; accepted result ignored");
        return Ok(Transition::Ignored { reservation });
    };

    let authorized = result.amount.unwrap_or(pending.amount);
    if let Some(room) = db::get_room(&mut *tx, &reservation.room_id).await? {
        let expected = amount_due(
            room.price,
            reservation.nights,
            reservation.payment_option,
            Some(reservation.nights_to_pay),
        )?;
        if expected.amount != authorized {
            warn!(
                reservation_id,
                authorized = %authorized,
                expected = %expected.amount,
                "Authorized amount differs from amount due"
            );
        }
    }

    // The stored option decides the outcome, not the echoed merchant data.
    let (status, amount_paid) = match reservation.payment_option {
        PaymentOption::Full => (ReservationStatus::Confirmed, reservation.total_amount),
        PaymentOption::FirstNight | PaymentOption::Partial => {
            (ReservationStatus::PartiallyPaid, authorized)
        }
    };

    let advanced = match db::complete_pending_payment(
        &mut *tx,
        &pending.id,
        result.transaction_id.as_deref(),
        &authorized,
        &result.raw,
        result.card_brand.as_deref(),
        now,
    )
    .await
    {
        Ok(rows) => rows,
        Err(AppError::Database(err)) if db::is_unique_violation(&err) => {
            warn!(reservation_id, "Transaction id already recorded; result ignored");
            return Ok(Transition::Ignored { reservation });
        }
        Err(err) => return Err(err),
    };
    if advanced == 0 {
        info!(reservation_id, "Pending payment already settled by another delivery");
        return Ok(Transition::Ignored { reservation });
    }

    let detail = PaymentDetail {
        amount: authorized,
        currency: pending.currency.clone(),
        method: pending.method.clone(),
        status: DetailStatus::Paid,
        transaction_id: result.transaction_id.clone(),
        auth_code: result.auth_code.clone(),
        error_code: None,
        error_message: None,
        paid_at: Some(now),
    };
    db::mark_reservation_paid(&mut *tx, reservation_id, status, &amount_paid, &detail, now).await?;

    let reservation = db::get_reservation(&mut *tx, reservation_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Reservation".to_string()))?;
    let payment = db::get_payment(&mut *tx, &pending.id)
        .await?
        .ok_or_else(|| AppError::NotFound("Payment".to_string()))?;
    tx.commit().await?;

    info!(
        reservation_id,
        payment_id = %payment.id,
        transaction_id = payment.transaction_id.as_deref().unwrap_or(""),
        amount = %authorized,
        status = reservation.status.as_str(),
        "Payment settled"
    );
    Ok(Transition::Settled {
        reservation,
        payment,
        credentials: None,
    })
}

/// Keep the money trail of an accepted attempt whose reservation was
/// cancelled while the guest was still on the hosted page.
async fn capture_after_cancel(
    mut tx: Transaction<'static, Sqlite>,
    reservation: Reservation,
    result: &ProcessorResult,
    now: i64,
) -> Result<Transition> {
    let reservation_id = reservation.id.as_str();
    let Some(attempt) = db::find_uncaptured_cancelled_attempt(&mut *tx, reservation_id).await?
    else {
        info!(reservation_id, "Reservation cancelled and nothing left to capture; result ignored");
        return Ok(Transition::Ignored { reservation });
    };

    let amount = result.amount.unwrap_or(attempt.amount);
    let recorded = match db::record_capture_after_cancel(
        &mut *tx,
        &attempt.id,
        result.transaction_id.as_deref(),
        &amount,
        &result.raw,
        result.card_brand.as_deref(),
        now,
    )
    .await
    {
        Ok(rows) => rows,
        Err(AppError::Database(err)) if db::is_unique_violation(&err) => {
            warn!(reservation_id, "Transaction id already recorded; result ignored");
            return Ok(Transition::Ignored { reservation });
        }
        Err(err) => return Err(err),
    };
    if recorded == 0 {
        return Ok(Transition::Ignored { reservation });
    }

    let payment = db::get_payment(&mut *tx, &attempt.id)
        .await?
        .ok_or_else(|| AppError::NotFound("Payment".to_string()))?;
    tx.commit().await?;

    warn!(
        reservation_id,
        payment_id = %payment.id,
        transaction_id = payment.transaction_id.as_deref().unwrap_or(""),
        amount = %amount,
        "Payment captured after cancellation; refund due"
    );
    Ok(Transition::RefundDue {
        reservation,
        payment,
    })
}

async fn fail(pool: &SqlitePool, result: &ProcessorResult, now: i64) -> Result<Transition> {
    let reservation_id = result.reservation_id.as_str();
    let mut tx = db::begin_write(pool).await?;

    let reservation = db::get_reservation(&mut *tx, reservation_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Reservation".to_string()))?;
    let Some(pending) = db::find_pending_payment(&mut *tx, reservation_id).await? else {
        info!(reservation_id, "No pending payment; failed result ignored");
        return Ok(Transition::Ignored { reservation });
    };

    let advanced =
        db::fail_pending_payment(&mut *tx, &pending.id, &result.message, Some(&result.raw), now)
            .await?;
    if advanced == 0 {
        return Ok(Transition::Ignored { reservation });
    }

    // Customer-side outcomes leave the booking open for another attempt.
    let status = match result.decision {
        Decision::Decline | Decision::Cancel | Decision::Review => None,
        Decision::Accept | Decision::Error | Decision::Other(_) => {
            Some(ReservationStatus::PaymentFailed)
        }
    };
    db::mark_reservation_payment_failed(
        &mut *tx,
        reservation_id,
        status,
        &result.code,
        &result.message,
        now,
    )
    .await?;

    let reservation = db::get_reservation(&mut *tx, reservation_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Reservation".to_string()))?;
    let payment = db::get_payment(&mut *tx, &pending.id)
        .await?
        .ok_or_else(|| AppError::NotFound("Payment".to_string()))?;
    tx.commit().await?;

    warn!(
        reservation_id,
        decision = result.decision.as_str(),
        code = %result.code,
        "Payment failed"
    );
    Ok(Transition::Failed {
        reservation,
        payment,
        code: result.code.clone(),
        message: result.message.clone(),
    })
}

/// Give a guest reservation a client account. A failure here never undoes
/// the settlement; the reservation simply stays a guest booking.
async fn provision_guest_account(
    pool: &SqlitePool,
    reservation: Reservation,
    payment: Payment,
    now: i64,
) -> Result<Transition> {
    let Some(guest) = reservation.guest.clone() else {
        return Ok(Transition::Settled {
            reservation,
            payment,
            credentials: None,
        });
    };

    // Password hashing is slow; keep it out of the write transaction.
    let linked = async {
        let provisioned = {
            let mut conn = pool.acquire().await?;
            accounts::provision_client(&mut *conn, &guest, now).await?
        };
        let mut tx = db::begin_write(pool).await?;
        db::link_client(&mut *tx, &reservation.id, &provisioned.user_id, now).await?;
        tx.commit().await?;
        Ok::<_, AppError>(provisioned)
    }
    .await;

    match linked {
        Ok(provisioned) => {
            let reservation = db::get_reservation(pool, &reservation.id)
                .await?
                .unwrap_or(reservation);
            let payment = db::get_payment(pool, &payment.id).await?.unwrap_or(payment);
            Ok(Transition::Settled {
                reservation,
                payment,
                credentials: provisioned.credentials,
            })
        }
        Err(err) => {
            error!(reservation_id = %reservation.id, error = %err, "Client account provisioning failed");
            Ok(Transition::Settled {
                reservation,
                payment,
                credentials: None,
            })
        }
    }
}

// ─────────────────────────────────────────────────────────
// Refunds
// ─────────────────────────────────────────────────────────

/// Amount of `payment` that can still be refunded, after validation.
pub fn refundable_amount(payment: &Payment, requested: Option<Decimal>) -> Result<Decimal> {
    if payment.kind == PaymentKind::Refund {
        return Err(AppError::Validation("a refund cannot be refunded".to_string()));
    }
    if !matches!(
        payment.status,
        PaymentStatus::Completed | PaymentStatus::PartiallyRefunded
    ) {
        return Err(AppError::Validation(format!(
            "a {} payment cannot be refunded",
            payment.status.as_str()
        )));
    }
    let remaining = payment.amount - payment.refunded_amount;
    let amount = requested.unwrap_or(remaining);
    if amount <= Decimal::ZERO || amount > remaining {
        return Err(AppError::Validation(format!(
            "refund amount must be between 0 and {remaining}"
        )));
    }
    Ok(amount)
}

/// Book a refund the processor already accepted.
pub async fn record_refund(
    pool: &SqlitePool,
    original: &Payment,
    amount: Decimal,
    transaction_id: Option<String>,
    gateway_response: serde_json::Value,
    reason: Option<String>,
    now: i64,
) -> Result<Payment> {
    let refunded_total = original.refunded_amount + amount;
    let status = if refunded_total >= original.amount {
        PaymentStatus::Refunded
    } else {
        PaymentStatus::PartiallyRefunded
    };

    let refund = Payment {
        id: uuid::Uuid::new_v4().to_string(),
        reservation_id: original.reservation_id.clone(),
        client_id: original.client_id.clone(),
        guest: original.guest.clone(),
        amount,
        currency: original.currency.clone(),
        kind: PaymentKind::Refund,
        method: original.method.clone(),
        status: PaymentStatus::Completed,
        transaction_id,
        gateway: original.gateway.clone(),
        gateway_response: Some(gateway_response),
        card_brand: original.card_brand.clone(),
        refund_of: Some(original.id.clone()),
        refunded_amount: Decimal::ZERO,
        refund_due: false,
        reason,
        created_at: now,
        updated_at: now,
    };

    let mut tx = db::begin_write(pool).await?;
    if db::record_refund(&mut *tx, &original.id, status, &refunded_total, now).await? == 0 {
        return Err(AppError::Conflict("payment is no longer refundable".to_string()));
    }
    db::insert_payment(&mut *tx, &refund).await?;
    tx.commit().await?;

    info!(
        payment_id = %original.id,
        refund_id = %refund.id,
        amount = %amount,
        status = status.as_str(),
        "Refund recorded"
    );
    Ok(refund)
}

// ─────────────────────────────────────────────────────────
// Queries
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStats {
    pub total_payments: u64,
    pub pending: u64,
    pub completed: u64,
    pub failed: u64,
    pub refunded: u64,
    pub refunds_due: u64,
    /// Completed full and deposit payments.
    pub total_collected: Decimal,
    pub deposits_collected: Decimal,
    pub total_refunded: Decimal,
}

impl PaymentStats {
    pub fn from_payments(payments: &[Payment]) -> Self {
        let mut stats = PaymentStats::default();
        for payment in payments {
            stats.total_payments += 1;
            if payment.refund_due {
                stats.refunds_due += 1;
            }
            match payment.status {
                PaymentStatus::Pending => stats.pending += 1,
                PaymentStatus::Failed => stats.failed += 1,
                PaymentStatus::Refunded | PaymentStatus::PartiallyRefunded => {
                    stats.refunded += 1
                }
                PaymentStatus::Completed => stats.completed += 1,
            }
            match (payment.kind, payment.status) {
                (PaymentKind::Refund, PaymentStatus::Completed) => {
                    stats.total_refunded += payment.amount
                }
                (PaymentKind::Refund, _) | (_, PaymentStatus::Pending | PaymentStatus::Failed) => {}
                (kind, _) => {
                    stats.total_collected += payment.amount;
                    if kind == PaymentKind::Deposit {
                        stats.deposits_collected += payment.amount;
                    }
                }
            }
        }
        stats
    }
}

pub async fn payment_stats(pool: &SqlitePool) -> Result<PaymentStats> {
    Ok(PaymentStats::from_payments(&db::list_payments(pool).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reservations::{
        cancel_reservation, create_reservation, get_reservation, NewReservation,
    };
    use crate::testing::{
        date, file_pool, guest, memory_pool, seed_client, seed_room, signed_callback,
        TEST_SECRET, NOW,
    };
    use hosted_checkout::{CallbackValidator, Signer};

    fn stay(room_id: &str, option: &str, check_out: &str) -> NewReservation {
        NewReservation {
            room_id: room_id.to_string(),
            client_id: None,
            guest: Some(guest()),
            check_in: date("2025-03-01"),
            check_out: date(check_out),
            adults: None,
            children: None,
            payment_option: Some(option.to_string()),
            nights_to_pay: None,
            special_requests: None,
        }
    }

    async fn booking(pool: &SqlitePool, option: &str, check_out: &str) -> Reservation {
        let room = seed_room(pool, "201", 50_000).await;
        create_reservation(pool, stay(&room.id, option, check_out), NOW)
            .await
            .unwrap()
    }

    fn verdict(reference: &str, decision: &str, reason: &str, amount: &str, tx: &str) -> ProcessorResult {
        let payload = signed_callback(reference, decision, reason, amount, tx);
        let outcome = CallbackValidator::new(Signer::new(TEST_SECRET).unwrap()).validate(&payload);
        ProcessorResult::from_callback(outcome.verified().expect("signed")).unwrap()
    }

    #[tokio::test]
    async fn first_night_deposit_end_to_end() {
        let pool = memory_pool().await;
        let res = booking(&pool, "first-night", "2025-03-04").await;
        assert_eq!(res.total_amount, Decimal::from(50_000));
        assert_eq!(res.nights_to_pay, 1);

        let (_, pending) = begin_checkout(&pool, &res.id, "mock", NOW).await.unwrap();
        assert_eq!(pending.kind, PaymentKind::Deposit);
        assert_eq!(pending.status, PaymentStatus::Pending);

        let transition = apply_result(&pool, &verdict(&res.id, "ACCEPT", "100", "50000.00", "TX-1"), NOW + 60)
            .await
            .unwrap();
        let Transition::Settled { reservation, payment, credentials } = transition else {
            panic!("expected settlement");
        };
        assert_eq!(reservation.status, ReservationStatus::PartiallyPaid);
        assert_eq!(reservation.amount_paid, Decimal::from(50_000));
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.kind, PaymentKind::Deposit);
        assert_eq!(payment.card_brand.as_deref(), Some("visa"));

        let creds = credentials.expect("guest gets an account");
        assert_eq!(reservation.client_id.as_deref(), Some(creds.user_id.as_str()));
        assert_eq!(payment.client_id.as_deref(), Some(creds.user_id.as_str()));

        let payments = db::list_payments_for_reservation(&pool, &res.id).await.unwrap();
        assert_eq!(payments.len(), 1);
        let detail = reservation.payment_detail.unwrap();
        assert_eq!(detail.status, DetailStatus::Paid);
        assert_eq!(detail.transaction_id.as_deref(), Some("TX-1"));
    }

    #[tokio::test]
    async fn replayed_callback_is_applied_once() {
        let pool = memory_pool().await;
        let res = booking(&pool, "full", "2025-03-03").await;
        begin_checkout(&pool, &res.id, "mock", NOW).await.unwrap();

        let accepted = verdict(&res.id, "ACCEPT", "100", "100000.00", "TX-2");
        let first = apply_result(&pool, &accepted, NOW + 1).await.unwrap();
        assert!(matches!(first, Transition::Settled { .. }));
        let second = apply_result(&pool, &accepted, NOW + 2).await.unwrap();
        assert!(matches!(second, Transition::Ignored { .. }));

        let reservation = get_reservation(&pool, &res.id).await.unwrap();
        assert_eq!(reservation.status, ReservationStatus::Confirmed);
        assert_eq!(reservation.amount_paid, Decimal::from(100_000));

        let payments = db::list_payments_for_reservation(&pool, &res.id).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn decline_keeps_booking_open_and_error_fails_it() {
        let pool = memory_pool().await;
        let res = booking(&pool, "full", "2025-03-03").await;

        begin_checkout(&pool, &res.id, "mock", NOW).await.unwrap();
        let declined = apply_result(&pool, &verdict(&res.id, "DECLINE", "200", "100000.00", "TX-3"), NOW)
            .await
            .unwrap();
        let Transition::Failed { reservation, payment, code, message } = declined else {
            panic!("expected failure");
        };
        assert_eq!(reservation.status, ReservationStatus::PendingPayment);
        assert_eq!(payment.status, PaymentStatus::Failed);
        assert_eq!(code, "200");
        assert_eq!(message, "Insufficient funds");
        let detail = reservation.payment_detail.unwrap();
        assert_eq!(detail.status, DetailStatus::Failed);
        assert_eq!(detail.error_code.as_deref(), Some("200"));

        begin_checkout(&pool, &res.id, "mock", NOW + 10).await.unwrap();
        let errored = apply_result(&pool, &verdict(&res.id, "ERROR", "234", "100000.00", "TX-4"), NOW + 20)
            .await
            .unwrap();
        let Transition::Failed { reservation, .. } = errored else {
            panic!("expected failure");
        };
        assert_eq!(reservation.status, ReservationStatus::PaymentFailed);

        // A failed booking may be retried.
        let (reopened, _) = begin_checkout(&pool, &res.id, "mock", NOW + 30).await.unwrap();
        assert_eq!(reopened.status, ReservationStatus::PendingPayment);
    }

    #[tokio::test]
    async fn retry_refused_once_dates_are_rebooked() {
        let pool = memory_pool().await;
        let first = booking(&pool, "full", "2025-03-03").await;
        begin_checkout(&pool, &first.id, "mock", NOW).await.unwrap();
        apply_result(&pool, &verdict(&first.id, "ERROR", "234", "100000.00", "TX-7"), NOW + 1)
            .await
            .unwrap();

        // The failed booking no longer holds the room.
        let second = create_reservation(&pool, stay(&first.room_id, "full", "2025-03-03"), NOW + 2)
            .await
            .unwrap();

        let err = begin_checkout(&pool, &first.id, "mock", NOW + 3).await.unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
        let first = get_reservation(&pool, &first.id).await.unwrap();
        assert_eq!(first.status, ReservationStatus::PaymentFailed);
        assert!(db::find_pending_payment(&pool, &first.id).await.unwrap().is_none());
        let second = get_reservation(&pool, &second.id).await.unwrap();
        assert_eq!(second.status, ReservationStatus::PendingPayment);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_duplicate_callbacks_settle_once() {
        let (pool, _dir) = file_pool().await;
        let client = seed_client(&pool, "client-1").await;

        for n in 0..10 {
            let room = seed_room(&pool, &format!("8{n:02}"), 50_000).await;
            let mut request = stay(&room.id, "full", "2025-03-03");
            request.client_id = Some(client.id.clone());
            request.guest = None;
            let res = create_reservation(&pool, request, NOW).await.unwrap();
            begin_checkout(&pool, &res.id, "mock", NOW).await.unwrap();

            let accepted = verdict(&res.id, "ACCEPT", "100", "100000.00", &format!("TX-C{n}"));
            let deliveries: Vec<_> = (0..2)
                .map(|_| {
                    let pool = pool.clone();
                    let accepted = accepted.clone();
                    tokio::spawn(async move { apply_result(&pool, &accepted, NOW + 1).await })
                })
                .collect();

            let mut settled = 0;
            let mut ignored = 0;
            for delivery in deliveries {
                match delivery.await.unwrap() {
                    Ok(Transition::Settled { .. }) => settled += 1,
                    Ok(Transition::Ignored { .. }) => ignored += 1,
                    Ok(other) => panic!("unexpected transition: {other:?}"),
                    Err(err) => panic!("duplicate delivery failed: {err}"),
                }
            }
            assert_eq!((settled, ignored), (1, 1));

            let reservation = get_reservation(&pool, &res.id).await.unwrap();
            assert_eq!(reservation.status, ReservationStatus::Confirmed);
            assert_eq!(reservation.amount_paid, Decimal::from(100_000));
            let payments = db::list_payments_for_reservation(&pool, &res.id).await.unwrap();
            assert_eq!(payments.len(), 1);
            assert_eq!(payments[0].status, PaymentStatus::Completed);
        }
    }

    #[tokio::test]
    async fn capture_after_cancellation_is_kept_for_refund() {
        let pool = memory_pool().await;
        let res = booking(&pool, "first-night", "2025-03-04").await;
        let (_, attempt) = begin_checkout(&pool, &res.id, "mock", NOW).await.unwrap();
        cancel_reservation(&pool, &res.id, NOW + 5).await.unwrap();

        let accepted = verdict(&res.id, "ACCEPT", "100", "50000.00", "TX-8");
        let Transition::RefundDue { reservation, payment } =
            apply_result(&pool, &accepted, NOW + 10).await.unwrap()
        else {
            panic!("expected the capture to be booked for refund");
        };
        assert_eq!(reservation.status, ReservationStatus::Cancelled);
        assert_eq!(payment.id, attempt.id);
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.transaction_id.as_deref(), Some("TX-8"));
        assert_eq!(payment.amount, Decimal::from(50_000));
        assert!(payment.refund_due);

        let replay = apply_result(&pool, &accepted, NOW + 11).await.unwrap();
        assert!(matches!(replay, Transition::Ignored { .. }));

        let stats = payment_stats(&pool).await.unwrap();
        assert_eq!(stats.refunds_due, 1);
        assert_eq!(stats.completed, 1);
        assert!(refundable_amount(&payment, None).is_ok());
    }

    #[tokio::test]
    async fn new_attempt_supersedes_stale_pending_payment() {
        let pool = memory_pool().await;
        let res = booking(&pool, "partial", "2025-03-05").await;

        let (_, first) = begin_checkout(&pool, &res.id, "mock", NOW).await.unwrap();
        let (_, second) = begin_checkout(&pool, &res.id, "mock", NOW + 5).await.unwrap();

        let stale = db::get_payment(&pool, &first.id).await.unwrap().unwrap();
        assert_eq!(stale.status, PaymentStatus::Failed);
        assert_eq!(stale.reason.as_deref(), Some(REASON_SUPERSEDED));
        let pending = db::find_pending_payment(&pool, &res.id).await.unwrap().unwrap();
        assert_eq!(pending.id, second.id);
    }

    #[tokio::test]
    async fn paid_reservation_cannot_be_initiated_again() {
        let pool = memory_pool().await;
        let res = booking(&pool, "full", "2025-03-02").await;
        begin_checkout(&pool, &res.id, "mock", NOW).await.unwrap();
        apply_result(&pool, &verdict(&res.id, "ACCEPT", "100", "50000.00", "TX-5"), NOW)
            .await
            .unwrap();

        let err = begin_checkout(&pool, &res.id, "mock", NOW + 1).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn refunds_track_remaining_amount() {
        let pool = memory_pool().await;
        let res = booking(&pool, "full", "2025-03-03").await;
        begin_checkout(&pool, &res.id, "mock", NOW).await.unwrap();
        let Transition::Settled { payment, .. } =
            apply_result(&pool, &verdict(&res.id, "ACCEPT", "100", "100000.00", "TX-6"), NOW)
                .await
                .unwrap()
        else {
            panic!("expected settlement");
        };

        let part = refundable_amount(&payment, Some(Decimal::from(40_000))).unwrap();
        record_refund(&pool, &payment, part, Some("RF-1".into()), serde_json::json!({}), None, NOW)
            .await
            .unwrap();
        let original = db::get_payment(&pool, &payment.id).await.unwrap().unwrap();
        assert_eq!(original.status, PaymentStatus::PartiallyRefunded);
        assert_eq!(original.refunded_amount, Decimal::from(40_000));

        assert!(refundable_amount(&original, Some(Decimal::from(70_000))).is_err());
        let rest = refundable_amount(&original, None).unwrap();
        assert_eq!(rest, Decimal::from(60_000));
        let refund = record_refund(&pool, &original, rest, None, serde_json::json!({}), None, NOW)
            .await
            .unwrap();
        assert_eq!(refund.kind, PaymentKind::Refund);
        assert!(refundable_amount(&refund, None).is_err());

        let stats = payment_stats(&pool).await.unwrap();
        assert_eq!(stats.total_payments, 3);
        assert_eq!(stats.total_collected, Decimal::from(100_000));
        assert_eq!(stats.total_refunded, Decimal::from(100_000));
        assert_eq!(stats.refunded, 1);
    }

    #[test]
    fn card_brands() {
        assert_eq!(card_brand("002"), "mastercard");
        assert_eq!(card_brand("xyz"), "unknown");
    }
}
