//! Reservation creation, cancellation and administrative confirmation.
//!
//! Both creation paths (a signed-in client and a public guest) price the stay
//! with [`hosted_checkout::amount_due`]; the overlap rule is enforced by the
//! insert itself.

use chrono::NaiveDate;
use hosted_checkout::{amount_due, PaymentOption};
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::db;
use crate::errors::{AppError, Result};
use crate::models::{
    DetailStatus, GuestContact, PaymentDetail, Reservation, ReservationStatus,
};

pub const SOURCE_WEBSITE: &str = "website";
pub const SOURCE_PUBLIC_WEBSITE: &str = "public_website";
pub const REASON_CANCELLED: &str = "reservation cancelled";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReservation {
    pub room_id: String,
    /// Set for the signed-in client path; otherwise `guest` is required.
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub guest: Option<GuestContact>,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    #[serde(default)]
    pub adults: Option<u32>,
    #[serde(default)]
    pub children: Option<u32>,
    #[serde(default)]
    pub payment_option: Option<String>,
    #[serde(default)]
    pub nights_to_pay: Option<u32>,
    #[serde(default)]
    pub special_requests: Option<String>,
}

/// Whole days between the dates. The stay must end after it starts.
pub fn stay_nights(check_in: NaiveDate, check_out: NaiveDate) -> Result<u32> {
    let days = (check_out - check_in).num_days();
    if days < 1 {
        return Err(AppError::Validation(
            "check-out must be after check-in".to_string(),
        ));
    }
    u32::try_from(days).map_err(|_| AppError::Validation("stay is too long".to_string()))
}

pub async fn create_reservation(
    pool: &SqlitePool,
    request: NewReservation,
    now: i64,
) -> Result<Reservation> {
    let nights = stay_nights(request.check_in, request.check_out)?;

    let (client_id, guest, source) = match (request.client_id, request.guest) {
        (Some(client_id), _) => {
            db::get_user(pool, &client_id)
                .await?
                .ok_or_else(|| AppError::NotFound("Client".to_string()))?;
            (Some(client_id), None, SOURCE_WEBSITE)
        }
        (None, Some(mut guest)) => {
            guest.validate().map_err(AppError::Validation)?;
            guest.email = guest.email.trim().to_lowercase();
            (None, Some(guest), SOURCE_PUBLIC_WEBSITE)
        }
        (None, None) => {
            return Err(AppError::Validation(
                "either a client or guest contact details are required".to_string(),
            ))
        }
    };

    let room = db::get_room(pool, &request.room_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Room".to_string()))?;

    let option = PaymentOption::parse_lenient(request.payment_option.as_deref().unwrap_or(""));
    let due = amount_due(room.price, nights, option, request.nights_to_pay)?;

    let adults = request.adults.unwrap_or(1).max(1);
    let children = request.children.unwrap_or(0);

    let reservation = Reservation {
        id: uuid::Uuid::new_v4().to_string(),
        room_id: room.id.clone(),
        client_id,
        guest,
        check_in: request.check_in,
        check_out: request.check_out,
        nights,
        adults,
        children,
        guests: adults + children,
        payment_option: option,
        nights_to_pay: due.nights_to_pay,
        total_amount: due.amount,
        amount_paid: rust_decimal::Decimal::ZERO,
        currency: room.currency.clone(),
        status: ReservationStatus::PendingPayment,
        source: source.to_string(),
        special_requests: request.special_requests.unwrap_or_default(),
        payment_detail: Some(PaymentDetail {
            amount: due.amount,
            currency: room.currency.clone(),
            method: "card".to_string(),
            status: DetailStatus::Pending,
            transaction_id: None,
            auth_code: None,
            error_code: None,
            error_message: None,
            paid_at: None,
        }),
        created_at: now,
        updated_at: now,
    };

    let mut tx = db::begin_write(pool).await?;
    if !db::insert_reservation_if_available(&mut *tx, &reservation).await? {
        warn!(
            room = %room.number,
            check_in = %reservation.check_in,
            check_out = %reservation.check_out,
            "Reservation rejected: room already booked"
        );
        return Err(AppError::Conflict(
            "room is already booked for the selected dates".to_string(),
        ));
    }
    tx.commit().await?;

    info!(
        reservation_id = %reservation.id,
        room = %room.number,
        nights,
        option = %option,
        amount = %reservation.total_amount,
        source,
        guest = %reservation.guest.as_ref().map(|g| g.masked_email()).unwrap_or_default(),
        "Reservation created"
    );
    Ok(reservation)
}

pub async fn get_reservation(pool: &SqlitePool, id: &str) -> Result<Reservation> {
    db::get_reservation(pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Reservation".to_string()))
}

/// Cancel a reservation. Open attempts fail but stay flagged for refund
/// (the guest may still complete them at the processor), settled payments
/// are flagged too; nothing is deleted.
pub async fn cancel_reservation(pool: &SqlitePool, id: &str, now: i64) -> Result<Reservation> {
    let mut tx = db::begin_write(pool).await?;

    let reservation = db::get_reservation(&mut *tx, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Reservation".to_string()))?;
    if reservation.status.is_terminal() {
        return Err(AppError::Validation(format!(
            "a {} reservation cannot be cancelled",
            reservation.status.as_str()
        )));
    }

    if db::cancel_reservation(&mut *tx, id, now).await? == 0 {
        return Err(AppError::Conflict(
            "reservation changed while cancelling".to_string(),
        ));
    }
    let failed =
        db::fail_pending_payments_for(&mut *tx, id, REASON_CANCELLED, true, now).await?;
    let flagged = db::flag_refund_due(&mut *tx, id, now).await?;
    tx.commit().await?;

    info!(
        reservation_id = %id,
        pending_failed = failed,
        refunds_due = flagged,
        "Reservation cancelled"
    );
    get_reservation(pool, id).await
}

/// Administrative confirmation, allowed from any state but `completed` as
/// long as the dates are still free.
pub async fn confirm_reservation(pool: &SqlitePool, id: &str, now: i64) -> Result<Reservation> {
    let mut tx = db::begin_write(pool).await?;
    let reservation = db::get_reservation(&mut *tx, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Reservation".to_string()))?;
    if reservation.status == ReservationStatus::Completed {
        return Err(AppError::Validation(
            "a completed reservation cannot be confirmed".to_string(),
        ));
    }
    if db::confirm_reservation(&mut *tx, id, now).await? == 0 {
        return Err(AppError::Conflict(
            "room is already booked for the selected dates".to_string(),
        ));
    }
    tx.commit().await?;
    info!(reservation_id = %id, from = reservation.status.as_str(), "Reservation confirmed by admin");
    get_reservation(pool, id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Payment, PaymentKind, PaymentStatus};
    use crate::testing::{date, file_pool, guest, memory_pool, seed_room, NOW};
    use rust_decimal::Decimal;

    fn guest_booking(room_id: &str, check_in: &str, check_out: &str) -> NewReservation {
        NewReservation {
            room_id: room_id.to_string(),
            client_id: None,
            guest: Some(guest()),
            check_in: date(check_in),
            check_out: date(check_out),
            adults: Some(2),
            children: None,
            payment_option: Some("first-night".to_string()),
            nights_to_pay: None,
            special_requests: None,
        }
    }

    #[test]
    fn nights_between_dates() {
        assert_eq!(stay_nights(date("2025-03-01"), date("2025-03-04")).unwrap(), 3);
        assert!(stay_nights(date("2025-03-04"), date("2025-03-04")).is_err());
        assert!(stay_nights(date("2025-03-05"), date("2025-03-04")).is_err());
    }

    #[tokio::test]
    async fn guest_booking_is_priced_by_option() {
        let pool = memory_pool().await;
        let room = seed_room(&pool, "101", 50_000).await;

        let res = create_reservation(&pool, guest_booking(&room.id, "2025-03-01", "2025-03-04"), NOW)
            .await
            .unwrap();
        assert_eq!(res.nights, 3);
        assert_eq!(res.nights_to_pay, 1);
        assert_eq!(res.total_amount, Decimal::from(50_000));
        assert_eq!(res.status, ReservationStatus::PendingPayment);
        assert_eq!(res.source, SOURCE_PUBLIC_WEBSITE);
        assert_eq!(res.guests, 2);

        let stored = get_reservation(&pool, &res.id).await.unwrap();
        assert_eq!(stored, res);
    }

    #[tokio::test]
    async fn overlapping_booking_conflicts() {
        let pool = memory_pool().await;
        let room = seed_room(&pool, "102", 30_000).await;

        let first = create_reservation(&pool, guest_booking(&room.id, "2025-03-01", "2025-03-04"), NOW)
            .await
            .unwrap();
        confirm_reservation(&pool, &first.id, NOW).await.unwrap();

        let err = create_reservation(&pool, guest_booking(&room.id, "2025-03-03", "2025-03-06"), NOW)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONFLICT");

        // Back-to-back stays share no night.
        create_reservation(&pool, guest_booking(&room.id, "2025-03-04", "2025-03-06"), NOW)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_booking_frees_the_room() {
        let pool = memory_pool().await;
        let room = seed_room(&pool, "103", 30_000).await;

        let first = create_reservation(&pool, guest_booking(&room.id, "2025-03-01", "2025-03-04"), NOW)
            .await
            .unwrap();
        cancel_reservation(&pool, &first.id, NOW + 10).await.unwrap();

        create_reservation(&pool, guest_booking(&room.id, "2025-03-02", "2025-03-03"), NOW)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_room_and_contact_are_rejected() {
        let pool = memory_pool().await;
        let err = create_reservation(&pool, guest_booking("nope", "2025-03-01", "2025-03-02"), NOW)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");

        let room = seed_room(&pool, "104", 10_000).await;
        let mut anonymous = guest_booking(&room.id, "2025-03-01", "2025-03-02");
        anonymous.guest = None;
        let err = create_reservation(&pool, anonymous, NOW).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn cancellation_fails_pending_and_flags_completed() {
        let pool = memory_pool().await;
        let room = seed_room(&pool, "105", 20_000).await;
        let res = create_reservation(&pool, guest_booking(&room.id, "2025-03-01", "2025-03-03"), NOW)
            .await
            .unwrap();

        let payment = |id: &str, status: PaymentStatus| Payment {
            id: id.to_string(),
            reservation_id: res.id.clone(),
            client_id: None,
            guest: Some(guest()),
            amount: Decimal::from(20_000),
            currency: "XAF".into(),
            kind: PaymentKind::Deposit,
            method: "card".into(),
            status,
            transaction_id: None,
            gateway: "mock".into(),
            gateway_response: None,
            card_brand: None,
            refund_of: None,
            refunded_amount: Decimal::ZERO,
            refund_due: false,
            reason: None,
            created_at: NOW,
            updated_at: NOW,
        };
        db::insert_payment(&pool, &payment("p-done", PaymentStatus::Completed)).await.unwrap();
        db::insert_payment(&pool, &payment("p-open", PaymentStatus::Pending)).await.unwrap();

        let cancelled = cancel_reservation(&pool, &res.id, NOW + 5).await.unwrap();
        assert_eq!(cancelled.status, ReservationStatus::Cancelled);

        let done = db::get_payment(&pool, "p-done").await.unwrap().unwrap();
        assert!(done.refund_due);
        assert_eq!(done.status, PaymentStatus::Completed);
        let open = db::get_payment(&pool, "p-open").await.unwrap().unwrap();
        assert_eq!(open.status, PaymentStatus::Failed);
        assert_eq!(open.reason.as_deref(), Some(REASON_CANCELLED));
        assert!(open.refund_due);

        let again = cancel_reservation(&pool, &res.id, NOW + 6).await.unwrap_err();
        assert_eq!(again.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn admin_confirm_cannot_take_dates_already_rebooked() {
        let pool = memory_pool().await;
        let room = seed_room(&pool, "107", 20_000).await;
        let first = create_reservation(&pool, guest_booking(&room.id, "2025-03-01", "2025-03-04"), NOW)
            .await
            .unwrap();
        cancel_reservation(&pool, &first.id, NOW + 1).await.unwrap();
        let second = create_reservation(&pool, guest_booking(&room.id, "2025-03-02", "2025-03-05"), NOW + 2)
            .await
            .unwrap();

        let err = confirm_reservation(&pool, &first.id, NOW + 3).await.unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
        let first = get_reservation(&pool, &first.id).await.unwrap();
        assert_eq!(first.status, ReservationStatus::Cancelled);
        let second = get_reservation(&pool, &second.id).await.unwrap();
        assert_eq!(second.status, ReservationStatus::PendingPayment);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_overlapping_bookings_admit_exactly_one() {
        let (pool, _dir) = file_pool().await;

        for n in 0..10 {
            let room = seed_room(&pool, &format!("9{n:02}"), 25_000).await;
            let attempts: Vec<_> = [("2025-03-01", "2025-03-04"), ("2025-03-03", "2025-03-06")]
                .into_iter()
                .map(|(check_in, check_out)| {
                    let pool = pool.clone();
                    let request = guest_booking(&room.id, check_in, check_out);
                    tokio::spawn(async move { create_reservation(&pool, request, NOW).await })
                })
                .collect();

            let mut created = 0;
            let mut conflicts = 0;
            for attempt in attempts {
                match attempt.await.unwrap() {
                    Ok(_) => created += 1,
                    Err(err) => {
                        assert_eq!(err.code(), "CONFLICT", "unexpected error: {err}");
                        conflicts += 1;
                    }
                }
            }
            assert_eq!((created, conflicts), (1, 1), "room {}", room.number);
        }
    }

    #[tokio::test]
    async fn admin_confirm_reopens_cancelled_but_not_completed() {
        let pool = memory_pool().await;
        let room = seed_room(&pool, "106", 20_000).await;
        let res = create_reservation(&pool, guest_booking(&room.id, "2025-03-01", "2025-03-03"), NOW)
            .await
            .unwrap();
        cancel_reservation(&pool, &res.id, NOW).await.unwrap();

        let confirmed = confirm_reservation(&pool, &res.id, NOW + 1).await.unwrap();
        assert_eq!(confirmed.status, ReservationStatus::Confirmed);

        sqlx::query("UPDATE reservations SET status = 'completed' WHERE id = ?1")
            .bind(&res.id)
            .execute(&pool)
            .await
            .unwrap();
        let err = confirm_reservation(&pool, &res.id, NOW + 2).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
