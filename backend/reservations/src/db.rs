//! Database layer: migrations and queries.
//!
//! Every race-sensitive write here is a single conditional statement so that
//! SQLite, not the application, decides who wins:
//!
//! * reservation insert only if no active reservation overlaps the range;
//! * a reservation only re-enters an active status if that range is still free;
//! * a payment leaves `pending` only if it is still `pending`;
//! * the schema allows one `pending` payment per reservation and one payment
//!   per transaction id.
//!
//! Read-then-write sequences run in [`begin_write`] transactions, which take
//! the write lock up front so concurrent writers queue instead of failing.

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Executor, Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::info;

use crate::errors::Result;
use crate::models::{
    DetailStatus, Payment, PaymentDetail, PaymentStatus, Reservation, ReservationStatus, Room,
    User,
};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    // Each connection to `:memory:` is its own database.
    let in_memory = url.contains(":memory:");
    let mut options = SqliteConnectOptions::from_str(&url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { max_connections })
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

/// Open a transaction that holds the database write lock from its first
/// statement. A plain deferred transaction that reads first and writes later
/// fails with `SQLITE_BUSY` when another writer got in between.
pub async fn begin_write(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}

/// `true` when a statement failed on a UNIQUE constraint or index.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

// ─────────────────────────────────────────────────────────
// Rooms
// ─────────────────────────────────────────────────────────

pub async fn insert_room<'e, E>(exec: E, room: &Room) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO rooms (id, number, name, price, currency, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(&room.id)
    .bind(&room.number)
    .bind(&room.name)
    .bind(room.price.to_string())
    .bind(&room.currency)
    .bind(room.created_at)
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn get_room<'e, E>(exec: E, id: &str) -> Result<Option<Room>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let room = sqlx::query_as::<_, Room>(
        "SELECT id, number, name, price, currency, created_at FROM rooms WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(exec)
    .await?;
    Ok(room)
}

pub async fn list_rooms<'e, E>(exec: E) -> Result<Vec<Room>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rooms = sqlx::query_as::<_, Room>(
        "SELECT id, number, name, price, currency, created_at FROM rooms ORDER BY number",
    )
    .fetch_all(exec)
    .await?;
    Ok(rooms)
}

// ─────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────

pub async fn find_user_by_email<'e, E>(exec: E, email: &str) -> Result<Option<User>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let user = sqlx::query_as::<_, User>(
        "SELECT id, name, surname, email, phone, password_hash, role, created_at
         FROM users WHERE email = ?1",
    )
    .bind(email.trim().to_lowercase())
    .fetch_optional(exec)
    .await?;
    Ok(user)
}

pub async fn get_user<'e, E>(exec: E, id: &str) -> Result<Option<User>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let user = sqlx::query_as::<_, User>(
        "SELECT id, name, surname, email, phone, password_hash, role, created_at
         FROM users WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(exec)
    .await?;
    Ok(user)
}

pub async fn insert_user<'e, E>(exec: E, user: &User) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO users (id, name, surname, email, phone, password_hash, role, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )
    .bind(&user.id)
    .bind(&user.name)
    .bind(&user.surname)
    .bind(&user.email)
    .bind(&user.phone)
    .bind(&user.password_hash)
    .bind(&user.role)
    .bind(user.created_at)
    .execute(exec)
    .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Reservations
// ─────────────────────────────────────────────────────────

const RESERVATION_COLUMNS: &str = "
    id, room_id, client_id, guest_name, guest_surname, guest_email, guest_phone,
    check_in, check_out, nights, adults, children, guests, payment_option,
    nights_to_pay, total_amount, amount_paid, currency, status, source,
    special_requests, detail_amount, detail_currency, detail_method, detail_status,
    detail_transaction_id, detail_auth_code, detail_error_code, detail_error_message,
    detail_paid_at, created_at, updated_at";

/// Insert `reservation` unless an active reservation of the same room overlaps
/// `[check_in, check_out)`. Returns `false` when the room was taken.
pub async fn insert_reservation_if_available<'e, E>(
    exec: E,
    reservation: &Reservation,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let guest = reservation.guest.as_ref();
    let detail = reservation.payment_detail.as_ref();

    let rows = sqlx::query(
        r#"
        INSERT INTO reservations
            (id, room_id, client_id, guest_name, guest_surname, guest_email, guest_phone,
             check_in, check_out, nights, adults, children, guests, payment_option,
             nights_to_pay, total_amount, amount_paid, currency, status, source,
             special_requests, detail_amount, detail_currency, detail_method,
             detail_status, created_at, updated_at)
        SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
               ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27
        WHERE NOT EXISTS (
            SELECT 1 FROM reservations
            WHERE  room_id  = ?2
              AND  status   IN ('confirmed', 'pending_payment', 'partially_paid')
              AND  check_in  < ?9
              AND  check_out > ?8
        )
        "#,
    )
    .bind(&reservation.id)
    .bind(&reservation.room_id)
    .bind(&reservation.client_id)
    .bind(guest.map(|g| g.name.as_str()))
    .bind(guest.map(|g| g.surname.as_str()))
    .bind(guest.map(|g| g.email.as_str()))
    .bind(guest.and_then(|g| g.phone.as_deref()))
    .bind(reservation.check_in)
    .bind(reservation.check_out)
    .bind(i64::from(reservation.nights))
    .bind(i64::from(reservation.adults))
    .bind(i64::from(reservation.children))
    .bind(i64::from(reservation.guests))
    .bind(reservation.payment_option.as_str())
    .bind(i64::from(reservation.nights_to_pay))
    .bind(reservation.total_amount.to_string())
    .bind(reservation.amount_paid.to_string())
    .bind(&reservation.currency)
    .bind(reservation.status.as_str())
    .bind(&reservation.source)
    .bind(&reservation.special_requests)
    .bind(detail.map(|d| d.amount.to_string()))
    .bind(detail.map(|d| d.currency.as_str()))
    .bind(detail.map(|d| d.method.as_str()))
    .bind(detail.map(|d| d.status.as_str()))
    .bind(reservation.created_at)
    .bind(reservation.updated_at)
    .execute(exec)
    .await?
    .rows_affected();

    Ok(rows == 1)
}

pub async fn get_reservation<'e, E>(exec: E, id: &str) -> Result<Option<Reservation>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = ?1");
    let reservation = sqlx::query_as::<_, Reservation>(&sql)
        .bind(id)
        .fetch_optional(exec)
        .await?;
    Ok(reservation)
}

/// All reservations, newest first.
pub async fn list_reservations<'e, E>(exec: E) -> Result<Vec<Reservation>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {RESERVATION_COLUMNS} FROM reservations ORDER BY created_at DESC, id");
    Ok(sqlx::query_as::<_, Reservation>(&sql).fetch_all(exec).await?)
}

/// Put the reservation back in `pending_payment` with a fresh pending summary.
/// Zero rows when the reservation is settled or terminal, or when another
/// active reservation took its dates meanwhile.
pub async fn reopen_for_checkout<'e, E>(
    exec: E,
    id: &str,
    detail: &PaymentDetail,
    now: i64,
) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        UPDATE reservations
        SET    status = 'pending_payment',
               detail_amount = ?2, detail_currency = ?3, detail_method = ?4,
               detail_status = ?5, detail_transaction_id = ?6,
               detail_auth_code = NULL, detail_error_code = NULL,
               detail_error_message = NULL, detail_paid_at = NULL,
               updated_at = ?7
        WHERE  id = ?1
          AND  status NOT IN ('confirmed', 'partially_paid', 'completed', 'cancelled')
          AND  NOT EXISTS (
                   SELECT 1 FROM reservations AS other
                   WHERE  other.room_id  = reservations.room_id
                     AND  other.id      != reservations.id
                     AND  other.status   IN ('confirmed', 'pending_payment', 'partially_paid')
                     AND  other.check_in  < reservations.check_out
                     AND  other.check_out > reservations.check_in
               )
        "#,
    )
    .bind(id)
    .bind(detail.amount.to_string())
    .bind(&detail.currency)
    .bind(&detail.method)
    .bind(detail.status.as_str())
    .bind(&detail.transaction_id)
    .bind(now)
    .execute(exec)
    .await?
    .rows_affected();
    Ok(rows)
}

/// Record a settled payment on the reservation.
pub async fn mark_reservation_paid<'e, E>(
    exec: E,
    id: &str,
    status: ReservationStatus,
    amount_paid: &Decimal,
    detail: &PaymentDetail,
    now: i64,
) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        UPDATE reservations
        SET    status = ?2, amount_paid = ?3,
               detail_amount = ?4, detail_currency = ?5, detail_method = ?6,
               detail_status = ?7, detail_transaction_id = ?8, detail_auth_code = ?9,
               detail_error_code = NULL, detail_error_message = NULL,
               detail_paid_at = ?10, updated_at = ?10
        WHERE  id = ?1
        "#,
    )
    .bind(id)
    .bind(status.as_str())
    .bind(amount_paid.to_string())
    .bind(detail.amount.to_string())
    .bind(&detail.currency)
    .bind(&detail.method)
    .bind(detail.status.as_str())
    .bind(&detail.transaction_id)
    .bind(&detail.auth_code)
    .bind(now)
    .execute(exec)
    .await?
    .rows_affected();
    Ok(rows)
}

/// Record a failed attempt. `status` is only applied when given.
pub async fn mark_reservation_payment_failed<'e, E>(
    exec: E,
    id: &str,
    status: Option<ReservationStatus>,
    error_code: &str,
    error_message: &str,
    now: i64,
) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        UPDATE reservations
        SET    status = COALESCE(?2, status),
               detail_status = ?3, detail_error_code = ?4, detail_error_message = ?5,
               updated_at = ?6
        WHERE  id = ?1
        "#,
    )
    .bind(id)
    .bind(status.map(|s| s.as_str()))
    .bind(DetailStatus::Failed.as_str())
    .bind(error_code)
    .bind(error_message)
    .bind(now)
    .execute(exec)
    .await?
    .rows_affected();
    Ok(rows)
}

/// Cancel unless already terminal. A paid summary becomes `refunded`.
pub async fn cancel_reservation<'e, E>(exec: E, id: &str, now: i64) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        UPDATE reservations
        SET    status = 'cancelled',
               detail_status = CASE WHEN detail_status = 'paid' THEN 'refunded'
                                    ELSE detail_status END,
               updated_at = ?2
        WHERE  id = ?1
          AND  status NOT IN ('cancelled', 'completed')
        "#,
    )
    .bind(id)
    .bind(now)
    .execute(exec)
    .await?
    .rows_affected();
    Ok(rows)
}

/// Administrative confirmation. Refused for completed stays, and for a
/// cancelled or failed booking whose dates another active reservation holds.
pub async fn confirm_reservation<'e, E>(exec: E, id: &str, now: i64) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        UPDATE reservations SET status = 'confirmed', updated_at = ?2
        WHERE  id = ?1
          AND  status != 'completed'
          AND  NOT EXISTS (
                   SELECT 1 FROM reservations AS other
                   WHERE  other.room_id  = reservations.room_id
                     AND  other.id      != reservations.id
                     AND  other.status   IN ('confirmed', 'pending_payment', 'partially_paid')
                     AND  other.check_in  < reservations.check_out
                     AND  other.check_out > reservations.check_in
               )
        "#,
    )
    .bind(id)
    .bind(now)
    .execute(exec)
    .await?
    .rows_affected();
    Ok(rows)
}

/// Attach a client account to a guest reservation and its payments.
pub async fn link_client(
    conn: &mut SqliteConnection,
    reservation_id: &str,
    client_id: &str,
    now: i64,
) -> Result<()> {
    sqlx::query(
        "UPDATE reservations SET client_id = ?2, updated_at = ?3
         WHERE id = ?1 AND client_id IS NULL",
    )
    .bind(reservation_id)
    .bind(client_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    sqlx::query(
        "UPDATE payments SET client_id = ?2, updated_at = ?3
         WHERE reservation_id = ?1 AND client_id IS NULL",
    )
    .bind(reservation_id)
    .bind(client_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Payments
// ─────────────────────────────────────────────────────────

const PAYMENT_COLUMNS: &str = "
    id, reservation_id, client_id, guest_name, guest_surname, guest_email, guest_phone,
    amount, currency, kind, method, status, transaction_id, gateway, gateway_response,
    card_brand, refund_of, refunded_amount, refund_due, reason, created_at, updated_at";

pub async fn insert_payment<'e, E>(exec: E, payment: &Payment) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let guest = payment.guest.as_ref();
    let response = payment
        .gateway_response
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(
        r#"
        INSERT INTO payments
            (id, reservation_id, client_id, guest_name, guest_surname, guest_email,
             guest_phone, amount, currency, kind, method, status, transaction_id,
             gateway, gateway_response, card_brand, refund_of, refunded_amount,
             refund_due, reason, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                ?16, ?17, ?18, ?19, ?20, ?21, ?22)
        "#,
    )
    .bind(&payment.id)
    .bind(&payment.reservation_id)
    .bind(&payment.client_id)
    .bind(guest.map(|g| g.name.as_str()))
    .bind(guest.map(|g| g.surname.as_str()))
    .bind(guest.map(|g| g.email.as_str()))
    .bind(guest.and_then(|g| g.phone.as_deref()))
    .bind(payment.amount.to_string())
    .bind(&payment.currency)
    .bind(payment.kind.as_str())
    .bind(&payment.method)
    .bind(payment.status.as_str())
    .bind(&payment.transaction_id)
    .bind(&payment.gateway)
    .bind(response)
    .bind(&payment.card_brand)
    .bind(&payment.refund_of)
    .bind(payment.refunded_amount.to_string())
    .bind(payment.refund_due)
    .bind(&payment.reason)
    .bind(payment.created_at)
    .bind(payment.updated_at)
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn get_payment<'e, E>(exec: E, id: &str) -> Result<Option<Payment>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?1");
    let payment = sqlx::query_as::<_, Payment>(&sql)
        .bind(id)
        .fetch_optional(exec)
        .await?;
    Ok(payment)
}

/// The single payment of `reservation_id` still awaiting the processor.
pub async fn find_pending_payment<'e, E>(exec: E, reservation_id: &str) -> Result<Option<Payment>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE reservation_id = ?1 AND status = 'pending'"
    );
    let payment = sqlx::query_as::<_, Payment>(&sql)
        .bind(reservation_id)
        .fetch_optional(exec)
        .await?;
    Ok(payment)
}

/// Move a pending payment to `completed`. Zero rows means it was no longer
/// pending (another delivery got there first).
pub async fn complete_pending_payment<'e, E>(
    exec: E,
    payment_id: &str,
    transaction_id: Option<&str>,
    amount: &Decimal,
    gateway_response: &serde_json::Value,
    card_brand: Option<&str>,
    now: i64,
) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        UPDATE payments
        SET    status = 'completed',
               transaction_id = COALESCE(?2, transaction_id),
               amount = ?3, gateway_response = ?4, card_brand = ?5,
               updated_at = ?6
        WHERE  id = ?1 AND status = 'pending'
        "#,
    )
    .bind(payment_id)
    .bind(transaction_id)
    .bind(amount.to_string())
    .bind(serde_json::to_string(gateway_response)?)
    .bind(card_brand)
    .bind(now)
    .execute(exec)
    .await?
    .rows_affected();
    Ok(rows)
}

/// Move a pending payment to `failed`. Same zero-rows contract as
/// [`complete_pending_payment`].
pub async fn fail_pending_payment<'e, E>(
    exec: E,
    payment_id: &str,
    reason: &str,
    gateway_response: Option<&serde_json::Value>,
    now: i64,
) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let response = gateway_response.map(serde_json::to_string).transpose()?;
    let rows = sqlx::query(
        r#"
        UPDATE payments
        SET    status = 'failed', reason = ?2,
               gateway_response = COALESCE(?3, gateway_response),
               updated_at = ?4
        WHERE  id = ?1 AND status = 'pending'
        "#,
    )
    .bind(payment_id)
    .bind(reason)
    .bind(response)
    .bind(now)
    .execute(exec)
    .await?
    .rows_affected();
    Ok(rows)
}

/// Fail every pending payment of a reservation. With `refund_due` the
/// attempts stay flagged: the processor may still capture them.
pub async fn fail_pending_payments_for<'e, E>(
    exec: E,
    reservation_id: &str,
    reason: &str,
    refund_due: bool,
    now: i64,
) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        "UPDATE payments SET status = 'failed', reason = ?2, refund_due = ?3, updated_at = ?4
         WHERE reservation_id = ?1 AND status = 'pending'",
    )
    .bind(reservation_id)
    .bind(reason)
    .bind(refund_due)
    .bind(now)
    .execute(exec)
    .await?
    .rows_affected();
    Ok(rows)
}

/// Flag settled payments of a cancelled reservation for refund bookkeeping.
pub async fn flag_refund_due<'e, E>(exec: E, reservation_id: &str, now: i64) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        "UPDATE payments SET refund_due = 1, reason = 'reservation cancelled', updated_at = ?2
         WHERE reservation_id = ?1 AND status = 'completed' AND kind != 'refund'",
    )
    .bind(reservation_id)
    .bind(now)
    .execute(exec)
    .await?
    .rows_affected();
    Ok(rows)
}

/// The most recent attempt a cancellation closed while it was still open
/// at the processor, and that no capture has been recorded on yet.
pub async fn find_uncaptured_cancelled_attempt<'e, E>(
    exec: E,
    reservation_id: &str,
) -> Result<Option<Payment>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments
         WHERE reservation_id = ?1 AND status = 'failed' AND refund_due = 1
           AND transaction_id IS NULL AND kind != 'refund'
         ORDER BY created_at DESC, id LIMIT 1"
    );
    let payment = sqlx::query_as::<_, Payment>(&sql)
        .bind(reservation_id)
        .fetch_optional(exec)
        .await?;
    Ok(payment)
}

/// Record a capture that arrived after the reservation was cancelled. The
/// payment becomes `completed` and stays flagged for refund.
pub async fn record_capture_after_cancel<'e, E>(
    exec: E,
    payment_id: &str,
    transaction_id: Option<&str>,
    amount: &Decimal,
    gateway_response: &serde_json::Value,
    card_brand: Option<&str>,
    now: i64,
) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        UPDATE payments
        SET    status = 'completed', refund_due = 1,
               transaction_id = ?2, amount = ?3, gateway_response = ?4,
               card_brand = ?5, updated_at = ?6
        WHERE  id = ?1 AND status = 'failed' AND transaction_id IS NULL
        "#,
    )
    .bind(payment_id)
    .bind(transaction_id)
    .bind(amount.to_string())
    .bind(serde_json::to_string(gateway_response)?)
    .bind(card_brand)
    .bind(now)
    .execute(exec)
    .await?
    .rows_affected();
    Ok(rows)
}

/// Apply a refund to the original payment, only if it is still refundable.
pub async fn record_refund<'e, E>(
    exec: E,
    payment_id: &str,
    status: PaymentStatus,
    refunded_amount: &Decimal,
    now: i64,
) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        UPDATE payments
        SET    status = ?2, refunded_amount = ?3, refund_due = 0, updated_at = ?4
        WHERE  id = ?1 AND status IN ('completed', 'partially_refunded')
        "#,
    )
    .bind(payment_id)
    .bind(status.as_str())
    .bind(refunded_amount.to_string())
    .bind(now)
    .execute(exec)
    .await?
    .rows_affected();
    Ok(rows)
}

/// All payments, newest first.
pub async fn list_payments<'e, E>(exec: E) -> Result<Vec<Payment>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments ORDER BY created_at DESC, id");
    Ok(sqlx::query_as::<_, Payment>(&sql).fetch_all(exec).await?)
}

pub async fn list_payments_for_reservation<'e, E>(
    exec: E,
    reservation_id: &str,
) -> Result<Vec<Payment>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE reservation_id = ?1
         ORDER BY created_at DESC, id"
    );
    Ok(sqlx::query_as::<_, Payment>(&sql)
        .bind(reservation_id)
        .fetch_all(exec)
        .await?)
}
