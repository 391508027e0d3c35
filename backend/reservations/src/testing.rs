//! Fixtures shared by the unit tests.

use std::str::FromStr;

use chrono::NaiveDate;
use hosted_checkout::{FieldMap, Signer};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tempfile::TempDir;

use crate::db;
use crate::accounts::CLIENT_ROLE;
use crate::models::{GuestContact, Room, User};

pub const TEST_SECRET: &str = "unit-test-shared-secret";
pub const NOW: i64 = 1_735_000_000;

/// Fresh migrated in-memory database. A single connection that never expires
/// keeps the database alive for the whole test.
pub async fn memory_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

/// Migrated database file behind a pool of several connections, so that
/// concurrent requests really race. Keep the directory alive with the pool.
pub async fn file_pool() -> (SqlitePool, TempDir) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("reservations.db");
    let pool = db::init_pool(&path.display().to_string(), 8).await.unwrap();
    (pool, dir)
}

pub async fn seed_room(pool: &SqlitePool, number: &str, price: i64) -> Room {
    let room = Room {
        id: format!("room-{number}"),
        number: number.to_string(),
        name: format!("Deluxe {number}"),
        price: Decimal::from(price),
        currency: "XAF".to_string(),
        created_at: NOW,
    };
    db::insert_room(pool, &room).await.unwrap();
    room
}

/// A signed-up client; bookings made for it skip account provisioning.
pub async fn seed_client(pool: &SqlitePool, id: &str) -> User {
    let user = User {
        id: id.to_string(),
        name: "Jean".to_string(),
        surname: "Mbarga".to_string(),
        email: format!("{id}@example.cm"),
        phone: String::new(),
        password_hash: "not-a-real-hash".to_string(),
        role: CLIENT_ROLE.to_string(),
        created_at: NOW,
    };
    db::insert_user(pool, &user).await.unwrap();
    user
}

pub fn guest() -> GuestContact {
    GuestContact {
        name: "Awa".to_string(),
        surname: "Ngono".to_string(),
        email: "awa.ngono@example.cm".to_string(),
        phone: Some("+237690000000".to_string()),
    }
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// A processor receipt for `reference`, signed with [`TEST_SECRET`] in the
/// processor's own field order.
pub fn signed_callback(
    reference: &str,
    decision: &str,
    reason: &str,
    amount: &str,
    transaction_id: &str,
) -> FieldMap {
    let mut fields = FieldMap::new();
    for (k, v) in [
        ("decision", decision),
        ("reason_code", reason),
        ("req_reference_number", reference),
        ("transaction_id", transaction_id),
        ("auth_code", "831000"),
        ("req_amount", amount),
        ("req_currency", "XAF"),
        ("req_card_type", "001"),
    ] {
        fields.insert(k.to_string(), v.to_string());
    }
    let order = "transaction_id,decision,req_reference_number,reason_code,auth_code,\
                 req_amount,req_currency,req_card_type,signed_field_names";
    fields.insert("signed_field_names".to_string(), order.to_string());
    let names: Vec<&str> = order.split(',').collect();
    let signature = Signer::new(TEST_SECRET).unwrap().sign(&names, &fields);
    fields.insert("signature".to_string(), signature);
    fields
}
