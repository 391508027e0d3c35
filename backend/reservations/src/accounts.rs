//! Client accounts created for guests whose payment went through.

use std::fmt;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHasher, SaltString};
use argon2::Argon2;
use rand::distr::Alphanumeric;
use rand::Rng;
use sqlx::SqliteConnection;
use tracing::{info, warn};

use crate::db;
use crate::errors::{AppError, Result};
use crate::models::{mask_email, GuestContact, User};

const GENERATED_PASSWORD_LEN: usize = 12;
pub const CLIENT_ROLE: &str = "client";

/// Plaintext login handed out exactly once, in the payment result redirect.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedCredentials {
    pub user_id: String,
    pub email: String,
    pub password: String,
}

impl fmt::Debug for IssuedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCredentials")
            .field("user_id", &self.user_id)
            .field("email", &mask_email(&self.email))
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedClient {
    pub user_id: String,
    /// Only set when the account was created by this call.
    pub credentials: Option<IssuedCredentials>,
}

pub fn generate_password() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Credential(e.to_string()))
}

/// Find the client with the guest's email or create one.
pub async fn provision_client(
    conn: &mut SqliteConnection,
    guest: &GuestContact,
    now: i64,
) -> Result<ProvisionedClient> {
    let email = guest.email.trim().to_lowercase();

    if let Some(user) = db::find_user_by_email(&mut *conn, &email).await? {
        info!(user_id = %user.id, email = %mask_email(&email), "Reusing existing client account");
        return Ok(ProvisionedClient {
            user_id: user.id,
            credentials: None,
        });
    }

    let password = generate_password();
    let hash = {
        let password = password.clone();
        tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| AppError::Credential(e.to_string()))??
    };

    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        name: guest.name.trim().to_string(),
        surname: guest.surname.trim().to_string(),
        email: email.clone(),
        phone: guest.phone.clone().unwrap_or_default(),
        password_hash: hash,
        role: CLIENT_ROLE.to_string(),
        created_at: now,
    };

    match db::insert_user(&mut *conn, &user).await {
        Ok(()) => {}
        Err(AppError::Database(err)) if db::is_unique_violation(&err) => {
            // Created concurrently under the same email.
            warn!(email = %mask_email(&email), "Client account appeared concurrently");
            let existing = db::find_user_by_email(&mut *conn, &email)
                .await?
                .ok_or_else(|| AppError::NotFound("User".to_string()))?;
            return Ok(ProvisionedClient {
                user_id: existing.id,
                credentials: None,
            });
        }
        Err(err) => return Err(err),
    }

    info!(user_id = %user.id, email = %mask_email(&email), "Client account created");
    Ok(ProvisionedClient {
        user_id: user.id.clone(),
        credentials: Some(IssuedCredentials {
            user_id: user.id,
            email,
            password,
        }),
    })
}
