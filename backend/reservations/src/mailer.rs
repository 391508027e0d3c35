//! Outbound email, fire-and-forget.
//!
//! Messages go to an HTTP relay when `MAIL_RELAY_URL` is set and are only
//! logged otherwise. Delivery runs on a detached task; a failure is logged and
//! never reaches the payment flow.

use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::accounts::IssuedCredentials;
use crate::errors::Result;
use crate::models::{mask_email, Payment, Reservation, ReservationStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct Mailer {
    client: Client,
    relay_url: Option<String>,
    from: String,
}

impl Mailer {
    pub fn new(client: Client, relay_url: Option<String>, from: String) -> Self {
        Self {
            client,
            relay_url,
            from,
        }
    }

    /// Queue `email` on a detached task.
    pub fn send_in_background(&self, email: Email) {
        let mailer = self.clone();
        tokio::spawn(async move {
            if let Err(e) = mailer.send(&email).await {
                warn!(to = %mask_email(&email.to), error = %e, "Email delivery failed");
            }
        });
    }

    pub async fn send(&self, email: &Email) -> Result<()> {
        let Some(relay) = &self.relay_url else {
            info!(to = %mask_email(&email.to), subject = %email.subject, "Email (no relay configured)");
            return Ok(());
        };

        self.client
            .post(relay)
            .json(&json!({
                "from": self.from,
                "to": email.to,
                "subject": email.subject,
                "text": email.body,
            }))
            .send()
            .await?
            .error_for_status()?;
        info!(to = %mask_email(&email.to), subject = %email.subject, "Email sent");
        Ok(())
    }
}

/// Confirmation for a settled payment. A newly created account is announced
/// but its password is only ever shown on the result page.
pub fn payment_confirmation(
    to: &str,
    reservation: &Reservation,
    payment: &Payment,
    credentials: Option<&IssuedCredentials>,
) -> Email {
    let mut body = format!(
        "Thank you for your payment.\n\n\
         Reservation: {}\n\
         Stay: {} to {} ({} nights)\n\
         Amount paid: {} {}\n\
         Transaction: {}\n\
         Status: {}\n",
        reservation.id,
        reservation.check_in,
        reservation.check_out,
        reservation.nights,
        payment.amount,
        payment.currency,
        payment.transaction_id.as_deref().unwrap_or("-"),
        reservation.status.as_str(),
    );
    if reservation.status == ReservationStatus::PartiallyPaid {
        body.push_str(&format!(
            "Deposit covers {} of {} nights; the balance is due at check-in.\n",
            reservation.nights_to_pay, reservation.nights
        ));
    }
    if let Some(creds) = credentials {
        body.push_str(&format!(
            "\nA client account was created for {}. Use the password shown \
             on the confirmation page to sign in.\n",
            creds.email
        ));
    }

    Email {
        to: to.to_string(),
        subject: format!("Payment confirmed - reservation {}", reservation.id),
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_without_relay_only_logs() {
        let mailer = Mailer::new(Client::new(), None, "noreply@test".into());
        let email = Email {
            to: "awa@example.cm".into(),
            subject: "Hello".into(),
            body: "Body".into(),
        };
        mailer.send(&email).await.unwrap();
    }
}
