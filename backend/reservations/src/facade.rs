//! Payment service: the single entry point the HTTP layer talks to.
//!
//! Processor callbacks never produce an error response here. Every outcome,
//! including a forged payload, is turned into a redirect to the frontend.

use std::sync::Arc;

use chrono::Utc;
use hosted_checkout::{BillingContact, CallbackOutcome, FieldMap, RedirectRequest};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{error, info, warn};
use url::form_urlencoded;

use crate::accounts::IssuedCredentials;
use crate::db;
use crate::errors::{AppError, Result};
use crate::gateway::{CardDetails, CardGateway, ChargeRequest, CheckoutForm};
use crate::mailer::{payment_confirmation, Mailer};
use crate::models::{Payment, Reservation, ReservationStatus};
use crate::payments::{self, ProcessorResult, Transition};

/// Result-page code for a payment accepted on a cancelled reservation.
pub const CODE_RESERVATION_CANCELLED: &str = "RESERVATION_CANCELLED";

/// Optional billing address sent with a checkout request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingAddress {
    pub address_line1: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatedCheckout {
    pub payment_id: String,
    pub reservation: Reservation,
    pub form: CheckoutForm,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeReceipt {
    pub reservation: Reservation,
    pub payment: Payment,
    /// Present once, when a guest account was created by this payment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<CredentialsView>,
}

/// Wire form of freshly issued credentials.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsView {
    pub client_id: String,
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for CredentialsView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsView")
            .field("client_id", &self.client_id)
            .field("password", &"***")
            .finish()
    }
}

impl From<IssuedCredentials> for CredentialsView {
    fn from(creds: IssuedCredentials) -> Self {
        Self {
            client_id: creds.user_id,
            email: creds.email,
            password: creds.password,
        }
    }
}

#[derive(Clone)]
pub struct PaymentService {
    pool: SqlitePool,
    gateway: Arc<dyn CardGateway>,
    mailer: Mailer,
    frontend_url: String,
}

impl PaymentService {
    pub fn new(
        pool: SqlitePool,
        gateway: Arc<dyn CardGateway>,
        mailer: Mailer,
        frontend_url: String,
    ) -> Self {
        Self {
            pool,
            gateway,
            mailer,
            frontend_url,
        }
    }

    pub fn gateway(&self) -> &dyn CardGateway {
        self.gateway.as_ref()
    }

    // ─────────────────────────────────────────────────────
    // Hosted checkout
    // ─────────────────────────────────────────────────────

    /// Open a payment attempt and return the signed form for the hosted page.
    pub async fn initiate_redirect(
        &self,
        reservation_id: &str,
        address: BillingAddress,
    ) -> Result<InitiatedCheckout> {
        let reservation = db::get_reservation(&self.pool, reservation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Reservation".to_string()))?;
        let room_name = db::get_room(&self.pool, &reservation.room_id)
            .await?
            .map(|room| room.name)
            .unwrap_or_default();
        let billing = self.billing_contact(&reservation, address).await?;

        // Validate and sign before any row is written.
        let request = RedirectRequest {
            reservation_id: reservation.id.clone(),
            amount: reservation.total_amount,
            currency: reservation.currency.clone(),
            billing,
            check_in: reservation.check_in,
            check_out: reservation.check_out,
            payment_option: reservation.payment_option,
            nights_to_pay: reservation.nights_to_pay,
            nights: reservation.nights,
            room_name,
        };
        let form = self.gateway.checkout_form(&request, Utc::now())?;

        let (reservation, payment) = payments::begin_checkout(
            &self.pool,
            reservation_id,
            self.gateway.name(),
            Utc::now().timestamp(),
        )
        .await?;

        Ok(InitiatedCheckout {
            payment_id: payment.id,
            reservation,
            form,
        })
    }

    /// Receipt callback from the processor. Returns the frontend URL to
    /// redirect the browser to.
    pub async fn handle_callback(&self, payload: &FieldMap) -> String {
        let callback = match self.gateway.verify_callback(payload) {
            CallbackOutcome::Verified(callback) => callback,
            rejected @ CallbackOutcome::Rejected { .. } => {
                error!(
                    reference = payload.get("req_reference_number").map(String::as_str).unwrap_or(""),
                    "Payment callback failed signature verification"
                );
                return self.error_url(&rejected.code(), &rejected.message());
            }
        };

        let transition = match ProcessorResult::from_callback(&callback) {
            Ok(result) => payments::apply_result(&self.pool, &result, Utc::now().timestamp()).await,
            Err(e) => Err(e),
        };

        match transition {
            Ok(Transition::Settled {
                reservation,
                payment,
                credentials,
            }) => {
                self.send_confirmation(&reservation, &payment, credentials.as_ref())
                    .await;
                self.success_url(&reservation, &payment, credentials.as_ref())
            }
            Ok(Transition::Failed { code, message, .. }) => self.error_url(&code, &message),
            Ok(Transition::RefundDue { .. }) => self.cancelled_reservation_url(),
            Ok(Transition::Ignored { reservation }) => {
                // A replay of a callback that was already applied.
                if callback.success() && reservation.status == ReservationStatus::Cancelled {
                    self.cancelled_reservation_url()
                } else if callback.success() && reservation.status.is_paid() {
                    match db::list_payments_for_reservation(&self.pool, &reservation.id).await {
                        Ok(list) => match list.into_iter().find(|p| p.transaction_id == callback.transaction_id) {
                            Some(payment) => self.success_url(&reservation, &payment, None),
                            None => self.error_url("ALREADY_PROCESSED", "Payment already processed"),
                        },
                        Err(e) => self.internal_error_url(&e),
                    }
                } else {
                    self.error_url(&callback.code(), &callback.message())
                }
            }
            Err(e) => self.internal_error_url(&e),
        }
    }

    /// Cancel callback from the processor. Always sends the browser to the
    /// cancel page; the books change only for an authentic payload.
    pub async fn handle_cancel(&self, payload: &FieldMap) -> String {
        let reference = match self.gateway.verify_callback(payload) {
            CallbackOutcome::Verified(callback) => {
                match ProcessorResult::from_callback(&callback) {
                    Ok(result) => {
                        if let Err(e) =
                            payments::apply_result(&self.pool, &result, Utc::now().timestamp()).await
                        {
                            error!(error = %e, "Failed to record cancelled payment");
                        }
                        Some(result.reservation_id)
                    }
                    Err(e) => {
                        warn!(error = %e, "Cancel callback without reference");
                        None
                    }
                }
            }
            CallbackOutcome::Rejected { failure } => {
                warn!(?failure, "Cancel callback failed signature verification");
                None
            }
        };

        let params: Vec<(&str, String)> = reference
            .into_iter()
            .map(|r| ("reservation", r))
            .collect();
        self.frontend_url("/payment/cancel", &params)
    }

    /// Simulated hosted page: answer the posted form with a synthesized
    /// callback and process it like a real one.
    pub async fn simulate_checkout(&self, form: &FieldMap) -> Result<String> {
        match self.gateway.simulate_checkout(form) {
            None => Err(AppError::NotFound("Simulated checkout".to_string())),
            Some(Ok(callback)) => Ok(self.handle_callback(&callback).await),
            Some(Err(e)) => Ok(self.error_url(e.code(), &e.public_message())),
        }
    }

    // ─────────────────────────────────────────────────────
    // Direct card operations
    // ─────────────────────────────────────────────────────

    /// Charge a card for the amount due on a reservation.
    pub async fn process_payment(
        &self,
        reservation_id: &str,
        card: CardDetails,
        address: BillingAddress,
    ) -> Result<ChargeReceipt> {
        let reservation = db::get_reservation(&self.pool, reservation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Reservation".to_string()))?;
        let billing = self.billing_contact(&reservation, address).await?;

        let (reservation, payment) = payments::begin_checkout(
            &self.pool,
            reservation_id,
            self.gateway.name(),
            Utc::now().timestamp(),
        )
        .await?;

        let request = ChargeRequest {
            reservation_id: reservation.id.clone(),
            amount: payment.amount,
            currency: payment.currency.clone(),
            billing,
            card,
        };
        let result = self.gateway.charge(&request).await?;

        match payments::apply_result(&self.pool, &result, Utc::now().timestamp()).await? {
            Transition::Settled {
                reservation,
                payment,
                credentials,
            } => {
                self.send_confirmation(&reservation, &payment, credentials.as_ref())
                    .await;
                Ok(ChargeReceipt {
                    reservation,
                    payment,
                    credentials: credentials.map(CredentialsView::from),
                })
            }
            Transition::Failed { code, message, .. } => {
                Err(AppError::GatewayDecline { code, message })
            }
            Transition::RefundDue { .. } => Err(AppError::Conflict(
                "reservation was cancelled; the payment will be refunded".to_string(),
            )),
            Transition::Ignored { .. } => Err(AppError::Conflict(
                "payment was already processed".to_string(),
            )),
        }
    }

    /// Refund all or part of a settled payment.
    pub async fn process_refund(
        &self,
        payment_id: &str,
        amount: Option<Decimal>,
        reason: Option<String>,
    ) -> Result<Payment> {
        let payment = db::get_payment(&self.pool, payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Payment".to_string()))?;
        let amount = payments::refundable_amount(&payment, amount)?;

        let receipt = self.gateway.refund(&payment, amount).await?;
        payments::record_refund(
            &self.pool,
            &payment,
            amount,
            receipt.transaction_id,
            receipt.raw,
            reason,
            Utc::now().timestamp(),
        )
        .await
    }

    // ─────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────

    async fn billing_contact(
        &self,
        reservation: &Reservation,
        address: BillingAddress,
    ) -> Result<BillingContact> {
        let (forename, surname, email) = match (&reservation.guest, &reservation.client_id) {
            (Some(guest), _) => (guest.name.clone(), guest.surname.clone(), guest.email.clone()),
            (None, Some(client_id)) => {
                let user = db::get_user(&self.pool, client_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound("Client".to_string()))?;
                (user.name, user.surname, user.email)
            }
            (None, None) => {
                return Err(AppError::Validation(
                    "reservation has no contact details".to_string(),
                ))
            }
        };
        Ok(BillingContact {
            forename,
            surname,
            email,
            address_line1: address.address_line1,
            city: address.city,
            country: address.country,
        })
    }

    async fn send_confirmation(
        &self,
        reservation: &Reservation,
        payment: &Payment,
        credentials: Option<&IssuedCredentials>,
    ) {
        let to = match &reservation.guest {
            Some(guest) => Some(guest.email.clone()),
            None => match &reservation.client_id {
                Some(id) => db::get_user(&self.pool, id).await.ok().flatten().map(|u| u.email),
                None => None,
            },
        };
        match to {
            Some(to) => self
                .mailer
                .send_in_background(payment_confirmation(&to, reservation, payment, credentials)),
            None => warn!(reservation_id = %reservation.id, "No recipient for payment confirmation"),
        }
    }

    fn frontend_url(&self, path: &str, params: &[(&str, String)]) -> String {
        if params.is_empty() {
            return format!("{}{}", self.frontend_url, path);
        }
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())))
            .finish();
        format!("{}{}?{}", self.frontend_url, path, query)
    }

    fn success_url(
        &self,
        reservation: &Reservation,
        payment: &Payment,
        credentials: Option<&IssuedCredentials>,
    ) -> String {
        let mut params = vec![
            ("status", "success".to_string()),
            ("reservation", reservation.id.clone()),
            (
                "transaction",
                payment.transaction_id.clone().unwrap_or_default(),
            ),
            ("amount", payment.amount.to_string()),
            ("paymentOption", reservation.payment_option.as_str().to_string()),
            ("nightsPaid", reservation.nights_to_pay.to_string()),
            ("totalNights", reservation.nights.to_string()),
        ];
        if let Some(creds) = credentials {
            info!(reservation_id = %reservation.id, client_id = %creds.user_id, "Returning new account credentials");
            params.extend([
                ("autoAccount", "true".to_string()),
                ("clientEmail", creds.email.clone()),
                ("clientPassword", creds.password.clone()),
                ("clientId", creds.user_id.clone()),
            ]);
        }
        self.frontend_url("/payment/result", &params)
    }

    fn error_url(&self, code: &str, message: &str) -> String {
        self.frontend_url(
            "/payment/result",
            &[
                ("status", "error".to_string()),
                ("message", message.to_string()),
                ("code", code.to_string()),
            ],
        )
    }

    fn cancelled_reservation_url(&self) -> String {
        self.error_url(
            CODE_RESERVATION_CANCELLED,
            "Reservation was cancelled; the payment will be refunded",
        )
    }

    fn internal_error_url(&self, err: &AppError) -> String {
        match err {
            AppError::Validation(_) | AppError::NotFound(_) | AppError::Conflict(_) => {
                warn!(error = %err, "Payment callback not applied");
            }
            _ => error!(error = %err, "Payment callback processing failed"),
        }
        self.error_url(err.code(), &err.public_message())
    }
}
