//! Card processors behind one capability interface.
//!
//! * [`RealGateway`] posts the browser to the processor's hosted page and
//!   talks to its REST payments API for direct charges and refunds.
//! * [`SimulatedGateway`] plays the processor locally. It signs forms and the
//!   callbacks it synthesizes with a per-process secret, so the builder,
//!   validator and state machine run exactly as in production.
//!
//! [`select_gateway`] picks one at startup.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hosted_checkout::{
    decline_reason, BillingContact, CallbackOutcome, CallbackValidator, Decision, FieldMap,
    RedirectBuilder, RedirectRequest, Signer,
};
use rand::Rng;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::{AppProfile, Config, GatewayConfig};
use crate::errors::{AppError, Result};
use crate::models::Payment;
use crate::payments::{card_brand, ProcessorResult};

pub const GATEWAY_CYBERSOURCE: &str = "cybersource";
pub const GATEWAY_MOCK: &str = "mock";

// ─────────────────────────────────────────────────────────
// Capability interface
// ─────────────────────────────────────────────────────────

/// Everything the browser needs to post to the hosted payment page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutForm {
    pub action_url: String,
    pub transaction_uuid: String,
    pub fields: FieldMap,
}

#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardDetails {
    pub number: String,
    pub expiration_month: String,
    pub expiration_year: String,
    pub cvv: String,
}

impl fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits: String = self.number.chars().filter(char::is_ascii_digit).collect();
        let last4 = &digits[digits.len().saturating_sub(4)..];
        f.debug_struct("CardDetails")
            .field("number", &format!("****{last4}"))
            .field("cvv", &"***")
            .finish()
    }
}

impl CardDetails {
    /// Processor card type code guessed from the number's prefix.
    pub fn card_type(&self) -> Option<&'static str> {
        let digits: String = self.number.chars().filter(char::is_ascii_digit).collect();
        let prefix = |n: usize| digits.get(..n).and_then(|p| p.parse::<u32>().ok());
        if digits.starts_with('4') {
            Some("001")
        } else if matches!(prefix(2), Some(51..=55)) || matches!(prefix(4), Some(2221..=2720)) {
            Some("002")
        } else if matches!(prefix(2), Some(34 | 37)) {
            Some("003")
        } else if digits.starts_with("6011")
            || digits.starts_with("65")
            || matches!(prefix(3), Some(644..=649))
        {
            Some("004")
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub reservation_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub billing: BillingContact,
    pub card: CardDetails,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefundReceipt {
    pub transaction_id: Option<String>,
    pub raw: Value,
}

#[async_trait]
pub trait CardGateway: Send + Sync {
    /// Name recorded on payments (`cybersource` | `mock`).
    fn name(&self) -> &'static str;

    fn is_simulated(&self) -> bool {
        false
    }

    fn checkout_form(&self, request: &RedirectRequest, now: DateTime<Utc>) -> Result<CheckoutForm>;

    fn verify_callback(&self, payload: &FieldMap) -> CallbackOutcome;

    async fn charge(&self, request: &ChargeRequest) -> Result<ProcessorResult>;

    async fn refund(&self, payment: &Payment, amount: Decimal) -> Result<RefundReceipt>;

    /// Stand in for the hosted page: turn a posted form into the signed
    /// callback the processor would send. `None` for real processors.
    fn simulate_checkout(&self, _form: &FieldMap) -> Option<Result<FieldMap>> {
        None
    }
}

/// Hosted-page half shared by both gateways.
#[derive(Debug, Clone)]
struct HostedPage {
    action_url: String,
    builder: RedirectBuilder,
    validator: CallbackValidator,
}

impl HostedPage {
    fn new(
        action_url: String,
        access_key: &str,
        profile_id: &str,
        signer: Signer,
        receipt_url: String,
        cancel_url: String,
    ) -> Self {
        Self {
            action_url,
            builder: RedirectBuilder::new(
                access_key,
                profile_id,
                signer.clone(),
                receipt_url,
                cancel_url,
            ),
            validator: CallbackValidator::new(signer),
        }
    }

    fn form(&self, request: &RedirectRequest, now: DateTime<Utc>) -> Result<CheckoutForm> {
        let signed = self.builder.build(request, now)?;
        Ok(CheckoutForm {
            action_url: self.action_url.clone(),
            transaction_uuid: signed.transaction_uuid,
            fields: signed.fields,
        })
    }
}

// ─────────────────────────────────────────────────────────
// Real processor
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    id: Option<String>,
    status: Option<String>,
    reason: Option<String>,
    message: Option<String>,
    error_information: Option<ApiErrorInformation>,
    processor_information: Option<ApiProcessorInformation>,
    order_information: Option<ApiOrderInformation>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiErrorInformation {
    reason: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ApiProcessorInformation {
    approval_code: Option<String>,
    response_code: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ApiOrderInformation {
    amount_details: Option<ApiAmountDetails>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ApiAmountDetails {
    authorized_amount: Option<String>,
}

impl ApiResponse {
    fn status(&self) -> &str {
        self.status.as_deref().unwrap_or("")
    }

    fn reason_code(&self) -> String {
        self.processor_information
            .as_ref()
            .and_then(|p| p.response_code.clone())
            .or_else(|| self.error_information.as_ref().and_then(|e| e.reason.clone()))
            .or_else(|| self.reason.clone())
            .unwrap_or_else(|| "UNKNOWN".to_string())
    }

    fn error_message(&self) -> Option<String> {
        self.error_information
            .as_ref()
            .and_then(|e| e.message.clone())
            .or_else(|| self.message.clone())
    }
}

/// Map a REST payments response to a processor verdict.
fn charge_result(reservation_id: &str, card_type: &str, body: Value) -> Result<ProcessorResult> {
    let response: ApiResponse = serde_json::from_value(body.clone())?;
    let decision = match response.status() {
        "AUTHORIZED" | "PENDING" => Decision::Accept,
        "DECLINED" | "AUTHORIZED_RISK_DECLINED" => Decision::Decline,
        _ => Decision::Error,
    };
    let code = response.reason_code();
    let message = match decision {
        Decision::Accept => "Payment accepted".to_string(),
        Decision::Decline => response.error_message().unwrap_or_else(|| decline_reason(&code)),
        _ => response
            .error_message()
            .unwrap_or_else(|| format!("Processing error: {}", response.status())),
    };
    let amount = response
        .order_information
        .as_ref()
        .and_then(|o| o.amount_details.as_ref())
        .and_then(|a| a.authorized_amount.as_deref())
        .and_then(|v| v.parse::<Decimal>().ok());

    Ok(ProcessorResult {
        reservation_id: reservation_id.to_string(),
        decision,
        code,
        message,
        transaction_id: response.id.clone(),
        amount,
        card_brand: Some(card_brand(card_type).to_string()),
        auth_code: response
            .processor_information
            .as_ref()
            .and_then(|p| p.approval_code.clone()),
        raw: body,
    })
}

pub struct RealGateway {
    hosted: HostedPage,
    client: Client,
    api_base: String,
    merchant_id: String,
    api_secret: Option<String>,
}

impl fmt::Debug for RealGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealGateway")
            .field("action_url", &self.hosted.action_url)
            .field("api_base", &self.api_base)
            .field("merchant_id", &self.merchant_id)
            .finish()
    }
}

impl RealGateway {
    pub fn new(
        gateway: &GatewayConfig,
        receipt_url: String,
        cancel_url: String,
        client: Client,
    ) -> Result<Self> {
        let required = |value: &Option<String>, name: &str| {
            value
                .clone()
                .ok_or_else(|| AppError::Config(format!("{name} is required for the card gateway")))
        };
        let secret_key = required(&gateway.secret_key, "GATEWAY_SECRET_KEY")?;
        let access_key = required(&gateway.access_key, "GATEWAY_ACCESS_KEY")?;
        let profile_id = required(&gateway.profile_id, "GATEWAY_PROFILE_ID")?;
        let merchant_id = required(&gateway.merchant_id, "GATEWAY_MERCHANT_ID")?;

        Ok(Self {
            hosted: HostedPage::new(
                gateway.environment.hosted_checkout_url().to_string(),
                &access_key,
                &profile_id,
                Signer::new(secret_key)?,
                receipt_url,
                cancel_url,
            ),
            client,
            api_base: gateway.environment.api_base_url().to_string(),
            merchant_id,
            api_secret: gateway.api_secret.clone(),
        })
    }

    fn api_secret(&self) -> Result<&str> {
        self.api_secret
            .as_deref()
            .ok_or_else(|| AppError::Config("GATEWAY_API_SECRET is not configured".to_string()))
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.api_base, path);
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.merchant_id, Some(self.api_secret()?))
            .header("v-c-merchant-id", &self.merchant_id)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        let body: Value = response.json().await?;
        debug!(%url, %status, "Payments API responded");
        if status.is_server_error() {
            warn!(%url, %status, "Payments API server error");
        }
        Ok(body)
    }
}

#[async_trait]
impl CardGateway for RealGateway {
    fn name(&self) -> &'static str {
        GATEWAY_CYBERSOURCE
    }

    fn checkout_form(&self, request: &RedirectRequest, now: DateTime<Utc>) -> Result<CheckoutForm> {
        self.hosted.form(request, now)
    }

    fn verify_callback(&self, payload: &FieldMap) -> CallbackOutcome {
        self.hosted.validator.validate(payload)
    }

    async fn charge(&self, request: &ChargeRequest) -> Result<ProcessorResult> {
        let card_type = request
            .card
            .card_type()
            .ok_or_else(|| AppError::Validation("unsupported card number".to_string()))?;
        let billing = &request.billing;
        let body = json!({
            "clientReferenceInformation": { "code": request.reservation_id },
            "processingInformation": { "capture": true },
            "paymentInformation": {
                "card": {
                    "number": request.card.number,
                    "expirationMonth": request.card.expiration_month,
                    "expirationYear": request.card.expiration_year,
                    "securityCode": request.card.cvv,
                    "type": card_type,
                }
            },
            "orderInformation": {
                "amountDetails": {
                    "totalAmount": format!("{:.2}", request.amount.round_dp(2)),
                    "currency": request.currency,
                },
                "billTo": {
                    "firstName": billing.forename,
                    "lastName": billing.surname,
                    "email": billing.email,
                    "address1": billing.address_line1.as_deref().unwrap_or("Hotel Address"),
                    "locality": billing.city.as_deref().unwrap_or("Douala"),
                    "country": billing.country.as_deref().unwrap_or("CM"),
                }
            }
        });

        let response = self.post("/pts/v2/payments", &body).await?;
        charge_result(&request.reservation_id, card_type, response)
    }

    async fn refund(&self, payment: &Payment, amount: Decimal) -> Result<RefundReceipt> {
        let transaction_id = payment.transaction_id.as_deref().ok_or_else(|| {
            AppError::Validation("payment has no processor transaction to refund".to_string())
        })?;
        let body = json!({
            "clientReferenceInformation": { "code": payment.reservation_id },
            "orderInformation": {
                "amountDetails": {
                    "totalAmount": format!("{:.2}", amount.round_dp(2)),
                    "currency": payment.currency,
                }
            }
        });

        let raw = self
            .post(&format!("/pts/v2/payments/{transaction_id}/refunds"), &body)
            .await?;
        let response: ApiResponse = serde_json::from_value(raw.clone())?;
        match response.status() {
            "PENDING" | "REFUNDED" | "TRANSMITTED" => Ok(RefundReceipt {
                transaction_id: response.id.clone(),
                raw,
            }),
            _ => Err(AppError::GatewayDecline {
                code: response.reason_code(),
                message: response
                    .error_message()
                    .unwrap_or_else(|| "Refund refused by the processor".to_string()),
            }),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Simulated processor
// ─────────────────────────────────────────────────────────

/// Decision and reason code the simulated processor answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedOutcome {
    pub decision: &'static str,
    pub reason_code: &'static str,
}

/// Outcome for a roll in `0..100`: 85 % accept, 7 % insufficient funds,
/// 4 % expired card, 4 % processor error.
pub fn outcome_for(roll: u32) -> SimulatedOutcome {
    let (decision, reason_code) = match roll {
        0..=84 => ("ACCEPT", "100"),
        85..=91 => ("DECLINE", "200"),
        92..=95 => ("DECLINE", "201"),
        _ => ("ERROR", "234"),
    };
    SimulatedOutcome {
        decision,
        reason_code,
    }
}

/// Echoed form fields, renamed the way the processor echoes them.
const ECHOED_FIELDS: [(&str, &str); 7] = [
    ("reference_number", "req_reference_number"),
    ("transaction_uuid", "req_transaction_uuid"),
    ("amount", "req_amount"),
    ("currency", "req_currency"),
    ("merchant_defined_data1", "merchant_defined_data1"),
    ("merchant_defined_data2", "merchant_defined_data2"),
    ("merchant_defined_data3", "merchant_defined_data3"),
];

pub struct SimulatedGateway {
    hosted: HostedPage,
    signer: Signer,
    fixed_roll: Option<u32>,
}

impl fmt::Debug for SimulatedGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedGateway")
            .field("action_url", &self.hosted.action_url)
            .field("fixed_roll", &self.fixed_roll)
            .finish()
    }
}

impl SimulatedGateway {
    pub fn new(backend_url: &str, receipt_url: String, cancel_url: String) -> Result<Self> {
        let secret: [u8; 32] = rand::random();
        Self::with_secret(backend_url, hex::encode(secret), receipt_url, cancel_url)
    }

    pub fn with_secret(
        backend_url: &str,
        secret: String,
        receipt_url: String,
        cancel_url: String,
    ) -> Result<Self> {
        let signer = Signer::new(secret)?;
        Ok(Self {
            hosted: HostedPage::new(
                format!("{backend_url}/api/payments/mock-checkout"),
                "simulated-access-key",
                "simulated-profile",
                signer.clone(),
                receipt_url,
                cancel_url,
            ),
            signer,
            fixed_roll: None,
        })
    }

    /// Always answer with [`outcome_for`]`(roll)`.
    #[cfg(test)]
    pub fn with_fixed_roll(mut self, roll: u32) -> Self {
        self.fixed_roll = Some(roll);
        self
    }

    fn roll(&self) -> SimulatedOutcome {
        outcome_for(
            self.fixed_roll
                .unwrap_or_else(|| rand::rng().random_range(0..100)),
        )
    }

    fn transaction_id() -> String {
        let mut rng = rand::rng();
        (0..16)
            .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
            .collect()
    }

    fn auth_code() -> String {
        format!("{:06}", rand::rng().random_range(0..1_000_000u32))
    }

    /// Build and sign the processor callback for a verified checkout form.
    fn callback_for(&self, form: &FieldMap, outcome: SimulatedOutcome) -> FieldMap {
        let mut fields = FieldMap::new();
        for (from, to) in ECHOED_FIELDS {
            if let Some(value) = form.get(from) {
                fields.insert(to.to_string(), value.clone());
            }
        }
        fields.insert("decision".to_string(), outcome.decision.to_string());
        fields.insert("reason_code".to_string(), outcome.reason_code.to_string());
        fields.insert("transaction_id".to_string(), Self::transaction_id());
        fields.insert("req_card_type".to_string(), "001".to_string());
        if outcome.decision == "ACCEPT" {
            fields.insert("auth_code".to_string(), Self::auth_code());
            if let Some(amount) = form.get("amount") {
                fields.insert("auth_amount".to_string(), amount.clone());
            }
        }

        let mut names: Vec<String> = fields.keys().cloned().collect();
        names.push("signed_field_names".to_string());
        fields.insert("signed_field_names".to_string(), names.join(","));
        let signature = self.signer.sign(&names, &fields);
        fields.insert("signature".to_string(), signature);
        fields
    }
}

#[async_trait]
impl CardGateway for SimulatedGateway {
    fn name(&self) -> &'static str {
        GATEWAY_MOCK
    }

    fn is_simulated(&self) -> bool {
        true
    }

    fn checkout_form(&self, request: &RedirectRequest, now: DateTime<Utc>) -> Result<CheckoutForm> {
        self.hosted.form(request, now)
    }

    fn verify_callback(&self, payload: &FieldMap) -> CallbackOutcome {
        self.hosted.validator.validate(payload)
    }

    async fn charge(&self, request: &ChargeRequest) -> Result<ProcessorResult> {
        let outcome = self.roll();
        let decision = Decision::from_wire(outcome.decision);
        let accepted = decision == Decision::Accept;
        let transaction_id = Self::transaction_id();
        let message = match decision {
            Decision::Accept => "Payment accepted".to_string(),
            Decision::Decline => decline_reason(outcome.reason_code),
            _ => format!("Processing error: {}", outcome.decision),
        };
        let card_type = request.card.card_type().unwrap_or("001");

        info!(
            reservation_id = %request.reservation_id,
            decision = outcome.decision,
            "Simulated direct charge"
        );
        Ok(ProcessorResult {
            reservation_id: request.reservation_id.clone(),
            decision,
            code: outcome.reason_code.to_string(),
            message,
            transaction_id: Some(transaction_id.clone()),
            amount: accepted.then_some(request.amount),
            card_brand: Some(card_brand(card_type).to_string()),
            auth_code: accepted.then(Self::auth_code),
            raw: json!({
                "id": transaction_id,
                "decision": outcome.decision,
                "reasonCode": outcome.reason_code,
                "simulated": true,
            }),
        })
    }

    async fn refund(&self, payment: &Payment, amount: Decimal) -> Result<RefundReceipt> {
        let transaction_id = Self::transaction_id();
        info!(payment_id = %payment.id, %amount, "Simulated refund");
        Ok(RefundReceipt {
            transaction_id: Some(transaction_id.clone()),
            raw: json!({ "id": transaction_id, "status": "PENDING", "simulated": true }),
        })
    }

    fn simulate_checkout(&self, form: &FieldMap) -> Option<Result<FieldMap>> {
        // The hosted page refuses forms it cannot authenticate.
        if let CallbackOutcome::Rejected { failure } = self.hosted.validator.validate(form) {
            warn!(?failure, "Simulated checkout rejected an unsigned form");
            return Some(Err(AppError::InvalidSignature));
        }
        let outcome = self.roll();
        debug!(decision = outcome.decision, reason = outcome.reason_code, "Simulated checkout");
        Some(Ok(self.callback_for(form, outcome)))
    }
}

// ─────────────────────────────────────────────────────────
// Selection
// ─────────────────────────────────────────────────────────

/// Choose the processor once, at startup.
pub fn select_gateway(config: &Config, client: Client) -> Result<Arc<dyn CardGateway>> {
    let receipt_url = config.callback_url();
    let cancel_url = config.cancel_url();

    if config.gateway.is_unconfigured() || config.profile == AppProfile::Development {
        if !config.gateway.is_unconfigured() {
            warn!("Development profile: gateway credentials ignored, using simulated processor");
        }
        info!("Card payments run against the simulated processor");
        return Ok(Arc::new(SimulatedGateway::new(
            &config.backend_url,
            receipt_url,
            cancel_url,
        )?));
    }

    if config.gateway.secret_key.is_none() {
        return Err(AppError::Config(
            "GATEWAY_SECRET_KEY is required when gateway credentials are set".to_string(),
        ));
    }

    let gateway = RealGateway::new(&config.gateway, receipt_url, cancel_url, client)?;
    info!(environment = ?config.gateway.environment, "Card payments run against the hosted processor");
    Ok(Arc::new(gateway))
}
