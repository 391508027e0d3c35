//! # Hosted checkout protocol
//!
//! Pure building blocks for the signed hosted-payment-page integration used by
//! the reservations backend. Nothing in this crate performs I/O: it computes
//! amounts, signs and verifies field sets, builds the redirect form and turns
//! an untrusted callback payload into a trusted outcome.
//!
//! | Concern            | Entry point(s)                                   |
//! |--------------------|--------------------------------------------------|
//! | Amount due         | [`amount_due`]                                   |
//! | Field signing      | [`Signer::sign`], [`Signer::verify`]             |
//! | Redirect form      | [`RedirectBuilder::build`]                       |
//! | Callback intake    | [`CallbackValidator::validate`]                  |
//!
//! ## Signing contract
//!
//! The signed string is `name=value` pairs joined by `,` in the order given by
//! `signed_field_names`. Outbound forms use [`SIGNED_FIELD_NAMES`]; inbound
//! callbacks are verified against the list the processor itself sent, never
//! against a local constant.

pub mod amount;
pub mod callback;
pub mod error;
pub mod redirect;
pub mod signature;
pub mod types;

#[cfg(test)]
mod test_callback;

pub use amount::{amount_due, AmountDue};
pub use callback::{
    decline_reason, CallbackOutcome, CallbackValidator, MerchantData, SignatureFailure,
    VerifiedCallback,
};
pub use error::{ProtocolError, Result};
pub use redirect::{
    payment_description, BillingContact, RedirectBuilder, RedirectRequest, SignedForm,
    SIGNED_FIELD_NAMES,
};
pub use signature::Signer;
pub use types::{Decision, FieldMap, PaymentOption};
