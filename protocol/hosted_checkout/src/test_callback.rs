use rust_decimal::Decimal;

use crate::callback::{CallbackOutcome, CallbackValidator, SignatureFailure};
use crate::signature::Signer;
use crate::types::{Decision, FieldMap, PaymentOption};

const SECRET: &str = "callback-test-secret";

/// A processor receipt the way it arrives: the processor picks which fields
/// to sign and tells us in `signed_field_names`.
fn processor_payload(decision: &str, reason: &str) -> FieldMap {
    let mut fields = FieldMap::new();
    for (k, v) in [
        ("decision", decision),
        ("reason_code", reason),
        ("req_reference_number", "res-42"),
        ("transaction_id", "7412589630"),
        ("auth_code", "831000"),
        ("req_amount", "50000.00"),
        ("auth_amount", "50000.00"),
        ("req_currency", "XAF"),
        ("req_card_type", "001"),
        ("merchant_defined_data1", "first-night"),
        ("merchant_defined_data2", "1"),
        ("merchant_defined_data3", "3"),
    ] {
        fields.insert(k.to_string(), v.to_string());
    }
    let order = "transaction_id,decision,req_reference_number,reason_code,auth_code,\
                 req_amount,auth_amount,req_currency,req_card_type,merchant_defined_data1,\
                 merchant_defined_data2,merchant_defined_data3,signed_field_names";
    fields.insert("signed_field_names".to_string(), order.to_string());
    sign(&mut fields);
    fields
}

fn sign(fields: &mut FieldMap) {
    let order: Vec<String> = fields["signed_field_names"]
        .split(',')
        .map(String::from)
        .collect();
    let signature = Signer::new(SECRET).unwrap().sign(&order, fields);
    fields.insert("signature".to_string(), signature);
}

fn validator() -> CallbackValidator {
    CallbackValidator::new(Signer::new(SECRET).unwrap())
}

#[test]
fn accepted_callback_is_fully_decoded() {
    let outcome = validator().validate(&processor_payload("ACCEPT", "100"));
    assert!(outcome.success());

    let cb = outcome.verified().expect("verified");
    assert_eq!(cb.decision, Decision::Accept);
    assert_eq!(cb.reference_number.as_deref(), Some("res-42"));
    assert_eq!(cb.transaction_id.as_deref(), Some("7412589630"));
    assert_eq!(cb.auth_code.as_deref(), Some("831000"));
    assert_eq!(cb.amount, Some(Decimal::from(50_000)));
    assert_eq!(cb.currency.as_deref(), Some("XAF"));
    assert_eq!(cb.card_type, "001");
    assert_eq!(cb.merchant.payment_option, PaymentOption::FirstNight);
    assert_eq!(cb.merchant.nights_to_pay, 1);
    assert_eq!(cb.merchant.total_nights, 3);
    assert_eq!(cb.raw.get("auth_code").map(String::as_str), Some("831000"));
    assert_eq!(cb.message(), "Payment accepted");
}

#[test]
fn verification_uses_the_processor_field_order() {
    // The processor's order differs from anything we would send; a locally
    // fixed list would fail here.
    let payload = processor_payload("ACCEPT", "100");
    assert!(payload["signed_field_names"].starts_with("transaction_id,decision"));
    assert!(validator().validate(&payload).success());
}

#[test]
fn missing_signed_field_names_is_invalid_signature() {
    let mut payload = processor_payload("ACCEPT", "100");
    payload.remove("signed_field_names");
    let outcome = validator().validate(&payload);
    assert_eq!(
        outcome,
        CallbackOutcome::Rejected {
            failure: SignatureFailure::MissingSignedFieldNames
        }
    );
    assert_eq!(outcome.code(), "INVALID_SIGNATURE");
}

#[test]
fn missing_signature_is_invalid_signature() {
    let mut payload = processor_payload("ACCEPT", "100");
    payload.remove("signature");
    assert_eq!(validator().validate(&payload).code(), "INVALID_SIGNATURE");
}

#[test]
fn tampered_amount_is_invalid_signature() {
    let mut payload = processor_payload("ACCEPT", "100");
    payload.insert("req_amount".to_string(), "1.00".to_string());
    let outcome = validator().validate(&payload);
    assert_eq!(
        outcome,
        CallbackOutcome::Rejected {
            failure: SignatureFailure::Mismatch
        }
    );
}

#[test]
fn tampered_decision_is_invalid_signature() {
    let mut payload = processor_payload("DECLINE", "200");
    payload.insert("decision".to_string(), "ACCEPT".to_string());
    assert_eq!(validator().validate(&payload).code(), "INVALID_SIGNATURE");
}

#[test]
fn unsigned_extra_fields_do_not_break_verification() {
    let mut payload = processor_payload("ACCEPT", "100");
    payload.insert("utf8".to_string(), "✓".to_string());
    assert!(validator().validate(&payload).success());
}

#[test]
fn decline_maps_reason_code_to_message() {
    let outcome = validator().validate(&processor_payload("DECLINE", "201"));
    assert!(!outcome.success());
    assert_eq!(outcome.code(), "201");
    assert_eq!(outcome.message(), "Expired card");
}

#[test]
fn decline_with_unknown_code_still_parses() {
    let outcome = validator().validate(&processor_payload("DECLINE", "481"));
    assert_eq!(outcome.code(), "481");
    assert_eq!(outcome.message(), "Transaction declined (code: 481)");
}

#[test]
fn cancel_and_error_are_structured_failures() {
    let cancel = validator().validate(&processor_payload("CANCEL", "200"));
    assert_eq!(cancel.code(), "CANCELLED");
    assert!(!cancel.success());

    let error = validator().validate(&processor_payload("ERROR", "150"));
    assert_eq!(error.code(), "150");
    assert_eq!(error.message(), "Processing error: ERROR");

    let review = validator().validate(&processor_payload("REVIEW", "480"));
    assert!(!review.success());
    assert_eq!(review.verified().unwrap().decision, Decision::Review);
}

#[test]
fn error_without_reason_code_is_unknown() {
    let mut payload = processor_payload("ERROR", "");
    sign(&mut payload);
    let outcome = validator().validate(&payload);
    assert_eq!(outcome.code(), "UNKNOWN");
}

#[test]
fn amount_falls_back_to_auth_amount_and_tolerates_garbage() {
    let mut payload = processor_payload("ACCEPT", "100");
    payload.insert("req_amount".to_string(), String::new());
    payload.insert("auth_amount".to_string(), "12000.50".to_string());
    sign(&mut payload);
    let cb = validator().validate(&payload);
    assert_eq!(cb.verified().unwrap().amount, Some(Decimal::new(1_200_050, 2)));

    payload.insert("auth_amount".to_string(), "lots".to_string());
    sign(&mut payload);
    let cb = validator().validate(&payload);
    assert!(cb.success());
    assert_eq!(cb.verified().unwrap().amount, None);
}

#[test]
fn unsigned_decision_or_reference_is_rejected() {
    for left_out in ["decision", "req_reference_number"] {
        let mut payload = processor_payload("ACCEPT", "100");
        let order = payload["signed_field_names"]
            .split(',')
            .filter(|name| *name != left_out)
            .collect::<Vec<_>>()
            .join(",");
        payload.insert("signed_field_names".to_string(), order);
        sign(&mut payload);

        assert_eq!(
            validator().validate(&payload),
            CallbackOutcome::Rejected {
                failure: SignatureFailure::UnsignedRequiredField
            },
            "{left_out} left unsigned"
        );
    }
}

#[test]
fn unsigned_copies_of_known_fields_are_ignored() {
    let mut payload = processor_payload("ACCEPT", "100");
    let order = payload["signed_field_names"].replace(",auth_code", "");
    payload.insert("signed_field_names".to_string(), order);
    sign(&mut payload);
    payload.insert("auth_code".to_string(), "999999".to_string());

    let outcome = validator().validate(&payload);
    let cb = outcome.verified().expect("still authentic");
    assert_eq!(cb.auth_code, None);
    assert_eq!(cb.raw.get("auth_code").map(String::as_str), Some("999999"));
}
