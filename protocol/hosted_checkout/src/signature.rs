//! HMAC-SHA256 signing of ordered field lists.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{ProtocolError, Result};
use crate::types::FieldMap;

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies field sets with the secret shared with the processor.
#[derive(Clone)]
pub struct Signer {
    secret: String,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").field("secret", &"***").finish()
    }
}

impl Signer {
    /// Fails with [`ProtocolError::MissingSecret`] when the secret is blank.
    pub fn new(secret: impl Into<String>) -> Result<Self> {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return Err(ProtocolError::MissingSecret);
        }
        Ok(Self { secret })
    }

    /// Build the string that gets signed: `name=value` pairs in `fields` order,
    /// joined by `,`. A field absent from `values` contributes an empty value.
    pub fn canonical_string<S: AsRef<str>>(fields: &[S], values: &FieldMap) -> String {
        fields
            .iter()
            .map(|name| {
                let name = name.as_ref();
                let value = values.get(name).map(String::as_str).unwrap_or("");
                format!("{name}={value}")
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Base64 HMAC-SHA256 over the canonical string.
    pub fn sign<S: AsRef<str>>(&self, fields: &[S], values: &FieldMap) -> String {
        let mut mac = self.mac();
        mac.update(Self::canonical_string(fields, values).as_bytes());
        STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Recompute the signature and compare it with `presented` in constant time.
    pub fn verify<S: AsRef<str>>(&self, fields: &[S], values: &FieldMap, presented: &str) -> bool {
        let Ok(presented) = STANDARD.decode(presented.trim()) else {
            return false;
        };
        let mut mac = self.mac();
        mac.update(Self::canonical_string(fields, values).as_bytes());
        mac.verify_slice(&presented).is_ok()
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC is defined for keys of any length.
        HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC can take any size key")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn canonical_string_follows_field_order() {
        let v = values(&[("b", "2"), ("a", "1")]);
        assert_eq!(Signer::canonical_string(&["a", "b"], &v), "a=1,b=2");
        assert_eq!(Signer::canonical_string(&["b", "a"], &v), "b=2,a=1");
    }

    #[test]
    fn canonical_string_treats_missing_as_empty() {
        let v = values(&[("a", "1")]);
        assert_eq!(Signer::canonical_string(&["a", "zz"], &v), "a=1,zz=");
    }

    #[test]
    fn signature_is_base64_hmac_of_canonical_string() {
        let signer = Signer::new("key").unwrap();
        let v = values(&[("msg", "x")]);
        let mut mac = HmacSha256::new_from_slice(b"key").unwrap();
        mac.update(b"msg=x");
        let expected = STANDARD.encode(mac.finalize().into_bytes());
        assert_eq!(signer.sign(&["msg"], &v), expected);
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let secrets = ["s", "a much longer shared secret with spaces", "ключ"];
        let v = values(&[
            ("amount", "50000.00"),
            ("currency", "XAF"),
            ("reference_number", "r-1"),
        ]);
        let fields = ["amount", "currency", "reference_number"];
        for secret in secrets {
            let signer = Signer::new(secret).unwrap();
            let sig = signer.sign(&fields, &v);
            assert!(signer.verify(&fields, &v, &sig), "secret {secret}");
        }
    }

    #[test]
    fn any_single_tampered_value_fails_verification() {
        let signer = Signer::new("secret").unwrap();
        let v = values(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let fields = ["a", "b", "c"];
        let sig = signer.sign(&fields, &v);

        for name in fields {
            let mut tampered = v.clone();
            tampered.insert(name.to_string(), "9".to_string());
            assert!(!signer.verify(&fields, &tampered, &sig), "field {name}");
        }
    }

    #[test]
    fn reordered_fields_fail_verification() {
        let signer = Signer::new("secret").unwrap();
        let v = values(&[("a", "1"), ("b", "2")]);
        let sig = signer.sign(&["a", "b"], &v);
        assert!(!signer.verify(&["b", "a"], &v, &sig));
    }

    #[test]
    fn wrong_secret_or_garbage_signature_fails() {
        let v = values(&[("a", "1")]);
        let sig = Signer::new("one").unwrap().sign(&["a"], &v);
        assert!(!Signer::new("two").unwrap().verify(&["a"], &v, &sig));
        assert!(!Signer::new("one").unwrap().verify(&["a"], &v, "not base64 !!"));
        assert!(!Signer::new("one").unwrap().verify(&["a"], &v, ""));
    }

    #[test]
    fn blank_secret_is_a_configuration_error() {
        assert_eq!(Signer::new("").unwrap_err(), ProtocolError::MissingSecret);
        assert_eq!(Signer::new("   ").unwrap_err(), ProtocolError::MissingSecret);
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let signer = Signer::new("top-secret").unwrap();
        assert!(!format!("{signer:?}").contains("top-secret"));
    }
}
