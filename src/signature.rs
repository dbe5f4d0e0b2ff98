//! Webhook authenticity checks.
//!
//! v1 deliveries carry the shared secret itself in the body; v2 deliveries carry
//! `sha1=<hex>` in `X-Coding-Signature`, an HMAC-SHA1 of the raw body keyed by the
//! secret. An empty configured secret disables verification for both.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::event::{CanonicalEvent, SchemaVersion};

type HmacSha1 = Hmac<Sha1>;

pub const SIGNATURE_PREFIX: &str = "sha1=";

/// Verification strategy, fixed by the schema version of the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    SharedToken,
    HmacSha1,
}

impl Strategy {
    pub fn for_version(version: SchemaVersion) -> Self {
        match version {
            SchemaVersion::V1 => Strategy::SharedToken,
            SchemaVersion::V2 => Strategy::HmacSha1,
        }
    }
}

/// Returns true if the event was sent by the holder of `secret`.
///
/// Only the strategy matching the event's schema version is tried.
pub fn verify(event: &CanonicalEvent, secret: &str) -> bool {
    match Strategy::for_version(event.schema_version) {
        Strategy::SharedToken => verify_token(&event.signature_token, secret),
        Strategy::HmacSha1 => verify_hmac_sha1(&event.raw_body, &event.signature_token, secret),
    }
}

/// Exact match of the presented token against the configured secret.
pub fn verify_token(presented: &str, secret: &str) -> bool {
    if secret.is_empty() {
        return true;
    }
    presented.as_bytes().ct_eq(secret.as_bytes()).into()
}

/// Lowercase hex HMAC-SHA1 of `payload` keyed by `secret`.
pub fn compute_signature(payload: &[u8], secret: &str) -> String {
    // HMAC accepts keys of any length, so this never fails
    let mut mac = match HmacSha1::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Formats a digest as a header value, `sha1=<hex>`.
pub fn format_signature_header(hex_digest: &str) -> String {
    format!("{SIGNATURE_PREFIX}{hex_digest}")
}

/// Checks a `sha1=<hex>` header value against the HMAC of `payload`.
///
/// A missing prefix or an empty header fails when a secret is configured.
pub fn verify_hmac_sha1(payload: &[u8], presented: &str, secret: &str) -> bool {
    if secret.is_empty() {
        return true;
    }
    if presented.is_empty() {
        debug!("Got empty signature");
        return false;
    }
    let Some(presented_digest) = presented.strip_prefix(SIGNATURE_PREFIX) else {
        debug!("Invalid signature, missing '{}' prefix", SIGNATURE_PREFIX);
        return false;
    };

    let expected = compute_signature(payload, secret);
    if expected.is_empty() {
        return false;
    }
    let valid: bool = presented_digest.as_bytes().ct_eq(expected.as_bytes()).into();
    if !valid {
        debug!("Invalid signature, digest mismatch");
    }
    valid
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::collection::vec;
    use proptest::prelude::{any, prop_assert, prop_assume, proptest};

    #[test]
    fn known_vector() {
        // HMAC-SHA1("key", "The quick brown fox jumps over the lazy dog")
        assert_eq!(
            compute_signature(b"The quick brown fox jumps over the lazy dog", "key"),
            "de7c9b85b8b78aa6bc8a7a36f70a90701c9db4d9"
        );
    }

    #[test]
    fn token_with_empty_secret_always_passes() {
        assert!(verify_token("", ""));
        assert!(verify_token("anything", ""));
    }

    #[test]
    fn token_requires_exact_match() {
        assert!(verify_token("s3cret", "s3cret"));
        assert!(!verify_token("s3cret ", "s3cret"));
        assert!(!verify_token("S3CRET", "s3cret"));
        assert!(!verify_token("", "s3cret"));
    }

    #[test]
    fn hmac_accepts_correct_header() {
        let body = br#"{"ref":"refs/heads/main"}"#;
        let header = format_signature_header(&compute_signature(body, "secret"));
        assert!(verify_hmac_sha1(body, &header, "secret"));
    }

    #[test]
    fn hmac_fails_closed_on_malformed_headers() {
        let body = b"payload";
        let digest = compute_signature(body, "secret");
        assert!(!verify_hmac_sha1(body, "", "secret"));
        assert!(!verify_hmac_sha1(body, &digest, "secret"));
        assert!(!verify_hmac_sha1(body, "sha1=", "secret"));
        assert!(!verify_hmac_sha1(body, &format!("sha256={digest}"), "secret"));
        assert!(!verify_hmac_sha1(body, &format!("SHA1={digest}"), "secret"));
    }

    #[test]
    fn hmac_bypassed_without_secret() {
        assert!(verify_hmac_sha1(b"payload", "", ""));
        assert!(verify_hmac_sha1(b"payload", "garbage", ""));
    }

    #[test]
    fn hmac_rejects_wrong_secret_and_tampered_body() {
        let header = format_signature_header(&compute_signature(b"original", "secret"));
        assert!(!verify_hmac_sha1(b"original", &header, "other"));
        assert!(!verify_hmac_sha1(b"tampered", &header, "secret"));
    }

    #[test]
    fn strategy_follows_schema_version() {
        assert_eq!(Strategy::for_version(SchemaVersion::V1), Strategy::SharedToken);
        assert_eq!(Strategy::for_version(SchemaVersion::V2), Strategy::HmacSha1);
    }

    proptest! {
        #[test]
        fn prop_correct_signature_verifies(body in vec(any::<u8>(), 0..256), secret in ".{1,32}") {
            let header = format_signature_header(&compute_signature(&body, &secret));
            prop_assert!(verify_hmac_sha1(&body, &header, &secret));
        }

        #[test]
        fn prop_single_byte_mutation_fails(
            body in vec(any::<u8>(), 0..256),
            secret in ".{1,32}",
            index in 0usize..40,
            replacement in proptest::sample::select(b"0123456789abcdef".to_vec())
        ) {
            let mut mutated = compute_signature(&body, &secret).into_bytes();
            prop_assume!(mutated[index] != replacement);
            mutated[index] = replacement;
            let mutated = String::from_utf8(mutated).unwrap();
            prop_assert!(!verify_hmac_sha1(&body, &format_signature_header(&mutated), &secret));
        }

        #[test]
        fn prop_unprefixed_digest_fails(body in vec(any::<u8>(), 0..256), secret in ".{1,32}") {
            let digest = compute_signature(&body, &secret);
            prop_assert!(!verify_hmac_sha1(&body, &digest, &secret));
        }

        #[test]
        fn prop_arbitrary_header_never_panics(body: Vec<u8>, header: String, secret: String) {
            let _ = verify_hmac_sha1(&body, &header, &secret);
        }
    }
}
