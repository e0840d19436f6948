//! Signed read capabilities
//!
//! A token is (subject, valid_until, signature) where the signature
//! covers a domain-tagged message binding both fields. `valid_until`
//! bounds the replay window; the subject check binds the read to a
//! consenting identity. Verification is a pure function of the token,
//! the caller and the current time.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::market::error::{MarketError, MarketResult};

/// Domain separator so a capability cannot double as any other signature
const CAPABILITY_DOMAIN: &[u8] = b"predpool.read.v1";

/// Canonical signed message for a read capability
pub fn capability_message(subject: &str, valid_until: i64) -> Vec<u8> {
    let mut msg = Vec::with_capacity(CAPABILITY_DOMAIN.len() + subject.len() + 8);
    msg.extend_from_slice(CAPABILITY_DOMAIN);
    msg.extend_from_slice(subject.as_bytes());
    msg.extend_from_slice(&valid_until.to_be_bytes());
    msg
}

/// Ephemeral proof of identity control; never persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationToken {
    /// Hex-encoded ed25519 verifying key (the consumer identity)
    pub subject: String,
    /// Unix timestamp after which the token is dead
    pub valid_until: i64,
    /// Hex-encoded 64-byte signature over `capability_message`
    pub signature: String,
}

impl AuthorizationToken {
    /// Check the token against `caller` at time `now`.
    ///
    /// Rejection order: signature must verify under the subject's key,
    /// the subject must be the caller, and the token must not have
    /// expired. Subscription checks belong to the market, not here.
    pub fn verify(&self, caller: &str, now: i64) -> MarketResult<()> {
        let key = decode_verifying_key(&self.subject)?;

        let sig_bytes: [u8; 64] = hex::decode(&self.signature)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| MarketError::auth("invalid auth"))?;
        let signature = Signature::from_bytes(&sig_bytes);

        let message = capability_message(&self.subject, self.valid_until);
        key.verify(&message, &signature)
            .map_err(|_| MarketError::auth("invalid auth"))?;

        if self.subject != caller {
            return Err(MarketError::auth("invalid auth"));
        }
        if now > self.valid_until {
            return Err(MarketError::auth("expired"));
        }
        Ok(())
    }
}

fn decode_verifying_key(subject: &str) -> MarketResult<VerifyingKey> {
    let key_bytes: [u8; 32] = hex::decode(subject)
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| MarketError::auth("invalid auth"))?;
    VerifyingKey::from_bytes(&key_bytes).map_err(|_| MarketError::auth("invalid auth"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    fn issue_token(key: &SigningKey, valid_until: i64) -> AuthorizationToken {
        let subject = hex::encode(key.verifying_key().to_bytes());
        let signature = key.sign(&capability_message(&subject, valid_until));
        AuthorizationToken {
            subject,
            valid_until,
            signature: hex::encode(signature.to_bytes()),
        }
    }

    #[test]
    fn test_valid_token_accepted() {
        let key = SigningKey::generate(&mut OsRng);
        let token = issue_token(&key, 2_000);
        assert!(token.verify(&token.subject, 1_000).is_ok());
    }

    #[test]
    fn test_expired_token_rejected() {
        let key = SigningKey::generate(&mut OsRng);
        let token = issue_token(&key, 2_000);
        let err = token.verify(&token.subject, 2_001).unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn test_subject_must_match_caller() {
        let key = SigningKey::generate(&mut OsRng);
        let other = SigningKey::generate(&mut OsRng);
        let token = issue_token(&key, 2_000);
        let caller = hex::encode(other.verifying_key().to_bytes());
        let err = token.verify(&caller, 1_000).unwrap_err();
        assert!(err.to_string().contains("invalid auth"));
    }

    #[test]
    fn test_forged_signature_rejected() {
        let key = SigningKey::generate(&mut OsRng);
        let forger = SigningKey::generate(&mut OsRng);
        let subject = hex::encode(key.verifying_key().to_bytes());
        // Signed by the wrong key over the right message
        let signature = forger.sign(&capability_message(&subject, 2_000));
        let token = AuthorizationToken {
            subject: subject.clone(),
            valid_until: 2_000,
            signature: hex::encode(signature.to_bytes()),
        };
        assert!(token.verify(&subject, 1_000).is_err());
    }

    #[test]
    fn test_tampered_valid_until_rejected() {
        let key = SigningKey::generate(&mut OsRng);
        let mut token = issue_token(&key, 2_000);
        token.valid_until = 3_000;
        assert!(token.verify(&token.subject, 1_000).is_err());
    }

    #[test]
    fn test_garbage_encodings_rejected() {
        let token = AuthorizationToken {
            subject: "not-hex".to_string(),
            valid_until: 2_000,
            signature: "zz".to_string(),
        };
        assert!(token.verify("not-hex", 1_000).is_err());
    }
}
