//! RSA-PSS signing/verification over PEM key material (spec.md §4.B, §6).
//!
//! Mirrors `original_source/signature.py`: private keys are PKCS#1
//! ("TraditionalOpenSSL") PEM, public keys are SubjectPublicKeyInfo PEM,
//! and signatures are RSA-PSS with MGF1-SHA256 and the maximum salt length
//! the modulus allows, hex-encoded for wire/storage transport.
//!
//! Filesystem key management, passphrase prompts, and key *generation* are
//! the external key-management collaborator's job (spec.md §1 Non-goals);
//! this crate only signs/verifies against PEM text already in hand.

use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use rsa::{Pss, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("malformed PEM private key: {0}")]
    PrivateKey(String),
    #[error("malformed PEM public key: {0}")]
    PublicKey(String),
    #[error("signing failed: {0}")]
    Sign(String),
}

/// `sLen = MAX_LENGTH` per RFC 8017: `emLen - hLen - 2`, where `emLen` is
/// the octet length of `ceil((modBits - 1) / 8)`. Matches `cryptography`'s
/// `padding.PSS.MAX_LENGTH` exactly so signatures interoperate bit-for-bit
/// with the Python reference implementation this was distilled from.
fn max_pss_salt_len(public_key: &RsaPublicKey) -> usize {
    use rsa::traits::PublicKeyParts;
    let mod_bits = public_key.n().bits();
    let em_bits = mod_bits - 1;
    let em_len = em_bits.div_ceil(8);
    em_len - Sha256::output_size() - 2
}

fn pss(public_key: &RsaPublicKey) -> Pss {
    Pss::new_with_salt_len::<Sha256>(max_pss_salt_len(public_key))
}

/// Signs `digest_hex` (the page-digest string from `ledgerpdf_core::digest::page_digest`)
/// with `private_key_pem`, returning the hex-encoded RSA-PSS signature.
pub fn sign_digest(digest_hex: &str, private_key_pem: &str) -> Result<String, KeyError> {
    let private_key = RsaPrivateKey::from_pkcs1_pem(private_key_pem)
        .map_err(|e| KeyError::PrivateKey(e.to_string()))?;
    let public_key = RsaPublicKey::from(&private_key);
    let hashed = Sha256::digest(digest_hex.as_bytes());

    let signing_key = rsa::pss::BlindedSigningKey::<Sha256>::new_with_salt_len(
        private_key,
        max_pss_salt_len(&public_key),
    );
    let signature = signing_key
        .sign_prehash(&hashed)
        .map_err(|e| KeyError::Sign(e.to_string()))?;
    Ok(hex::encode(signature.to_vec()))
}

/// Verifies `signature_hex` over `digest_hex` against `public_key_pem`.
/// Returns `false` (never an error) on a mismatched or malformed signature,
/// matching `original_source/signature.py::verify_signature`'s
/// catch-`InvalidSignature`-return-`False` behavior; a malformed PEM public
/// key is still surfaced as an error since that indicates corrupt ledger
/// data rather than an ordinary failed verification.
pub fn verify_digest(
    digest_hex: &str,
    signature_hex: &str,
    public_key_pem: &str,
) -> Result<bool, KeyError> {
    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| KeyError::PublicKey(e.to_string()))?;
    let Ok(signature_bytes) = hex::decode(signature_hex) else {
        return Ok(false);
    };
    let hashed = Sha256::digest(digest_hex.as_bytes());
    let verifying_key = rsa::pss::VerifyingKey::<Sha256>::new_with_salt_len(
        public_key.clone(),
        max_pss_salt_len(&public_key),
    );
    let Ok(signature) = rsa::pss::Signature::try_from(signature_bytes.as_slice()) else {
        return Ok(false);
    };
    Ok(verifying_key.verify_prehash(&hashed, &signature).is_ok())
}

/// Validates that `pem` parses as a SubjectPublicKeyInfo RSA public key,
/// without performing any verification. Used by ledger validation
/// (spec.md §4.C `validate`: "`public_key` parses") to reject malformed
/// key material before attempting signature verification.
pub fn parse_public_key(pem: &str) -> Result<(), KeyError> {
    RsaPublicKey::from_public_key_pem(pem)
        .map(|_| ())
        .map_err(|e| KeyError::PublicKey(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1::EncodeRsaPrivateKey;
    use rsa::pkcs8::EncodePublicKey;

    fn test_keypair() -> (String, String) {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("key generation");
        let public_key = RsaPublicKey::from(&private_key);
        let private_pem = private_key
            .to_pkcs1_pem(rsa::pkcs8::LineEnding::LF)
            .expect("encode private pem")
            .to_string();
        let public_pem = public_key
            .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
            .expect("encode public pem");
        (private_pem, public_pem)
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let (private_pem, public_pem) = test_keypair();
        let digest = "deadbeef";
        let signature = sign_digest(digest, &private_pem).expect("sign");
        assert!(verify_digest(digest, &signature, &public_pem).expect("verify"));
    }

    #[test]
    fn verify_rejects_tampered_digest() {
        let (private_pem, public_pem) = test_keypair();
        let signature = sign_digest("original", &private_pem).expect("sign");
        assert!(!verify_digest("tampered", &signature, &public_pem).expect("verify"));
    }

    #[test]
    fn verify_rejects_foreign_key() {
        let (private_pem, _) = test_keypair();
        let (_, other_public_pem) = test_keypair();
        let digest = "some-digest";
        let signature = sign_digest(digest, &private_pem).expect("sign");
        assert!(!verify_digest(digest, &signature, &other_public_pem).expect("verify"));
    }

    #[test]
    fn parse_public_key_rejects_garbage() {
        assert!(parse_public_key("not a pem").is_err());
    }
}
