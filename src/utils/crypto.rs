use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit, OsRng};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use anyhow::{anyhow, Result};
use rand::Rng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// ID generation
// ---------------------------------------------------------------------------

/// Generate a secure random identifier with a caller-supplied prefix followed
/// by 16 random hex characters.
///
/// Example: `sess_8f3a1b2c4d5e6f70`
pub fn generate_secure_id(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 8] = rng.gen();
    format!("{prefix}{}", hex::encode(bytes))
}

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// Compute the SHA-256 hex digest of the supplied content.
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Derive the stable MT4 magic number for a user:
/// `100000 + (|hash(userId)| mod 900000)`, always in `[100000, 999999]`, so
/// every order this core ever places for that user carries the same tag and
/// independent subsystems can attribute MT4 positions back to it without a
/// bridge-side mapping table.
pub fn magic_number(user_id: &str) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    let digest = hasher.finalize();
    let hash = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    100_000 + (hash % 900_000)
}

// ---------------------------------------------------------------------------
// Credential store encryption (AES-256-GCM)
// ---------------------------------------------------------------------------

/// AES-256-GCM keyed on a 16-byte IV with a detached tag, matching the
/// cross-subsystem envelope contract: `{encrypted, iv, tag}`, all hex. Other
/// subsystems parse this envelope directly, so the field names and IV length
/// are load-bearing, not an implementation detail.
type Cipher = AesGcm<Aes256, aes_gcm::aead::consts::U16>;

#[derive(Debug, Serialize, Deserialize)]
struct CredentialEnvelope {
    encrypted: String,
    iv: String,
    tag: String,
}

/// Encrypts `plaintext` under `key_material` (see [`derive_key`]) and returns
/// the `{encrypted, iv, tag}` envelope as a JSON string.
pub fn encrypt_credential(key_material: &str, plaintext: &str) -> Result<String> {
    let cipher = build_cipher(key_material);

    let mut iv_bytes = [0u8; 16];
    OsRng.fill_bytes(&mut iv_bytes);
    let nonce = GenericArray::from_slice(&iv_bytes);

    let mut buffer = plaintext.as_bytes().to_vec();
    let tag = cipher
        .encrypt_in_place_detached(nonce, b"", &mut buffer)
        .map_err(|e| anyhow!("failed to encrypt credential: {e}"))?;

    let envelope = CredentialEnvelope {
        encrypted: hex::encode(buffer),
        iv: hex::encode(iv_bytes),
        tag: hex::encode(tag),
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Inverse of [`encrypt_credential`].
pub fn decrypt_credential(key_material: &str, envelope_json: &str) -> Result<String> {
    let cipher = build_cipher(key_material);

    let envelope: CredentialEnvelope =
        serde_json::from_str(envelope_json).map_err(|e| anyhow!("invalid credential envelope: {e}"))?;

    let mut buffer = hex::decode(&envelope.encrypted).map_err(|e| anyhow!("invalid ciphertext hex: {e}"))?;
    let iv_bytes = hex::decode(&envelope.iv).map_err(|e| anyhow!("invalid iv hex: {e}"))?;
    if iv_bytes.len() != 16 {
        return Err(anyhow!("iv must be 16 bytes, got {}", iv_bytes.len()));
    }
    let tag_bytes = hex::decode(&envelope.tag).map_err(|e| anyhow!("invalid tag hex: {e}"))?;

    let nonce = GenericArray::from_slice(&iv_bytes);
    let tag = GenericArray::from_slice(&tag_bytes);

    cipher
        .decrypt_in_place_detached(nonce, b"", &mut buffer, tag)
        .map_err(|e| anyhow!("failed to decrypt credential: {e}"))?;

    String::from_utf8(buffer).map_err(|e| anyhow!("decrypted credential is not valid utf-8: {e}"))
}

fn build_cipher(key_material: &str) -> Cipher {
    let key_bytes = derive_key(key_material);
    let key = GenericArray::from_slice(&key_bytes);
    Cipher::new(key)
}

/// `ENCRYPTION_KEY` is accepted as either 64 hex chars (decoded straight to
/// 32 bytes) or an arbitrary passphrase, SHA-256-hashed down to 32 bytes.
fn derive_key(key_material: &str) -> [u8; 32] {
    let looks_like_hex32 = key_material.len() == 64 && key_material.chars().all(|c| c.is_ascii_hexdigit());
    if looks_like_hex32 {
        if let Ok(bytes) = hex::decode(key_material) {
            if bytes.len() == 32 {
                let mut key = [0u8; 32];
                key.copy_from_slice(&bytes);
                return key;
            }
        }
    }

    let mut hasher = Sha256::new();
    hasher.update(key_material.as_bytes());
    let digest = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> String {
        hex::encode([7u8; 32])
    }

    #[test]
    fn secure_id_format() {
        let id = generate_secure_id("sess_");
        assert!(id.starts_with("sess_"));
        assert_eq!(id.len(), 5 + 16); // "sess_" + 16 hex chars
    }

    #[test]
    fn sha256_deterministic() {
        let h1 = hash_content("hello");
        let h2 = hash_content("hello");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64); // 32 bytes hex
    }

    #[test]
    fn magic_number_stable_and_in_range() {
        let a = magic_number("user_1");
        let b = magic_number("user_1");
        let c = magic_number("user_2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!((100_000..=999_999).contains(&a));
        assert!((100_000..=999_999).contains(&c));
    }

    #[test]
    fn credential_roundtrip() {
        let key = test_key();
        let envelope = encrypt_credential(&key, "super-secret-password").unwrap();
        let plain = decrypt_credential(&key, &envelope).unwrap();
        assert_eq!(plain, "super-secret-password");
    }

    #[test]
    fn credential_envelope_has_three_hex_fields_with_16_byte_iv() {
        let key = test_key();
        let envelope = encrypt_credential(&key, "super-secret-password").unwrap();
        let parsed: CredentialEnvelope = serde_json::from_str(&envelope).unwrap();

        assert_eq!(hex::decode(&parsed.iv).unwrap().len(), 16);
        assert!(!parsed.encrypted.is_empty());
        assert!(!parsed.tag.is_empty());
    }

    #[test]
    fn credential_tamper_detected() {
        let key = test_key();
        let envelope = encrypt_credential(&key, "super-secret-password").unwrap();
        let mut parsed: CredentialEnvelope = serde_json::from_str(&envelope).unwrap();

        let mut tag_bytes = hex::decode(&parsed.tag).unwrap();
        tag_bytes[0] ^= 0xFF;
        parsed.tag = hex::encode(tag_bytes);

        let tampered = serde_json::to_string(&parsed).unwrap();
        assert!(decrypt_credential(&key, &tampered).is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let envelope = encrypt_credential(&test_key(), "super-secret-password").unwrap();
        let other_key = hex::encode([9u8; 32]);
        assert!(decrypt_credential(&other_key, &envelope).is_err());
    }

    #[test]
    fn non_hex_passphrase_is_hashed_to_32_bytes_and_roundtrips() {
        let key = "correct horse battery staple";
        let envelope = encrypt_credential(key, "super-secret-password").unwrap();
        let plain = decrypt_credential(key, &envelope).unwrap();
        assert_eq!(plain, "super-secret-password");
    }

    #[test]
    fn hex64_key_decodes_directly_without_hashing() {
        // a 64-char hex string is the literal key material, not hashed again.
        let hex_key = test_key();
        assert_eq!(derive_key(&hex_key), [7u8; 32]);
    }

    #[test]
    fn non_hex_key_is_hashed() {
        let key = derive_key("correct horse battery staple");
        assert_eq!(key.to_vec(), Sha256::digest(b"correct horse battery staple").to_vec());
    }
}
