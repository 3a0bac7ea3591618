//! TOTP and backup codes for super-admin login.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use totp_rs::{Algorithm, Secret, TOTP};

use crate::config;

const ISSUER: &str = "Genba Admin";
const BACKUP_CODE_COUNT: usize = 10;
const NONCE_LEN: usize = 12;
const STEP_SECS: u64 = 30;

#[derive(Debug, Error, PartialEq)]
pub enum TwoFactorError {
    #[error("{0}")]
    InvalidFormat(&'static str),

    #[error("Invalid verification code")]
    InvalidCode,

    #[error("Two-factor authentication is not enabled")]
    NotEnabled,

    #[error("Two-factor secret error: {0}")]
    Crypto(String),
}

/// What the user typed on the 2FA screen.
#[derive(Debug, Clone, PartialEq)]
pub enum SecondFactor {
    Totp(String),
    BackupCode(String),
}

impl SecondFactor {
    /// Classify a submitted code: `123456` is TOTP, `ABCD-1234` a backup code.
    pub fn parse(raw: &str) -> Result<Self, TwoFactorError> {
        let code = raw.trim();
        if code.contains('-') {
            let upper = code.to_ascii_uppercase();
            if is_backup_code_format(&upper) {
                return Ok(SecondFactor::BackupCode(upper));
            }
            return Err(TwoFactorError::InvalidFormat(
                "Backup code must look like XXXX-XXXX",
            ));
        }
        if code.len() == 6 && code.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(SecondFactor::Totp(code.to_string()));
        }
        Err(TwoFactorError::InvalidFormat("Code must be 6 digits"))
    }
}

fn is_backup_code_format(code: &str) -> bool {
    let bytes = code.as_bytes();
    bytes.len() == 9
        && bytes[4] == b'-'
        && bytes
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != 4)
            .all(|(_, b)| b.is_ascii_digit() || (b'A'..=b'F').contains(b))
}

/// New random base32 secret.
pub fn generate_secret() -> String {
    Secret::generate_secret().to_encoded().to_string()
}

fn totp_for(secret_b32: &str) -> Result<TOTP, TwoFactorError> {
    let bytes = Secret::Encoded(secret_b32.to_string())
        .to_bytes()
        .map_err(|e| TwoFactorError::Crypto(format!("{:?}", e)))?;
    TOTP::new(Algorithm::SHA1, 6, 1, STEP_SECS, bytes).map_err(|e| TwoFactorError::Crypto(e.to_string()))
}

/// Check a 6-digit code against the current step, allowing one step of skew,
/// and return the time step it matched.
pub fn verify_totp(secret_b32: &str, code: &str) -> Result<i64, TwoFactorError> {
    verify_totp_at(secret_b32, code, chrono::Utc::now().timestamp().max(0) as u64)
}

pub fn verify_totp_at(secret_b32: &str, code: &str, unix_secs: u64) -> Result<i64, TwoFactorError> {
    let totp = totp_for(secret_b32)?;
    let step = unix_secs / STEP_SECS;
    [step, step.saturating_sub(1), step + 1]
        .into_iter()
        .find(|candidate| {
            let expected = totp.generate(candidate * STEP_SECS);
            expected.len() == code.len() && bool::from(expected.as_bytes().ct_eq(code.as_bytes()))
        })
        .map(|matched| matched as i64)
        .ok_or(TwoFactorError::InvalidCode)
}

/// A code is accepted once: its step must be later than the last one used.
pub fn step_is_fresh(last_used: Option<i64>, step: i64) -> bool {
    last_used.map_or(true, |last| step > last)
}

pub fn current_code(secret_b32: &str) -> Result<String, TwoFactorError> {
    totp_for(secret_b32)?
        .generate_current()
        .map_err(|e| TwoFactorError::Crypto(e.to_string()))
}

/// Provisioning URI for authenticator apps.
pub fn otpauth_url(secret_b32: &str, account: &str) -> String {
    let label: String = url::form_urlencoded::byte_serialize(format!("{}:{}", ISSUER, account).as_bytes()).collect();
    let issuer: String = url::form_urlencoded::byte_serialize(ISSUER.as_bytes()).collect();
    format!(
        "otpauth://totp/{}?secret={}&issuer={}&algorithm=SHA1&digits=6&period=30",
        label, secret_b32, issuer
    )
}

/// Fresh set of `XXXX-XXXX` backup codes, shown to the user once.
pub fn generate_backup_codes() -> Vec<String> {
    let mut rng = rand::thread_rng();
    (0..BACKUP_CODE_COUNT)
        .map(|_| {
            let n: u32 = rng.gen();
            let hex = format!("{:08X}", n);
            format!("{}-{}", &hex[..4], &hex[4..])
        })
        .collect()
}

/// Stored form of a backup code.
pub fn hash_backup_code(code: &str) -> String {
    hex::encode(Sha256::digest(code.trim().to_ascii_uppercase().as_bytes()))
}

/// Index of the stored hash matching `code`, if any.
pub fn find_backup_code(code: &str, hashes: &[String]) -> Option<usize> {
    let hashed = hash_backup_code(code);
    hashes.iter().position(|h| *h == hashed)
}

fn cipher() -> Aes256Gcm {
    let key_material = Sha256::digest(config::config().security.two_factor_encryption_key.as_bytes());
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_material))
}

/// Encrypt a TOTP secret for storage: base64(nonce || ciphertext).
pub fn encrypt_secret(secret_b32: &str) -> Result<String, TwoFactorError> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher()
        .encrypt(&nonce, secret_b32.as_bytes())
        .map_err(|e| TwoFactorError::Crypto(e.to_string()))?;
    let mut blob = nonce.to_vec();
    blob.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(blob))
}

pub fn decrypt_secret(stored: &str) -> Result<String, TwoFactorError> {
    let blob = STANDARD
        .decode(stored)
        .map_err(|e| TwoFactorError::Crypto(e.to_string()))?;
    if blob.len() <= NONCE_LEN {
        return Err(TwoFactorError::Crypto("stored secret too short".to_string()));
    }
    let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
    let plaintext = cipher()
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| TwoFactorError::Crypto(e.to_string()))?;
    String::from_utf8(plaintext).map_err(|e| TwoFactorError::Crypto(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_codes() {
        assert_eq!(SecondFactor::parse("123456").unwrap(), SecondFactor::Totp("123456".into()));
        assert_eq!(
            SecondFactor::parse(" ab12-CD34 ").unwrap(),
            SecondFactor::BackupCode("AB12-CD34".into())
        );
        assert!(SecondFactor::parse("12345").is_err());
        assert!(SecondFactor::parse("12a456").is_err());
        assert!(SecondFactor::parse("GHIJ-1234").is_err());
    }

    #[test]
    fn current_code_verifies() {
        let secret = generate_secret();
        let code = current_code(&secret).unwrap();
        assert!(verify_totp(&secret, &code).is_ok());
    }

    #[test]
    fn code_reports_its_step_within_skew() {
        let secret = generate_secret();
        let totp = totp_for(&secret).unwrap();
        let now = 1_700_000_010;
        let step = (now / STEP_SECS) as i64;

        assert_eq!(verify_totp_at(&secret, &totp.generate(now), now), Ok(step));
        assert_eq!(verify_totp_at(&secret, &totp.generate(now - STEP_SECS), now), Ok(step - 1));
        assert_eq!(
            verify_totp_at(&secret, &totp.generate(now - 5 * STEP_SECS), now),
            Err(TwoFactorError::InvalidCode)
        );
    }

    #[test]
    fn a_step_is_only_accepted_once() {
        assert!(step_is_fresh(None, 100));
        assert!(step_is_fresh(Some(99), 100));
        assert!(!step_is_fresh(Some(100), 100));
        assert!(!step_is_fresh(Some(101), 100));
    }

    #[test]
    fn wrong_code_is_rejected() {
        let secret = generate_secret();
        assert_eq!(verify_totp(&secret, "1234567"), Err(TwoFactorError::InvalidCode));
    }

    #[test]
    fn backup_codes_match_their_hashes_once_generated() {
        let codes = generate_backup_codes();
        assert_eq!(codes.len(), 10);
        assert!(codes.iter().all(|c| is_backup_code_format(c)));

        let hashes: Vec<String> = codes.iter().map(|c| hash_backup_code(c)).collect();
        assert_eq!(find_backup_code(&codes[3].to_lowercase(), &hashes), Some(3));
        assert_eq!(find_backup_code("0000-0000", &hashes[..0]), None);
    }

    #[test]
    fn secret_encryption_round_trips() {
        let secret = generate_secret();
        let stored = encrypt_secret(&secret).unwrap();
        assert_ne!(stored, secret);
        assert_eq!(decrypt_secret(&stored).unwrap(), secret);
        assert!(decrypt_secret("AAAA").is_err());
    }

    #[test]
    fn otpauth_url_names_issuer() {
        let url = otpauth_url("JBSWY3DPEHPK3PXP", "ops@example.com");
        assert!(url.starts_with("otpauth://totp/Genba+Admin%3Aops%40example.com?secret=JBSWY3DPEHPK3PXP"));
    }
}
