//! Double-submit CSRF tokens.
//!
//! A token is `nonce.mac` where `mac = HMAC-SHA256(csrf_secret, nonce)`. The
//! same token is set as a script-readable cookie and must be echoed back in
//! the `x-csrf-token` header on every mutating request.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::config;

pub const CSRF_COOKIE: &str = "csrf_token";
pub const CSRF_HEADER: &str = "x-csrf-token";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq)]
pub enum CsrfError {
    #[error("CSRF token missing")]
    Missing,

    #[error("CSRF token mismatch")]
    Mismatch,

    #[error("CSRF token invalid")]
    Invalid,
}

fn mac_for(secret: &[u8], nonce: &str) -> Result<HmacSha256, CsrfError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| CsrfError::Invalid)?;
    mac.update(nonce.as_bytes());
    Ok(mac)
}

pub fn generate_token() -> Result<String, CsrfError> {
    generate_with_secret(config::config().security.csrf_secret.as_bytes())
}

fn generate_with_secret(secret: &[u8]) -> Result<String, CsrfError> {
    let mut nonce = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut nonce);
    let nonce = URL_SAFE_NO_PAD.encode(nonce);
    let tag = mac_for(secret, &nonce)?.finalize().into_bytes();
    Ok(format!("{}.{}", nonce, URL_SAFE_NO_PAD.encode(tag)))
}

/// Check the cookie/header pair of a mutating request.
pub fn verify(cookie: Option<&str>, header: Option<&str>) -> Result<(), CsrfError> {
    verify_with_secret(config::config().security.csrf_secret.as_bytes(), cookie, header)
}

fn verify_with_secret(secret: &[u8], cookie: Option<&str>, header: Option<&str>) -> Result<(), CsrfError> {
    let (cookie, header) = match (cookie, header) {
        (Some(c), Some(h)) if !c.is_empty() && !h.is_empty() => (c, h),
        _ => return Err(CsrfError::Missing),
    };

    if cookie.len() != header.len() || !bool::from(cookie.as_bytes().ct_eq(header.as_bytes())) {
        return Err(CsrfError::Mismatch);
    }

    let (nonce, tag) = header.split_once('.').ok_or(CsrfError::Invalid)?;
    let tag = URL_SAFE_NO_PAD.decode(tag).map_err(|_| CsrfError::Invalid)?;
    mac_for(secret, nonce)?
        .verify_slice(&tag)
        .map_err(|_| CsrfError::Invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-csrf-secret";

    #[test]
    fn matching_pair_verifies() {
        let token = generate_with_secret(SECRET).unwrap();
        assert_eq!(verify_with_secret(SECRET, Some(&token), Some(&token)), Ok(()));
    }

    #[test]
    fn missing_header_is_rejected() {
        let token = generate_with_secret(SECRET).unwrap();
        assert_eq!(verify_with_secret(SECRET, Some(&token), None), Err(CsrfError::Missing));
        assert_eq!(verify_with_secret(SECRET, None, Some(&token)), Err(CsrfError::Missing));
    }

    #[test]
    fn different_tokens_mismatch() {
        let a = generate_with_secret(SECRET).unwrap();
        let b = generate_with_secret(SECRET).unwrap();
        assert_eq!(verify_with_secret(SECRET, Some(&a), Some(&b)), Err(CsrfError::Mismatch));
    }

    #[test]
    fn forged_pair_fails_mac() {
        let forged = "attacker-nonce.AAAA";
        assert_eq!(verify_with_secret(SECRET, Some(forged), Some(forged)), Err(CsrfError::Invalid));

        let other_secret = generate_with_secret(b"another-secret").unwrap();
        assert_eq!(
            verify_with_secret(SECRET, Some(&other_secret), Some(&other_secret)),
            Err(CsrfError::Invalid)
        );
    }
}
