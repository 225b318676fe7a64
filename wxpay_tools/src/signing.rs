//! The key-value signature codec used on legacy gateway messages and on both notification
//! channels. Fields are sorted by key, concatenated as `k=v` pairs with `&`, the merchant key is
//! appended as `&key=SECRET`, and the digest of the whole string is hex-encoded in upper case.

use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use rand::Rng;
use sha2::Sha256;
use thiserror::Error;

/// The field carrying the signature itself. Always excluded from the signing payload.
pub const SIGN_FIELD: &str = "sign";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Signature mismatch")]
    Mismatch,
    #[error("Unsupported signature type: {0}")]
    UnknownSignType(String),
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),
}

/// The digest algorithms the gateway accepts for key-value signatures. The set is closed: a
/// message naming any other algorithm is rejected outright rather than routed to some dynamic
/// lookup.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SignType {
    #[default]
    Md5,
    HmacSha256,
}

impl Display for SignType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SignType::Md5 => "MD5",
            SignType::HmacSha256 => "HMAC-SHA256",
        };
        write!(f, "{s}")
    }
}

impl FromStr for SignType {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MD5" => Ok(SignType::Md5),
            "HMAC-SHA256" => Ok(SignType::HmacSha256),
            other => Err(SignatureError::UnknownSignType(other.to_string())),
        }
    }
}

/// Calculate the signature over the given fields. The `sign` field itself is skipped; every other
/// field present in the map participates, in key order.
pub fn sign_fields(
    fields: &BTreeMap<String, String>,
    key: &str,
    sign_type: SignType,
) -> Result<String, SignatureError> {
    let mut payload = String::new();
    for (field, value) in fields.iter() {
        if field == SIGN_FIELD {
            continue;
        }
        if !payload.is_empty() {
            payload.push('&');
        }
        payload.push_str(&format!("{field}={value}"));
    }
    payload.push_str(&format!("&key={key}"));
    let signature = match sign_type {
        SignType::Md5 => {
            let mut hasher = Md5::new();
            hasher.update(payload.as_bytes());
            hex::encode_upper(hasher.finalize())
        },
        SignType::HmacSha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
                .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
            mac.update(payload.as_bytes());
            hex::encode_upper(mac.finalize().into_bytes())
        },
    };
    Ok(signature)
}

/// Verify the `sign` field carried in the map against a fresh calculation over the other fields.
/// The digest must match exactly; no case or whitespace normalization is applied.
pub fn verify_fields(
    fields: &BTreeMap<String, String>,
    key: &str,
    sign_type: SignType,
) -> Result<(), SignatureError> {
    let provided = fields.get(SIGN_FIELD).ok_or(SignatureError::Mismatch)?;
    let calculated = sign_fields(fields, key, sign_type)?;
    if calculated == *provided {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// An alphanumeric nonce of the given length, suitable for the `nonce_str` field.
pub fn nonce_str(length: usize) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}
