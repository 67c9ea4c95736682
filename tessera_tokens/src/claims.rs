//! Access token claims and unverified payload decoding

use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize};
use tessera_clock::UnixTime;
use thiserror::Error;

/// Claims carried by an access token
///
/// The signing side fills in every field; the client side only ever reads
/// `exp`, and only to schedule refreshes. Authorization decisions based on
/// these claims must happen after the signature has been verified.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// The user the token was issued to
    pub sub: String,
    /// When the token was issued
    #[serde(deserialize_with = "numeric_date")]
    pub iat: UnixTime,
    /// When the token stops being accepted
    #[serde(deserialize_with = "numeric_date")]
    pub exp: UnixTime,
    /// Roles granted to the subject
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    /// Fine-grained permissions granted to the subject
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
}

/// A reason why a token's payload could not be read
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The token does not consist of three dot-separated segments
    #[error("token does not have three segments")]
    Malformed,
    /// The payload segment is not valid base64url
    #[error("token payload is not valid base64url")]
    Base64(#[from] base64::DecodeError),
    /// The payload is not a JSON object of the expected shape
    #[error("token payload is not valid JSON")]
    Json(#[from] serde_json::Error),
    /// The payload has no `exp` claim
    #[error("token payload has no expiry")]
    MissingExpiry,
}

#[derive(Deserialize)]
struct ExpiryOnly {
    exp: Option<NumericDate>,
}

/// A JWT `NumericDate`, which may carry fractional seconds
///
/// Fractions are truncated toward the past.
struct NumericDate(UnixTime);

impl<'de> Deserialize<'de> for NumericDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("NumericDate out of range"));
        }
        Ok(Self(UnixTime(secs.floor() as u64)))
    }
}

fn numeric_date<'de, D: Deserializer<'de>>(deserializer: D) -> Result<UnixTime, D::Error> {
    NumericDate::deserialize(deserializer).map(|d| d.0)
}

/// Decodes the full claim set from a token without verifying its signature
pub fn decode_claims(token: &str) -> Result<AccessClaims, DecodeError> {
    let payload = payload_bytes(token)?;
    Ok(serde_json::from_slice(&payload)?)
}

/// Reads only the `exp` claim from a token without verifying its signature
pub fn decode_expiry(token: &str) -> Result<UnixTime, DecodeError> {
    let payload = payload_bytes(token)?;
    let claims: ExpiryOnly = serde_json::from_slice(&payload)?;
    claims.exp.map(|d| d.0).ok_or(DecodeError::MissingExpiry)
}

fn payload_bytes(token: &str) -> Result<Vec<u8>, DecodeError> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return Err(DecodeError::Malformed),
    };

    // Restore padding and the standard alphabet so that tokens produced by
    // issuers that pad (or do not) decode the same way.
    let mut standard: String = payload
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            c => c,
        })
        .collect();
    while standard.len() % 4 != 0 {
        standard.push('=');
    }

    Ok(base64::engine::general_purpose::STANDARD.decode(standard)?)
}
