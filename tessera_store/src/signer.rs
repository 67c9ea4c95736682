use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ring::hmac;
use tessera_tokens::{decode_claims, AccessClaims, AccessToken, AccessTokenRef, DecodeError};
use thiserror::Error;

/// A failure to sign or verify an access token
#[derive(Debug, Error)]
pub enum SignError {
    /// The claims could not be serialized
    #[error("unable to serialize claims")]
    Serialize(#[from] serde_json::Error),
    /// The token is not three base64url segments
    #[error("token is malformed")]
    Malformed,
    /// The signature does not match the header and payload
    #[error("token signature is invalid")]
    BadSignature,
    /// The signature is valid but the payload is not a claim set
    #[error("token payload is invalid")]
    Payload(#[from] DecodeError),
}

/// Mints and verifies access tokens
pub trait TokenSigner: Send + Sync {
    /// Signs `claims` into a compact token
    fn sign(&self, claims: &AccessClaims) -> Result<AccessToken, SignError>;

    /// Checks the signature of `token` and returns its claims
    ///
    /// Expiry is not checked here; compare the returned `exp` against the
    /// current time.
    fn verify(&self, token: &AccessTokenRef) -> Result<AccessClaims, SignError>;
}

const HS256_HEADER: &[u8] = br#"{"alg":"HS256","typ":"JWT"}"#;

/// Signs compact JWTs with HMAC-SHA256
pub struct Hs256Signer {
    key: hmac::Key,
    header: String,
}

impl fmt::Debug for Hs256Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hs256Signer").finish_non_exhaustive()
    }
}

impl Hs256Signer {
    /// Constructs a signer with a shared secret
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
            header: URL_SAFE_NO_PAD.encode(HS256_HEADER),
        }
    }
}

impl TokenSigner for Hs256Signer {
    fn sign(&self, claims: &AccessClaims) -> Result<AccessToken, SignError> {
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
        let signing_input = format!("{}.{}", self.header, payload);
        let tag = hmac::sign(&self.key, signing_input.as_bytes());

        Ok(AccessToken::new(format!(
            "{}.{}",
            signing_input,
            URL_SAFE_NO_PAD.encode(tag.as_ref())
        )))
    }

    fn verify(&self, token: &AccessTokenRef) -> Result<AccessClaims, SignError> {
        let (signing_input, signature) = token
            .as_str()
            .rsplit_once('.')
            .ok_or(SignError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| SignError::Malformed)?;

        hmac::verify(&self.key, signing_input.as_bytes(), &signature)
            .map_err(|_| SignError::BadSignature)?;

        Ok(decode_claims(token.as_str())?)
    }
}
