//! JWT issuance and verification for the `/suggestions` and `/user` routes.
//!
//! HS256 only: the ingress gateway never delegates to a JWKS endpoint the
//! way a multi-tenant MCP server might, since every caller here shares one
//! signing secret from `Config::jwt_secret`.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

pub const AUDIENCE: &str = "authenticated";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub exp: i64,
    pub aud: String,
}

impl Claims {
    #[must_use]
    pub fn new(sub: impl Into<String>, email: impl Into<String>, exp: i64) -> Self {
        Self { sub: sub.into(), email: email.into(), exp, aud: AUDIENCE.to_string() }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing or malformed Authorization header")]
    MissingBearer,
    #[error("invalid or expired token")]
    InvalidToken,
}

/// Mint a signed token. Used by tests and by any internal service-to-service
/// call that needs to act as a user.
pub fn issue(secret: &str, claims: &Claims) -> Result<String, AuthError> {
    encode(&Header::new(Algorithm::HS256), claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|_| AuthError::InvalidToken)
}

fn validation() -> Validation {
    let mut v = Validation::new(Algorithm::HS256);
    v.set_audience(&[AUDIENCE]);
    v.set_required_spec_claims(&["sub", "exp", "aud"]);
    v
}

/// Verify a bearer token and return its claims. Expired or malformed tokens,
/// or tokens for the wrong audience, are all `InvalidToken` — callers only
/// need to distinguish "no token supplied" from "token rejected" for the 401
/// response body.
pub fn verify(secret: &str, token: &str) -> Result<Claims, AuthError> {
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation())
        .map(|data| data.claims)
        .map_err(|_| AuthError::InvalidToken)
}

/// Extract the bearer token from an `Authorization` header value.
pub fn parse_bearer(header_value: Option<&str>) -> Result<&str, AuthError> {
    let raw = header_value.ok_or(AuthError::MissingBearer)?.trim();
    let token = raw.strip_prefix("Bearer ").map(str::trim).ok_or(AuthError::MissingBearer)?;
    if token.is_empty() {
        return Err(AuthError::MissingBearer);
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-value-long-enough";

    #[test]
    fn round_trips_a_valid_token() {
        let claims = Claims::new("user-1", "a@example.com", i64::MAX / 2);
        let token = issue(SECRET, &claims).unwrap();
        let decoded = verify(SECRET, &token).unwrap();
        assert_eq!(decoded.sub, "user-1");
        assert_eq!(decoded.email, "a@example.com");
        assert_eq!(decoded.aud, AUDIENCE);
    }

    #[test]
    fn rejects_expired_token() {
        let claims = Claims::new("user-1", "a@example.com", 1);
        let token = issue(SECRET, &claims).unwrap();
        assert!(verify(SECRET, &token).is_err());
    }

    #[test]
    fn rejects_wrong_secret() {
        let claims = Claims::new("user-1", "a@example.com", i64::MAX / 2);
        let token = issue(SECRET, &claims).unwrap();
        assert!(verify("different-secret-value", &token).is_err());
    }

    #[test]
    fn parse_bearer_requires_prefix_and_nonempty_token() {
        assert!(parse_bearer(None).is_err());
        assert!(parse_bearer(Some("Token abc")).is_err());
        assert!(parse_bearer(Some("Bearer   ")).is_err());
        assert_eq!(parse_bearer(Some("Bearer abc.def.ghi")).unwrap(), "abc.def.ghi");
    }
}
