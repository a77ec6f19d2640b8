//! Authentication and authorization utilities
//!
//! Provides:
//! - JWT validation for bearer tokens issued by the auth provider (HS256, `sub` = user id)
//! - Token generation for tests and local tooling
//! - The `AuthUser` extractor and the body-`userId` ownership check

use crate::errors::{AppError, Result};
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Authenticated caller, extracted from `Authorization: Bearer <jwt>`
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// User ID (token subject)
    pub user_id: Uuid,

    /// Email claim, when the provider includes one
    pub email: Option<String>,
}

impl AuthUser {
    /// Reject a request whose body names a different user than the token
    pub fn ensure_matches(&self, claimed: Uuid) -> Result<()> {
        if claimed == self.user_id {
            Ok(())
        } else {
            Err(AppError::Forbidden {
                message: "User ID mismatch".to_string(),
            })
        }
    }
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID)
    pub sub: String,

    /// Audience
    pub aud: String,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// JWT token manager
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    audience: String,
    expiration_secs: i64,
}

impl JwtManager {
    /// Create a new JWT manager with the given secret
    pub fn new(secret: &str, audience: &str, expiration_secs: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            audience: audience.to_string(),
            expiration_secs: expiration_secs as i64,
        }
    }

    /// Generate a new JWT token
    pub fn generate_token(&self, user_id: Uuid, email: Option<&str>) -> Result<String> {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.expiration_secs);

        let claims = JwtClaims {
            sub: user_id.to_string(),
            aud: self.audience.clone(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            email: email.map(String::from),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key).map_err(|e| {
            AppError::Internal {
                message: format!("Failed to generate token: {}", e),
            }
        })
    }

    /// Validate and decode a JWT token
    pub fn validate_token(&self, token: &str) -> Result<JwtClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[self.audience.as_str()]);

        decode::<JwtClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AppError::ExpiredToken,
                _ => AppError::InvalidToken,
            })
    }

    /// Validate a token and turn its claims into an `AuthUser`
    pub fn authenticate(&self, token: &str) -> Result<AuthUser> {
        let claims = self.validate_token(token)?;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AppError::InvalidToken)?;
        Ok(AuthUser {
            user_id,
            email: claims.email,
        })
    }
}

/// Extract the token from an Authorization header value
pub fn extract_bearer(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Axum extractor for AuthUser
impl<S> FromRequestParts<S> for AuthUser
where
    Arc<JwtManager>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(user.clone());
        }

        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing Authorization header".to_string(),
            })?;

        let token = extract_bearer(auth_header).ok_or_else(|| AppError::Unauthorized {
            message: "Expected a bearer token".to_string(),
        })?;

        let jwt = Arc::<JwtManager>::from_ref(state);
        let user = jwt.authenticate(token)?;

        tracing::Span::current().record("user_id", tracing::field::display(user.user_id));
        parts.extensions.insert(user.clone());
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer("Bearer abc.def"), Some("abc.def"));
        assert_eq!(extract_bearer("Bearer "), None);
        assert_eq!(extract_bearer("abc.def"), None);
        assert_eq!(extract_bearer("Basic abc"), None);
    }

    #[test]
    fn test_jwt_roundtrip() {
        let manager = JwtManager::new("test_secret", "authenticated", 3600);
        let user_id = Uuid::new_v4();

        let token = manager
            .generate_token(user_id, Some("ada@example.com"))
            .unwrap();
        let user = manager.authenticate(&token).unwrap();

        assert_eq!(user.user_id, user_id);
        assert_eq!(user.email.as_deref(), Some("ada@example.com"));
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let issuer = JwtManager::new("secret-a", "authenticated", 3600);
        let verifier = JwtManager::new("secret-b", "authenticated", 3600);

        let token = issuer.generate_token(Uuid::new_v4(), None).unwrap();
        assert!(matches!(
            verifier.validate_token(&token),
            Err(AppError::InvalidToken)
        ));
    }

    #[test]
    fn test_wrong_audience_is_rejected() {
        let issuer = JwtManager::new("secret", "anon", 3600);
        let verifier = JwtManager::new("secret", "authenticated", 3600);

        let token = issuer.generate_token(Uuid::new_v4(), None).unwrap();
        assert!(verifier.validate_token(&token).is_err());
    }

    #[test]
    fn test_ensure_matches() {
        let user = AuthUser {
            user_id: Uuid::new_v4(),
            email: None,
        };
        assert!(user.ensure_matches(user.user_id).is_ok());
        assert!(matches!(
            user.ensure_matches(Uuid::new_v4()),
            Err(AppError::Forbidden { .. })
        ));
    }
}
