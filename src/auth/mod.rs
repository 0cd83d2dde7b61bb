/*!
 * # Authentication
 *
 * Bearer-token authentication for the storefront API. Tokens are HS256 JWTs
 * signed with `jwt_secret`; the `sub` claim is the user's UUID. Handlers take
 * an [`AuthUser`] argument to require a valid token.
 */

use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::errors::ServiceError;

/// Claim structure for JWT tokens
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Subject (user ID)
    pub iat: i64,
    pub exp: i64,
}

/// Signing and verification keys derived from the shared secret.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: Arc<EncodingKey>,
    decoding: Arc<DecodingKey>,
}

impl JwtKeys {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            encoding: Arc::new(EncodingKey::from_secret(secret.as_bytes())),
            decoding: Arc::new(DecodingKey::from_secret(secret.as_bytes())),
        }
    }

    /// Issues a token for `user_id` valid for `ttl`.
    pub fn issue(&self, user_id: Uuid, ttl: Duration) -> Result<String, ServiceError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| ServiceError::InternalError(format!("failed to sign token: {}", e)))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, ServiceError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map_err(|e| {
                debug!(error = %e, "token rejected");
                ServiceError::Unauthorized("Invalid or expired token".to_string())
            })?;
        Ok(data.claims)
    }
}

/// Authenticated user data extracted from the bearer token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    JwtKeys: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ServiceError::Unauthorized("Missing bearer token".to_string()))?;

        let claims = keys.verify(token)?;
        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| ServiceError::Unauthorized("Invalid token subject".to_string()))?;

        Ok(AuthUser { user_id })
    }
}
