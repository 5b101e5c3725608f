//! Bearer-token authentication.
//!
//! Tokens are HS256 JWTs carrying `{userId, exp, iat}`. Handlers take an
//! [`AuthUser`] argument to require a valid token:
//!
//! ```ignore
//! async fn get_cart(State(state): State<AppState>, user: AuthUser) -> WebResult<Json<CartView>> {
//!     Ok(Json(state.carts.get(&user.id).await?))
//! }
//! ```

use crate::types::UserId;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storefront_web::AppError;
use thiserror::Error;

/// Token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Authenticated user
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Expiry (unix seconds)
    pub exp: i64,
    /// Issued at (unix seconds)
    pub iat: i64,
}

/// Authentication failures.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No bearer token on the request
    #[error("Access token required")]
    MissingToken,

    /// Bad signature, malformed, or expired
    #[error("Invalid or expired token")]
    InvalidToken(#[source] jsonwebtoken::errors::Error),
}

impl From<AuthError> for AppError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::MissingToken => Self::unauthorized(error.to_string()),
            AuthError::InvalidToken(_) => Self::forbidden(error.to_string()),
        }
    }
}

/// HS256 signing and verification keys derived from one shared secret.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtKeys")
            .field("algorithm", &Algorithm::HS256)
            .finish_non_exhaustive()
    }
}

impl JwtKeys {
    /// Builds keys from the shared secret
    #[must_use]
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Issues a token for `user`, valid for `ttl` from `now`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] if encoding fails.
    pub fn issue(
        &self,
        user: &UserId,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<String, AuthError> {
        let claims = Claims {
            user_id: user.as_str().to_string(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(AuthError::InvalidToken)
    }

    /// Verifies a token and returns its claims.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] for a bad signature, a malformed
    /// token, or an expired one.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(AuthError::InvalidToken)
    }
}

/// `Authorization: Bearer <token>` → the token part
fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(' ').nth(1))
        .filter(|token| !token.is_empty())
}

/// The caller of an authenticated endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    /// User id from the token
    pub id: UserId,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    Arc<JwtKeys>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(AuthError::MissingToken)?;
        let keys = Arc::<JwtKeys>::from_ref(state);
        let claims = keys.verify(token).inspect_err(|error| {
            tracing::debug!(%error, "Rejected bearer token");
        })?;

        Ok(Self {
            id: UserId::new(claims.user_id),
        })
    }
}
