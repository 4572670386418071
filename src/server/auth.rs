//! Bearer-token validation for the HTTP and WebSocket surfaces.
//!
//! Token issuance (login, password handling) lives in the CRUD service;
//! this side only verifies what it is handed. WebSocket clients pass the
//! token as a query parameter since browsers cannot set headers on the
//! upgrade request.

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    Json, RequestPartsExt,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::server::AppState;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: i64,
    pub username: String,
    pub role: String,
    pub exp: usize,
}

#[derive(Debug, Serialize)]
pub struct AuthError {
    pub message: String,
}

/// Validate a JWT and extract its claims.
pub fn validate_token(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

/// JWT auth extractor - pulls Claims out of the Authorization header.
impl FromRequestParts<Arc<AppState>> for Claims {
    type Rejection = (StatusCode, Json<AuthError>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(AuthError {
                        message: "Missing authorization header".to_string(),
                    }),
                )
            })?;

        let claims = validate_token(bearer.token(), &state.jwt_secret).map_err(|_| {
            (
                StatusCode::UNAUTHORIZED,
                Json(AuthError {
                    message: "Invalid token".to_string(),
                }),
            )
        })?;

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token_for(secret: &str, exp: usize) -> String {
        let claims = Claims {
            sub: 1,
            username: "admin".to_string(),
            role: "admin".to_string(),
            exp,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_round_trip_validation() {
        let exp = (chrono::Utc::now().timestamp() + 3600) as usize;
        let token = token_for("secret", exp);

        let claims = validate_token(&token, "secret").unwrap();
        assert_eq!(claims.username, "admin");
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let exp = (chrono::Utc::now().timestamp() + 3600) as usize;
        let token = token_for("secret", exp);

        assert!(validate_token(&token, "other").is_err());
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let exp = (chrono::Utc::now().timestamp() - 3600) as usize;
        let token = token_for("secret", exp);

        assert!(validate_token(&token, "secret").is_err());
    }
}
