//! Authentication middleware for JWT token validation
//!
//! Tokens are issued by the external authentication service. The API only
//! verifies them: RS256 with `JWT_PUBLIC_KEY` when set, otherwise HS256 with
//! `JWT_SECRET`.

use axum::{
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::env;
use tracing::{error, warn};

use crate::{error::ApiError, state::AppState};

/// Roles allowed to manage class blocks, maintenance and the bitácora
const STAFF_ROLES: [&str; 2] = ["staff", "admin"];

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// RUT of the authenticated person
    pub sub: String,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Issued at time
    pub iat: u64,
    /// Expiration time
    pub exp: u64,
}

/// Authenticated user information
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub rut: String,
    pub roles: Vec<String>,
}

impl AuthUser {
    pub fn is_staff(&self) -> bool {
        self.roles
            .iter()
            .any(|role| STAFF_ROLES.contains(&role.as_str()))
    }

    /// Owners manage their own records; staff manage everyone's
    pub fn can_manage(&self, subject_id: &str) -> bool {
        self.is_staff() || self.rut == subject_id
    }
}

/// Key material used to verify bearer tokens
#[derive(Clone)]
pub struct JwtKeys {
    decoding_key: DecodingKey,
    algorithm: Algorithm,
}

impl JwtKeys {
    /// Load verification keys from the environment
    ///
    /// `JWT_PUBLIC_KEY` may hold a PEM document or a path to one.
    pub fn from_env() -> Result<Self, String> {
        if let Ok(public_key) = env::var("JWT_PUBLIC_KEY") {
            let pem = if public_key.starts_with("-----BEGIN") {
                public_key
            } else {
                std::fs::read_to_string(&public_key)
                    .map_err(|e| format!("Failed to read public key file: {}", e))?
                    .trim()
                    .to_string()
            };
            return Self::rs256(&pem);
        }

        let secret = env::var("JWT_SECRET")
            .map_err(|_| "Neither JWT_PUBLIC_KEY nor JWT_SECRET is set".to_string())?;
        Ok(Self::hs256(secret.as_bytes()))
    }

    pub fn rs256(pem: &str) -> Result<Self, String> {
        let decoding_key = DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| format!("Invalid RSA public key: {}", e))?;
        Ok(Self {
            decoding_key,
            algorithm: Algorithm::RS256,
        })
    }

    pub fn hs256(secret: &[u8]) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            algorithm: Algorithm::HS256,
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = true;

        jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
    }
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let claims = state.jwt.verify(token).map_err(|e| {
        warn!("Rejected bearer token: {}", e);
        ApiError::Unauthorized
    })?;

    if claims.sub.trim().is_empty() {
        error!("Token without subject accepted by signature check");
        return Err(ApiError::Unauthorized);
    }

    req.extensions_mut().insert(AuthUser {
        rut: claims.sub,
        roles: claims.roles,
    });

    Ok(next.run(req).await)
}

/// Restrict a route to staff; must run after [`auth_middleware`]
pub async fn staff_only(req: Request<axum::body::Body>, next: Next) -> Result<Response, ApiError> {
    let user = req
        .extensions()
        .get::<AuthUser>()
        .ok_or(ApiError::Unauthorized)?;

    if !user.is_staff() {
        return Err(ApiError::Forbidden(format!(
            "{} is not a staff member",
            user.rut
        )));
    }

    Ok(next.run(req).await)
}
