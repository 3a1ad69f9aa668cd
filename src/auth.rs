/// Authentication extractors and utilities
///
/// Identity comes from an HS256 bearer token minted by the external auth
/// layer. The desk never creates accounts; it only checks the signature and
/// reads `sub` and `role`.
use crate::{context::AppContext, error::DeskError, roles::Role};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by an access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: i64,
}

/// Authenticated caller
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub role: Role,
}

#[async_trait]
impl FromRequestParts<AppContext> for AuthContext {
    type Rejection = DeskError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers)
            .ok_or_else(|| DeskError::Authentication("Missing authorization header".to_string()))?;

        let claims = verify_jwt_token(&token, &state.config.authentication.jwt_secret)?;

        if claims.sub.trim().is_empty() {
            return Err(DeskError::Authentication(
                "Invalid token: empty 'sub' claim".to_string(),
            ));
        }
        let role = Role::from_str(&claims.role).map_err(|_| {
            tracing::warn!("Token for {} carries unknown role {}", claims.sub, claims.role);
            DeskError::Authentication(format!("Unknown role: {}", claims.role))
        })?;

        tracing::debug!("Authenticated {} as {}", claims.sub, role.as_str());

        Ok(AuthContext {
            user_id: claims.sub,
            role,
        })
    }
}

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Verify a JWT token with full validation
///
/// This performs:
/// 1. JWT signature verification
/// 2. Expiration checking
/// 3. Claims validation
pub fn verify_jwt_token(token: &str, jwt_secret: &str) -> Result<Claims, DeskError> {
    let decoding_key = DecodingKey::from_secret(jwt_secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    // Allow some clock skew (5 minutes)
    validation.leeway = 300;
    validation.set_required_spec_claims(&["exp", "sub"]);

    decode::<Claims>(token, &decoding_key, &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::warn!("JWT verification failed: {}", e);
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    DeskError::Authentication("Token has expired".to_string())
                }
                jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                    DeskError::Authentication("Invalid token signature".to_string())
                }
                _ => DeskError::Authentication(format!("Invalid token: {}", e)),
            }
        })
}

/// Sign a token the way the auth layer does; used by tests and local tooling
pub fn issue_token(jwt_secret: &str, user_id: &str, role: Role, ttl: Duration) -> Result<String, DeskError> {
    let claims = Claims {
        sub: user_id.to_string(),
        role: role.as_str().to_string(),
        exp: (Utc::now() + ttl).timestamp(),
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .map_err(|e| DeskError::Internal(format!("Failed to sign token: {}", e)))
}
