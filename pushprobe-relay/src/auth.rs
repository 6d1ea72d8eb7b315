//! Bearer JWT auth middleware for the relay server.

use crate::error::RelayError;
use crate::server::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use pushprobe_core::SecretProvider;
use serde::Deserialize;

/// Authenticated caller, available to handlers as a request extension.
#[derive(Debug, Clone)]
pub struct Principal {
    pub subject: String,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
}

/// Verifies HS256 bearer tokens against a shared signing secret.
///
/// Without a secret every authenticated route answers 401.
#[derive(Clone)]
pub struct Authenticator {
    key: Option<DecodingKey>,
    validation: Validation,
}

impl Authenticator {
    pub fn new(secret: Option<&[u8]>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            key: secret
                .filter(|s| !s.is_empty())
                .map(DecodingKey::from_secret),
            validation,
        }
    }

    /// Load the signing secret named `secret_id`. A missing secret leaves
    /// authenticated routes closed.
    pub fn from_provider(provider: &dyn SecretProvider, secret_id: &str) -> Self {
        match provider.get_secret(secret_id) {
            Ok(secret) => Self::new(Some(secret.trim().as_bytes())),
            Err(e) => {
                tracing::warn!(
                    secret_id,
                    error = %e,
                    "No auth secret available, authenticated routes will reject every request"
                );
                Self::new(None)
            }
        }
    }

    fn verify(&self, token: &str) -> Result<Principal, RelayError> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| RelayError::Unauthorized("Authentication is not configured".to_string()))?;

        let data = jsonwebtoken::decode::<Claims>(token, key, &self.validation)
            .map_err(|e| RelayError::Unauthorized(format!("Invalid token: {}", e)))?;

        if data.claims.sub.is_empty() {
            return Err(RelayError::Unauthorized("Token has no subject".to_string()));
        }
        Ok(Principal {
            subject: data.claims.sub,
        })
    }
}

/// Auth middleware: requires `Authorization: Bearer <jwt>` on every authenticated request.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, RelayError> {
    let token = request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| RelayError::Unauthorized("Missing Authorization header".to_string()))?
        .strip_prefix("Bearer ")
        .ok_or_else(|| RelayError::Unauthorized("Invalid auth scheme".to_string()))?
        .trim()
        .to_string();

    let principal = state.auth.verify(&token)?;
    request.extensions_mut().insert(principal);

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header};
    use pushprobe_core::InMemorySecretProvider;

    const SECRET: &[u8] = b"relay-test-signing-secret";

    fn mint(secret: &[u8], sub: &str, exp_offset: i64) -> String {
        let claims = serde_json::json!({
            "sub": sub,
            "exp": chrono::Utc::now().timestamp() + exp_offset,
        });
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_token_yields_principal() {
        let auth = Authenticator::new(Some(SECRET));
        let principal = auth.verify(&mint(SECRET, "operator", 300)).unwrap();
        assert_eq!(principal.subject, "operator");
    }

    #[test]
    fn test_rejects_wrong_key_and_expired_tokens() {
        let auth = Authenticator::new(Some(SECRET));
        assert!(auth.verify(&mint(b"another-secret", "operator", 300)).is_err());
        assert!(auth.verify(&mint(SECRET, "operator", -3600)).is_err());
        assert!(auth.verify("not-a-jwt").is_err());
    }

    #[test]
    fn test_missing_secret_closes_routes() {
        let auth = Authenticator::from_provider(&InMemorySecretProvider::new(), "relay-auth-secret");
        assert!(matches!(
            auth.verify(&mint(SECRET, "operator", 300)),
            Err(RelayError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_secret_loaded_from_provider() {
        let provider = InMemorySecretProvider::new()
            .with_secret("relay-auth-secret", "relay-test-signing-secret\n");
        let auth = Authenticator::from_provider(&provider, "relay-auth-secret");
        assert!(auth.verify(&mint(SECRET, "operator", 300)).is_ok());
    }
}
