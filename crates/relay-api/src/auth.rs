// Request context extraction at the edge
//
// With AUTH_JWKS_B64 configured, the bearer token is verified against the
// JWKS (issuer/audience included) and the `workspace_id` + `sub` claims
// become the request context. Without it the verifier runs in development
// mode and trusts x-workspace-id / x-user-id headers; the startup log makes
// that mode loud.

use axum::http::HeaderMap;
use base64::Engine;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tracing::warn;

use relay_core::error::{PlatformError, Result};
use relay_core::{Config, RequestContext};

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    workspace_id: String,
}

pub struct VerifierKey {
    kid: Option<String>,
    key: DecodingKey,
    algorithm: Algorithm,
}

pub enum AuthVerifier {
    Jwt {
        keys: Vec<VerifierKey>,
        issuer: Option<String>,
        audience: Option<String>,
    },
    /// No JWKS configured: trust forwarding headers (development only)
    DevHeaders,
}

impl AuthVerifier {
    pub fn from_config(config: &Config) -> Result<Self> {
        let Some(jwks_b64) = &config.auth_jwks_b64 else {
            warn!("AUTH_JWKS_B64 not set; trusting x-workspace-id/x-user-id headers (dev mode)");
            return Ok(AuthVerifier::DevHeaders);
        };

        let jwks_json = base64::engine::general_purpose::STANDARD
            .decode(jwks_b64)
            .map_err(|e| PlatformError::validation(format!("AUTH_JWKS_B64: {e}")))?;
        let jwks: JwkSet = serde_json::from_slice(&jwks_json)
            .map_err(|e| PlatformError::validation(format!("AUTH_JWKS_B64 is not a JWKS: {e}")))?;

        let mut keys = Vec::new();
        for jwk in &jwks.keys {
            let key = DecodingKey::from_jwk(jwk)
                .map_err(|e| PlatformError::validation(format!("unusable JWK: {e}")))?;
            let algorithm = jwk
                .common
                .key_algorithm
                .and_then(|a| a.to_string().parse::<Algorithm>().ok())
                .unwrap_or(Algorithm::RS256);
            keys.push(VerifierKey {
                kid: jwk.common.key_id.clone(),
                key,
                algorithm,
            });
        }

        if keys.is_empty() {
            return Err(PlatformError::validation("JWKS contains no usable keys"));
        }

        Ok(AuthVerifier::Jwt {
            keys,
            issuer: config.auth_issuer.clone(),
            audience: config.auth_audience.clone(),
        })
    }

    /// Resolve the workspace/user context for a request
    pub fn context_from_headers(&self, headers: &HeaderMap) -> Result<RequestContext> {
        match self {
            AuthVerifier::DevHeaders => {
                let workspace_id = header_str(headers, "x-workspace-id")?;
                let user_id = header_str(headers, "x-user-id")?;
                RequestContext::new(workspace_id, user_id)
            }
            AuthVerifier::Jwt {
                keys,
                issuer,
                audience,
            } => {
                let token = bearer_token(headers)?;
                let claims = verify(token, keys, issuer.as_deref(), audience.as_deref())?;
                RequestContext::new(claims.workspace_id, claims.sub)
            }
        }
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Result<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or(PlatformError::MissingContext)
}

fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(PlatformError::MissingContext)
}

fn verify(
    token: &str,
    keys: &[VerifierKey],
    issuer: Option<&str>,
    audience: Option<&str>,
) -> Result<Claims> {
    let header =
        decode_header(token).map_err(|e| PlatformError::validation(format!("bad token: {e}")))?;

    // Prefer the key matching the token's kid, else try them all
    let candidates: Vec<&VerifierKey> = match &header.kid {
        Some(kid) => {
            let matched: Vec<&VerifierKey> =
                keys.iter().filter(|k| k.kid.as_deref() == Some(kid)).collect();
            if matched.is_empty() {
                keys.iter().collect()
            } else {
                matched
            }
        }
        None => keys.iter().collect(),
    };

    let mut last_error = None;
    for candidate in candidates {
        let mut validation = Validation::new(candidate.algorithm);
        if let Some(issuer) = issuer {
            validation.set_issuer(&[issuer]);
        }
        if let Some(audience) = audience {
            validation.set_audience(&[audience]);
        } else {
            validation.validate_aud = false;
        }

        match decode::<Claims>(token, &candidate.key, &validation) {
            Ok(data) => return Ok(data.claims),
            Err(e) => last_error = Some(e),
        }
    }

    Err(PlatformError::validation(format!(
        "token verification failed: {}",
        last_error.map(|e| e.to_string()).unwrap_or_default()
    )))
}
