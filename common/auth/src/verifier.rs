use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::Value;
use tracing::debug;

use crate::claims::Claims;
use crate::config::TokenConfig;
use crate::error::AuthResult;

/// Verifies HS256 bearer tokens against a shared secret.
///
/// The POS auth server signs session tokens with a symmetric key; this
/// service only ever verifies, so a single `DecodingKey` is all the state
/// required.
#[derive(Clone)]
pub struct TokenVerifier {
    config: TokenConfig,
    key: DecodingKey,
}

impl TokenVerifier {
    pub fn new(config: TokenConfig, secret: &[u8]) -> Self {
        Self {
            config,
            key: DecodingKey::from_secret(secret),
        }
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    pub fn verify(&self, token: &str) -> AuthResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.config.issuer.clone()]);
        validation.set_audience(&[self.config.audience.clone()]);
        validation.leeway = self.config.leeway_seconds.into();

        let token_data = decode::<Value>(token, &self.key, &validation)?;
        let claims = Claims::try_from(token_data.claims)?;
        debug!(subject = %claims.subject, "verified bearer token");
        Ok(claims)
    }
}
