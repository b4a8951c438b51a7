use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, encode, errors::ErrorKind as JwtErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::JwtConfig,
    error::{AppError, AppResult},
    models::{Participant, Role},
};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // participant id
    pub role: Role,  // customer or business
    pub iss: String, // issuer
    pub exp: i64,    // expiry
    pub iat: i64,    // issued at
}

impl Claims {
    pub fn participant(&self) -> AppResult<Participant> {
        let id = Uuid::parse_str(&self.sub).map_err(|_| AppError::InvalidToken)?;
        Ok(Participant::new(id, self.role))
    }
}

/// Verifies bearer tokens minted by the account system (shared HS256 secret).
#[derive(Clone)]
pub struct TokenVerifier {
    decoding: DecodingKey,
    encoding: EncodingKey,
    issuer: String,
}

impl TokenVerifier {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
        }
    }

    pub fn verify(&self, token: &str) -> AppResult<Claims> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);

        let token_data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                JwtErrorKind::ExpiredSignature
                | JwtErrorKind::InvalidIssuer
                | JwtErrorKind::InvalidSignature => AppError::InvalidToken,
                _ => AppError::Jwt(e),
            }
        })?;
        Ok(token_data.claims)
    }

    /// Mints a token the way the account system does.
    pub fn issue(&self, participant: Participant, ttl: Duration) -> AppResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: participant.id().to_string(),
            role: participant.role(),
            iss: self.issuer.clone(),
            exp: now.timestamp() + ttl.as_secs() as i64,
            iat: now.timestamp(),
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }
}
