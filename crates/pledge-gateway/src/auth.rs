use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};

use pledge_chat::{ChatBackend, ChatResult};
use pledge_types::api::Claims;
use pledge_types::models::{Actor, UNKNOWN_USER};

/// Verifies access tokens minted by the external identity platform
/// (HS256, shared secret, fixed audience). Never issues tokens.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str, audience: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[audience]);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> jsonwebtoken::errors::Result<Claims> {
        decode::<Claims>(token, &self.key, &self.validation).map(|data| data.claims)
    }
}

/// The acting user behind `claims`, named from their profile, else the
/// token's email.
pub async fn resolve_actor(backend: &ChatBackend, claims: &Claims) -> ChatResult<Actor> {
    let display_name = match backend.messages.sender_profile(claims.sub).await? {
        Some(profile) => profile.display_name(),
        None => claims.email.clone().unwrap_or_else(|| UNKNOWN_USER.to_string()),
    };
    Ok(Actor::new(claims.sub, display_name))
}
