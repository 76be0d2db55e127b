use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::error::AppError;
use crate::store::ConversationStore;
use crate::types::Bot;

pub const BOT_TOKEN_HEADER: &str = "x-bot-token";
pub const TELEGRAM_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    #[serde(default)]
    pub email: Option<String>,
}

/// Verifies dashboard access tokens (HS256, shared secret).
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AppError> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| AppError::Unauthorized(format!("invalid token: {err}")))
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get("authorization")?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?;
    Some(token.trim().to_string())
}

/// Resolves the caller and checks that they own `bot_id`.
pub async fn authorize_owner(
    verifier: &JwtVerifier,
    conversations: &dyn ConversationStore,
    headers: &HeaderMap,
    bot_id: &str,
) -> Result<Bot, AppError> {
    let claims = authenticate(verifier, headers)?;
    let bot = conversations
        .get_bot(bot_id)
        .await?
        .ok_or_else(|| AppError::NotFound("bot not found".to_string()))?;
    if bot.owner_id != claims.sub {
        return Err(AppError::Forbidden("bot belongs to another account".to_string()));
    }
    Ok(bot)
}

pub fn authenticate(verifier: &JwtVerifier, headers: &HeaderMap) -> Result<Claims, AppError> {
    let token = bearer_token(headers)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;
    verifier.verify(&token)
}

/// Host of the calling page, from `Origin` or else `Referer`.
pub fn request_origin_host(headers: &HeaderMap) -> Option<String> {
    ["origin", "referer"].into_iter().find_map(|name| {
        let value = headers.get(name)?.to_str().ok()?;
        let parsed = url::Url::parse(value.trim()).ok()?;
        parsed.host_str().map(|host| host.to_ascii_lowercase())
    })
}

fn normalize_domain(entry: &str) -> String {
    let entry = entry.trim().to_ascii_lowercase();
    let without_scheme = entry
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(entry.as_str());
    let host = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host = host.split(':').next().unwrap_or_default();
    host.trim_start_matches("*.").trim_end_matches('.').to_string()
}

/// An empty allow-list accepts every origin; otherwise the host must equal an entry or be a
/// subdomain of one.
pub fn is_origin_allowed(allowed_domains: &[String], origin_host: Option<&str>) -> bool {
    let domains = allowed_domains
        .iter()
        .map(|entry| normalize_domain(entry))
        .filter(|domain| !domain.is_empty())
        .collect::<Vec<_>>();
    if domains.is_empty() {
        return true;
    }
    let Some(host) = origin_host.map(|host| host.trim_end_matches('.').to_ascii_lowercase()) else {
        return false;
    };
    domains
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
}

pub fn secrets_match(expected: &str, provided: &str) -> bool {
    !expected.is_empty() && bool::from(expected.as_bytes().ct_eq(provided.as_bytes()))
}
