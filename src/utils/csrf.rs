//! Stateless CSRF tokens bound to a user and an action scope.
//!
//! A token is `base64url(HMAC-SHA256(secret, "{user_id}:{scope}"))`, so a
//! token minted for one plan or action is useless for another.

use base64::{prelude::BASE64_URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const CANCEL_SCOPE: &str = "cancel_subscription";
pub const RENEW_SCOPE: &str = "renew_subscription";
pub const RESUME_SCOPE: &str = "resume_subscription";
pub const PORTAL_SCOPE: &str = "billing_portal";

pub fn subscribe_scope(plan_id: Uuid) -> String {
    format!("subscribe{plan_id}")
}

fn sign(secret: &str, user_id: Uuid, scope: &str) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(user_id.to_string().as_bytes());
    mac.update(b":");
    mac.update(scope.as_bytes());
    Some(mac.finalize().into_bytes().to_vec())
}

pub fn generate_csrf_token(secret: &str, user_id: Uuid, scope: &str) -> String {
    sign(secret, user_id, scope)
        .map(|bytes| BASE64_URL_SAFE_NO_PAD.encode(bytes))
        .unwrap_or_default()
}

pub fn verify_csrf_token(secret: &str, user_id: Uuid, scope: &str, token: Option<&str>) -> bool {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return false;
    };
    let Ok(provided) = BASE64_URL_SAFE_NO_PAD.decode(token.trim()) else {
        return false;
    };
    let Some(expected) = sign(secret, user_id, scope) else {
        return false;
    };
    expected.ct_eq(&provided).into()
}
