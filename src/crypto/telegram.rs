use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use url::form_urlencoded;

use crate::{
    constants::TELEGRAM_INIT_DATA_MAX_AGE_SECS,
    error::{AppError, Result},
};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

impl TelegramUser {
    pub fn display_name(&self) -> String {
        [&self.username, &self.first_name]
            .into_iter()
            .flatten()
            .map(|name| name.trim())
            .find(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("user{}", self.id))
    }
}

/// Verified Mini-App launch parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitData {
    pub user: TelegramUser,
    pub auth_date: i64,
    pub start_param: Option<String>,
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| AppError::Internal(format!("HMAC init failed: {}", e)))?;
    mac.update(message);
    Ok(mac)
}

/// Checks the `hash` field of Telegram `initData` against the bot token and
/// returns the decoded user.
pub fn verify_init_data(init_data: &str, bot_token: &str, now_unix: i64) -> Result<InitData> {
    let mut pairs: Vec<(String, String)> = form_urlencoded::parse(init_data.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let hash_index = pairs
        .iter()
        .position(|(k, _)| k == "hash")
        .ok_or_else(|| AppError::AuthError("initData is missing hash".to_string()))?;
    let (_, received_hash) = pairs.remove(hash_index);
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    let data_check_string = pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("\n");

    let secret = hmac_sha256(b"WebAppData", bot_token.as_bytes())?
        .finalize()
        .into_bytes();
    let expected = hex::decode(received_hash.trim()).map_err(|_| AppError::InvalidSignature)?;
    hmac_sha256(&secret, data_check_string.as_bytes())?
        .verify_slice(&expected)
        .map_err(|_| AppError::InvalidSignature)?;

    let field = |name: &str| {
        pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    };

    let auth_date: i64 = field("auth_date")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| AppError::AuthError("initData is missing auth_date".to_string()))?;
    if now_unix - auth_date > TELEGRAM_INIT_DATA_MAX_AGE_SECS {
        return Err(AppError::AuthError("initData has expired".to_string()));
    }

    let user: TelegramUser = field("user")
        .ok_or_else(|| AppError::AuthError("initData is missing user".to_string()))
        .and_then(|raw| {
            serde_json::from_str(raw)
                .map_err(|e| AppError::BadRequest(format!("Invalid initData user: {}", e)))
        })?;

    Ok(InitData {
        user,
        auth_date,
        start_param: field("start_param").map(str::to_string),
    })
}
