use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::{constants::SESSION_KEY_PREFIX, error::Result, utils::random_token};

/// Who an opaque bearer token belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: i64,
    pub telegram_id: Option<i64>,
    pub username: String,
    pub expires_at: DateTime<Utc>,
}

/// Token -> session map with expiry.
///
/// Login populates it, logout and expiry evict.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(
        &self,
        user_id: i64,
        telegram_id: Option<i64>,
        username: &str,
    ) -> Result<(String, Session)>;
    async fn get(&self, token: &str) -> Result<Option<Session>>;
    async fn revoke(&self, token: &str) -> Result<()>;
    fn backend(&self) -> &'static str;
}

fn new_session(user_id: i64, telegram_id: Option<i64>, username: &str, ttl: Duration) -> Session {
    Session {
        user_id,
        telegram_id,
        username: username.to_string(),
        expires_at: Utc::now() + ttl,
    }
}

// ==================== MEMORY ====================

pub struct MemorySessionStore {
    ttl: Duration,
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new(ttl_hours: i64) -> Self {
        Self {
            ttl: Duration::hours(ttl_hours),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(
        &self,
        user_id: i64,
        telegram_id: Option<i64>,
        username: &str,
    ) -> Result<(String, Session)> {
        let token = random_token();
        let session = new_session(user_id, telegram_id, username, self.ttl);

        let mut sessions = self.sessions.write().await;
        let now = Utc::now();
        sessions.retain(|_, s| s.expires_at > now);
        sessions.insert(token.clone(), session.clone());
        Ok((token, session))
    }

    async fn get(&self, token: &str) -> Result<Option<Session>> {
        let session = self.sessions.read().await.get(token).cloned();
        match session {
            Some(s) if s.expires_at > Utc::now() => Ok(Some(s)),
            Some(_) => {
                self.sessions.write().await.remove(token);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn revoke(&self, token: &str) -> Result<()> {
        self.sessions.write().await.remove(token);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

// ==================== REDIS ====================

pub struct RedisSessionStore {
    conn: redis::aio::ConnectionManager,
    ttl: Duration,
}

impl RedisSessionStore {
    pub async fn connect(redis_url: &str, ttl_hours: i64) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            ttl: Duration::hours(ttl_hours),
        })
    }
}

fn session_key(token: &str) -> String {
    format!("{}{}", SESSION_KEY_PREFIX, token)
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn create(
        &self,
        user_id: i64,
        telegram_id: Option<i64>,
        username: &str,
    ) -> Result<(String, Session)> {
        let token = random_token();
        let session = new_session(user_id, telegram_id, username, self.ttl);
        let payload = serde_json::to_string(&session)
            .map_err(|e| crate::error::AppError::Internal(format!("Session encode failed: {}", e)))?;

        let mut conn = self.conn.clone();
        let ttl_secs = self.ttl.num_seconds().max(1) as u64;
        let _: () = conn.set_ex(session_key(&token), payload, ttl_secs).await?;
        Ok((token, session))
    }

    async fn get(&self, token: &str) -> Result<Option<Session>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(session_key(token)).await?;
        Ok(raw.and_then(|payload| match serde_json::from_str::<Session>(&payload) {
            Ok(session) => Some(session),
            Err(err) => {
                tracing::warn!("Discarding unreadable session payload: {}", err);
                None
            }
        }))
    }

    async fn revoke(&self, token: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(session_key(token)).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
