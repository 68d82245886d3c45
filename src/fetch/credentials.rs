use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Client;
use tokio::sync::Mutex;
use tracing::debug;

use crate::cli::config::CredentialSettings;
use crate::error::FetchError;

/// Rotating session material for authenticated fetches. Rotation itself is
/// owned by an external collaborator; this side only draws a jar per fetch.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// A ready-to-send `Cookie` header value, or `None` when the pool is
    /// empty (the fetch then goes out unauthenticated).
    async fn cookie_header(&self) -> Result<Option<String>, FetchError>;
}

/// Cookie pool in a Redis set: each member is a JSON object of cookie
/// name/value pairs, and `SRANDMEMBER` picks the rotation.
pub struct RedisCredentialSource {
    conn: Arc<Mutex<MultiplexedConnection>>,
    key: String,
}

impl RedisCredentialSource {
    pub async fn new(settings: &CredentialSettings) -> Result<Self> {
        let client = Client::open(settings.redis_url.clone())
            .context(format!("Failed to connect to Redis at {}", settings.redis_url))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to get Redis connection for credentials")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            key: settings.key.clone(),
        })
    }
}

#[async_trait]
impl CredentialSource for RedisCredentialSource {
    async fn cookie_header(&self) -> Result<Option<String>, FetchError> {
        let mut conn = self.conn.lock().await;
        let raw: Option<String> = redis::cmd("SRANDMEMBER")
            .arg(&self.key)
            .query_async(&mut *conn)
            .await
            .map_err(|e| FetchError::Credentials(e.to_string()))?;

        let Some(raw) = raw else {
            debug!("credential pool {} is empty", self.key);
            return Ok(None);
        };

        let jar: HashMap<String, String> =
            serde_json::from_str(&raw).map_err(|e| FetchError::Credentials(e.to_string()))?;
        let header = jar
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        Ok(Some(header))
    }
}
