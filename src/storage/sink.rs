use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Client;
use tokio::sync::Mutex;
use tracing::info;

use crate::cli::config::SinkSettings;
use crate::crawler::job::Record;
use crate::error::PublishError;

/// Delivers normalized records downstream, at-least-once, synchronously
/// from the worker's perspective. Records are write-once facts; nothing
/// here ever reads them back.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn publish(&self, record: &Record) -> Result<(), PublishError>;
}

/// Publishes JSON records onto a named Redis list topic.
pub struct RedisRecordSink {
    conn: Arc<Mutex<MultiplexedConnection>>,
    topic: String,
}

impl RedisRecordSink {
    pub async fn new(settings: &SinkSettings) -> Result<Self> {
        let client = Client::open(settings.redis_url.clone())
            .context(format!("Failed to connect to Redis at {}", settings.redis_url))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to get Redis connection for sink")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            topic: settings.topic.clone(),
        })
    }
}

#[async_trait]
impl RecordSink for RedisRecordSink {
    async fn publish(&self, record: &Record) -> Result<(), PublishError> {
        let payload = serde_json::to_string(record)?;

        let mut conn = self.conn.lock().await;
        redis::cmd("LPUSH")
            .arg(&self.topic)
            .arg(&payload)
            .query_async::<_, ()>(&mut *conn)
            .await?;

        info!("published {} record, id: {}", record.kind(), record.id());
        Ok(())
    }
}
