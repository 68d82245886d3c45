use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Client;
use tokio::sync::Mutex;
use tracing::debug;

use crate::cli::config::QueueSettings;
use crate::crawler::job::{Job, JobType};
use crate::error::QueueError;

/// Durable FIFO-per-job-type store. Every pushed job is eventually delivered
/// to exactly one puller; ordering within a type is best-effort FIFO and
/// nothing here depends on it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn push(&self, job: &Job) -> Result<(), QueueError>;

    /// Blocking pull: suspends until a job of `job_type` exists.
    async fn fetch(&self, job_type: JobType) -> Result<Job, QueueError>;
}

/// Redis implementation: one list per job type, `LPUSH` to enqueue, `BRPOP`
/// to dequeue.
pub struct RedisJobQueue {
    client: Client,
    push_conn: Arc<Mutex<MultiplexedConnection>>,
    namespace: String,
}

impl RedisJobQueue {
    pub async fn new(settings: &QueueSettings) -> Result<Self> {
        let client = Client::open(settings.redis_url.clone())
            .context(format!("Failed to connect to Redis at {}", settings.redis_url))?;

        let conn = client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to get Redis connection")?;

        Ok(Self {
            client,
            push_conn: Arc::new(Mutex::new(conn)),
            namespace: settings.namespace.clone(),
        })
    }

    fn key(&self, job_type: JobType) -> String {
        format!("{}:jobs:{}", self.namespace, job_type)
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn push(&self, job: &Job) -> Result<(), QueueError> {
        let payload = serde_json::to_string(job)?;
        let key = self.key(job.job_type());

        let mut conn = self.push_conn.lock().await;
        redis::cmd("LPUSH")
            .arg(&key)
            .arg(&payload)
            .query_async::<_, ()>(&mut *conn)
            .await?;

        debug!("pushed {} job: {}", job.job_type(), payload);
        Ok(())
    }

    async fn fetch(&self, job_type: JobType) -> Result<Job, QueueError> {
        // BRPOP parks its connection server-side, so the blocking pull gets
        // a dedicated connection instead of the shared push connection.
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = self.key(job_type);
        loop {
            let reply: Option<(String, String)> = redis::cmd("BRPOP")
                .arg(&key)
                .arg(0)
                .query_async(&mut conn)
                .await?;
            if let Some((_, payload)) = reply {
                return Ok(serde_json::from_str(&payload)?);
            }
        }
    }
}
