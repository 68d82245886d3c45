use thiserror::Error;

/// Failure while acquiring a page over the network.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch timed out: {0}")]
    Timeout(String),

    #[error("http status {status} for {url}")]
    Http { url: String, status: u16 },

    #[error("transport error for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("credential source unavailable: {0}")]
    Credentials(String),
}

/// A fetched page did not have the structure the parser expects.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed page: {0}")]
    MalformedPage(String),
}

impl ParseError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedPage(msg.into())
    }
}

/// Failure while pushing to or fetching from the job queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue transport: {0}")]
    Transport(#[from] redis::RedisError),

    #[error("job encoding: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Failure while delivering a record to the sink.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("sink transport: {0}")]
    Transport(#[from] redis::RedisError),

    #[error("record encoding: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Umbrella error for one job's processing. All variants are handled the
/// same way by the worker: log with the job payload, cool down, drop the job.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}
