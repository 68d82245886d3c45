use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use crate::cli::config::HarvesterConfig;
use crate::crawler::dedup::DedupFilter;
use crate::crawler::job::{Job, JobType, SiteUrls};
use crate::crawler::pool::WorkerPool;
use crate::crawler::worker::CrawlContext;
use crate::fetch::{CredentialSource, HttpPageFetcher, PageFetcher, RedisCredentialSource};
use crate::parse::{PageParser, SitePageParser};
use crate::storage::queue::{JobQueue, RedisJobQueue};
use crate::storage::sink::{RecordSink, RedisRecordSink};

/// Wire up the capability implementations from configuration and run the
/// worker pool until the process is killed.
pub async fn run(config: HarvesterConfig, job_types: Vec<JobType>) -> Result<()> {
    let enabled = if job_types.is_empty() {
        config.crawl.enabled.clone()
    } else {
        job_types
    };

    let queue: Arc<dyn JobQueue> = Arc::new(RedisJobQueue::new(&config.queue).await?);
    let sink: Arc<dyn RecordSink> = Arc::new(RedisRecordSink::new(&config.sink).await?);
    let credentials: Arc<dyn CredentialSource> =
        Arc::new(RedisCredentialSource::new(&config.credentials).await?);
    let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpPageFetcher::new(
        Duration::from_secs(config.crawl.fetch_timeout_secs),
        credentials,
    )?);
    let parser: Arc<dyn PageParser> = Arc::new(SitePageParser::new(&config.site)?);
    let dedup = Arc::new(DedupFilter::new(
        config.crawl.dedup_false_positive_rate,
        config.crawl.dedup_capacity,
    ));

    let ctx = Arc::new(CrawlContext {
        queue,
        fetcher,
        parser,
        sink,
        dedup,
        urls: SiteUrls::new(config.site.host.clone()),
        page_ceiling: config.crawl.page_ceiling,
        cooldown: Duration::from_secs(config.crawl.error_cooldown_secs),
    });

    WorkerPool::new(ctx, enabled, config.crawl.workers_per_type)
        .run()
        .await;
    Ok(())
}

/// Push the initial jobs a crawl grows from: user, timeline and follower
/// jobs per seed user, a comment job per seed tweet.
pub async fn seed(config: HarvesterConfig, users: Vec<String>, tweets: Vec<String>) -> Result<()> {
    let queue = RedisJobQueue::new(&config.queue).await?;
    let urls = SiteUrls::new(config.site.host.clone());

    for uid in &users {
        queue.push(&Job::User { uid: uid.clone() }).await?;
        queue
            .push(&Job::Timeline {
                uid: uid.clone(),
                url: urls.timeline(uid),
            })
            .await?;
        queue
            .push(&Job::Follower {
                uid: uid.clone(),
                url: urls.followers(uid),
            })
            .await?;
    }
    for tweet_id in &tweets {
        queue
            .push(&Job::Comment {
                tweet_id: tweet_id.clone(),
                url: urls.comments(tweet_id),
            })
            .await?;
    }

    info!("seeded {} users and {} tweets", users.len(), tweets.len());
    Ok(())
}

/// Print the resolved configuration as YAML.
pub fn show_config(config: &HarvesterConfig) -> Result<()> {
    println!("{}", serde_yaml::to_string(config)?);
    Ok(())
}
