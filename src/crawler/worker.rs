use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::crawler::dedup::DedupFilter;
use crate::crawler::job::{EntityKey, Job, JobType, PageContext, Record, SiteUrls};
use crate::error::{CrawlError, QueueError};
use crate::fetch::PageFetcher;
use crate::parse::{PageParser, UserRef};
use crate::storage::queue::JobQueue;
use crate::storage::sink::RecordSink;

/// Capabilities and policy shared by every worker instance. The queue and
/// the dedup filter are the only mutable state workers contend on; both are
/// internally synchronized.
pub struct CrawlContext {
    pub queue: Arc<dyn JobQueue>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub parser: Arc<dyn PageParser>,
    pub sink: Arc<dyn RecordSink>,
    pub dedup: Arc<DedupFilter>,
    pub urls: SiteUrls,
    pub page_ceiling: u32,
    pub cooldown: Duration,
}

/// Drives jobs of one type from pull to terminal outcome, forever.
///
/// The loop is the state machine Idle -> Fetching -> Parsing -> Fanning-out
/// -> Publishing -> Idle; any failure in the middle states lands in a
/// cooldown and the job is dropped after logging, never re-pushed. The
/// queue's blocking pull is the only idle suspension point.
pub struct CrawlWorker {
    id: usize,
    job_type: JobType,
    ctx: Arc<CrawlContext>,
}

impl CrawlWorker {
    pub fn new(id: usize, job_type: JobType, ctx: Arc<CrawlContext>) -> Self {
        Self { id, job_type, ctx }
    }

    pub async fn run(self) {
        info!("{} worker {} started", self.job_type, self.id);
        loop {
            let job = match self.ctx.queue.fetch(self.job_type).await {
                Ok(job) => job,
                Err(e) => {
                    error!("{} worker {} queue fetch failed: {}", self.job_type, self.id, e);
                    sleep(self.ctx.cooldown).await;
                    continue;
                }
            };

            debug!("{} worker {} pulled job: {:?}", self.job_type, self.id, job);
            if let Err(e) = self.process(&job).await {
                // The job is dropped, not re-pushed; the cooldown keeps the
                // loop from hammering a failing dependency.
                error!(
                    "{} worker {} failed on {:?}: {}",
                    self.job_type, self.id, job, e
                );
                sleep(self.ctx.cooldown).await;
            }
        }
    }

    /// Fully handle one job: all follow-up jobs pushed and all records
    /// published, or an error that retires the whole job.
    pub async fn process(&self, job: &Job) -> Result<(), CrawlError> {
        let page = PageContext::for_job(job, self.ctx.page_ceiling);
        match job {
            Job::User { uid } => self.process_user(uid).await,
            Job::Timeline { uid, url } => self.process_timeline(&page, uid, url).await,
            Job::Comment { tweet_id, url } => self.process_comment(&page, tweet_id, url).await,
            Job::Follower { uid, url } => self.process_follower(&page, uid, url).await,
            Job::Repost { tweet_id, url } => self.process_repost(&page, tweet_id, url).await,
        }
    }

    async fn process_user(&self, uid: &str) -> Result<(), CrawlError> {
        let html = self.ctx.fetcher.fetch(&self.ctx.urls.profile(uid)).await?;
        let Some(profile) = self.ctx.parser.profile(&html)? else {
            // Private or deleted account; not an error.
            debug!("profile {} has no nickname, skipping", uid);
            return Ok(());
        };

        // Second fetch: the summary view carries the aggregate counters.
        let summary = self.ctx.fetcher.fetch(&self.ctx.urls.homepage(uid)).await?;
        let counters = self.ctx.parser.account_counters(&summary)?;

        let record = Record::UserInfo(profile.into_record(uid, counters));
        self.ctx.sink.publish(&record).await?;
        Ok(())
    }

    async fn process_timeline(
        &self,
        page: &PageContext,
        uid: &str,
        url: &str,
    ) -> Result<(), CrawlError> {
        let html = self.ctx.fetcher.fetch(url).await?;
        let listing = self.ctx.parser.timeline(&html, uid)?;

        for tweet in listing.tweets {
            self.ctx.sink.publish(&Record::TweetInfo(tweet)).await?;
        }

        let uid = uid.to_string();
        let urls = self.ctx.urls.clone();
        self.expand_pages(page, listing.max_page, |p| Job::Timeline {
            uid: uid.clone(),
            url: urls.timeline_page(&uid, p),
        })
        .await?;
        Ok(())
    }

    async fn process_comment(
        &self,
        page: &PageContext,
        tweet_id: &str,
        url: &str,
    ) -> Result<(), CrawlError> {
        let html = self.ctx.fetcher.fetch(url).await?;
        let thread = self.ctx.parser.comments(&html, tweet_id)?;

        for entry in thread.comments {
            let mut info = entry.info;
            if let Some(uid) = self.resolve_member(&entry.author).await? {
                self.enqueue_user(&uid).await?;
                info.user_id = uid;
            }
            self.ctx.sink.publish(&Record::CommentInfo(info)).await?;
        }

        if !page.paginated {
            // First page only: chase the repost listing and publish the
            // quoted original with its aggregate counters.
            self.ctx
                .queue
                .push(&Job::Repost {
                    tweet_id: tweet_id.to_string(),
                    url: self.ctx.urls.reposts(tweet_id),
                })
                .await?;

            if let Some(quoted) = thread.quoted {
                let mut tweet = quoted.info;
                tweet.uid = self.resolve_member(&quoted.author).await?;
                self.ctx.sink.publish(&Record::TweetInfo(tweet)).await?;
            }
        }

        let tweet_id = tweet_id.to_string();
        let urls = self.ctx.urls.clone();
        self.expand_pages(page, thread.max_page, |p| Job::Comment {
            tweet_id: tweet_id.clone(),
            url: urls.comments_page(&tweet_id, p),
        })
        .await?;
        Ok(())
    }

    async fn process_follower(
        &self,
        page: &PageContext,
        uid: &str,
        url: &str,
    ) -> Result<(), CrawlError> {
        let html = self.ctx.fetcher.fetch(url).await?;
        let listing = self.ctx.parser.followers(&html)?;

        for member in &listing.members {
            if let Some(id) = self.resolve_member(member).await? {
                self.enqueue_user(&id).await?;
            }
        }

        let uid = uid.to_string();
        let urls = self.ctx.urls.clone();
        self.expand_pages(page, listing.max_page, |p| Job::Follower {
            uid: uid.clone(),
            url: urls.followers_page(&uid, p),
        })
        .await?;
        Ok(())
    }

    async fn process_repost(
        &self,
        page: &PageContext,
        tweet_id: &str,
        url: &str,
    ) -> Result<(), CrawlError> {
        let html = self.ctx.fetcher.fetch(url).await?;
        let listing = self.ctx.parser.reposts(&html)?;

        for member in &listing.members {
            if let Some(id) = self.resolve_member(member).await? {
                self.enqueue_user(&id).await?;
            }
        }

        let tweet_id = tweet_id.to_string();
        let urls = self.ctx.urls.clone();
        self.expand_pages(page, listing.max_page, |p| Job::Repost {
            tweet_id: tweet_id.clone(),
            url: urls.reposts_page(&tweet_id, p),
        })
        .await?;
        Ok(())
    }

    /// Turn a member reference into an id, fetching the member's homepage
    /// when the listing only had an opaque redirect.
    async fn resolve_member(&self, member: &UserRef) -> Result<Option<String>, CrawlError> {
        match member {
            UserRef::Direct(id) => Ok(Some(id.clone())),
            UserRef::Homepage(url) => {
                let html = self.ctx.fetcher.fetch(url).await?;
                Ok(self.ctx.parser.member_uid(&html)?)
            }
        }
    }

    /// Dedup-gated User job push. Returns whether a job was pushed.
    async fn enqueue_user(&self, uid: &str) -> Result<bool, QueueError> {
        if uid.is_empty() {
            return Ok(false);
        }
        let key = EntityKey::user(uid);
        if !self.ctx.dedup.check_and_mark(&key).await {
            return Ok(false);
        }
        self.ctx
            .queue
            .push(&Job::User {
                uid: uid.to_string(),
            })
            .await?;
        debug!("queued newly discovered user {}", uid);
        Ok(true)
    }

    /// Push follow-up jobs for pages `2..=min(reported, ceiling)`, derived
    /// solely from a page-1 response. A job that already targets a specific
    /// page never expands again.
    async fn expand_pages<F>(
        &self,
        page: &PageContext,
        max_page: Option<u32>,
        make: F,
    ) -> Result<(), QueueError>
    where
        F: Fn(u32) -> Job,
    {
        if page.paginated {
            return Ok(());
        }
        let Some(reported) = max_page else {
            return Ok(());
        };
        let last = reported.min(page.page_ceiling);
        for p in 2..=last {
            self.ctx.queue.push(&make(p)).await?;
        }
        if last >= 2 {
            debug!("expanded {} into {} page jobs", page.owner, last - 1);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::job::{CommentInfo, TweetInfo};
    use crate::error::ParseError;
    use crate::fetch::MockPageFetcher;
    use crate::parse::{
        AccountCounters, CommentEntry, CommentPage, MemberPage, MockPageParser, ProfileInfo,
        QuotedTweet, TimelinePage,
    };
    use crate::storage::queue::MockJobQueue;
    use crate::storage::sink::MockRecordSink;
    use std::sync::Mutex as StdMutex;

    type Pushed = Arc<StdMutex<Vec<Job>>>;
    type Published = Arc<StdMutex<Vec<Record>>>;

    fn capture_pushes(queue: &mut MockJobQueue) -> Pushed {
        let pushed: Pushed = Arc::default();
        let sink = pushed.clone();
        queue.expect_push().returning(move |job| {
            sink.lock().unwrap().push(job.clone());
            Ok(())
        });
        pushed
    }

    fn capture_records(sink: &mut MockRecordSink) -> Published {
        let published: Published = Arc::default();
        let captured = published.clone();
        sink.expect_publish().returning(move |record| {
            captured.lock().unwrap().push(record.clone());
            Ok(())
        });
        published
    }

    fn any_page(fetcher: &mut MockPageFetcher) {
        fetcher
            .expect_fetch()
            .returning(|url| Ok(format!("<html data-url=\"{url}\"/>")));
    }

    fn context(
        queue: MockJobQueue,
        fetcher: MockPageFetcher,
        parser: MockPageParser,
        sink: MockRecordSink,
        page_ceiling: u32,
    ) -> Arc<CrawlContext> {
        Arc::new(CrawlContext {
            queue: Arc::new(queue),
            fetcher: Arc::new(fetcher),
            parser: Arc::new(parser),
            sink: Arc::new(sink),
            dedup: Arc::new(DedupFilter::new(0.001, 1024)),
            urls: SiteUrls::new("https://s.test"),
            page_ceiling,
            cooldown: Duration::from_millis(1),
        })
    }

    fn tweet(id: &str, uid: &str) -> TweetInfo {
        TweetInfo {
            id: id.to_string(),
            uid: Some(uid.to_string()),
            content: Some("x".to_string()),
            time: None,
            source: None,
            is_repost: false,
            source_tid: None,
            like: -1,
            transfer: -1,
            comment: -1,
        }
    }

    #[tokio::test]
    async fn timeline_first_page_publishes_and_expands() {
        let mut queue = MockJobQueue::new();
        let pushed = capture_pushes(&mut queue);
        let mut fetcher = MockPageFetcher::new();
        any_page(&mut fetcher);
        let mut parser = MockPageParser::new();
        parser.expect_timeline().returning(|_, uid| {
            Ok(TimelinePage {
                tweets: vec![tweet("M_1", uid), tweet("M_2", uid), tweet("M_3", uid)],
                max_page: Some(4),
            })
        });
        let mut sink = MockRecordSink::new();
        let published = capture_records(&mut sink);

        let worker = CrawlWorker::new(0, JobType::Timeline, context(queue, fetcher, parser, sink, 500));
        worker
            .process(&Job::Timeline {
                uid: "123".to_string(),
                url: "https://s.test/123".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(published.lock().unwrap().len(), 3);
        let expected: Vec<Job> = (2..=4)
            .map(|p| Job::Timeline {
                uid: "123".to_string(),
                url: format!("https://s.test/123?page={p}"),
            })
            .collect();
        assert_eq!(*pushed.lock().unwrap(), expected);
    }

    #[tokio::test]
    async fn paginated_job_never_expands() {
        let mut queue = MockJobQueue::new();
        queue.expect_push().never();
        let mut fetcher = MockPageFetcher::new();
        any_page(&mut fetcher);
        let mut parser = MockPageParser::new();
        parser.expect_timeline().returning(|_, _| {
            Ok(TimelinePage {
                tweets: vec![],
                max_page: Some(40),
            })
        });
        let sink = MockRecordSink::new();

        let worker = CrawlWorker::new(0, JobType::Timeline, context(queue, fetcher, parser, sink, 500));
        worker
            .process(&Job::Timeline {
                uid: "123".to_string(),
                url: "https://s.test/123?page=2".to_string(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn page_ceiling_clamps_expansion() {
        let mut queue = MockJobQueue::new();
        let pushed = capture_pushes(&mut queue);
        let mut fetcher = MockPageFetcher::new();
        any_page(&mut fetcher);
        let mut parser = MockPageParser::new();
        parser.expect_timeline().returning(|_, _| {
            Ok(TimelinePage {
                tweets: vec![],
                max_page: Some(10),
            })
        });
        let sink = MockRecordSink::new();

        let worker = CrawlWorker::new(0, JobType::Timeline, context(queue, fetcher, parser, sink, 3));
        worker
            .process(&Job::Timeline {
                uid: "123".to_string(),
                url: "https://s.test/123".to_string(),
            })
            .await
            .unwrap();

        // Pages 2 and 3 only: min(10, ceiling 3) - 1 jobs.
        assert_eq!(pushed.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_page_marker_means_no_expansion() {
        let mut queue = MockJobQueue::new();
        queue.expect_push().never();
        let mut fetcher = MockPageFetcher::new();
        any_page(&mut fetcher);
        let mut parser = MockPageParser::new();
        parser
            .expect_followers()
            .returning(|_| Ok(MemberPage::default()));
        let sink = MockRecordSink::new();

        let worker = CrawlWorker::new(0, JobType::Follower, context(queue, fetcher, parser, sink, 500));
        worker
            .process(&Job::Follower {
                uid: "1".to_string(),
                url: "https://s.test/1/follow".to_string(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn follower_discoveries_are_dedup_gated() {
        let mut queue = MockJobQueue::new();
        let pushed = capture_pushes(&mut queue);
        let mut fetcher = MockPageFetcher::new();
        any_page(&mut fetcher);
        let mut parser = MockPageParser::new();
        parser.expect_followers().times(2).returning(|_| {
            Ok(MemberPage {
                members: vec![
                    UserRef::Direct("777".to_string()),
                    UserRef::Direct("888".to_string()),
                ],
                max_page: None,
            })
        });
        let sink = MockRecordSink::new();

        let ctx = context(queue, fetcher, parser, sink, 500);
        let worker = CrawlWorker::new(0, JobType::Follower, ctx.clone());
        let job = Job::Follower {
            uid: "1".to_string(),
            url: "https://s.test/1/follow".to_string(),
        };

        worker.process(&job).await.unwrap();
        assert_eq!(
            *pushed.lock().unwrap(),
            vec![
                Job::User { uid: "777".to_string() },
                Job::User { uid: "888".to_string() },
            ]
        );
        assert!(ctx.dedup.seen(&EntityKey::user("777")).await);
        assert!(ctx.dedup.seen(&EntityKey::user("888")).await);

        // Same listing again: everyone is already marked.
        worker.process(&job).await.unwrap();
        assert_eq!(pushed.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn opaque_member_links_resolve_via_homepage() {
        let mut queue = MockJobQueue::new();
        let pushed = capture_pushes(&mut queue);
        let mut fetcher = MockPageFetcher::new();
        any_page(&mut fetcher);
        let mut parser = MockPageParser::new();
        parser.expect_followers().returning(|_| {
            Ok(MemberPage {
                members: vec![UserRef::Homepage("https://s.test/redir/x".to_string())],
                max_page: None,
            })
        });
        parser
            .expect_member_uid()
            .returning(|_| Ok(Some("42".to_string())));
        let sink = MockRecordSink::new();

        let worker = CrawlWorker::new(0, JobType::Follower, context(queue, fetcher, parser, sink, 500));
        worker
            .process(&Job::Follower {
                uid: "1".to_string(),
                url: "https://s.test/1/follow".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(
            *pushed.lock().unwrap(),
            vec![Job::User { uid: "42".to_string() }]
        );
    }

    #[tokio::test]
    async fn user_job_merges_profile_and_counters() {
        let queue = MockJobQueue::new();
        let mut fetcher = MockPageFetcher::new();
        any_page(&mut fetcher);
        let mut parser = MockPageParser::new();
        parser.expect_profile().returning(|_| {
            Ok(Some(ProfileInfo {
                nickname: "A".to_string(),
                ..ProfileInfo::default()
            }))
        });
        parser.expect_account_counters().returning(|_| {
            Ok(AccountCounters {
                tweet_num: 5,
                fans_num: -1,
                follow_num: -1,
            })
        });
        let mut sink = MockRecordSink::new();
        let published = capture_records(&mut sink);

        let worker = CrawlWorker::new(0, JobType::User, context(queue, fetcher, parser, sink, 500));
        worker
            .process(&Job::User { uid: "123".to_string() })
            .await
            .unwrap();

        let records = published.lock().unwrap();
        assert_eq!(records.len(), 1);
        match &records[0] {
            Record::UserInfo(u) => {
                assert_eq!(u.id, "123");
                assert_eq!(u.nickname, "A");
                assert_eq!(u.tweet_num, 5);
                assert_eq!(u.fans_num, -1);
            }
            other => panic!("expected user_info, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn private_profile_is_a_noop() {
        let queue = MockJobQueue::new();
        let mut fetcher = MockPageFetcher::new();
        fetcher.expect_fetch().times(1).returning(|_| Ok(String::new()));
        let mut parser = MockPageParser::new();
        parser.expect_profile().returning(|_| Ok(None));
        parser.expect_account_counters().never();
        let mut sink = MockRecordSink::new();
        sink.expect_publish().never();

        let worker = CrawlWorker::new(0, JobType::User, context(queue, fetcher, parser, sink, 500));
        worker
            .process(&Job::User { uid: "123".to_string() })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn parse_error_retires_one_job_not_the_worker() {
        let queue = MockJobQueue::new();
        let mut fetcher = MockPageFetcher::new();
        any_page(&mut fetcher);
        let mut parser = MockPageParser::new();
        parser
            .expect_timeline()
            .times(1)
            .returning(|_, _| Err(ParseError::malformed("boom")));
        parser.expect_timeline().times(1).returning(|_, _| {
            Ok(TimelinePage {
                tweets: vec![],
                max_page: None,
            })
        });
        let sink = MockRecordSink::new();

        let worker = CrawlWorker::new(0, JobType::Timeline, context(queue, fetcher, parser, sink, 500));
        let job = Job::Timeline {
            uid: "123".to_string(),
            url: "https://s.test/123?page=2".to_string(),
        };

        let err = worker.process(&job).await.unwrap_err();
        assert!(matches!(err, CrawlError::Parse(_)));
        worker.process(&job).await.unwrap();
    }

    #[tokio::test]
    async fn comment_first_page_full_fanout() {
        let mut queue = MockJobQueue::new();
        let pushed = capture_pushes(&mut queue);
        let mut fetcher = MockPageFetcher::new();
        any_page(&mut fetcher);
        let mut parser = MockPageParser::new();
        parser.expect_comments().returning(|_, tweet_id| {
            Ok(CommentPage {
                comments: vec![CommentEntry {
                    author: UserRef::Direct("777".to_string()),
                    info: CommentInfo {
                        id: "C_1".to_string(),
                        tweet_id: tweet_id.to_string(),
                        user_id: "unknown".to_string(),
                        content: "first!".to_string(),
                        pub_time: None,
                        source: None,
                    },
                }],
                quoted: Some(QuotedTweet {
                    author: UserRef::Direct("55".to_string()),
                    info: TweetInfo {
                        id: tweet_id.to_string(),
                        uid: None,
                        content: Some("original".to_string()),
                        time: None,
                        source: None,
                        is_repost: false,
                        source_tid: None,
                        like: 7,
                        transfer: 2,
                        comment: 9,
                    },
                }),
                max_page: Some(2),
            })
        });
        let mut sink = MockRecordSink::new();
        let published = capture_records(&mut sink);

        let worker = CrawlWorker::new(0, JobType::Comment, context(queue, fetcher, parser, sink, 500));
        worker
            .process(&Job::Comment {
                tweet_id: "900".to_string(),
                url: "https://s.test/comment/900".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(
            *pushed.lock().unwrap(),
            vec![
                Job::User { uid: "777".to_string() },
                Job::Repost {
                    tweet_id: "900".to_string(),
                    url: "https://s.test/repost/900".to_string(),
                },
                Job::Comment {
                    tweet_id: "900".to_string(),
                    url: "https://s.test/comment/900?page=2".to_string(),
                },
            ]
        );

        let records = published.lock().unwrap();
        assert_eq!(records.len(), 2);
        match &records[0] {
            Record::CommentInfo(c) => assert_eq!(c.user_id, "777"),
            other => panic!("expected comment_info, got {other:?}"),
        }
        match &records[1] {
            // The quoted author is attributed but never enqueued.
            Record::TweetInfo(t) => assert_eq!(t.uid.as_deref(), Some("55")),
            other => panic!("expected tweet_info, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn repost_job_discovers_reposters() {
        let mut queue = MockJobQueue::new();
        let pushed = capture_pushes(&mut queue);
        let mut fetcher = MockPageFetcher::new();
        any_page(&mut fetcher);
        let mut parser = MockPageParser::new();
        parser.expect_reposts().returning(|_| {
            Ok(MemberPage {
                members: vec![UserRef::Direct("31".to_string())],
                max_page: Some(3),
            })
        });
        let sink = MockRecordSink::new();

        let worker = CrawlWorker::new(0, JobType::Repost, context(queue, fetcher, parser, sink, 500));
        worker
            .process(&Job::Repost {
                tweet_id: "900".to_string(),
                url: "https://s.test/repost/900".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(
            *pushed.lock().unwrap(),
            vec![
                Job::User { uid: "31".to_string() },
                Job::Repost {
                    tweet_id: "900".to_string(),
                    url: "https://s.test/repost/900?page=2".to_string(),
                },
                Job::Repost {
                    tweet_id: "900".to_string(),
                    url: "https://s.test/repost/900?page=3".to_string(),
                },
            ]
        );
    }
}
