use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

/// The five linked kinds of crawl work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    User,
    Timeline,
    Comment,
    Follower,
    Repost,
}

impl JobType {
    pub const ALL: [JobType; 5] = [
        JobType::User,
        JobType::Timeline,
        JobType::Comment,
        JobType::Follower,
        JobType::Repost,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::User => "user",
            JobType::Timeline => "timeline",
            JobType::Comment => "comment",
            JobType::Follower => "follower",
            JobType::Repost => "repost",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(JobType::User),
            "timeline" => Ok(JobType::Timeline),
            "comment" => Ok(JobType::Comment),
            "follower" => Ok(JobType::Follower),
            "repost" => Ok(JobType::Repost),
            other => Err(format!("unknown job type '{other}'")),
        }
    }
}

/// One unit of crawl work. Each variant carries only the payload its
/// fan-out needs; a paginated follow-up is always a new job, never a
/// mutation of an existing one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum Job {
    User { uid: String },
    Timeline { uid: String, url: String },
    Comment { tweet_id: String, url: String },
    Follower { uid: String, url: String },
    Repost { tweet_id: String, url: String },
}

impl Job {
    pub fn job_type(&self) -> JobType {
        match self {
            Job::User { .. } => JobType::User,
            Job::Timeline { .. } => JobType::Timeline,
            Job::Comment { .. } => JobType::Comment,
            Job::Follower { .. } => JobType::Follower,
            Job::Repost { .. } => JobType::Repost,
        }
    }

    /// The entity id this job resumes fan-out for.
    pub fn owner(&self) -> &str {
        match self {
            Job::User { uid } => uid,
            Job::Timeline { uid, .. } => uid,
            Job::Comment { tweet_id, .. } => tweet_id,
            Job::Follower { uid, .. } => uid,
            Job::Repost { tweet_id, .. } => tweet_id,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Job::User { .. } => None,
            Job::Timeline { url, .. }
            | Job::Comment { url, .. }
            | Job::Follower { url, .. }
            | Job::Repost { url, .. } => Some(url),
        }
    }

    /// Whether this job already targets a specific listing page. Page
    /// expansion only ever happens from a non-paginated (page 1) job.
    pub fn is_paginated(&self) -> bool {
        self.url().map_or(false, |u| u.contains("page="))
    }
}

/// Kind half of an [`EntityKey`]. Only users gate re-crawl today; tweets and
/// comments are bounded by page-count clamping instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    User,
}

impl EntityKind {
    fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
        }
    }
}

/// Unique identity of a discoverable entity, the unit of de-duplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityKey {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::User,
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// Per-fetch metadata derived from the originating job.
#[derive(Debug, Clone)]
pub struct PageContext {
    pub owner: String,
    pub paginated: bool,
    pub page_ceiling: u32,
}

impl PageContext {
    pub fn for_job(job: &Job, page_ceiling: u32) -> Self {
        Self {
            owner: job.owner().to_string(),
            paginated: job.is_paginated(),
            page_ceiling,
        }
    }
}

/// A normalized user profile fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub nickname: String,
    pub gender: String,
    pub place: String,
    pub signature: String,
    pub birthday: String,
    pub marriage: String,
    pub edu: String,
    pub work: String,
    pub tags: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<String>,
    pub tweet_num: i64,
    pub fans_num: i64,
    pub follow_num: i64,
}

/// A normalized tweet fact. Counters absent from the source page are
/// recorded as `-1`, never omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TweetInfo {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    pub content: Option<String>,
    pub time: Option<String>,
    pub source: Option<String>,
    pub is_repost: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_tid: Option<String>,
    pub like: i64,
    pub transfer: i64,
    pub comment: i64,
}

/// A normalized comment fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentInfo {
    pub id: String,
    pub tweet_id: String,
    pub user_id: String,
    pub content: String,
    pub pub_time: Option<String>,
    pub source: Option<String>,
}

/// Write-once output unit delivered to the downstream sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Record {
    UserInfo(UserInfo),
    TweetInfo(TweetInfo),
    CommentInfo(CommentInfo),
}

impl Record {
    pub fn kind(&self) -> &'static str {
        match self {
            Record::UserInfo(_) => "user_info",
            Record::TweetInfo(_) => "tweet_info",
            Record::CommentInfo(_) => "comment_info",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Record::UserInfo(u) => &u.id,
            Record::TweetInfo(t) => &t.id,
            Record::CommentInfo(c) => &c.id,
        }
    }
}

/// Builds every URL the harvester visits from the configured site host.
#[derive(Debug, Clone)]
pub struct SiteUrls {
    host: String,
}

impl SiteUrls {
    pub fn new(host: impl Into<String>) -> Self {
        let mut host = host.into();
        while host.ends_with('/') {
            host.pop();
        }
        Self { host }
    }

    pub fn timeline(&self, uid: &str) -> String {
        format!("{}/{}", self.host, uid)
    }

    pub fn timeline_page(&self, uid: &str, page: u32) -> String {
        format!("{}/{}?page={}", self.host, uid, page)
    }

    pub fn followers(&self, uid: &str) -> String {
        format!("{}/{}/follow", self.host, uid)
    }

    pub fn followers_page(&self, uid: &str, page: u32) -> String {
        format!("{}/{}/follow?page={}", self.host, uid, page)
    }

    pub fn comments(&self, tweet_id: &str) -> String {
        format!("{}/comment/{}", self.host, tweet_id)
    }

    pub fn comments_page(&self, tweet_id: &str, page: u32) -> String {
        format!("{}/comment/{}?page={}", self.host, tweet_id, page)
    }

    pub fn reposts(&self, tweet_id: &str) -> String {
        format!("{}/repost/{}", self.host, tweet_id)
    }

    pub fn reposts_page(&self, tweet_id: &str, page: u32) -> String {
        format!("{}/repost/{}?page={}", self.host, tweet_id, page)
    }

    pub fn profile(&self, uid: &str) -> String {
        format!("{}/{}/info", self.host, uid)
    }

    /// The member's homepage, also the profile summary view with the
    /// tweet/fans/follow counters.
    pub fn homepage(&self, uid: &str) -> String {
        format!("{}/{}", self.host, uid)
    }

    /// Resolve a possibly relative link against the site host.
    pub fn absolute(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            return href.to_string();
        }
        match Url::parse(&self.host).and_then(|base| base.join(href)) {
            Ok(url) => url.to_string(),
            Err(_) => format!("{}{}", self.host, href),
        }
    }
}
