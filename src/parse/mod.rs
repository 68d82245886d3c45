pub mod site;

pub use site::SitePageParser;

use crate::crawler::job::{CommentInfo, TweetInfo, UserInfo};
use crate::error::ParseError;

/// A member discovered on a listing page: either an id straight from a
/// profile link, or the member's homepage when the listing only carries an
/// opaque redirect (resolved by the worker with a secondary fetch).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserRef {
    Direct(String),
    Homepage(String),
}

/// tweet/fans/follow counters from the profile summary view; `-1` when the
/// view does not report one.
#[derive(Debug, Clone, Default)]
pub struct AccountCounters {
    pub tweet_num: i64,
    pub fans_num: i64,
    pub follow_num: i64,
}

/// Fields extracted from a profile page. Present only when the page carries
/// a nickname; a profile without one is private or deleted.
#[derive(Debug, Clone, Default)]
pub struct ProfileInfo {
    pub nickname: String,
    pub gender: String,
    pub place: String,
    pub signature: String,
    pub birthday: String,
    pub marriage: String,
    pub edu: String,
    pub work: String,
    pub tags: String,
    pub head: Option<String>,
}

impl ProfileInfo {
    pub fn into_record(self, uid: &str, counters: AccountCounters) -> UserInfo {
        UserInfo {
            id: uid.to_string(),
            nickname: self.nickname,
            gender: self.gender,
            place: self.place,
            signature: self.signature,
            birthday: self.birthday,
            marriage: self.marriage,
            edu: self.edu,
            work: self.work,
            tags: self.tags,
            head: self.head,
            tweet_num: counters.tweet_num,
            fans_num: counters.fans_num,
            follow_num: counters.follow_num,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TimelinePage {
    pub tweets: Vec<TweetInfo>,
    pub max_page: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct MemberPage {
    pub members: Vec<UserRef>,
    pub max_page: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct CommentEntry {
    pub author: UserRef,
    pub info: CommentInfo,
}

/// The original tweet embedded at the top of a comment thread, with its
/// aggregate counters.
#[derive(Debug, Clone)]
pub struct QuotedTweet {
    pub author: UserRef,
    pub info: TweetInfo,
}

#[derive(Debug, Clone, Default)]
pub struct CommentPage {
    pub comments: Vec<CommentEntry>,
    pub quoted: Option<QuotedTweet>,
    pub max_page: Option<u32>,
}

/// Pure HTML-to-entities capability. No I/O; one method per page shape the
/// crawl visits.
#[cfg_attr(test, mockall::automock)]
pub trait PageParser: Send + Sync {
    /// Profile page. `Ok(None)` means no nickname field was present.
    fn profile(&self, html: &str) -> Result<Option<ProfileInfo>, ParseError>;

    /// Profile summary view with the aggregate account counters.
    fn account_counters(&self, html: &str) -> Result<AccountCounters, ParseError>;

    fn timeline(&self, html: &str, uid: &str) -> Result<TimelinePage, ParseError>;

    fn comments(&self, html: &str, tweet_id: &str) -> Result<CommentPage, ParseError>;

    fn followers(&self, html: &str) -> Result<MemberPage, ParseError>;

    fn reposts(&self, html: &str) -> Result<MemberPage, ParseError>;

    /// Recover a member id from their homepage (opaque-redirect case).
    fn member_uid(&self, html: &str) -> Result<Option<String>, ParseError>;
}
