use anyhow::{anyhow, Result};
use chrono::{Datelike, Duration, Local, NaiveDate, NaiveDateTime};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::cli::config::SiteSettings;
use crate::crawler::job::{CommentInfo, SiteUrls, TweetInfo};
use crate::error::ParseError;
use crate::parse::{
    AccountCounters, CommentEntry, CommentPage, MemberPage, PageParser, ProfileInfo, QuotedTweet,
    TimelinePage, UserRef,
};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Scraper-backed [`PageParser`] for the mobile HTML dialect of the target
/// site: `div.c` rows, `#pagelist` page markers, `like[n]`-style counter
/// tokens and key:value profile fields.
pub struct SitePageParser {
    urls: SiteUrls,
    excluded_badges: Vec<String>,
    sel: Selectors,
    profile_link: Regex,
    comment_id: Regex,
    like: Regex,
    transfer: Regex,
    comment_count: Regex,
    tweet_num: Regex,
    fans_num: Regex,
    follow_num: Regex,
    minutes_ago: Regex,
    today: Regex,
    month_day: Regex,
    nickname: Regex,
    gender: Regex,
    place: Regex,
    signature: Regex,
    birthday: Regex,
    marriage: Regex,
}

struct Selectors {
    member_cell: Selector,
    listing_row: Selector,
    anchor: Selector,
    image: Selector,
    page_input: Selector,
    tweet_row: Selector,
    quoted_tweet: Selector,
    detail: Selector,
    content: Selector,
    meta: Selector,
    repost_marker: Selector,
    source_link: Selector,
    info_section: Selector,
    counters: Selector,
    avatar: Selector,
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("invalid selector `{css}`: {e}"))
}

fn text_of(el: &ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Join an element's text nodes with `;` so field runs terminate no matter
/// how the markup splits them.
fn joined_text(el: &ElementRef) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(";")
}

fn capture_count(re: &Regex, text: &str) -> i64 {
    re.captures(text)
        .and_then(|c| c[1].parse::<i64>().ok())
        .unwrap_or(-1)
}

impl SitePageParser {
    pub fn new(settings: &SiteSettings) -> Result<Self> {
        Ok(Self {
            urls: SiteUrls::new(settings.host.clone()),
            excluded_badges: settings.excluded_badges.clone(),
            sel: Selectors {
                member_cell: selector("td[style]")?,
                listing_row: selector("div.c")?,
                anchor: selector("a")?,
                image: selector("img")?,
                page_input: selector("#pagelist input")?,
                tweet_row: selector("div.c[id]")?,
                quoted_tweet: selector("div#M_")?,
                detail: selector("div.pms")?,
                content: selector("span.ctt")?,
                meta: selector("span.ct")?,
                repost_marker: selector("span.cmt")?,
                source_link: selector("a.cc")?,
                info_section: selector("div.c, div.tip")?,
                counters: selector("div.tip2")?,
                avatar: selector(r#"img[alt="avatar"]"#)?,
            },
            profile_link: Regex::new(r"^(?:https?://[^/]+)?/u/(\d+)/?$")?,
            comment_id: Regex::new(r"^C_\d+$")?,
            like: Regex::new(r"like\[(\d+)\]")?,
            transfer: Regex::new(r"transfer\[(\d+)\]")?,
            comment_count: Regex::new(r"comment\[(\d+)\]")?,
            tweet_num: Regex::new(r"tweet\[(\d+)\]")?,
            fans_num: Regex::new(r"fans\[(\d+)\]")?,
            follow_num: Regex::new(r"follow\[(\d+)\]")?,
            minutes_ago: Regex::new(r"^(\d+)\s*minutes?\s+ago$")?,
            today: Regex::new(r"^today\s*(\d{1,2}):(\d{1,2})$")?,
            month_day: Regex::new(r"^(\d{1,2})-(\d{1,2})\s+(\d{1,2}):(\d{1,2})$")?,
            nickname: Regex::new(r"nickname[:：]([^;]*);")?,
            gender: Regex::new(r"gender[:：]([^;]*);")?,
            place: Regex::new(r"place[:：]([^;]*);")?,
            signature: Regex::new(r"signature[:：]([^;]*);")?,
            birthday: Regex::new(r"birthday[:：]([^;]*);")?,
            marriage: Regex::new(r"marriage[:：]([^;]*);")?,
        })
    }

    /// Classify a member link: an id straight from the profile-link pattern,
    /// or the homepage behind an opaque redirect.
    fn member_ref(&self, href: &str) -> UserRef {
        match self.profile_link.captures(href) {
            Some(c) => UserRef::Direct(c[1].to_string()),
            None => UserRef::Homepage(self.urls.absolute(href)),
        }
    }

    /// Reported page count from the `#pagelist` marker; `None` means a
    /// single-page listing.
    fn max_page(&self, doc: &Html) -> Result<Option<u32>, ParseError> {
        let Some(input) = doc.select(&self.sel.page_input).next() else {
            return Ok(None);
        };
        let value = input
            .value()
            .attr("value")
            .ok_or_else(|| ParseError::malformed("pagelist input without value"))?;
        value
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| ParseError::malformed(format!("unparseable page count '{value}'")))
    }

    /// Split a `span.ct` into (normalized time, source), the source falling
    /// back to "unknown".
    fn split_meta(&self, el: &ElementRef, now: NaiveDateTime) -> (Option<String>, Option<String>) {
        let Some(meta) = el.select(&self.sel.meta).next() else {
            return (None, None);
        };
        let text = text_of(&meta);
        match text.split_once(" from ") {
            Some((time, source)) => (
                Some(self.normalize_timestamp(time, now)),
                Some(source.trim().to_string()),
            ),
            None => (
                Some(self.normalize_timestamp(&text, now)),
                Some("unknown".to_string()),
            ),
        }
    }

    fn is_repost_row(&self, row: &ElementRef) -> bool {
        row.select(&self.sel.repost_marker)
            .any(|m| text_of(&m).starts_with("Repost reason"))
    }

    fn tweet_from_row(&self, row: &ElementRef, uid: &str, now: NaiveDateTime) -> Option<TweetInfo> {
        let id = row.value().attr("id")?.to_string();
        let is_repost = self.is_repost_row(row);
        // Reposted tweets link the original through the comment anchor.
        let source_tid = if is_repost {
            row.select(&self.sel.source_link)
                .next()
                .and_then(|a| a.value().attr("href"))
                .map(|href| href.split('?').next().unwrap_or(href))
                .and_then(|path| path.rsplit('/').next())
                .map(str::to_string)
        } else {
            None
        };
        let content = row.select(&self.sel.content).next().map(|c| text_of(&c));
        let (time, source) = self.split_meta(row, now);
        let body = text_of(row);
        Some(TweetInfo {
            id,
            uid: Some(uid.to_string()),
            content,
            time,
            source,
            is_repost,
            source_tid,
            like: capture_count(&self.like, &body),
            transfer: capture_count(&self.transfer, &body),
            comment: capture_count(&self.comment_count, &body),
        })
    }

    fn quoted_tweet(
        &self,
        doc: &Html,
        tweet_id: &str,
        now: NaiveDateTime,
    ) -> Option<QuotedTweet> {
        let div = doc.select(&self.sel.quoted_tweet).next()?;
        // No author link means nothing worth publishing.
        let author = div
            .select(&self.sel.anchor)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(|href| self.member_ref(href))?;
        let is_repost = self.is_repost_row(&div);
        let (content, time, source) = if is_repost {
            (None, None, None)
        } else {
            let content = div.select(&self.sel.content).next().map(|c| text_of(&c));
            let (time, source) = self.split_meta(&div, now);
            (content, time, source)
        };
        let detail = doc
            .select(&self.sel.detail)
            .next()
            .map(|d| text_of(&d))
            .unwrap_or_default();
        Some(QuotedTweet {
            author,
            info: TweetInfo {
                id: tweet_id.to_string(),
                uid: None,
                content,
                time,
                source,
                is_repost,
                source_tid: None,
                like: capture_count(&self.like, &detail),
                transfer: capture_count(&self.transfer, &detail),
                comment: capture_count(&self.comment_count, &detail),
            },
        })
    }

    /// Relative timestamps become absolute against `now`; anything the three
    /// known shapes don't cover passes through verbatim.
    fn normalize_timestamp(&self, raw: &str, now: NaiveDateTime) -> String {
        let raw = raw.trim();
        if let Some(c) = self.minutes_ago.captures(raw) {
            if let Ok(minutes) = c[1].parse::<i64>() {
                return (now - Duration::minutes(minutes)).format(TIME_FORMAT).to_string();
            }
        }
        if let Some(c) = self.today.captures(raw) {
            if let (Ok(hour), Ok(minute)) = (c[1].parse::<u32>(), c[2].parse::<u32>()) {
                if let Some(ts) = now.date().and_hms_opt(hour, minute, 0) {
                    return ts.format(TIME_FORMAT).to_string();
                }
            }
        }
        if let Some(c) = self.month_day.captures(raw) {
            let fields = (
                c[1].parse::<u32>(),
                c[2].parse::<u32>(),
                c[3].parse::<u32>(),
                c[4].parse::<u32>(),
            );
            if let (Ok(month), Ok(day), Ok(hour), Ok(minute)) = fields {
                if let Some(ts) = NaiveDate::from_ymd_opt(now.year(), month, day)
                    .and_then(|d| d.and_hms_opt(hour, minute, 0))
                {
                    return ts.format(TIME_FORMAT).to_string();
                }
            }
        }
        raw.to_string()
    }

    fn profile_field(&self, re: &Regex, text: &str) -> String {
        re.captures(text)
            .map(|c| c[1].trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

impl PageParser for SitePageParser {
    fn profile(&self, html: &str) -> Result<Option<ProfileInfo>, ParseError> {
        let doc = Html::parse_document(html);
        let sections: Vec<ElementRef> = doc.select(&self.sel.info_section).collect();

        let mut base: Option<&ElementRef> = None;
        let mut edu = String::new();
        let mut work = String::new();
        for (i, div) in sections.iter().enumerate() {
            match text_of(div).as_str() {
                "Basic info" => base = sections.get(i + 1),
                "Education" => {
                    if let Some(d) = sections.get(i + 1) {
                        edu = joined_text(d);
                    }
                }
                "Work" => {
                    if let Some(d) = sections.get(i + 1) {
                        work = joined_text(d);
                    }
                }
                _ => {}
            }
        }

        let (base_text, tags) = match base {
            Some(div) => {
                let tags = div
                    .select(&self.sel.anchor)
                    .map(|a| text_of(&a))
                    .collect::<Vec<_>>()
                    .join(",");
                // Trailing separator so the last field always terminates.
                (format!("{};", joined_text(div)), tags)
            }
            None => (String::new(), String::new()),
        };

        // No nickname field: private or deleted profile.
        let Some(nickname) = self
            .nickname
            .captures(&base_text)
            .map(|c| c[1].trim().to_string())
            .filter(|v| !v.is_empty())
        else {
            return Ok(None);
        };

        let head = doc
            .select(&self.sel.avatar)
            .next()
            .and_then(|img| img.value().attr("src"))
            .map(str::to_string);

        let or_unknown = |s: String| if s.is_empty() { "unknown".to_string() } else { s };
        Ok(Some(ProfileInfo {
            nickname,
            gender: self.profile_field(&self.gender, &base_text),
            place: self.profile_field(&self.place, &base_text),
            signature: self.profile_field(&self.signature, &base_text),
            birthday: self.profile_field(&self.birthday, &base_text),
            marriage: self.profile_field(&self.marriage, &base_text),
            edu: or_unknown(edu),
            work: or_unknown(work),
            tags,
            head,
        }))
    }

    fn account_counters(&self, html: &str) -> Result<AccountCounters, ParseError> {
        let doc = Html::parse_document(html);
        let text = doc
            .select(&self.sel.counters)
            .next()
            .map(|d| text_of(&d))
            .unwrap_or_default();
        Ok(AccountCounters {
            tweet_num: capture_count(&self.tweet_num, &text),
            fans_num: capture_count(&self.fans_num, &text),
            follow_num: capture_count(&self.follow_num, &text),
        })
    }

    fn timeline(&self, html: &str, uid: &str) -> Result<TimelinePage, ParseError> {
        let doc = Html::parse_document(html);
        let now = Local::now().naive_local();
        let mut tweets = Vec::new();
        for row in doc.select(&self.sel.tweet_row) {
            let Some(id) = row.value().attr("id") else {
                continue;
            };
            if !id.starts_with("M_") || id.len() <= 2 {
                continue;
            }
            if let Some(tweet) = self.tweet_from_row(&row, uid, now) {
                tweets.push(tweet);
            }
        }
        Ok(TimelinePage {
            tweets,
            max_page: self.max_page(&doc)?,
        })
    }

    fn comments(&self, html: &str, tweet_id: &str) -> Result<CommentPage, ParseError> {
        let doc = Html::parse_document(html);
        let now = Local::now().naive_local();
        let mut comments = Vec::new();
        for row in doc.select(&self.sel.tweet_row) {
            let Some(id) = row.value().attr("id") else {
                continue;
            };
            if !self.comment_id.is_match(id) {
                continue;
            }
            // Rows without an author link are page chrome, not comments.
            let Some(author) = row
                .select(&self.sel.anchor)
                .next()
                .and_then(|a| a.value().attr("href"))
                .map(|href| self.member_ref(href))
            else {
                continue;
            };
            let content = row
                .select(&self.sel.content)
                .next()
                .map(|c| text_of(&c))
                .unwrap_or_default();
            let (pub_time, source) = self.split_meta(&row, now);
            comments.push(CommentEntry {
                author,
                info: CommentInfo {
                    id: id.to_string(),
                    tweet_id: tweet_id.to_string(),
                    user_id: "unknown".to_string(),
                    content,
                    pub_time,
                    source,
                },
            });
        }
        Ok(CommentPage {
            comments,
            quoted: self.quoted_tweet(&doc, tweet_id, now),
            max_page: self.max_page(&doc)?,
        })
    }

    fn followers(&self, html: &str) -> Result<MemberPage, ParseError> {
        let doc = Html::parse_document(html);
        let mut members = Vec::new();
        for cell in doc.select(&self.sel.member_cell) {
            let Some(href) = cell
                .select(&self.sel.anchor)
                .next()
                .and_then(|a| a.value().attr("href"))
            else {
                continue;
            };
            // Badge images sit on the enclosing row; marked accounts are out
            // of crawl scope.
            if let Some(row) = cell.parent().and_then(ElementRef::wrap) {
                let badged = row
                    .select(&self.sel.image)
                    .filter_map(|img| img.value().attr("src"))
                    .any(|src| self.excluded_badges.iter().any(|b| src.ends_with(b.as_str())));
                if badged {
                    debug!("member {} excluded by badge", href);
                    continue;
                }
            }
            members.push(self.member_ref(href));
        }
        Ok(MemberPage {
            members,
            max_page: self.max_page(&doc)?,
        })
    }

    fn reposts(&self, html: &str) -> Result<MemberPage, ParseError> {
        let doc = Html::parse_document(html);
        let mut members = Vec::new();
        // Repost rows carry no stable ids; only direct profile links are
        // trusted here.
        for row in doc.select(&self.sel.listing_row) {
            let Some(href) = row
                .select(&self.sel.anchor)
                .next()
                .and_then(|a| a.value().attr("href"))
            else {
                continue;
            };
            if let Some(c) = self.profile_link.captures(href) {
                members.push(UserRef::Direct(c[1].to_string()));
            }
        }
        Ok(MemberPage {
            members,
            max_page: self.max_page(&doc)?,
        })
    }

    fn member_uid(&self, html: &str) -> Result<Option<String>, ParseError> {
        let doc = Html::parse_document(html);
        for a in doc.select(&self.sel.anchor) {
            if text_of(&a) != "Profile" {
                continue;
            }
            let Some(href) = a.value().attr("href") else {
                continue;
            };
            // Hrefs may be absolute; only the path holds the id.
            let path = match href.split_once("://") {
                Some((_, rest)) => rest.split_once('/').map_or("", |(_, p)| p),
                None => href.trim_start_matches('/'),
            };
            let uid = path.split('/').next().unwrap_or("");
            if !uid.is_empty() && uid.bytes().all(|b| b.is_ascii_digit()) {
                return Ok(Some(uid.to_string()));
            }
        }
        Ok(None)
    }
}
