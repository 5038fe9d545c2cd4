//! Post filtering.
//!
//! A [`FilterRule`] is a set of ANDed clauses; empty clauses always pass. The
//! global rule and a subject's own rule are evaluated in that order and a post
//! has to pass both.

use crate::types::PostDetail;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Filter clauses for a set of posts
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    /// Title must contain at least one of these (case-insensitive); empty = any title
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,

    /// Title must contain none of these (case-insensitive)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_keywords: Vec<String>,

    /// Only posts published after this date (`YYYY-MM-DD`, exclusive)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_after: Option<String>,

    /// Only posts published before this date (`YYYY-MM-DD`, exclusive)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_before: Option<String>,

    /// Post must carry at least one file of any kind
    #[serde(default)]
    pub require_files: bool,

    /// Post must carry at least one preview image
    #[serde(default)]
    pub require_images: bool,

    /// Post must carry at least one video
    #[serde(default)]
    pub require_videos: bool,

    /// Post must carry at least one attachment
    #[serde(default)]
    pub require_attachments: bool,
}

/// The clause a post failed
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// None of the allow-list keywords matched
    NoKeywordMatch,
    /// A deny-list keyword matched
    ExcludedKeyword(String),
    /// Published on or before `date_after`
    TooOld(String),
    /// Published on or after `date_before`
    TooNew(String),
    /// Post has no files
    NoFiles,
    /// Post has no preview images
    NoImages,
    /// Post has no videos
    NoVideos,
    /// Post has no attachments
    NoAttachments,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NoKeywordMatch => write!(f, "no keyword matched"),
            Rejection::ExcludedKeyword(k) => write!(f, "excluded keyword '{k}'"),
            Rejection::TooOld(d) => write!(f, "published {d}, not after date_after"),
            Rejection::TooNew(d) => write!(f, "published {d}, not before date_before"),
            Rejection::NoFiles => write!(f, "no files"),
            Rejection::NoImages => write!(f, "no images"),
            Rejection::NoVideos => write!(f, "no videos"),
            Rejection::NoAttachments => write!(f, "no attachments"),
        }
    }
}

impl FilterRule {
    /// True when no clause restricts anything
    pub fn is_empty(&self) -> bool {
        *self == FilterRule::default()
    }

    /// First failing clause, or None if the post passes
    pub fn rejection(&self, post: &PostDetail) -> Option<Rejection> {
        let title = post.post.title.to_lowercase();

        if !self.keywords.is_empty()
            && !self
                .keywords
                .iter()
                .any(|k| title.contains(&k.to_lowercase()))
        {
            return Some(Rejection::NoKeywordMatch);
        }

        if let Some(k) = self
            .exclude_keywords
            .iter()
            .find(|k| title.contains(&k.to_lowercase()))
        {
            return Some(Rejection::ExcludedKeyword(k.clone()));
        }

        // Missing or unparseable publish dates pass the date clauses.
        if let Some(published) = post.post.published {
            let date = published.format("%Y-%m-%d").to_string();
            if let Some(after) = self.date_after.as_deref().map(str::trim)
                && !after.is_empty()
                && date.as_str() <= after
            {
                return Some(Rejection::TooOld(date));
            }
            if let Some(before) = self.date_before.as_deref().map(str::trim)
                && !before.is_empty()
                && date.as_str() >= before
            {
                return Some(Rejection::TooNew(date));
            }
        }

        if self.require_files && !post.has_any_media() {
            return Some(Rejection::NoFiles);
        }
        if self.require_images && post.previews.is_empty() {
            return Some(Rejection::NoImages);
        }
        if self.require_videos && post.videos.is_empty() {
            return Some(Rejection::NoVideos);
        }
        if self.require_attachments && post.attachments.is_empty() {
            return Some(Rejection::NoAttachments);
        }

        None
    }

    /// True when the post passes every clause
    pub fn matches(&self, post: &PostDetail) -> bool {
        self.rejection(post).is_none()
    }

    /// Warn about date bounds that are not `YYYY-MM-DD`
    pub fn check_dates(&self) {
        for (name, value) in [("date_after", &self.date_after), ("date_before", &self.date_before)] {
            if let Some(v) = value
                && chrono::NaiveDate::parse_from_str(v.trim(), "%Y-%m-%d").is_err()
            {
                warn!(clause = name, value = %v, "Filter date is not YYYY-MM-DD, comparing as text");
            }
        }
    }
}

/// Evaluates the global rule together with a subject's own rule
#[derive(Clone, Debug, Default)]
pub struct PostFilter {
    global: FilterRule,
}

impl PostFilter {
    /// Create a filter around the global rule
    pub fn new(global: FilterRule) -> Self {
        global.check_dates();
        Self { global }
    }

    /// The global rule
    pub fn global(&self) -> &FilterRule {
        &self.global
    }

    /// Decide whether a post should be downloaded
    ///
    /// When `global_enabled` is set the global rule is checked first and any
    /// failure short-circuits; then the subject rule, if given, is checked the
    /// same way.
    pub fn should_download(
        &self,
        post: &PostDetail,
        subject_rule: Option<&FilterRule>,
        global_enabled: bool,
    ) -> bool {
        if global_enabled && let Some(reason) = self.global.rejection(post) {
            debug!(post_id = %post.post.id, title = %post.post.title, %reason, "Post rejected by global filter");
            return false;
        }

        if let Some(rule) = subject_rule
            && let Some(reason) = rule.rejection(post)
        {
            debug!(post_id = %post.post.id, title = %post.post.title, %reason, "Post rejected by subject filter");
            return false;
        }

        true
    }
}
