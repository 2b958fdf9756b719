//! Feed path construction and feed name validation
//!
//! Broker topics for feeds follow `{account}/feeds/{feed}`. A call site that
//! does not name a feed gets the configured default; the resolved feed name
//! is never empty.

use thiserror::Error;

/// Resolve which feed a publish goes to, substituting the default for a
/// missing or blank feed name.
pub fn resolve_feed_name<'a>(feed: Option<&'a str>, default_feed: &'a str) -> &'a str {
    match feed.map(str::trim) {
        Some(name) if !name.is_empty() => name,
        _ => default_feed.trim(),
    }
}

/// Build the broker topic for a feed
pub fn feed_topic(account: &str, feed: &str) -> String {
    format!("{account}/feeds/{feed}")
}

/// Resolve and validate a feed, returning the full broker topic
pub fn resolve_feed_topic(
    account: &str,
    feed: Option<&str>,
    default_feed: &str,
) -> Result<String, FeedError> {
    let name = resolve_feed_name(feed, default_feed);
    validate_feed_name(name)?;
    Ok(feed_topic(account, name))
}

pub fn validate_feed_name(feed: &str) -> Result<(), FeedError> {
    if feed.trim().is_empty() {
        return Err(FeedError::EmptyFeed);
    }

    for ch in feed.chars() {
        if matches!(ch, '/' | '+' | '#') || ch.is_control() {
            return Err(FeedError::InvalidFeedChar {
                feed: feed.to_string(),
                ch,
            });
        }
    }

    Ok(())
}

#[derive(Debug, Error, PartialEq)]
pub enum FeedError {
    #[error("Feed name cannot be empty")]
    EmptyFeed,
    #[error("Feed name '{feed}' contains invalid character: {ch:?}")]
    InvalidFeedChar { feed: String, ch: char },
}
