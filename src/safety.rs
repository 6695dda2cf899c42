//! Safety filter - pre-execution guard against destructive actions
//!
//! Runs before any DOM interaction. Clicks whose target reads like a
//! destructive operation are blocked, as is any navigation that would leave
//! the run's starting origin. A rejection becomes a failed action record;
//! it never ends the run.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use url::Url;

use crate::resolve::ResolvedTarget;

/// Vocabulary of destructive intent, matched case-insensitively on word
/// boundaries against the target's combined text, href and selector.
static DESTRUCTIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)\b(
            delete | remove | destroy | drop |
            log[\s-]?out | sign[\s-]?out |
            deactivate | close[\s-]account | unsubscribe |
            check[\s-]?out | purchase | pay | buy
        )\b",
    )
    .expect("destructive vocabulary regex is valid")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SafetyBlock {
    #[error("blocked: target \"{target}\" matches destructive vocabulary (\"{word}\")")]
    DestructiveClick { target: String, word: String },

    #[error("blocked: navigation to {destination} leaves origin {origin}")]
    CrossOrigin { destination: String, origin: String },

    #[error("blocked: navigation target \"{0}\" is not a resolvable URL")]
    UnresolvableDestination(String),
}

/// Return the first destructive-vocabulary word in `text`, if any.
pub fn destructive_match(text: &str) -> Option<String> {
    DESTRUCTIVE
        .find(text)
        .map(|m| m.as_str().to_ascii_lowercase())
}

/// Gate a click on its resolved target. Text, href and the selector itself
/// all count: a trash-can icon button often has no text but a telling
/// `#delete-row` id.
pub fn check_click(target: &ResolvedTarget) -> Result<(), SafetyBlock> {
    let haystack = [
        target.text.as_deref(),
        target.href.as_deref(),
        Some(target.selector.as_str()),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" ");

    match destructive_match(&haystack) {
        Some(word) => Err(SafetyBlock::DestructiveClick {
            target: target.description.clone(),
            word,
        }),
        None => Ok(()),
    }
}

/// Gate a navigation decision against the run's starting origin.
///
/// Relative destinations resolve against the start URL and always stay in
/// origin. Origin comparison only - same-origin paths are never inspected
/// (logout links are caught by the click vocabulary instead).
pub fn check_navigation(start: &Url, destination: &str) -> Result<Url, SafetyBlock> {
    let resolved = start
        .join(destination)
        .map_err(|_| SafetyBlock::UnresolvableDestination(destination.to_string()))?;

    if resolved.origin() != start.origin() {
        return Err(SafetyBlock::CrossOrigin {
            destination: resolved.to_string(),
            origin: start.origin().ascii_serialization(),
        });
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn target(text: Option<&str>, href: Option<&str>, selector: &str) -> ResolvedTarget {
        ResolvedTarget {
            selector: selector.to_string(),
            description: text.unwrap_or(selector).to_string(),
            text: text.map(str::to_string),
            href: href.map(str::to_string),
            secret: false,
            signature: String::new(),
        }
    }

    #[test]
    fn destructive_words_match_on_boundaries() {
        assert_eq!(destructive_match("Delete account"), Some("delete".into()));
        assert_eq!(destructive_match("Sign out"), Some("sign out".into()));
        assert_eq!(destructive_match("LOGOUT"), Some("logout".into()));
        assert_eq!(destructive_match("Proceed to checkout"), Some("checkout".into()));
        // Substrings inside larger words do not count.
        assert_eq!(destructive_match("dropdown menu"), None);
        assert_eq!(destructive_match("paycheck summary"), None);
        assert_eq!(destructive_match("removed items report"), None);
    }

    #[test]
    fn click_blocked_by_text_href_or_selector() {
        assert!(check_click(&target(Some("Delete"), None, "#btn")).is_err());
        assert!(check_click(&target(None, Some("/account/logout"), "a")).is_err());
        assert!(check_click(&target(None, None, "#delete-row")).is_err());
        assert!(check_click(&target(Some("Save draft"), None, "#save")).is_ok());
    }

    #[test]
    fn navigation_same_origin_passes() {
        let start = Url::parse("https://app.test/home").expect("url");
        let resolved = check_navigation(&start, "/settings").expect("same origin");
        assert_eq!(resolved.as_str(), "https://app.test/settings");
        assert!(check_navigation(&start, "https://app.test/other").is_ok());
    }

    #[test]
    fn navigation_cross_origin_blocked() {
        let start = Url::parse("https://app.test/home").expect("url");
        let err = check_navigation(&start, "https://evil.test/").expect_err("blocked");
        assert!(matches!(err, SafetyBlock::CrossOrigin { .. }));
        // Different port is a different origin.
        assert!(check_navigation(&start, "https://app.test:8443/").is_err());
        // Different scheme is a different origin.
        assert!(check_navigation(&start, "http://app.test/").is_err());
    }

    #[test]
    fn same_origin_logout_path_is_not_navigation_filtered() {
        let start = Url::parse("https://app.test/home").expect("url");
        assert!(check_navigation(&start, "/logout").is_ok());
    }
}
