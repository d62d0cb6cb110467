//! Pull-request URL extraction from free-form chat text.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

const PR_URL_PATTERN: &str = r"https://github\.com/[^/\s]+/[^/\s]+/pull/\d+";

fn pr_url_regex() -> &'static Regex {
    static PR_URL_REGEX: OnceLock<Regex> = OnceLock::new();
    PR_URL_REGEX.get_or_init(|| Regex::new(PR_URL_PATTERN).expect("valid PR URL pattern"))
}

/// Returns the distinct github.com pull-request URLs in `text`, in first-seen order.
///
/// Matches stop at the PR number, so trailing query strings, fragments or
/// Slack link labels collapse onto the bare URL.
pub fn extract_pr_urls(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let mut seen = HashSet::new();
    pr_url_regex()
        .find_iter(text)
        .map(|found| found.as_str())
        .filter(|url| seen.insert(*url))
        .map(str::to_string)
        .collect()
}
