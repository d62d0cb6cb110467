//! GitHub webhook classification into the canonical action vocabulary.
//!
//! Each supported event kind decodes only the fields it needs. Malformed
//! payloads, unknown kinds and irrelevant sub-actions all classify as `None`;
//! webhook senders never see an error for a payload we do not care about.

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::action::{CanonicalAction, Classification};

const ISSUE_COMMENT_EVENT: &str = "issue_comment";
const PULL_REQUEST_REVIEW_EVENT: &str = "pull_request_review";
const PULL_REQUEST_EVENT: &str = "pull_request";

#[derive(Debug, Default, Deserialize)]
struct GitHubUser {
    #[serde(default)]
    login: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PullRequestLink {
    #[serde(default)]
    html_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct IssueCommentIssue {
    #[serde(default)]
    pull_request: Option<PullRequestLink>,
}

#[derive(Debug, Default, Deserialize)]
struct IssueCommentBody {
    #[serde(default)]
    user: Option<GitHubUser>,
}

#[derive(Debug, Deserialize)]
struct IssueCommentPayload {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    issue: Option<IssueCommentIssue>,
    #[serde(default)]
    comment: Option<IssueCommentBody>,
}

#[derive(Debug, Default, Deserialize)]
struct Review {
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    user: Option<GitHubUser>,
}

#[derive(Debug, Deserialize)]
struct PullRequestReviewPayload {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    review: Option<Review>,
    #[serde(default)]
    pull_request: Option<PullRequestLink>,
}

#[derive(Debug, Default, Deserialize)]
struct PullRequestState {
    #[serde(default)]
    merged: Option<bool>,
    #[serde(default)]
    html_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    pull_request: Option<PullRequestState>,
}

/// Classifies a webhook delivery identified by its `X-GitHub-Event` value.
pub fn classify(event_kind: &str, payload: &[u8]) -> Option<Classification> {
    match event_kind.trim().to_ascii_lowercase().as_str() {
        ISSUE_COMMENT_EVENT => classify_issue_comment(payload),
        PULL_REQUEST_REVIEW_EVENT => classify_pull_request_review(payload),
        PULL_REQUEST_EVENT => classify_pull_request(payload),
        _ => None,
    }
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> Option<T> {
    serde_json::from_slice(payload).ok()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.is_empty())
}

fn login_of(user: Option<GitHubUser>) -> String {
    user.and_then(|user| user.login).unwrap_or_default()
}

fn classify_issue_comment(payload: &[u8]) -> Option<Classification> {
    let event: IssueCommentPayload = decode(payload)?;
    if event.action.as_deref() != Some("created") {
        return None;
    }
    let pr_url = non_empty(
        event
            .issue
            .and_then(|issue| issue.pull_request)
            .and_then(|link| link.html_url),
    )?;
    let commenter = login_of(event.comment.and_then(|comment| comment.user));
    Some(Classification::new(CanonicalAction::Commented, pr_url).with_commenter(commenter))
}

fn classify_pull_request_review(payload: &[u8]) -> Option<Classification> {
    let event: PullRequestReviewPayload = decode(payload)?;
    if event.action.as_deref() != Some("submitted") {
        return None;
    }
    let pr_url = non_empty(event.pull_request.and_then(|link| link.html_url))?;
    let review = event.review.unwrap_or_default();
    let action = match review
        .state
        .as_deref()
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("commented") => CanonicalAction::Commented,
        Some("approved") => CanonicalAction::Approved,
        Some("changes_requested") => CanonicalAction::ChangesRequested,
        _ => return None,
    };
    Some(Classification::new(action, pr_url).with_commenter(login_of(review.user)))
}

fn classify_pull_request(payload: &[u8]) -> Option<Classification> {
    let event: PullRequestPayload = decode(payload)?;
    if event.action.as_deref() != Some("closed") {
        return None;
    }
    let pull_request = event.pull_request?;
    let pr_url = non_empty(pull_request.html_url)?;
    let action = if pull_request.merged.unwrap_or(false) {
        CanonicalAction::Merged
    } else {
        CanonicalAction::Closed
    };
    Some(Classification::new(action, pr_url))
}
