//! Slack `reactions.add` client and its result classification.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_SLACK_API_BASE: &str = "https://slack.com/api";
const REACTIONS_ADD_METHOD: &str = "reactions.add";
const ALREADY_REACTED_ERROR: &str = "already_reacted";
const MESSAGE_NOT_FOUND_ERROR: &str = "message_not_found";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Successful end states of a reaction request.
pub enum ReactionOutcome {
    Added,
    AlreadyReacted,
    MessageNotFound,
}

#[derive(Debug, Error)]
pub enum SlackApiError {
    #[error("failed to create slack api client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    #[error("slack api {operation} request failed: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("slack api {operation} failed with status {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("failed to decode slack {operation} response: {source}")]
    Decode {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("slack {operation} failed: {code}")]
    Api {
        operation: &'static str,
        code: String,
    },
}

/// Adds an emoji reaction to one Slack message.
#[async_trait]
pub trait ReactionApi: Send + Sync {
    async fn add_reaction(
        &self,
        channel: &str,
        timestamp: &str,
        emoji: &str,
    ) -> Result<ReactionOutcome, SlackApiError>;
}

#[derive(Debug, Clone, Deserialize)]
struct SlackReactionResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Clone)]
pub struct SlackReactionClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
}

impl std::fmt::Debug for SlackReactionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackReactionClient")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl SlackReactionClient {
    pub fn new(
        api_base: String,
        bot_token: String,
        request_timeout_ms: u64,
    ) -> Result<Self, SlackApiError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("prmoji"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .map_err(SlackApiError::ClientBuild)?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.trim().to_string(),
        })
    }
}

#[async_trait]
impl ReactionApi for SlackReactionClient {
    async fn add_reaction(
        &self,
        channel: &str,
        timestamp: &str,
        emoji: &str,
    ) -> Result<ReactionOutcome, SlackApiError> {
        tracing::debug!(channel, ts = timestamp, emoji, "adding reaction");
        let transport = |source| SlackApiError::Transport {
            operation: REACTIONS_ADD_METHOD,
            source,
        };
        let response = self
            .http
            .post(format!("{}/{REACTIONS_ADD_METHOD}", self.api_base))
            .bearer_auth(&self.bot_token)
            .form(&[("channel", channel), ("timestamp", timestamp), ("name", emoji)])
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let body = response.text().await.map_err(transport)?;
        if !status.is_success() {
            return Err(SlackApiError::Status {
                operation: REACTIONS_ADD_METHOD,
                status: status.as_u16(),
                body: truncate_for_error(&body, 800),
            });
        }

        let parsed: SlackReactionResponse =
            serde_json::from_str(&body).map_err(|source| SlackApiError::Decode {
                operation: REACTIONS_ADD_METHOD,
                source,
            })?;
        classify_reaction_response(parsed)
    }
}

fn classify_reaction_response(
    response: SlackReactionResponse,
) -> Result<ReactionOutcome, SlackApiError> {
    if response.ok {
        return Ok(ReactionOutcome::Added);
    }
    match response.error.as_deref() {
        Some(ALREADY_REACTED_ERROR) => Ok(ReactionOutcome::AlreadyReacted),
        Some(MESSAGE_NOT_FOUND_ERROR) => Ok(ReactionOutcome::MessageNotFound),
        Some(code) if !code.trim().is_empty() => Err(SlackApiError::Api {
            operation: REACTIONS_ADD_METHOD,
            code: code.to_string(),
        }),
        _ => Err(SlackApiError::Api {
            operation: REACTIONS_ADD_METHOD,
            code: "unknown error".to_string(),
        }),
    }
}

fn truncate_for_error(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated = text.chars().take(max_chars).collect::<String>();
    truncated.push_str("...");
    truncated
}
