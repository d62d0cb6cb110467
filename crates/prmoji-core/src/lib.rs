//! Pure domain logic shared by prmoji crates.
//!
//! Holds the canonical pull-request action vocabulary, GitHub webhook
//! classification, PR URL extraction from chat text, and Slack event envelope
//! parsing. Nothing in this crate performs I/O.

pub mod action;
pub mod github_events;
pub mod pr_urls;
pub mod slack_events;

pub use action::{emoji_for_action, CanonicalAction, Classification};
pub use github_events::classify;
pub use pr_urls::extract_pr_urls;
pub use slack_events::{parse_slack_envelope, SlackEvent, SlackEventEnvelope};
