//! Slack Web API reaction client.
//!
//! Exposes the [`ReactionApi`] seam used by the dispatcher and its HTTP
//! implementation backed by `reactions.add`.

mod reactions_client;

pub use reactions_client::{
    ReactionApi, ReactionOutcome, SlackApiError, SlackReactionClient, DEFAULT_SLACK_API_BASE,
};
