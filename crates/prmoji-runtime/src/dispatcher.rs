//! Reaction dispatch for classified GitHub events.

use std::sync::Arc;

use prmoji_core::{emoji_for_action, CanonicalAction, Classification};
use prmoji_slack::{ReactionApi, ReactionOutcome};
use prmoji_store::{MappingStore, MappingStoreError};
use thiserror::Error;

use crate::ignore_list::IgnoredCommenters;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to list mappings for {pr_url}: {source}")]
    ListMappings {
        pr_url: String,
        #[source]
        source: MappingStoreError,
    },
    #[error("failed to delete mappings for {pr_url}: {source}")]
    DeleteMappings {
        pr_url: String,
        #[source]
        source: MappingStoreError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub emoji: &'static str,
    pub mappings: usize,
    pub reactions_succeeded: usize,
    pub reactions_failed: usize,
    /// Rows removed by terminal-action cleanup; `None` for non-terminal actions.
    pub mappings_deleted: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The commenter is on the ignore list; nothing was read or written.
    Suppressed { commenter: String },
    /// No chat message ever referenced the PR.
    NoMappings { emoji: &'static str },
    Reacted(DispatchReport),
}

/// Applies one classification to every message that mentioned its PR.
pub struct ReactionDispatcher {
    store: Arc<dyn MappingStore>,
    reactions: Arc<dyn ReactionApi>,
    ignored_commenters: IgnoredCommenters,
}

impl ReactionDispatcher {
    pub fn new(
        store: Arc<dyn MappingStore>,
        reactions: Arc<dyn ReactionApi>,
        ignored_commenters: IgnoredCommenters,
    ) -> Self {
        Self {
            store,
            reactions,
            ignored_commenters,
        }
    }

    pub fn ignored_commenters(&self) -> &IgnoredCommenters {
        &self.ignored_commenters
    }

    fn suppressed_commenter(&self, classification: &Classification) -> Option<String> {
        if classification.action != CanonicalAction::Commented {
            return None;
        }
        let commenter = classification.commenter.as_deref()?;
        if self.ignored_commenters.contains(commenter) {
            Some(commenter.trim().to_lowercase())
        } else {
            None
        }
    }

    #[tracing::instrument(
        name = "prmoji.dispatch",
        skip(self, classification),
        fields(action = %classification.action, pr_url = %classification.pr_url)
    )]
    pub async fn dispatch(
        &self,
        classification: &Classification,
    ) -> Result<DispatchOutcome, DispatchError> {
        if let Some(commenter) = self.suppressed_commenter(classification) {
            tracing::info!(commenter = %commenter, "suppressed comment reaction");
            return Ok(DispatchOutcome::Suppressed { commenter });
        }

        let pr_url = classification.pr_url.as_str();
        let emoji = emoji_for_action(classification.action);
        let mappings = self.store.list_by_pr_url(pr_url).await.map_err(|source| {
            DispatchError::ListMappings {
                pr_url: pr_url.to_string(),
                source,
            }
        })?;
        if mappings.is_empty() {
            tracing::debug!("no messages reference this pull request");
            return Ok(DispatchOutcome::NoMappings { emoji });
        }

        let mut reactions_succeeded = 0_usize;
        let mut reactions_failed = 0_usize;
        for mapping in &mappings {
            match self
                .reactions
                .add_reaction(&mapping.channel, &mapping.message_timestamp, emoji)
                .await
            {
                Ok(ReactionOutcome::Added) => {
                    reactions_succeeded += 1;
                }
                Ok(ReactionOutcome::AlreadyReacted) => {
                    tracing::debug!(
                        channel = %mapping.channel,
                        ts = %mapping.message_timestamp,
                        emoji,
                        "reaction already present"
                    );
                    reactions_succeeded += 1;
                }
                Ok(ReactionOutcome::MessageNotFound) => {
                    tracing::warn!(
                        channel = %mapping.channel,
                        ts = %mapping.message_timestamp,
                        emoji,
                        "message not found"
                    );
                    reactions_succeeded += 1;
                }
                Err(error) => {
                    tracing::error!(
                        channel = %mapping.channel,
                        ts = %mapping.message_timestamp,
                        emoji,
                        error = %error,
                        "add reaction failed"
                    );
                    reactions_failed += 1;
                }
            }
        }

        // Cleanup runs even when some reactions failed.
        let mappings_deleted = if classification.action.is_terminal() {
            let deleted = self.store.delete_by_pr_url(pr_url).await.map_err(|source| {
                DispatchError::DeleteMappings {
                    pr_url: pr_url.to_string(),
                    source,
                }
            })?;
            Some(deleted)
        } else {
            None
        };

        let report = DispatchReport {
            emoji,
            mappings: mappings.len(),
            reactions_succeeded,
            reactions_failed,
            mappings_deleted,
        };
        tracing::info!(
            messages = report.mappings,
            failed = report.reactions_failed,
            deleted = report.mappings_deleted.unwrap_or(0),
            "processed github event"
        );
        Ok(DispatchOutcome::Reacted(report))
    }
}
