use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Pull-request lifecycle events that produce a reaction.
pub enum CanonicalAction {
    Commented,
    Approved,
    ChangesRequested,
    Merged,
    Closed,
}

impl CanonicalAction {
    pub fn as_str(self) -> &'static str {
        match self {
            CanonicalAction::Commented => "commented",
            CanonicalAction::Approved => "approved",
            CanonicalAction::ChangesRequested => "changes_requested",
            CanonicalAction::Merged => "merged",
            CanonicalAction::Closed => "closed",
        }
    }

    /// Terminal actions end the PR lifecycle and clear its mappings.
    pub fn is_terminal(self) -> bool {
        matches!(self, CanonicalAction::Merged | CanonicalAction::Closed)
    }
}

impl fmt::Display for CanonicalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Canonical result of classifying one webhook delivery.
pub struct Classification {
    pub action: CanonicalAction,
    pub pr_url: String,
    pub commenter: Option<String>,
}

impl Classification {
    pub fn new(action: CanonicalAction, pr_url: impl Into<String>) -> Self {
        Self {
            action,
            pr_url: pr_url.into(),
            commenter: None,
        }
    }

    pub fn with_commenter(mut self, commenter: impl Into<String>) -> Self {
        let commenter = commenter.into();
        self.commenter = if commenter.is_empty() {
            None
        } else {
            Some(commenter)
        };
        self
    }
}

/// Returns the Slack emoji name posted for `action`.
///
/// The match is exhaustive so a new action cannot be added without choosing
/// its emoji; `speech_balloon` doubles as the neutral default.
pub fn emoji_for_action(action: CanonicalAction) -> &'static str {
    match action {
        CanonicalAction::Commented => "speech_balloon",
        CanonicalAction::Approved => "white_check_mark",
        CanonicalAction::ChangesRequested => "no_entry",
        CanonicalAction::Merged => "pr-merged",
        CanonicalAction::Closed => "wastebasket",
    }
}
