use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Commenters whose `Commented` events never produce a reaction.
///
/// Entries and lookups are trimmed and lowercased; blank entries are dropped.
pub struct IgnoredCommenters {
    logins: BTreeSet<String>,
}

fn normalize_login(login: &str) -> String {
    login.trim().to_lowercase()
}

impl IgnoredCommenters {
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let logins = entries
            .into_iter()
            .map(|entry| normalize_login(entry.as_ref()))
            .filter(|entry| !entry.is_empty())
            .collect();
        Self { logins }
    }

    /// Parses a raw comma-separated list such as `IGNORED_COMMENTERS`.
    pub fn parse(raw: &str) -> Self {
        Self::from_entries(raw.split(','))
    }

    pub fn contains(&self, commenter: &str) -> bool {
        let commenter = normalize_login(commenter);
        !commenter.is_empty() && self.logins.contains(&commenter)
    }

    pub fn is_empty(&self) -> bool {
        self.logins.is_empty()
    }

    pub fn len(&self) -> usize {
        self.logins.len()
    }
}
