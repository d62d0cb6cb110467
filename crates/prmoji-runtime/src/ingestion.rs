//! Chat message ingestion into the mapping store.

use prmoji_core::{extract_pr_urls, SlackEvent};
use prmoji_store::MappingStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub pr_urls: Vec<String>,
    pub stored: usize,
    pub failed: usize,
}

/// Records one mapping per distinct PR URL found in a Slack message.
///
/// Events missing text, channel or timestamp are discarded. A failed insert is
/// logged and the remaining URLs are still attempted.
pub async fn ingest_chat_message(store: &dyn MappingStore, event: &SlackEvent) -> IngestReport {
    if !event.is_ingestible() {
        tracing::debug!(
            channel = %event.channel,
            ts = %event.event_ts,
            "discarding slack event without text, channel or timestamp"
        );
        return IngestReport::default();
    }

    let pr_urls = extract_pr_urls(&event.text);
    if pr_urls.is_empty() {
        tracing::debug!(channel = %event.channel, "no pull request urls in message");
        return IngestReport::default();
    }

    let mut report = IngestReport {
        pr_urls: Vec::with_capacity(pr_urls.len()),
        stored: 0,
        failed: 0,
    };
    for pr_url in pr_urls {
        match store.insert(&pr_url, &event.channel, &event.event_ts).await {
            Ok(()) => report.stored += 1,
            Err(error) => {
                tracing::error!(
                    pr_url = %pr_url,
                    channel = %event.channel,
                    ts = %event.event_ts,
                    error = %error,
                    "failed to store message mapping"
                );
                report.failed += 1;
            }
        }
        report.pr_urls.push(pr_url);
    }
    tracing::info!(
        channel = %event.channel,
        ts = %event.event_ts,
        stored = report.stored,
        failed = report.failed,
        "stored pull request mentions"
    );
    report
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use prmoji_core::SlackEvent;
    use prmoji_store::{
        InMemoryMappingStore, MappingStore, MappingStoreError, PrMessageMapping, StoreResult,
    };

    use super::ingest_chat_message;

    fn event(text: &str, channel: &str, ts: &str) -> SlackEvent {
        SlackEvent {
            text: text.to_string(),
            channel: channel.to_string(),
            event_ts: ts.to_string(),
        }
    }

    #[tokio::test]
    async fn functional_each_distinct_url_is_stored_once() {
        let store = InMemoryMappingStore::new();
        let report = ingest_chat_message(
            &store,
            &event(
                "see https://github.com/o/r/pull/1 and https://github.com/o/r/pull/2 \
                 (again https://github.com/o/r/pull/1)",
                "C1",
                "100.1",
            ),
        )
        .await;

        assert_eq!(
            report.pr_urls,
            vec![
                "https://github.com/o/r/pull/1".to_string(),
                "https://github.com/o/r/pull/2".to_string()
            ]
        );
        assert_eq!(report.stored, 2);
        assert_eq!(store.len().await, 2);
        let rows = store
            .list_by_pr_url("https://github.com/o/r/pull/1")
            .await
            .expect("list");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].channel, "C1");
        assert_eq!(rows[0].message_timestamp, "100.1");
    }

    #[tokio::test]
    async fn unit_incomplete_events_are_discarded() {
        let store = InMemoryMappingStore::new();
        let url = "https://github.com/o/r/pull/1";
        for incomplete in [event("", "C1", "1"), event(url, "", "1"), event(url, "C1", "")] {
            let report = ingest_chat_message(&store, &incomplete).await;
            assert_eq!(report.stored, 0);
            assert!(report.pr_urls.is_empty());
        }
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn unit_message_without_urls_stores_nothing() {
        let store = InMemoryMappingStore::new();
        let report = ingest_chat_message(&store, &event("lunch?", "C1", "1")).await;
        assert_eq!(report.stored, 0);
        assert!(store.is_empty().await);
    }

    struct FlakyStore {
        inner: InMemoryMappingStore,
        failing_url: &'static str,
    }

    #[async_trait]
    impl MappingStore for FlakyStore {
        async fn insert(&self, pr_url: &str, channel: &str, ts: &str) -> StoreResult<()> {
            if pr_url == self.failing_url {
                return Err(MappingStoreError::LockPoisoned);
            }
            self.inner.insert(pr_url, channel, ts).await
        }

        async fn list_by_pr_url(&self, pr_url: &str) -> StoreResult<Vec<PrMessageMapping>> {
            self.inner.list_by_pr_url(pr_url).await
        }

        async fn delete_by_pr_url(&self, pr_url: &str) -> StoreResult<u64> {
            self.inner.delete_by_pr_url(pr_url).await
        }

        async fn delete_older_than(&self, cutoff: NaiveDate) -> StoreResult<u64> {
            self.inner.delete_older_than(cutoff).await
        }
    }

    #[tokio::test]
    async fn regression_failed_insert_does_not_stop_remaining_urls() {
        let store = FlakyStore {
            inner: InMemoryMappingStore::new(),
            failing_url: "https://github.com/o/r/pull/1",
        };
        let report = ingest_chat_message(
            &store,
            &event(
                "https://github.com/o/r/pull/1 https://github.com/o/r/pull/2",
                "C1",
                "5",
            ),
        )
        .await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.stored, 1);
        assert_eq!(
            store
                .list_by_pr_url("https://github.com/o/r/pull/2")
                .await
                .expect("list")
                .len(),
            1
        );
    }
}
