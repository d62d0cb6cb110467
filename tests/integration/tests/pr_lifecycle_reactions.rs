use std::sync::Arc;

use httpmock::prelude::*;
use prmoji_core::{classify, parse_slack_envelope, Classification};
use prmoji_runtime::{
    ingest_chat_message, DispatchOutcome, IgnoredCommenters, ReactionDispatcher,
};
use prmoji_slack::SlackReactionClient;
use prmoji_store::{MappingStore, SqliteMappingStore};
use serde_json::json;

const PR_URL: &str = "https://github.com/o/r/pull/7";

fn github_event(kind: &str, payload: serde_json::Value) -> Classification {
    let body = serde_json::to_vec(&payload).expect("serialize payload");
    classify(kind, &body).expect("event classifies")
}

#[tokio::test]
async fn integration_pr_lifecycle_reacts_then_forgets_message() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn MappingStore> = Arc::new(
        SqliteMappingStore::new(temp.path().join("prmoji.db")).expect("open sqlite store"),
    );

    let slack = MockServer::start();
    let approved = slack.mock(|when, then| {
        when.method(POST)
            .path("/reactions.add")
            .header("authorization", "Bearer xoxb-e2e")
            .body_includes("channel=C1")
            .body_includes("timestamp=100")
            .body_includes("name=white_check_mark");
        then.status(200).json_body(json!({ "ok": true }));
    });
    let merged = slack.mock(|when, then| {
        when.method(POST)
            .path("/reactions.add")
            .body_includes("channel=C1")
            .body_includes("name=pr-merged");
        then.status(200).json_body(json!({ "ok": true }));
    });
    let reactions = SlackReactionClient::new(slack.base_url(), "xoxb-e2e".to_string(), 2_000)
        .expect("slack client");
    let dispatcher = ReactionDispatcher::new(
        Arc::clone(&store),
        Arc::new(reactions),
        IgnoredCommenters::default(),
    );

    let envelope = parse_slack_envelope(
        serde_json::to_vec(&json!({
            "event": { "type": "message", "text": format!("fix: {PR_URL}"), "channel": "C1", "event_ts": "100" }
        }))
        .expect("serialize slack event")
        .as_slice(),
    )
    .expect("parse slack envelope");
    let ingested = ingest_chat_message(store.as_ref(), &envelope.event).await;
    assert_eq!(ingested.stored, 1);
    assert_eq!(store.list_by_pr_url(PR_URL).await.expect("list").len(), 1);

    let review = github_event(
        "pull_request_review",
        json!({
            "action": "submitted",
            "review": { "state": "approved", "user": { "login": "alice" } },
            "pull_request": { "html_url": PR_URL }
        }),
    );
    let outcome = dispatcher.dispatch(&review).await.expect("dispatch review");
    let DispatchOutcome::Reacted(report) = outcome else {
        panic!("expected reaction, got {outcome:?}");
    };
    assert_eq!(report.reactions_succeeded, 1);
    assert_eq!(report.mappings_deleted, None);
    approved.assert_calls(1);
    assert_eq!(store.list_by_pr_url(PR_URL).await.expect("list").len(), 1);

    let merge = github_event(
        "pull_request",
        json!({
            "action": "closed",
            "pull_request": { "merged": true, "html_url": PR_URL }
        }),
    );
    let outcome = dispatcher.dispatch(&merge).await.expect("dispatch merge");
    let DispatchOutcome::Reacted(report) = outcome else {
        panic!("expected reaction, got {outcome:?}");
    };
    assert_eq!(report.emoji, "pr-merged");
    assert_eq!(report.mappings_deleted, Some(1));
    merged.assert_calls(1);
    assert!(store.list_by_pr_url(PR_URL).await.expect("list").is_empty());

    // A late comment on the merged PR finds nothing to react to.
    let late_comment = github_event(
        "issue_comment",
        json!({
            "action": "created",
            "issue": { "pull_request": { "html_url": PR_URL } },
            "comment": { "user": { "login": "bob" } }
        }),
    );
    let outcome = dispatcher
        .dispatch(&late_comment)
        .await
        .expect("dispatch comment");
    assert!(matches!(outcome, DispatchOutcome::NoMappings { .. }));
    approved.assert_calls(1);
    merged.assert_calls(1);
}

#[tokio::test]
async fn regression_mappings_survive_store_reopen() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db_path = temp.path().join("nested").join("prmoji.db");
    {
        let store = SqliteMappingStore::new(&db_path).expect("open store");
        let event = parse_slack_envelope(
            br#"{"event":{"text":"https://github.com/o/r/pull/7 https://github.com/o/r/pull/8","channel":"C9","event_ts":"42.5"}}"#,
        )
        .expect("parse")
        .event;
        let report = ingest_chat_message(&store, &event).await;
        assert_eq!(report.stored, 2);
    }

    let reopened = SqliteMappingStore::new(&db_path).expect("reopen store");
    let rows = reopened.list_by_pr_url(PR_URL).await.expect("list");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].channel, "C9");
    assert_eq!(rows[0].message_timestamp, "42.5");
}
