//! HTTP surface: Slack and GitHub webhooks, liveness and on-demand cleanup.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use prmoji_core::{classify, parse_slack_envelope, SlackEvent};
use prmoji_runtime::{
    ingest_chat_message, start_retention_sweeper, DispatchOutcome, ReactionDispatcher,
    RetentionSweeper,
};
use prmoji_slack::SlackReactionClient;
use prmoji_store::{MappingStore, SqliteMappingStore};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::{PrmojiConfig, SLACK_REQUEST_TIMEOUT_MS};

const ROOT_ENDPOINT: &str = "/";
const HEALTHZ_ENDPOINT: &str = "/healthz";
const SLACK_EVENT_ENDPOINT: &str = "/event/slack";
const GITHUB_EVENT_ENDPOINT: &str = "/event/github";
const CLEANUP_ENDPOINT: &str = "/cleanup";
const CLEANUP_SLASH_ENDPOINT: &str = "/cleanup/";

const GITHUB_EVENT_HEADER: &str = "x-github-event";
const SLACK_BODY_LIMIT_BYTES: usize = 1 << 20;
const GITHUB_BODY_LIMIT_BYTES: usize = 2 << 20;
const SLACK_EVENT_DEADLINE: Duration = Duration::from_secs(10);
const GITHUB_EVENT_DEADLINE: Duration = Duration::from_secs(20);

/// Shared handler state.
pub(crate) struct PrmojiServerState {
    store: Arc<dyn MappingStore>,
    dispatcher: Arc<ReactionDispatcher>,
    sweeper: Arc<RetentionSweeper>,
}

impl PrmojiServerState {
    pub(crate) fn new(
        store: Arc<dyn MappingStore>,
        dispatcher: Arc<ReactionDispatcher>,
        sweeper: Arc<RetentionSweeper>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            sweeper,
        }
    }
}

pub(crate) async fn run_prmoji_server(config: PrmojiConfig) -> Result<()> {
    let store: Arc<dyn MappingStore> = Arc::new(
        SqliteMappingStore::new(&config.db_path)
            .with_context(|| format!("failed to open mapping store {}", config.db_path.display()))?,
    );
    let reactions = SlackReactionClient::new(
        config.slack_api_base.clone(),
        config.slack_token.clone(),
        SLACK_REQUEST_TIMEOUT_MS,
    )
    .context("failed to build slack reaction client")?;
    let dispatcher = Arc::new(ReactionDispatcher::new(
        Arc::clone(&store),
        Arc::new(reactions),
        config.ignored_commenters(),
    ));
    let sweeper = Arc::new(RetentionSweeper::new(
        Arc::clone(&store),
        config.retention_sweeper(),
    ));

    let bind_addr = config.bind_addr();
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind prmoji server on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound prmoji server address")?;
    let mut sweeper_handle = start_retention_sweeper(Arc::clone(&sweeper))?;

    tracing::info!(
        addr = %local_addr,
        db_path = %config.db_path.display(),
        retention_days = config.retention_days,
        ignored_commenters = dispatcher.ignored_commenters().len(),
        "prmoji server listening"
    );

    let state = Arc::new(PrmojiServerState::new(store, dispatcher, sweeper));
    let app = build_prmoji_router(state);
    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    sweeper_handle.shutdown().await;
    serve_result.context("prmoji server exited unexpectedly")?;
    tracing::info!("prmoji server stopped");
    Ok(())
}

pub(crate) fn build_prmoji_router(state: Arc<PrmojiServerState>) -> Router {
    Router::new()
        .route(ROOT_ENDPOINT, get(handle_ok))
        .route(HEALTHZ_ENDPOINT, get(handle_ok))
        .route(
            SLACK_EVENT_ENDPOINT,
            post(handle_slack_event).layer(DefaultBodyLimit::max(SLACK_BODY_LIMIT_BYTES)),
        )
        .route(
            GITHUB_EVENT_ENDPOINT,
            post(handle_github_event).layer(DefaultBodyLimit::max(GITHUB_BODY_LIMIT_BYTES)),
        )
        .route(CLEANUP_ENDPOINT, post(handle_cleanup))
        .route(CLEANUP_SLASH_ENDPOINT, post(handle_cleanup))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::warn!(error = %error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

fn ok_response() -> Response {
    (StatusCode::OK, "OK").into_response()
}

async fn handle_ok() -> Response {
    ok_response()
}

async fn handle_slack_event(
    State(state): State<Arc<PrmojiServerState>>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "read slack body failed");
            return ok_response();
        }
    };
    let envelope = match parse_slack_envelope(&body) {
        Ok(envelope) => envelope,
        Err(error) => {
            tracing::warn!(error = %error, "parse slack payload failed");
            return ok_response();
        }
    };
    if let Some(challenge) = envelope.verification_challenge() {
        return (StatusCode::OK, challenge.to_string()).into_response();
    }

    spawn_slack_ingestion(Arc::clone(&state.store), envelope.event);
    ok_response()
}

fn spawn_slack_ingestion(store: Arc<dyn MappingStore>, event: SlackEvent) {
    tokio::spawn(async move {
        let ingest = ingest_chat_message(store.as_ref(), &event);
        if tokio::time::timeout(SLACK_EVENT_DEADLINE, ingest)
            .await
            .is_err()
        {
            tracing::warn!(
                channel = %event.channel,
                deadline_secs = SLACK_EVENT_DEADLINE.as_secs(),
                "slack event processing exceeded deadline"
            );
        }
    });
}

async fn handle_github_event(
    State(state): State<Arc<PrmojiServerState>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "read github body failed");
            return ok_response();
        }
    };
    let event_kind = headers
        .get(GITHUB_EVENT_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    spawn_github_dispatch(Arc::clone(&state.dispatcher), event_kind, body);
    ok_response()
}

fn spawn_github_dispatch(dispatcher: Arc<ReactionDispatcher>, event_kind: String, body: Bytes) {
    tokio::spawn(async move {
        let Some(classification) = classify(&event_kind, &body) else {
            tracing::debug!(event = %event_kind, "ignoring unclassified github event");
            return;
        };
        match tokio::time::timeout(GITHUB_EVENT_DEADLINE, dispatcher.dispatch(&classification))
            .await
        {
            Ok(Ok(DispatchOutcome::NoMappings { .. })) => {
                tracing::debug!(
                    event = %event_kind,
                    pr_url = %classification.pr_url,
                    "no tracked messages for pull request"
                );
            }
            Ok(Ok(_)) => {}
            Ok(Err(error)) => {
                tracing::error!(event = %event_kind, error = %error, "github event dispatch failed");
            }
            Err(_) => {
                tracing::warn!(
                    event = %event_kind,
                    pr_url = %classification.pr_url,
                    deadline_secs = GITHUB_EVENT_DEADLINE.as_secs(),
                    "github event processing exceeded deadline"
                );
            }
        }
    });
}

async fn handle_cleanup(State(state): State<Arc<PrmojiServerState>>) -> Response {
    match state.sweeper.run_once().await {
        Ok(_) => ok_response(),
        Err(error) => {
            tracing::error!(error = %error, "cleanup failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
