//! HTTP API of a txgate node
//!
//! Responses are plain text. A failure is rendered as `Error: <message>`
//! with status 200, and any path/verb pair not listed below answers
//! `Error: bad request`.
//!
//! - `POST /append`: run an append batch
//! - `GET|PUT|POST /bank`: read balances, create accounts, transfer
//! - `GET|POST /set`: read the set, add an element
//! - `GET /leader`, `GET|DELETE /members`, `GET /ready`: membership
//! - `GET /health`, `GET /metrics`: liveness and Prometheus metrics

use axum::{
    body::Bytes,
    extract::State,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::{Database, Error, Result, METRICS};
use crate::facade::executor;
use crate::facade::ledger::{self, InitOutcome, InitRequest, TransferRequest};
use crate::facade::membership::Membership;

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub node: String,
    pub db: Arc<dyn Database>,
    pub membership: Membership,
    /// Size of the configured cluster, for readiness
    pub expected_nodes: usize,
    pub request_timeout: Duration,
    pub surface_init_contention: bool,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/append", post(append_post).fallback(bad_request))
        .route(
            "/bank",
            get(bank_get)
                .put(bank_put)
                .post(bank_post)
                .fallback(bad_request),
        )
        .route("/set", get(set_get).post(set_post).fallback(bad_request))
        .route("/leader", get(leader_get).fallback(bad_request))
        .route(
            "/members",
            get(members_get)
                .delete(members_delete)
                .fallback(bad_request),
        )
        .route("/ready", get(ready_get).fallback(bad_request))
        .route("/health", get(health).fallback(bad_request))
        .route("/metrics", get(metrics).fallback(bad_request))
        .fallback(bad_request)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(middleware::from_fn(request_tracing_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run one request under the deadline and render its outcome.
async fn respond<F>(endpoint: &'static str, deadline: Duration, work: F) -> Response
where
    F: Future<Output = Result<String>>,
{
    let start = Instant::now();
    let result = match tokio::time::timeout(deadline, work).await {
        Ok(result) => result,
        Err(elapsed) => Err(Error::from(elapsed)),
    };
    METRICS.record(endpoint, start.elapsed(), result.as_ref().err());

    match result {
        Ok(body) => body.into_response(),
        Err(e) => {
            tracing::warn!(endpoint, error = %e, retryable = e.is_retryable(), "request failed");
            render_error(&e).into_response()
        }
    }
}

pub fn render_error(err: &Error) -> String {
    format!("Error: {}", err)
}

fn body_text(body: &Bytes) -> String {
    String::from_utf8_lossy(body).into_owned()
}

async fn bad_request() -> String {
    METRICS.record("unknown", Duration::ZERO, None);
    "Error: bad request".to_string()
}

async fn append_post(State(state): State<AppState>, body: Bytes) -> Response {
    let document = body_text(&body);
    respond("append", state.request_timeout, async {
        executor::append(state.db.as_ref(), &document).await
    })
    .await
}

async fn bank_get(State(state): State<AppState>) -> Response {
    respond("bank", state.request_timeout, async {
        ledger::balances(state.db.as_ref()).await
    })
    .await
}

async fn bank_put(State(state): State<AppState>, body: Bytes) -> Response {
    let body = body_text(&body);
    respond("bank", state.request_timeout, async {
        let req = InitRequest::parse(&body)?;
        match ledger::initialize_accounts(state.db.as_ref(), &req).await? {
            InitOutcome::Contended if state.surface_init_contention => Err(Error::Contention),
            InitOutcome::Contended => {
                METRICS.masked_contention.inc();
                Ok("nil".to_string())
            }
            _ => Ok("nil".to_string()),
        }
    })
    .await
}

async fn bank_post(State(state): State<AppState>, body: Bytes) -> Response {
    let body = body_text(&body);
    respond("bank", state.request_timeout, async {
        let req = TransferRequest::parse(&body)?;
        ledger::transfer(state.db.as_ref(), &req).await?;
        Ok("nil".to_string())
    })
    .await
}

async fn set_get(State(state): State<AppState>) -> Response {
    respond("set", state.request_timeout, async {
        ledger::set_read(state.db.as_ref()).await
    })
    .await
}

async fn set_post(State(state): State<AppState>, body: Bytes) -> Response {
    let value = body_text(&body);
    respond("set", state.request_timeout, async {
        ledger::set_add(state.db.as_ref(), &value).await
    })
    .await
}

async fn leader_get(State(state): State<AppState>) -> Response {
    respond("leader", state.request_timeout, async {
        let leader = state.membership.leader().await?;
        Ok(format!("\"{}\"", leader.unwrap_or_default()))
    })
    .await
}

async fn members_get(State(state): State<AppState>) -> Response {
    respond("members", state.request_timeout, async {
        let members = state.membership.members().await?;
        Ok(render_names(&members))
    })
    .await
}

async fn members_delete(State(state): State<AppState>, body: Bytes) -> Response {
    let identity = body_text(&body);
    respond("members", state.request_timeout, async {
        state.membership.remove(&identity).await?;
        Ok("nil".to_string())
    })
    .await
}

async fn ready_get(State(state): State<AppState>) -> Response {
    respond("ready", state.request_timeout, async {
        state.membership.ready(state.expected_nodes).await?;
        Ok("nil".to_string())
    })
    .await
}

/// `["n1" "n2"]`
fn render_names(names: &[String]) -> String {
    let quoted: Vec<String> = names.iter().map(|n| format!("\"{}\"", n)).collect();
    format!("[{}]", quoted.join(" "))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(json!({
        "status": "healthy",
        "node": state.node,
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": METRICS.uptime_seconds(),
    }))
}

async fn metrics() -> impl IntoResponse {
    METRICS.to_prometheus()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_names() {
        assert_eq!(render_names(&[]), "[]");
        assert_eq!(
            render_names(&["n1".to_string(), "n2".to_string()]),
            "[\"n1\" \"n2\"]"
        );
    }

    #[test]
    fn test_render_error() {
        assert_eq!(render_error(&Error::Contention), "Error: database is locked");
        assert_eq!(
            render_error(&Error::NodeNotFound("n4".into())),
            "Error: no node named n4"
        );
    }

    #[tokio::test]
    async fn test_deadline() {
        let response = respond("test", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        })
        .await;
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&body).starts_with("Error: operation timeout"));
    }
}
