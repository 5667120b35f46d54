//! Reconnect token lookup endpoint.
//!
//! `GET /reconnect?token=<hex>` returns the connection parameters behind a
//! live token; expired or unknown tokens are indistinguishable misses.

use crate::AppState;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct TokenParams {
    #[serde(default)]
    token: String,
}

#[derive(Serialize)]
struct ReconnectResponse {
    host: String,
    user: String,
    #[serde(rename = "authMethod")]
    auth_method: String,
}

pub async fn lookup(
    State(state): State<AppState>,
    Query(params): Query<TokenParams>,
) -> Response {
    if params.token.is_empty() {
        return (StatusCode::BAD_REQUEST, "missing token").into_response();
    }

    let Some(info) = state.reconnect.get(&params.token) else {
        return (StatusCode::NOT_FOUND, "token expired or invalid").into_response();
    };

    let payload = ReconnectResponse {
        host: info.address,
        user: info.user,
        auth_method: info.auth_method,
    };
    match serde_json::to_string(&payload) {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode response").into_response(),
    }
}

pub async fn preflight() -> impl IntoResponse {
    [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ReconnectInfo, ReconnectRegistry, SessionRegistry};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn state() -> AppState {
        AppState {
            sessions: Arc::new(SessionRegistry::new()),
            reconnect: Arc::new(ReconnectRegistry::new()),
        }
    }

    fn info(expires_at: Instant) -> ReconnectInfo {
        ReconnectInfo {
            address: "files.example.com:22".into(),
            user: "deploy".into(),
            credential: "secret".into(),
            auth_method: "password".into(),
            expires_at,
        }
    }

    #[tokio::test]
    async fn test_missing_token_is_bad_request() {
        let response = lookup(
            State(state()),
            Query(TokenParams { token: "".into() }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_token_is_not_found() {
        let response = lookup(
            State(state()),
            Query(TokenParams {
                token: "feed".repeat(16),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_live_token_returns_parameters() {
        let state = state();
        state
            .reconnect
            .register("t1", info(Instant::now() + Duration::from_secs(60)));

        let response = lookup(
            State(state),
            Query(TokenParams { token: "t1".into() }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["host"], "files.example.com:22");
        assert_eq!(value["user"], "deploy");
        assert_eq!(value["authMethod"], "password");
    }

    #[tokio::test]
    async fn test_expired_token_is_not_found_and_purged() {
        let state = state();
        state
            .reconnect
            .register("t1", info(Instant::now() - Duration::from_secs(1)));

        let response = lookup(
            State(state.clone()),
            Query(TokenParams { token: "t1".into() }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(state.reconnect.count(), 0);

        // A second probe stays a miss
        let response = lookup(
            State(state),
            Query(TokenParams { token: "t1".into() }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_preflight_allows_any_origin() {
        let response = preflight().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );
    }
}
