//! Built-in HTTP surface of a local coordination node
//!
//! Health, version and membership endpoints. Caller-supplied routers are
//! nested next to them under their own prefixes.

use crate::coordinator::engine::Member;
use crate::coordinator::store::KvStore;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

/// Paths owned by the node itself.
pub const BUILTIN_PATHS: &[&str] = &["/health", "/version", "/members"];

/// Path prefix shared by the node's own gRPC services.
pub const GRPC_PATH_PREFIX: &str = "/coord.";

/// Does `prefix` overlap a built-in route?
pub fn is_reserved_path(prefix: &str) -> bool {
    if prefix.starts_with(GRPC_PATH_PREFIX) {
        return true;
    }
    BUILTIN_PATHS.iter().any(|builtin| {
        prefix == *builtin
            || prefix.starts_with(&format!("{}/", builtin))
            || builtin.starts_with(&format!("{}/", prefix))
    })
}

#[derive(Clone)]
pub struct HttpState {
    pub name: String,
    pub member_id: u64,
    pub members: Arc<Vec<Member>>,
    pub store: Arc<KvStore>,
    pub ready: watch::Receiver<bool>,
}

impl HttpState {
    fn is_serving(&self) -> bool {
        *self.ready.borrow() && !self.store.is_closed()
    }
}

/// Build the node's HTTP router with `user_handlers` nested under their
/// prefixes. Prefixes are expected to be validated already.
pub fn create_router(state: HttpState, user_handlers: BTreeMap<String, Router>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/health/live", get(live))
        .route("/health/ready", get(readiness))
        .route("/version", get(version))
        .route("/members", get(members))
        .with_state(state);

    for (prefix, handler) in user_handlers {
        tracing::debug!(prefix = %prefix, "mounting user HTTP handler");
        router = router.nest(&prefix, handler);
    }

    router.layer(TraceLayer::new_for_http())
}

/// Fallback for paths neither the node nor the host serves.
pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not found")
}

async fn health(State(state): State<HttpState>) -> impl IntoResponse {
    let healthy = state.is_serving();
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(json!({ "health": healthy.to_string() })))
}

async fn live() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness(State(state): State<HttpState>) -> impl IntoResponse {
    if state.is_serving() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn version() -> impl IntoResponse {
    Json(json!({ "server": crate::VERSION }))
}

async fn members(State(state): State<HttpState>) -> impl IntoResponse {
    let members: Vec<_> = state
        .members
        .iter()
        .map(|m| {
            json!({
                "name": m.name,
                "id": format!("{:016x}", m.id),
                "peer_addr": m.peer_addr,
                "is_self": m.id == state.member_id,
            })
        })
        .collect();
    Json(json!({ "name": state.name, "members": members }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state(ready: bool) -> (HttpState, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(ready);
        let state = HttpState {
            name: "n1".into(),
            member_id: 1,
            members: Arc::new(vec![Member {
                name: "n1".into(),
                id: 1,
                peer_addr: "127.0.0.1:2380".into(),
            }]),
            store: Arc::new(KvStore::new()),
            ready: rx,
        };
        (state, tx)
    }

    async fn status_of(router: Router, uri: &str) -> StatusCode {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        router.oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_health_follows_readiness() {
        let (state, tx) = state(false);
        let router = create_router(state, BTreeMap::new());
        assert_eq!(
            status_of(router.clone(), "/health").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(status_of(router.clone(), "/health/live").await, StatusCode::OK);

        tx.send_replace(true);
        assert_eq!(status_of(router.clone(), "/health").await, StatusCode::OK);
        assert_eq!(status_of(router, "/health/ready").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_closed_store_is_unhealthy() {
        let (state, _tx) = state(true);
        let store = state.store.clone();
        let router = create_router(state, BTreeMap::new());
        store.close();
        assert_eq!(
            status_of(router, "/health/ready").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_user_handlers_are_nested() {
        let (state, _tx) = state(true);
        let mut handlers = BTreeMap::new();
        handlers.insert(
            "/apis/v1".to_string(),
            Router::new().route("/tasks", get(|| async { "[]" })),
        );
        let router = create_router(state, handlers).fallback(not_found);

        assert_eq!(status_of(router.clone(), "/apis/v1/tasks").await, StatusCode::OK);
        assert_eq!(status_of(router.clone(), "/members").await, StatusCode::OK);
        assert_eq!(status_of(router, "/apis/v2/tasks").await, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_reserved_paths() {
        assert!(is_reserved_path("/health"));
        assert!(is_reserved_path("/health/custom"));
        assert!(is_reserved_path("/version"));
        assert!(is_reserved_path("/coord.KV"));
        assert!(is_reserved_path("/coord.Maintenance/Status"));
        assert!(!is_reserved_path("/healthz"));
        assert!(!is_reserved_path("/apis"));
        assert!(!is_reserved_path("/dm.Master"));
    }
}
