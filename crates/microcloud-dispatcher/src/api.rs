use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use microcloud_common::auth::{auth_middleware, error_response};

use crate::fleet::DeployError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DeployRequest {
    #[serde(default)]
    pub email: Option<String>,
}

fn status_for(err: &DeployError) -> StatusCode {
    match err {
        DeployError::NotFound(_) => StatusCode::NOT_FOUND,
        DeployError::NoCapacity(_) => StatusCode::SERVICE_UNAVAILABLE,
        DeployError::Dispatch(_) | DeployError::MalformedOutput(_) => StatusCode::BAD_GATEWAY,
        DeployError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn router(st: AppState) -> Router {
    let protected = Router::new()
        .route("/deploy", post(deploy))
        .layer(middleware::from_fn_with_state(
            st.clone(),
            auth_middleware::<AppState>,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(protected)
        .with_state(st)
}

// -- Handlers --

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn deploy(
    State(st): State<AppState>,
    body: Result<Json<DeployRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(b) => b,
        Err(rej) => return error_response(StatusCode::BAD_REQUEST, &rej.body_text()),
    };
    let Some(email) = req.email.filter(|e| !e.trim().is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing required parameter: email");
    };

    match st.fleet.deploy_for_subscriber(email.trim()).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({ "message": "Deployment successful" })),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(error=%e, %email, "deploy failed");
            error_response(status_for(&e), &e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use microcloud_common::auth::AuthConfig;
    use microcloud_common::{DeployTarget, Subscription, SubscriptionStatus};
    use microcloud_store::MemoryStore;

    use crate::fleet::FleetDispatcher;
    use crate::remote::{DispatchConfig, RemoteDispatcher};
    use crate::testing::{directory, node, FakeTransport};

    async fn app(transport: FakeTransport, with_nodes: bool) -> (Router, MemoryStore) {
        let store = MemoryStore::new();
        store
            .insert_deploy_target(
                "ada@example.com",
                DeployTarget {
                    plan_id: 2,
                    subscription_id: 41,
                    region_id: 1,
                },
            )
            .await;
        store
            .insert_subscription(Subscription {
                id: 41,
                customer_id: 900,
                plan_id: 2,
                region_id: 1,
                status: SubscriptionStatus::Pending,
            })
            .await;
        if with_nodes {
            store.insert_node(node(5, "129.151.137.147")).await;
        }
        let fleet = FleetDispatcher::new(
            Arc::new(store.clone()),
            RemoteDispatcher::new(
                DispatchConfig::default(),
                Arc::new(directory()),
                Arc::new(transport),
            ),
        );
        let st = AppState {
            fleet: Arc::new(fleet),
            auth: AuthConfig::disabled(),
        };
        (router(st), store)
    }

    fn deploy_req(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/deploy")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn call(router: Router, body: &str) -> (StatusCode, serde_json::Value) {
        let resp = router.oneshot(deploy_req(body)).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_deploy_success() {
        let (router, store) = app(FakeTransport::default(), true).await;
        let (status, body) = call(router, r#"{"email":"ada@example.com"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "message": "Deployment successful" }));
        assert_eq!(store.ssh_details().await.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_email_is_400() {
        let (router, _) = app(FakeTransport::default(), true).await;
        let (status, body) = call(router, "{}").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing required parameter: email");
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let (router, _) = app(FakeTransport::default(), true).await;
        let (status, body) = call(router, r#"{"email":"nobody@example.com"}"#).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());

        let (router, _) = app(FakeTransport::default(), false).await;
        let (status, _) = call(router, r#"{"email":"ada@example.com"}"#).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (router, store) = app(FakeTransport::stdout("garbage\n"), true).await;
        let (status, body) = call(router, r#"{"email":"ada@example.com"}"#).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("malformed provisioning output"));
        assert!(store.ssh_details().await.is_empty());
    }
}
