use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;

use microcloud_common::auth::{auth_middleware, error_response};

use crate::allocator::AllocationError;
use crate::provision::{ProvisionError, ProvisionOutcome, ProvisionRequest};
use crate::state::AppState;

pub const CREATED_MESSAGE: &str = "Docker instance has been created successfully.";
const COLLECTING_MESSAGE: &str = "Metrics are being collected and pushed to the database.";

#[derive(Debug, Serialize)]
struct PortsBody {
    external_ports: Vec<u16>,
    internal_ports: Vec<u16>,
}

#[derive(Debug, Serialize)]
struct SpawnResponse {
    message: &'static str,
    ssh_command: String,
    password: String,
    instance_id: i64,
    container_id: String,
    ports: PortsBody,
    external_ip: String,
    internal_ip: Option<String>,
}

impl From<ProvisionOutcome> for SpawnResponse {
    fn from(o: ProvisionOutcome) -> Self {
        Self {
            message: CREATED_MESSAGE,
            ssh_command: o.ssh_command,
            password: o.credential,
            instance_id: o.instance_id,
            container_id: o.workload_handle,
            ports: PortsBody {
                external_ports: o.external_ports,
                internal_ports: o.internal_ports,
            },
            external_ip: o.external_address,
            internal_ip: o.internal_address,
        }
    }
}

fn status_for(err: &ProvisionError) -> StatusCode {
    match err {
        ProvisionError::PlanNotFound(_) => StatusCode::NOT_FOUND,
        ProvisionError::Allocation(AllocationError::Exhausted { .. }) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn router(st: AppState) -> Router {
    let protected = Router::new()
        .route("/spawn_instance", post(spawn_instance))
        .layer(middleware::from_fn_with_state(
            st.clone(),
            auth_middleware::<AppState>,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_status))
        .merge(protected)
        .with_state(st)
}

// -- Handlers --

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn spawn_instance(
    State(st): State<AppState>,
    body: Result<Json<ProvisionRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(b) => b,
        Err(rej) => return error_response(StatusCode::BAD_REQUEST, &rej.body_text()),
    };

    match st.provisioner.provision(req).await {
        Ok(outcome) => (StatusCode::OK, Json(SpawnResponse::from(outcome))).into_response(),
        Err(e) => {
            tracing::warn!(error=%e, plan_id = req.plan_id, "spawn_instance failed");
            error_response(status_for(&e), &e.to_string())
        }
    }
}

pub async fn metrics_status(State(st): State<AppState>) -> Response {
    let Some(status) = &st.collector else {
        return (
            StatusCode::OK,
            Json(json!({ "status": "Metrics collection is not running on this node." })),
        )
            .into_response();
    };
    let snapshot = status.lock().await.clone();
    (
        StatusCode::OK,
        Json(json!({
            "status": COLLECTING_MESSAGE,
            "collector": snapshot,
        })),
    )
        .into_response()
}
