use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use tokio::sync::Mutex;

// ── AuthConfig ──────────────────────────────────────────────────────

/// Static bearer tokens accepted by the service APIs. Token issuance lives
/// outside this workspace; we only check membership.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub enabled: bool,
    pub tokens: Arc<HashSet<String>>,
    pub rate_limits: Arc<Mutex<HashMap<String, RateWindow>>>,
    pub limit_per_minute: u64,
}

#[derive(Debug, Clone)]
pub struct RateWindow {
    pub window_start: Instant,
    pub count: u64,
}

impl AuthConfig {
    pub fn from_tokens<I, T>(tokens: I, limit_per_minute: u64) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let tokens: HashSet<String> = tokens
            .into_iter()
            .map(Into::into)
            .filter(|t: &String| !t.is_empty())
            .collect();
        Self {
            enabled: !tokens.is_empty(),
            tokens: Arc::new(tokens),
            rate_limits: Arc::new(Mutex::new(HashMap::new())),
            limit_per_minute,
        }
    }

    pub fn disabled() -> Self {
        Self::from_tokens(Vec::<String>::new(), 0)
    }
}

// ── Environment parsing ─────────────────────────────────────────────

/// Reads `MICROCLOUD_API_TOKENS` (comma separated) and
/// `MICROCLOUD_API_RATE_LIMIT_PER_MINUTE`.
pub fn parse_auth_from_env() -> AuthConfig {
    let tokens_raw = std::env::var("MICROCLOUD_API_TOKENS").unwrap_or_default();
    let tokens: Vec<String> = tokens_raw
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();

    let limit_per_minute = std::env::var("MICROCLOUD_API_RATE_LIMIT_PER_MINUTE")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(60);

    let cfg = AuthConfig::from_tokens(tokens, limit_per_minute);
    if !cfg.enabled {
        tracing::warn!("auth disabled: MICROCLOUD_API_TOKENS not set");
    }
    cfg
}

// ── Middleware ───────────────────────────────────────────────────────
// Generic over any state type S that implements AsRef<AuthConfig>.
// Usage: `middleware::from_fn_with_state(app_state, auth_middleware::<MyAppState>)`

pub async fn auth_middleware<S>(
    State(state): State<S>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, std::convert::Infallible>
where
    S: AsRef<AuthConfig> + Clone + Send + Sync + 'static,
{
    let auth = state.as_ref();

    if !auth.enabled {
        return Ok(next.run(req).await);
    }

    let Some(token) = extract_token(&req) else {
        return Ok(error_response(StatusCode::UNAUTHORIZED, "Authorization header is missing"));
    };

    if !auth.tokens.contains(&token) {
        return Ok(error_response(StatusCode::UNAUTHORIZED, "Invalid token"));
    }

    if auth.limit_per_minute > 0 {
        let mut guard = auth.rate_limits.lock().await;
        let now = Instant::now();
        let entry = guard.entry(token).or_insert(RateWindow {
            window_start: now,
            count: 0,
        });
        if now.duration_since(entry.window_start) >= Duration::from_secs(60) {
            entry.window_start = now;
            entry.count = 0;
        }
        if entry.count >= auth.limit_per_minute {
            return Ok(error_response(StatusCode::TOO_MANY_REQUESTS, "rate limited"));
        }
        entry.count += 1;
    }

    Ok(next.run(req).await)
}

fn extract_token(req: &Request<Body>) -> Option<String> {
    req.headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

// ── Error helpers ───────────────────────────────────────────────────

/// Every failure on the service APIs is reported as `{"error": "<message>"}`.
pub fn error_response(status: StatusCode, msg: &str) -> Response {
    (status, Json(serde_json::json!({ "error": msg }))).into_response()
}
