use crate::errors::Result;
use crate::observability::MetricsRecorder;
use crate::rate_limit::limiter::{RateLimitDecision, RateLimiter, RateLimitStatus};
use crate::rate_limit::policy::{PolicyScope, RateLimitPolicy};
use crate::workspace::{WorkspaceContext, WorkspaceFlags};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header::HeaderName, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

/// Everything the rate limit middleware needs from the composition root.
#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<RateLimiter>,
    pub workspace_flags: Arc<dyn WorkspaceFlags>,
}

/// Gate decision for one request, before it is mapped onto HTTP.
enum Gate {
    /// Proceed. Carries counter headers unless the check was skipped.
    Allow(Option<RateLimitStatus>),
    /// Workspace-scoped policy with no workspace on the request.
    RequireWorkspace,
    /// Over the limit.
    Throttle(RateLimitStatus),
}

/// Rate limiting middleware.
///
/// Wire per policy with `middleware::from_fn_with_state((state, &POLICIES.x),
/// rate_limit_middleware)`. Every internal failure is mapped to "allow":
/// availability of the protected endpoint wins over strict enforcement, so
/// no code path here produces a 5xx.
pub async fn rate_limit_middleware(
    State((state, policy)): State<(RateLimitState, &'static RateLimitPolicy)>,
    request: Request,
    next: Next,
) -> Response {
    let workspace_id = request.extensions().get::<WorkspaceContext>().map(|ctx| ctx.id);
    let client_ip = client_ip(&request);
    match evaluate(&state, policy, workspace_id, client_ip).await {
        Ok(Gate::Allow(status)) => {
            MetricsRecorder::record_rate_limit_check(policy.name, "allowed");
            let mut response = next.run(request).await;
            if let Some(status) = &status {
                apply_rate_limit_headers(response.headers_mut(), status);
            }
            response
        }
        Ok(Gate::RequireWorkspace) => {
            MetricsRecorder::record_rate_limit_check(policy.name, "no_workspace");
            missing_workspace_response()
        }
        Ok(Gate::Throttle(status)) => {
            tracing::warn!(
                policy = policy.name,
                limit = status.limit,
                current = status.current,
                "Rate limit exceeded"
            );
            MetricsRecorder::record_rate_limit_check(policy.name, "rejected");
            throttled_response(policy, &status)
        }
        Err(e) => {
            tracing::warn!(
                policy = policy.name,
                error = %e,
                "Rate limit check failed, allowing request"
            );
            MetricsRecorder::record_rate_limit_check(policy.name, "error");
            next.run(request).await
        }
    }
}

async fn evaluate(
    state: &RateLimitState,
    policy: &'static RateLimitPolicy,
    workspace_id: Option<Uuid>,
    client_ip: String,
) -> Result<Gate> {
    let subject = match policy.scope {
        PolicyScope::Workspace { skip_internal } => {
            let Some(workspace_id) = workspace_id else {
                return Ok(Gate::RequireWorkspace);
            };
            if skip_internal && state.workspace_flags.is_internal(workspace_id).await? {
                return Ok(Gate::Allow(None));
            }
            workspace_id.to_string()
        }
        PolicyScope::ClientIp => client_ip,
    };

    match state.limiter.check(policy, &subject).await? {
        RateLimitDecision::Allowed(status) => Ok(Gate::Allow(Some(status))),
        RateLimitDecision::Rejected(status) => Ok(Gate::Throttle(status)),
    }
}

/// Resolve the client IP: first hop of x-forwarded-for, then x-real-ip,
/// then the raw connection address, then a sentinel.
fn client_ip(request: &Request) -> String {
    let headers = request.headers();

    if let Some(forwarded_for) = headers.get("x-forwarded-for") {
        if let Ok(chain) = forwarded_for.to_str() {
            if let Some(ip) = chain.split(',').next() {
                let ip = ip.trim();
                if !ip.is_empty() {
                    return ip.to_string();
                }
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip) = real_ip.to_str() {
            return ip.trim().to_string();
        }
    }

    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    "unknown".to_string()
}

/// Stamp the informational headers on allowed and throttled responses alike.
fn apply_rate_limit_headers(headers: &mut HeaderMap, status: &RateLimitStatus) {
    if let Ok(value) = HeaderValue::from_str(&status.limit.to_string()) {
        headers.insert(HeaderName::from_static("x-ratelimit-limit"), value);
    }

    if let Ok(value) = HeaderValue::from_str(&status.remaining.to_string()) {
        headers.insert(HeaderName::from_static("x-ratelimit-remaining"), value);
    }

    if let Ok(value) = HeaderValue::from_str(&status.reset_at.to_rfc3339()) {
        headers.insert(HeaderName::from_static("x-ratelimit-reset"), value);
    }
}

#[derive(Debug, Serialize)]
struct ThrottledBody {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    current: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remaining: Option<u64>,
    #[serde(rename = "resetAt")]
    reset_at: String,
    #[serde(rename = "retryAfter")]
    retry_after: u64,
}

fn throttled_response(policy: &RateLimitPolicy, status: &RateLimitStatus) -> Response {
    // IP-scoped rejections keep the body terse; the counter detail is for
    // authenticated workspace callers.
    let include_counters = matches!(policy.scope, PolicyScope::Workspace { .. });

    let body = ThrottledBody {
        error: "Rate limit exceeded".to_string(),
        code: "RATE_LIMIT_EXCEEDED",
        limit: include_counters.then_some(status.limit),
        current: include_counters.then_some(status.current),
        remaining: include_counters.then_some(0),
        reset_at: status.reset_at.to_rfc3339(),
        retry_after: status.retry_after_secs(),
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    apply_rate_limit_headers(response.headers_mut(), status);
    if let Ok(value) = HeaderValue::from_str(&status.retry_after_secs().to_string()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static("retry-after"), value);
    }
    response
}

fn missing_workspace_response() -> Response {
    let body = json!({
        "error": "No workspace context",
        "code": "NO_WORKSPACE_CONTEXT",
    });
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use crate::rate_limit::memory::InMemoryStore;
    use crate::workspace::workspace_context_middleware;
    use async_trait::async_trait;
    use axum::{body::Body, middleware, routing::post, Router};
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;
    use uuid::Uuid;

    static IP_POLICY: RateLimitPolicy = RateLimitPolicy {
        name: "test_ip",
        scope: PolicyScope::ClientIp,
        window: Duration::from_secs(60),
        max_requests: 5,
        key_prefix: "test-ip",
    };

    static WORKSPACE_POLICY: RateLimitPolicy = RateLimitPolicy {
        name: "test_workspace",
        scope: PolicyScope::Workspace { skip_internal: true },
        window: Duration::from_secs(60),
        max_requests: 3,
        key_prefix: "test-ws",
    };

    struct StaticFlags {
        internal: bool,
    }

    #[async_trait]
    impl WorkspaceFlags for StaticFlags {
        async fn is_internal(&self, _: Uuid) -> Result<bool> {
            Ok(self.internal)
        }
    }

    struct FailingFlags;

    #[async_trait]
    impl WorkspaceFlags for FailingFlags {
        async fn is_internal(&self, _: Uuid) -> Result<bool> {
            Err(AppError::Internal("flag lookup failed".to_string()))
        }
    }

    fn state(flags: Arc<dyn WorkspaceFlags>) -> RateLimitState {
        RateLimitState {
            limiter: Arc::new(RateLimiter::new(
                InMemoryStore::new(1024, Duration::from_secs(3600)),
                None,
            )),
            workspace_flags: flags,
        }
    }

    fn ip_app(policy: &'static RateLimitPolicy) -> Router {
        Router::new()
            .route("/guarded", post(|| async { "ok" }))
            .route_layer(middleware::from_fn_with_state(
                (state(Arc::new(StaticFlags { internal: false })), policy),
                rate_limit_middleware,
            ))
    }

    fn workspace_app(flags: Arc<dyn WorkspaceFlags>) -> Router {
        Router::new()
            .route("/guarded", post(|| async { "ok" }))
            .route_layer(middleware::from_fn_with_state(
                (state(flags), &WORKSPACE_POLICY),
                rate_limit_middleware,
            ))
            .layer(middleware::from_fn(workspace_context_middleware))
    }

    fn ip_request(ip: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .uri("/guarded")
            .method("POST")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    fn workspace_request(id: Option<&str>) -> axum::http::Request<Body> {
        let builder = axum::http::Request::builder().uri("/guarded").method("POST");
        let builder = match id {
            Some(id) => builder.header("x-workspace-id", id),
            None => builder,
        };
        builder.body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
        response.headers().get(name).and_then(|v| v.to_str().ok())
    }

    #[tokio::test]
    async fn test_ip_limit_allows_then_throttles() {
        let app = ip_app(&IP_POLICY);

        for expected_remaining in (0..=4u64).rev() {
            let response = app.clone().oneshot(ip_request("1.2.3.4")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(header(&response, "x-ratelimit-limit"), Some("5"));
            assert_eq!(
                header(&response, "x-ratelimit-remaining"),
                Some(expected_remaining.to_string().as_str())
            );
            assert!(header(&response, "x-ratelimit-reset").is_some());
        }

        let response = app.clone().oneshot(ip_request("1.2.3.4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(header(&response, "x-ratelimit-remaining"), Some("0"));
        assert!(header(&response, "retry-after").is_some());

        let body = body_json(response).await;
        assert_eq!(body["code"], "RATE_LIMIT_EXCEEDED");
        assert!(body["retryAfter"].as_u64().is_some());
        // IP-scoped rejections omit the counter fields
        assert!(body.get("limit").is_none());
        assert!(body.get("current").is_none());
        assert!(body.get("remaining").is_none());
    }

    #[tokio::test]
    async fn test_other_ip_is_unaffected() {
        let app = ip_app(&IP_POLICY);

        for _ in 0..6 {
            app.clone().oneshot(ip_request("1.2.3.4")).await.unwrap();
        }
        let response = app.clone().oneshot(ip_request("5.6.7.8")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, "x-ratelimit-remaining"), Some("4"));
    }

    #[tokio::test]
    async fn test_workspace_limit_includes_counters_in_body() {
        let app = workspace_app(Arc::new(StaticFlags { internal: false }));
        let id = Uuid::new_v4().to_string();

        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(workspace_request(Some(&id)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .clone()
            .oneshot(workspace_request(Some(&id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let body = body_json(response).await;
        assert_eq!(body["code"], "RATE_LIMIT_EXCEEDED");
        assert_eq!(body["limit"], 3);
        assert_eq!(body["current"], 4);
        assert_eq!(body["remaining"], 0);
        assert!(body["resetAt"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_missing_workspace_context_is_unauthorized() {
        let app = workspace_app(Arc::new(StaticFlags { internal: false }));

        let response = app.clone().oneshot(workspace_request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = body_json(response).await;
        assert_eq!(body["code"], "NO_WORKSPACE_CONTEXT");
    }

    #[tokio::test]
    async fn test_internal_workspace_skips_enforcement() {
        let app = workspace_app(Arc::new(StaticFlags { internal: true }));
        let id = Uuid::new_v4().to_string();

        // Far past the limit; every request passes and none are counted.
        for _ in 0..10 {
            let response = app
                .clone()
                .oneshot(workspace_request(Some(&id)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(header(&response, "x-ratelimit-limit").is_none());
        }
    }

    #[tokio::test]
    async fn test_flag_lookup_failure_fails_open() {
        let app = workspace_app(Arc::new(FailingFlags));
        let id = Uuid::new_v4().to_string();

        let response = app
            .clone()
            .oneshot(workspace_request(Some(&id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_client_ip_prefers_first_forwarded_hop() {
        let request = axum::http::Request::builder()
            .uri("/")
            .header("x-forwarded-for", "192.168.1.1, 10.0.0.1")
            .header("x-real-ip", "203.0.113.42")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&request), "192.168.1.1");
    }

    #[tokio::test]
    async fn test_client_ip_falls_back_to_real_ip() {
        let request = axum::http::Request::builder()
            .uri("/")
            .header("x-real-ip", "203.0.113.42")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&request), "203.0.113.42");
    }

    #[tokio::test]
    async fn test_client_ip_falls_back_to_connection_address() {
        let mut request = axum::http::Request::builder()
            .uri("/")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));
        assert_eq!(client_ip(&request), "127.0.0.1");
    }

    #[tokio::test]
    async fn test_client_ip_unknown_sentinel() {
        let request = axum::http::Request::builder()
            .uri("/")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&request), "unknown");
    }
}
