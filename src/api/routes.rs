use crate::{
    api::health,
    observability::HealthChecker,
    rate_limit::{rate_limit_middleware, RateLimitState, POLICIES},
    workspace::workspace_context_middleware,
};
use axum::{
    extract::FromRef,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub rate_limit: RateLimitState,
    pub health_checker: Arc<HealthChecker>,
}

pub fn create_router(state: AppState) -> Router {
    // Configure CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health endpoints
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/metrics", get(health::metrics))
        // API v1 routes
        .nest("/v1", v1_routes(&state.rate_limit))
        // Add middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Add state
        .with_state(state)
}

fn v1_routes(rate_limit: &RateLimitState) -> Router<AppState> {
    // Unauthenticated endpoints, throttled per client IP
    let public = Router::new()
        .route("/auth/login", post(|| async { "Login endpoint" }))
        .route_layer(middleware::from_fn_with_state(
            (rate_limit.clone(), &POLICIES.login),
            rate_limit_middleware,
        ))
        .merge(
            Router::new()
                .route("/auth/signup", post(|| async { "Signup endpoint" }))
                .route_layer(middleware::from_fn_with_state(
                    (rate_limit.clone(), &POLICIES.signup),
                    rate_limit_middleware,
                )),
        )
        .merge(
            Router::new()
                .route(
                    "/auth/password-reset",
                    post(|| async { "Password reset endpoint" }),
                )
                .route_layer(middleware::from_fn_with_state(
                    (rate_limit.clone(), &POLICIES.password_reset),
                    rate_limit_middleware,
                )),
        )
        .merge(
            Router::new()
                .route("/auth/refresh", post(|| async { "Token refresh endpoint" }))
                .route_layer(middleware::from_fn_with_state(
                    (rate_limit.clone(), &POLICIES.token_refresh),
                    rate_limit_middleware,
                )),
        )
        .merge(
            Router::new()
                .route(
                    "/invites/accept",
                    post(|| async { "Invite accept endpoint" }),
                )
                .route_layer(middleware::from_fn_with_state(
                    (rate_limit.clone(), &POLICIES.invite_accept),
                    rate_limit_middleware,
                )),
        );

    // Workspace endpoints, throttled per workspace id
    let workspace_scoped = Router::new()
        .route("/documents/sync", post(|| async { "Document sync endpoint" }))
        .route_layer(middleware::from_fn_with_state(
            (rate_limit.clone(), &POLICIES.doc_sync),
            rate_limit_middleware,
        ))
        .merge(
            Router::new()
                .route("/bots", get(|| async { "List bots endpoint" }))
                .route("/documents", get(|| async { "List documents endpoint" }))
                .route(
                    "/team/members",
                    get(|| async { "List team members endpoint" }),
                )
                .route(
                    "/billing/subscription",
                    get(|| async { "Subscription endpoint" }),
                )
                .route_layer(middleware::from_fn_with_state(
                    (rate_limit.clone(), &POLICIES.api_general),
                    rate_limit_middleware,
                )),
        )
        .layer(middleware::from_fn(workspace_context_middleware));

    public.merge(workspace_scoped)
}
