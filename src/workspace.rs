use crate::db;
use crate::errors::Result;
use async_trait::async_trait;
use axum::{extract::Request, middleware::Next, response::Response};
use sqlx::PgPool;
use uuid::Uuid;

/// Workspace identity resolved for the current request.
///
/// Populated by `workspace_context_middleware` before any workspace-scoped
/// rate limiter runs; limiters reject with 401 when it is absent.
#[derive(Debug, Clone, Copy)]
pub struct WorkspaceContext {
    pub id: Uuid,
}

/// Lookup of per-workspace flags.
///
/// The only flag this service consults is `is_internal`, which exempts a
/// workspace from workspace-scoped rate limits. Behind a trait so the
/// middleware can be exercised without a database.
#[async_trait]
pub trait WorkspaceFlags: Send + Sync {
    async fn is_internal(&self, workspace_id: Uuid) -> Result<bool>;
}

pub struct PgWorkspaceFlags {
    pool: PgPool,
}

impl PgWorkspaceFlags {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkspaceFlags for PgWorkspaceFlags {
    async fn is_internal(&self, workspace_id: Uuid) -> Result<bool> {
        db::workspaces::is_internal(&self.pool, workspace_id).await
    }
}

/// Lift the workspace id resolved by the session layer into a typed
/// request extension.
///
/// Session authentication terminates upstream of this service; requests
/// arrive with the caller's workspace id in `x-workspace-id`. Requests
/// without a parseable id simply carry no context, and workspace-scoped
/// limiters turn that into a 401.
pub async fn workspace_context_middleware(mut request: Request, next: Next) -> Response {
    let workspace_id = request
        .headers()
        .get("x-workspace-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value.trim()).ok());

    if let Some(id) = workspace_id {
        request.extensions_mut().insert(WorkspaceContext { id });
    }

    next.run(request).await
}
