use crate::errors::Result;
use sqlx::PgPool;
use uuid::Uuid;

/// Whether the workspace is flagged internal.
///
/// Unknown workspaces are treated as not internal; enforcement applies.
pub async fn is_internal(pool: &PgPool, workspace_id: Uuid) -> Result<bool> {
    let flag: Option<bool> =
        sqlx::query_scalar("SELECT is_internal FROM workspaces WHERE id = $1")
            .bind(workspace_id)
            .fetch_optional(pool)
            .await?;

    Ok(flag.unwrap_or(false))
}
