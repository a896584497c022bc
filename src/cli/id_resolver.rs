//! Short ID prefix resolution for CLI commands.
//!
//! Any unique prefix of a UUID is accepted in place of the full ID,
//! similar to git short hashes.

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

const ACCOUNT_QUERY: &str = "SELECT id FROM accounts WHERE id LIKE ?";
const REVIEW_QUERY: &str = "SELECT id FROM review_items WHERE id LIKE ?";
const CONTENT_QUERY: &str = "SELECT id FROM content_items WHERE id LIKE ?";
const MODEL_QUERY: &str = "SELECT id FROM models WHERE id LIKE ?";

/// Resolve an account ID prefix to a full UUID.
pub async fn resolve_account_id(pool: &SqlitePool, prefix: &str) -> Result<Uuid> {
    resolve_prefix(pool, prefix, "account", ACCOUNT_QUERY).await
}

/// Resolve a review item ID prefix to a full UUID.
pub async fn resolve_review_id(pool: &SqlitePool, prefix: &str) -> Result<Uuid> {
    resolve_prefix(pool, prefix, "review", REVIEW_QUERY).await
}

/// Resolve a content item ID prefix to a full UUID.
pub async fn resolve_content_id(pool: &SqlitePool, prefix: &str) -> Result<Uuid> {
    resolve_prefix(pool, prefix, "content item", CONTENT_QUERY).await
}

/// Resolve a model ID prefix to a full UUID.
pub async fn resolve_model_id(pool: &SqlitePool, prefix: &str) -> Result<Uuid> {
    resolve_prefix(pool, prefix, "model", MODEL_QUERY).await
}

fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        bail!("ID prefix must not be empty");
    }
    if !prefix.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
        bail!("Invalid ID prefix '{prefix}': must contain only hex characters and dashes");
    }
    Ok(())
}

async fn resolve_prefix(pool: &SqlitePool, prefix: &str, entity: &str, query: &str) -> Result<Uuid> {
    if let Ok(uuid) = Uuid::parse_str(prefix) {
        return Ok(uuid);
    }

    validate_prefix(prefix)?;

    let pattern = format!("{}%", prefix.to_lowercase());
    let rows: Vec<(String,)> = sqlx::query_as(query).bind(&pattern).fetch_all(pool).await?;

    match rows.len() {
        0 => bail!("No {entity} found matching '{prefix}'"),
        1 => Ok(Uuid::parse_str(&rows[0].0)?),
        n => {
            let mut msg = format!("Ambiguous prefix '{prefix}': matches {n} {entity}s:");
            for row in &rows {
                msg.push_str("\n  ");
                msg.push_str(&row.0);
            }
            bail!("{msg}")
        }
    }
}
