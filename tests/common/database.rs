use sqlx::SqlitePool;
use tempfile::TempDir;

use warmup_engine::adapters::sqlite::{create_migrated_test_pool, initialize_database, PoolConfig};

/// Create an in-memory SQLite database for testing
///
/// Each call creates a completely isolated database instance with
/// migrations applied.
pub async fn setup_test_db() -> SqlitePool {
    create_migrated_test_pool().await.expect("failed to create test database")
}

/// File-backed database with several connections, for tests that need
/// writers to actually race.
///
/// Keep the returned `TempDir` alive for the duration of the test.
pub async fn setup_file_db(max_connections: u32) -> (TempDir, SqlitePool) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let url = format!("sqlite:{}", dir.path().join("warmup.db").display());
    let pool = initialize_database(&url, Some(PoolConfig { max_connections, ..PoolConfig::default() }))
        .await
        .expect("failed to create file database");
    (dir, pool)
}

/// Teardown test database
pub async fn teardown_test_db(pool: SqlitePool) {
    pool.close().await;
}
