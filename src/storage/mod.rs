pub mod blob;
pub mod task;

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::info;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        status TEXT NOT NULL,
        target_languages TEXT NOT NULL,
        progress REAL NOT NULL DEFAULT 0,
        error_message TEXT,
        retry_count INTEGER NOT NULL DEFAULT 0,
        result_path TEXT,
        finish_time TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS audios (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id INTEGER NOT NULL REFERENCES tasks(id),
        position INTEGER NOT NULL,
        name TEXT NOT NULL,
        path TEXT NOT NULL UNIQUE,
        content_type TEXT NOT NULL,
        original_text TEXT,
        stt_text TEXT,
        wer REAL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_audios_task ON audios (task_id, position)",
    r#"
    CREATE TABLE IF NOT EXISTS task_messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id INTEGER NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
];

/// Opens the SQLite pool shared by the task repository and the queue, and
/// creates the tables if needed.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    info!("Initializing SQLite storage at {}", database_url);
    let mut options = SqlitePoolOptions::new().max_connections(max_connections);
    if database_url.contains(":memory:") {
        // every connection to an in-memory url is a separate database
        options = options
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>);
    }
    let pool = options
        .connect(database_url)
        .await
        .with_context(|| format!("Failed to open database {}", database_url))?;

    for statement in SCHEMA {
        sqlx::query(statement).execute(&pool).await?;
    }

    Ok(pool)
}
