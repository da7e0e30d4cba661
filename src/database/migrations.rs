//! # Schema Migrations
//!
//! Embedded, idempotent DDL for the task-queue tables. An advisory lock
//! serializes concurrent callers (parallel test binaries, multiple service
//! replicas racing at boot).

use sqlx::PgPool;
use tracing::info;

/// Key for the schema advisory lock. Arbitrary but stable.
const MIGRATION_LOCK_KEY: i64 = 0x6b64_7431;

const DDL: &[&str] = &[
    "CREATE EXTENSION IF NOT EXISTS pgmq",
    r#"
    CREATE TABLE IF NOT EXISTS entities (
        entity_id           TEXT PRIMARY KEY,
        entity_type         TEXT NOT NULL,
        status              TEXT NOT NULL DEFAULT 'active',
        scheduling_strategy TEXT NOT NULL DEFAULT 'daily',
        metadata            JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_at          TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at          TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        task_id          BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
        entity_id        TEXT NOT NULL REFERENCES entities(entity_id),
        task_type        TEXT NOT NULL,
        priority         INTEGER NOT NULL DEFAULT 0,
        status           TEXT NOT NULL DEFAULT 'pending',
        attempt          INTEGER NOT NULL DEFAULT 0,
        max_attempts     INTEGER NOT NULL DEFAULT 3,
        scheduled_for    TIMESTAMPTZ NOT NULL DEFAULT now(),
        run_on           DATE,
        queue_message_id BIGINT,
        worker_id        TEXT,
        last_error       TEXT,
        error_history    JSONB NOT NULL DEFAULT '[]'::jsonb,
        created_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
        started_at       TIMESTAMPTZ,
        finished_at      TIMESTAMPTZ
    )
    "#,
    // At most one live task per (entity, task_type, calendar day).
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS tasks_daily_dedup_idx
        ON tasks (entity_id, task_type, run_on)
        WHERE run_on IS NOT NULL AND status IN ('pending', 'processing')
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS tasks_status_scheduled_idx
        ON tasks (status, scheduled_for)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS dead_letter_queue (
        dlq_id              BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
        original_task_id    BIGINT NOT NULL,
        entity_id           TEXT NOT NULL,
        task_type           TEXT NOT NULL,
        priority            INTEGER NOT NULL DEFAULT 0,
        total_attempts      INTEGER NOT NULL,
        first_error         TEXT,
        last_error          TEXT NOT NULL,
        error_history       JSONB NOT NULL DEFAULT '[]'::jsonb,
        task_metadata       JSONB NOT NULL DEFAULT '{}'::jsonb,
        original_created_at TIMESTAMPTZ NOT NULL,
        first_attempted_at  TIMESTAMPTZ,
        last_attempted_at   TIMESTAMPTZ NOT NULL,
        moved_to_dlq_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
        requeued_at         TIMESTAMPTZ,
        requeue_count       INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS dlq_task_type_idx
        ON dead_letter_queue (task_type, moved_to_dlq_at)
    "#,
];

/// Apply the task-queue schema. Safe to run repeatedly and concurrently.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    let mut conn = pool.acquire().await?;

    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(MIGRATION_LOCK_KEY)
        .execute(&mut *conn)
        .await?;

    let result = async {
        for statement in DDL {
            sqlx::query(statement).execute(&mut *conn).await?;
        }
        Ok::<_, sqlx::Error>(())
    }
    .await;

    sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(MIGRATION_LOCK_KEY)
        .execute(&mut *conn)
        .await?;

    result?;
    info!("task queue schema is up to date");
    Ok(())
}
