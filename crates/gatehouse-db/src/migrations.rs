use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id                  TEXT PRIMARY KEY,
                handle              TEXT NOT NULL UNIQUE,
                platform_id         INTEGER,
                verified            INTEGER NOT NULL DEFAULT 0,
                revoked             INTEGER NOT NULL DEFAULT 0,
                premium             INTEGER NOT NULL DEFAULT 0,
                premium_expires_at  TEXT,
                last_checked_at     TEXT,
                created_at          TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE verification_tokens (
                token       TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL REFERENCES users(id),
                used        INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_tokens_user
                ON verification_tokens(user_id);

            CREATE TABLE channels (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL REFERENCES users(id),
                channel     TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_channels_user
                ON channels(user_id);

            CREATE TABLE subscription_log (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id        TEXT NOT NULL REFERENCES users(id),
                logged_at      TEXT NOT NULL,
                running_count  INTEGER NOT NULL
            );

            CREATE INDEX idx_subscription_log_user_time
                ON subscription_log(user_id, logged_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
