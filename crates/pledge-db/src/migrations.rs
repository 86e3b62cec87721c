use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (profiles, opportunities, chat)");
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS profiles (
                id          TEXT PRIMARY KEY,
                email       TEXT NOT NULL,
                first_name  TEXT,
                last_name   TEXT,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS opportunities (
                id          TEXT PRIMARY KEY,
                title       TEXT NOT NULL,
                created_by  TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            -- One room per opportunity
            CREATE TABLE IF NOT EXISTS chat_rooms (
                id              TEXT PRIMARY KEY,
                opportunity_id  TEXT NOT NULL UNIQUE REFERENCES opportunities(id),
                created_at      TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chat_messages (
                id                  TEXT PRIMARY KEY,
                chat_room_id        TEXT NOT NULL REFERENCES chat_rooms(id),
                sender_id           TEXT,
                message             TEXT NOT NULL,
                is_system_message   INTEGER NOT NULL DEFAULT 0,
                created_at          TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_chat_messages_room
                ON chat_messages(chat_room_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
