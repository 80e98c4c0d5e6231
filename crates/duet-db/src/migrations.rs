use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            sender          TEXT NOT NULL,
            receiver        TEXT NOT NULL,
            body            TEXT NOT NULL DEFAULT '',
            message_type    TEXT NOT NULL DEFAULT 'text'
                            CHECK (message_type IN ('text', 'image', 'file')),
            attachment_url  TEXT,
            attachment_name TEXT,
            attachment_size INTEGER,
            timestamp       TEXT NOT NULL,
            read            INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_messages_pair
            ON messages(sender, receiver, timestamp);

        CREATE INDEX IF NOT EXISTS idx_messages_unread
            ON messages(receiver, read);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
