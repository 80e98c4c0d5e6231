use crate::Database;
use crate::models::MessageRow;
use anyhow::Result;
use rusqlite::{Connection, Row};

const MESSAGE_COLUMNS: &str = "id, sender, receiver, body, message_type, attachment_url, \
     attachment_name, attachment_size, timestamp, read";

impl Database {
    // -- Messages --

    pub fn insert_message(&self, row: &MessageRow) -> Result<()> {
        self.with_conn(|conn| insert_row(conn, row))
    }

    /// Insert `row` only if `proceed` still allows it once the connection is
    /// held. Returns false when the insert was skipped.
    pub fn insert_message_if(
        &self,
        row: &MessageRow,
        proceed: impl FnOnce() -> bool,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            if !proceed() {
                return Ok(false);
            }
            insert_row(conn, row)?;
            Ok(true)
        })
    }

    /// Messages exchanged between two users in either direction, newest first.
    pub fn get_conversation(
        &self,
        user_a: &str,
        user_b: &str,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_conversation(conn, user_a, user_b, limit, offset))
    }

    /// Flip `read` on every unread message from `sender` to `receiver`.
    /// Returns the number of rows changed.
    pub fn mark_read(&self, sender: &str, receiver: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET read = 1 WHERE sender = ?1 AND receiver = ?2 AND read = 0",
                (sender, receiver),
            )?;
            Ok(changed)
        })
    }

    pub fn count_unread(&self, receiver: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE receiver = ?1 AND read = 0",
                [receiver],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
    }
}

fn insert_row(conn: &Connection, row: &MessageRow) -> Result<()> {
    conn.execute(
        "INSERT INTO messages (id, sender, receiver, body, message_type, attachment_url,
                               attachment_name, attachment_size, timestamp, read)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            row.id,
            row.sender,
            row.receiver,
            row.body,
            row.message_type,
            row.attachment_url,
            row.attachment_name,
            row.attachment_size,
            row.timestamp,
            row.read,
        ],
    )?;
    Ok(())
}

fn query_conversation(
    conn: &Connection,
    user_a: &str,
    user_b: &str,
    limit: u32,
    offset: u64,
) -> Result<Vec<MessageRow>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS}
         FROM messages
         WHERE (sender = ?1 AND receiver = ?2) OR (sender = ?2 AND receiver = ?1)
         ORDER BY timestamp DESC, rowid DESC
         LIMIT ?3 OFFSET ?4"
    );
    let mut stmt = conn.prepare(&sql)?;

    let rows = stmt
        .query_map(
            rusqlite::params![user_a, user_b, limit, offset as i64],
            message_from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender: row.get(1)?,
        receiver: row.get(2)?,
        body: row.get(3)?,
        message_type: row.get(4)?,
        attachment_url: row.get(5)?,
        attachment_name: row.get(6)?,
        attachment_size: row.get(7)?,
        timestamp: row.get(8)?,
        read: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, sender: &str, receiver: &str, ts: &str) -> MessageRow {
        MessageRow {
            id: id.to_string(),
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            body: format!("body {id}"),
            message_type: "text".to_string(),
            attachment_url: None,
            attachment_name: None,
            attachment_size: None,
            timestamp: ts.to_string(),
            read: false,
        }
    }

    #[test]
    fn conversation_includes_both_directions_only() {
        let db = Database::open_in_memory().unwrap();
        db.insert_message(&row("1", "alice", "bob", "2026-01-01T00:00:01.000000Z")).unwrap();
        db.insert_message(&row("2", "bob", "alice", "2026-01-01T00:00:02.000000Z")).unwrap();
        db.insert_message(&row("3", "alice", "carol", "2026-01-01T00:00:03.000000Z")).unwrap();

        let rows = db.get_conversation("bob", "alice", 50, 0).unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "1"]);
    }

    #[test]
    fn conditional_insert_skips_when_refused() {
        let db = Database::open_in_memory().unwrap();
        let skipped = row("1", "alice", "bob", "2026-01-01T00:00:01.000000Z");
        assert!(!db.insert_message_if(&skipped, || false).unwrap());
        let kept = row("2", "alice", "bob", "2026-01-01T00:00:02.000000Z");
        assert!(db.insert_message_if(&kept, || true).unwrap());

        let rows = db.get_conversation("alice", "bob", 50, 0).unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["2"]);
    }

    #[test]
    fn mark_read_is_directional() {
        let db = Database::open_in_memory().unwrap();
        db.insert_message(&row("1", "alice", "bob", "2026-01-01T00:00:01.000000Z")).unwrap();
        db.insert_message(&row("2", "alice", "bob", "2026-01-01T00:00:02.000000Z")).unwrap();
        db.insert_message(&row("3", "bob", "alice", "2026-01-01T00:00:03.000000Z")).unwrap();

        assert_eq!(db.count_unread("bob").unwrap(), 2);
        assert_eq!(db.mark_read("alice", "bob").unwrap(), 2);
        assert_eq!(db.count_unread("bob").unwrap(), 0);
        assert_eq!(db.count_unread("alice").unwrap(), 1);

        // Already read; nothing left to flip
        assert_eq!(db.mark_read("alice", "bob").unwrap(), 0);
    }

    #[test]
    fn rejects_unknown_message_type() {
        let db = Database::open_in_memory().unwrap();
        let mut bad = row("1", "alice", "bob", "2026-01-01T00:00:01.000000Z");
        bad.message_type = "video".to_string();
        assert!(db.insert_message(&bad).is_err());
    }
}
