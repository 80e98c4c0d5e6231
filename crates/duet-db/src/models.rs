/// Database row types. These map directly to SQLite rows and stay distinct
/// from the wire models in duet-types.

pub struct MessageRow {
    pub id: String,
    pub sender: String,
    pub receiver: String,
    pub body: String,
    pub message_type: String,
    pub attachment_url: Option<String>,
    pub attachment_name: Option<String>,
    pub attachment_size: Option<i64>,
    /// RFC 3339, UTC, fixed microsecond precision so text order is time order
    pub timestamp: String,
    pub read: bool,
}
