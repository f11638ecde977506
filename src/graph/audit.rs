//! Append-only audit trail for graph mutations.
//!
//! Multi-step operations (merge, supersession) are not atomic; the log is how
//! partially-applied state stays diagnosable.

use rusqlite::{params, Connection};

use super::error::GraphResult;

/// Write an entry to the graph_log audit table.
pub(crate) fn log_event(
    conn: &Connection,
    operation: &str,
    subject_id: &str,
    details: Option<&serde_json::Value>,
) -> GraphResult<()> {
    let now = chrono::Utc::now().to_rfc3339();
    let details_json = details.map(|d| d.to_string());
    conn.execute(
        "INSERT INTO graph_log (operation, subject_id, details, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![operation, subject_id, details_json, now],
    )?;
    Ok(())
}

/// Fetch the audit entries for one subject, oldest first.
pub fn find_log(
    conn: &Connection,
    subject_id: &str,
) -> GraphResult<Vec<(String, Option<serde_json::Value>, String)>> {
    let mut stmt = conn.prepare(
        "SELECT operation, details, created_at FROM graph_log \
         WHERE subject_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![subject_id], |row| {
            let details_str: Option<String> = row.get(1)?;
            Ok((
                row.get::<_, String>(0)?,
                details_str.and_then(|s| serde_json::from_str(&s).ok()),
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
