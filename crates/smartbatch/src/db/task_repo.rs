//! Per-document rows in `document_tasks`.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

#[derive(Debug, Clone, PartialEq)]
pub struct TaskRow {
    pub generation_id: String,
    pub idx: i64,
    pub status: String,
    pub attempts: i64,
    pub artifact_location: Option<String>,
    pub artifact_size: Option<i64>,
    pub artifact_format: Option<String>,
    pub artifact_checksum: Option<String>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub error_retryable: Option<bool>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            generation_id: row.get("generation_id")?,
            idx: row.get("idx")?,
            status: row.get("status")?,
            attempts: row.get("attempts")?,
            artifact_location: row.get("artifact_location")?,
            artifact_size: row.get("artifact_size")?,
            artifact_format: row.get("artifact_format")?,
            artifact_checksum: row.get("artifact_checksum")?,
            error_kind: row.get("error_kind")?,
            error_message: row.get("error_message")?,
            error_retryable: row.get("error_retryable")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
        })
    }
}

/// Inserts all rows in one transaction.
pub fn insert_all(db: &Database, tasks: &[TaskRow]) -> Result<(), DatabaseError> {
    db.with_transaction(|tx| {
        let mut stmt = tx.prepare(
            "INSERT INTO document_tasks (generation_id, idx, status, attempts, artifact_location,
             artifact_size, artifact_format, artifact_checksum, error_kind, error_message,
             error_retryable, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )?;
        for task in tasks {
            stmt.execute(params![
                task.generation_id,
                task.idx,
                task.status,
                task.attempts,
                task.artifact_location,
                task.artifact_size,
                task.artifact_format,
                task.artifact_checksum,
                task.error_kind,
                task.error_message,
                task.error_retryable,
                task.started_at,
                task.finished_at,
            ])?;
        }
        Ok(())
    })
}

pub fn update(db: &Database, task: &TaskRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute(
            "UPDATE document_tasks SET status=?3, attempts=?4, artifact_location=?5,
             artifact_size=?6, artifact_format=?7, artifact_checksum=?8, error_kind=?9,
             error_message=?10, error_retryable=?11, started_at=?12, finished_at=?13
             WHERE generation_id=?1 AND idx=?2",
            params![
                task.generation_id,
                task.idx,
                task.status,
                task.attempts,
                task.artifact_location,
                task.artifact_size,
                task.artifact_format,
                task.artifact_checksum,
                task.error_kind,
                task.error_message,
                task.error_retryable,
                task.started_at,
                task.finished_at,
            ],
        )?;
        if affected == 0 {
            return Err(DatabaseError::InvalidRow {
                generation_id: task.generation_id.clone(),
                reason: format!("no task row with index {}", task.idx),
            });
        }
        Ok(())
    })
}

/// All task rows of a generation in index order.
pub fn find_by_generation(
    db: &Database,
    generation_id: &str,
) -> Result<Vec<TaskRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM document_tasks WHERE generation_id = ?1 ORDER BY idx")?;
        let rows = stmt
            .query_map(params![generation_id], TaskRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
