//! CRUD for the `generation_jobs` table.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: String,
    pub mode: String,
    pub status: String,
    pub owner: Option<String>,
    pub record_count: i64,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            mode: row.get("mode")?,
            status: row.get("status")?,
            owner: row.get("owner")?,
            record_count: row.get("record_count")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<String>,
    pub owner: Option<String>,
    /// Only jobs whose status is not one of these.
    pub exclude_statuses: Vec<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO generation_jobs (id, mode, status, owner, record_count, created_at,
             started_at, completed_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                job.id,
                job.mode,
                job.status,
                job.owner,
                job.record_count,
                job.created_at,
                job.started_at,
                job.completed_at,
                job.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Overwrites status and timestamps. Identity fields never change.
pub fn update(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE generation_jobs SET status=?2, started_at=?3, completed_at=?4, updated_at=?5
             WHERE id=?1",
            params![
                job.id,
                job.status,
                job.started_at,
                job.completed_at,
                job.updated_at,
            ],
        )?;
        Ok(())
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM generation_jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Returns one page of matching rows (newest first) and the total match count.
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.clone()));
        }
        if let Some(ref owner) = filter.owner {
            conditions.push(format!("owner = ?{}", param_values.len() + 1));
            param_values.push(Box::new(owner.clone()));
        }
        for excluded in &filter.exclude_statuses {
            conditions.push(format!("status != ?{}", param_values.len() + 1));
            param_values.push(Box::new(excluded.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM generation_jobs {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM generation_jobs {} ORDER BY created_at DESC, id LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<JobRow> = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Jobs that never reached a terminal status, oldest first. After a crash
/// these are the runs that were cut short.
pub fn find_incomplete(db: &Database, terminal: &[&str]) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let placeholders: Vec<String> = (1..=terminal.len()).map(|i| format!("?{}", i)).collect();
        let sql = if terminal.is_empty() {
            "SELECT * FROM generation_jobs ORDER BY created_at".to_string()
        } else {
            format!(
                "SELECT * FROM generation_jobs WHERE status NOT IN ({}) ORDER BY created_at",
                placeholders.join(", ")
            )
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(terminal.iter()), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn count_by_status(db: &Database, status: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM generation_jobs WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

pub fn update_status(
    db: &Database,
    id: &str,
    status: &str,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE generation_jobs SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status, updated_at],
        )?;
        Ok(())
    })
}

/// Deletes a job and (by cascade) its tasks. Returns whether a row existed.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute("DELETE FROM generation_jobs WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    })
}
