use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;

/// Number of runs currently marked `running` in the studio database.
///
/// A missing database file or a missing `runs` table reads as zero: a
/// fresh node has nothing in flight. Any other error propagates so the
/// caller does not deploy past an unreadable gate.
pub fn active_training_jobs(db_file: &Path) -> Result<u64> {
    if !db_file.exists() {
        return Ok(0);
    }
    let conn = Connection::open_with_flags(db_file, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("opening {}", db_file.display()))?;
    let count = conn.query_row(
        "SELECT COUNT(*) FROM runs WHERE status = 'running'",
        [],
        |row| row.get::<_, i64>(0),
    );
    match count {
        Ok(n) => Ok(n.max(0) as u64),
        Err(rusqlite::Error::SqliteFailure(_, Some(msg))) if msg.contains("no such table") => {
            Ok(0)
        }
        Err(e) => Err(e).context("querying active runs"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_database_means_no_active_jobs() {
        let dir = tempdir().unwrap();
        assert_eq!(active_training_jobs(&dir.path().join("studio.db")).unwrap(), 0);
    }

    #[test]
    fn missing_table_means_no_active_jobs() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("studio.db");
        Connection::open(&db).unwrap();
        assert_eq!(active_training_jobs(&db).unwrap(), 0);
    }

    #[test]
    fn counts_only_running_runs() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("studio.db");
        let conn = Connection::open(&db).unwrap();
        conn.execute_batch(
            "CREATE TABLE runs (id TEXT PRIMARY KEY, run_type TEXT, status TEXT);
             INSERT INTO runs VALUES ('r1', 'sft_training', 'running');
             INSERT INTO runs VALUES ('r2', 'evaluation', 'completed');
             INSERT INTO runs VALUES ('r3', 'rl_training', 'failed');",
        )
        .unwrap();

        assert_eq!(active_training_jobs(&db).unwrap(), 1);

        conn.execute("UPDATE runs SET status = 'completed' WHERE id = 'r1'", [])
            .unwrap();
        assert_eq!(active_training_jobs(&db).unwrap(), 0);
    }
}
