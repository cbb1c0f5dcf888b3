//! Durable schedule and execution-log storage.

use crate::error::ScheduleError;
use crate::types::{
    ExecutionPolicy, ExecutionRecord, ExecutionStatus, HandlerType, NewSchedule, ScheduleItem,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use uuid::Uuid;

/// SQLite-backed schedule store.
///
/// The database runs in WAL mode so a crash immediately after a write cannot
/// corrupt state. One writer connection is shared behind a mutex; statements
/// are short and local, so contention stays negligible.
///
/// The execution log is append-only. A partial unique index over
/// `(schedule_id, period_identifier)` where `status = 'SUCCESS'` is the
/// serialization point for catch-up deduplication: of two concurrent fires
/// for the same period, exactly one insert succeeds.
pub struct ScheduleStore {
    conn: Mutex<Connection>,
}

impl ScheduleStore {
    /// Opens (and migrates) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the database cannot be opened or the
    /// schema cannot be applied.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ScheduleError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Opens an in-memory store, for tests.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self, ScheduleError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, ScheduleError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schedules (
                 id                  TEXT PRIMARY KEY,
                 description         TEXT NOT NULL,
                 schedule_expression TEXT NOT NULL,
                 payload             BLOB NOT NULL,
                 task_key            TEXT NOT NULL UNIQUE,
                 handler_type        TEXT NOT NULL,
                 execution_policy    TEXT NOT NULL,
                 is_active           INTEGER NOT NULL DEFAULT 1,
                 created_at          TEXT NOT NULL,
                 last_invocation     TEXT
             );
             CREATE TABLE IF NOT EXISTS execution_log (
                 id                TEXT PRIMARY KEY,
                 schedule_id       TEXT NOT NULL REFERENCES schedules(id) ON DELETE CASCADE,
                 period_identifier TEXT NOT NULL,
                 status            TEXT NOT NULL,
                 executed_at       TEXT NOT NULL,
                 notes             TEXT
             );
             CREATE UNIQUE INDEX IF NOT EXISTS execution_log_success_once
                 ON execution_log(schedule_id, period_identifier)
                 WHERE status = 'SUCCESS';",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Schedules
    // ─────────────────────────────────────────────────────────────────────

    /// Inserts a new schedule and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::DuplicateTaskKey`] when a schedule with the
    /// same task key already exists; the existing schedule is untouched.
    pub fn create(&self, new: &NewSchedule, now: DateTime<Utc>) -> Result<Uuid, ScheduleError> {
        let id = Uuid::new_v4();
        let result = self.conn.lock().execute(
            "INSERT INTO schedules
                 (id, description, schedule_expression, payload, task_key,
                  handler_type, execution_policy, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8)",
            params![
                id.to_string(),
                new.description,
                new.schedule_expression,
                new.payload,
                new.task_key,
                new.handler_type.as_str(),
                new.execution_policy.as_str(),
                now.to_rfc3339(),
            ],
        );
        match result {
            Ok(_) => Ok(id),
            Err(err) if is_unique_violation(&err) => {
                Err(ScheduleError::DuplicateTaskKey(new.task_key.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Deletes a schedule and (via cascade) its execution log.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::NotFound`] for an unknown id.
    pub fn delete(&self, id: Uuid) -> Result<(), ScheduleError> {
        let affected = self
            .conn
            .lock()
            .execute("DELETE FROM schedules WHERE id = ?1", [id.to_string()])?;
        if affected == 0 {
            return Err(ScheduleError::NotFound(id));
        }
        Ok(())
    }

    /// Fetches a schedule by id.
    pub fn get(&self, id: Uuid) -> Result<Option<ScheduleItem>, ScheduleError> {
        self.conn
            .lock()
            .query_row(
                &format!("{SELECT_SCHEDULE} WHERE id = ?1"),
                [id.to_string()],
                row_to_schedule,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Fetches a schedule by task key.
    pub fn get_by_key(&self, task_key: &str) -> Result<Option<ScheduleItem>, ScheduleError> {
        self.conn
            .lock()
            .query_row(
                &format!("{SELECT_SCHEDULE} WHERE task_key = ?1"),
                [task_key],
                row_to_schedule,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Lists all schedules, active and inactive.
    pub fn list(&self) -> Result<Vec<ScheduleItem>, ScheduleError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("{SELECT_SCHEDULE} ORDER BY created_at, id"))?;
        let rows = stmt.query_map([], row_to_schedule)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Lists active schedules.
    pub fn list_active(&self) -> Result<Vec<ScheduleItem>, ScheduleError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_SCHEDULE} WHERE is_active = 1 ORDER BY created_at, id"
        ))?;
        let rows = stmt.query_map([], row_to_schedule)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Sets a schedule's active flag.
    pub fn set_active(&self, id: Uuid, active: bool) -> Result<(), ScheduleError> {
        self.conn.lock().execute(
            "UPDATE schedules SET is_active = ?2 WHERE id = ?1",
            params![id.to_string(), active],
        )?;
        Ok(())
    }

    /// Updates the advisory `last_invocation` timestamp.
    pub fn set_last_invocation(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), ScheduleError> {
        self.conn.lock().execute(
            "UPDATE schedules SET last_invocation = ?2 WHERE id = ?1",
            params![id.to_string(), at.to_rfc3339()],
        )?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Execution log
    // ─────────────────────────────────────────────────────────────────────

    /// Whether a `SUCCESS` row exists for `(schedule_id, period)`.
    pub fn has_success(&self, schedule_id: Uuid, period: &str) -> Result<bool, ScheduleError> {
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM execution_log
             WHERE schedule_id = ?1 AND period_identifier = ?2 AND status = 'SUCCESS'",
            params![schedule_id.to_string(), period],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Tries to record a `SUCCESS` for `(schedule_id, period)`.
    ///
    /// Returns `true` when this call won the period. When another fire
    /// already recorded the period's success, a `SKIPPED_DUPLICATE` row is
    /// appended instead and `false` is returned.
    pub fn try_record_success(
        &self,
        schedule_id: Uuid,
        period: &str,
        executed_at: DateTime<Utc>,
        notes: Option<&str>,
    ) -> Result<bool, ScheduleError> {
        let insert = self.conn.lock().execute(
            "INSERT INTO execution_log (id, schedule_id, period_identifier, status, executed_at, notes)
             VALUES (?1, ?2, ?3, 'SUCCESS', ?4, ?5)",
            params![
                Uuid::new_v4().to_string(),
                schedule_id.to_string(),
                period,
                executed_at.to_rfc3339(),
                notes,
            ],
        );
        match insert {
            Ok(_) => Ok(true),
            Err(err) if is_unique_violation(&err) => {
                self.record(
                    schedule_id,
                    period,
                    ExecutionStatus::SkippedDuplicate,
                    executed_at,
                    Some("success already recorded for this period"),
                )?;
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Appends an execution-log row.
    pub fn record(
        &self,
        schedule_id: Uuid,
        period: &str,
        status: ExecutionStatus,
        executed_at: DateTime<Utc>,
        notes: Option<&str>,
    ) -> Result<(), ScheduleError> {
        self.conn.lock().execute(
            "INSERT INTO execution_log (id, schedule_id, period_identifier, status, executed_at, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                Uuid::new_v4().to_string(),
                schedule_id.to_string(),
                period,
                status.as_str(),
                executed_at.to_rfc3339(),
                notes,
            ],
        )?;
        Ok(())
    }

    /// Returns the most recent execution records for a schedule, newest
    /// first.
    pub fn recent_executions(
        &self,
        schedule_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, ScheduleError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, schedule_id, period_identifier, status, executed_at, notes
             FROM execution_log WHERE schedule_id = ?1
             ORDER BY executed_at DESC, id LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![schedule_id.to_string(), limit as i64], |row| {
            let id: String = row.get(0)?;
            let schedule_id: String = row.get(1)?;
            let status: String = row.get(3)?;
            let executed_at: String = row.get(4)?;
            Ok(ExecutionRecord {
                id: parse_uuid(&id, row)?,
                schedule_id: parse_uuid(&schedule_id, row)?,
                period_identifier: row.get(2)?,
                status: ExecutionStatus::parse(&status).unwrap_or(ExecutionStatus::Failure),
                executed_at: parse_datetime(&executed_at, row)?,
                notes: row.get(5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

impl core::fmt::Debug for ScheduleStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ScheduleStore").finish_non_exhaustive()
    }
}

const SELECT_SCHEDULE: &str = "SELECT id, description, schedule_expression, payload, task_key,
     handler_type, execution_policy, is_active, created_at, last_invocation
     FROM schedules";

fn row_to_schedule(row: &Row<'_>) -> rusqlite::Result<ScheduleItem> {
    let id: String = row.get(0)?;
    let handler_type: String = row.get(5)?;
    let policy: String = row.get(6)?;
    let created_at: String = row.get(8)?;
    let last_invocation: Option<String> = row.get(9)?;

    Ok(ScheduleItem {
        id: parse_uuid(&id, row)?,
        description: row.get(1)?,
        schedule_expression: row.get(2)?,
        payload: row.get(3)?,
        task_key: row.get(4)?,
        handler_type: HandlerType::parse(&handler_type)
            .ok_or_else(|| invalid_column(5, &handler_type))?,
        execution_policy: ExecutionPolicy::parse(&policy)
            .ok_or_else(|| invalid_column(6, &policy))?,
        is_active: row.get(7)?,
        created_at: parse_datetime(&created_at, row)?,
        last_invocation: last_invocation
            .map(|text| parse_datetime(&text, row))
            .transpose()?,
    })
}

fn parse_uuid(text: &str, _row: &Row<'_>) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(text).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err))
    })
}

fn parse_datetime(text: &str, _row: &Row<'_>) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err))
        })
}

fn invalid_column(index: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        format!("unrecognized value '{value}'").into(),
    )
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store() -> ScheduleStore {
        ScheduleStore::open_in_memory().unwrap()
    }

    fn new_schedule(task_key: &str) -> NewSchedule {
        NewSchedule {
            description: "test schedule".to_string(),
            schedule_expression: "0 7 * * *".to_string(),
            payload: b"{}".to_vec(),
            task_key: task_key.to_string(),
            handler_type: HandlerType::DirectHandler,
            execution_policy: ExecutionPolicy::RunOncePerPeriodCatchUp,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 9, 30, 0).unwrap()
    }

    #[test]
    fn create_and_fetch_roundtrip() {
        let store = store();
        let id = store.create(&new_schedule("foo"), now()).unwrap();

        let item = store.get(id).unwrap().unwrap();
        assert_eq!(item.task_key, "foo");
        assert_eq!(item.handler_type, HandlerType::DirectHandler);
        assert!(item.is_active);
        assert!(item.last_invocation.is_none());

        let by_key = store.get_by_key("foo").unwrap().unwrap();
        assert_eq!(by_key.id, id);
    }

    #[test]
    fn duplicate_task_key_is_rejected_and_original_kept() {
        let store = store();
        let id = store.create(&new_schedule("foo"), now()).unwrap();

        let mut second = new_schedule("foo");
        second.description = "imposter".to_string();
        let err = store.create(&second, now()).unwrap_err();
        assert!(matches!(err, ScheduleError::DuplicateTaskKey(_)));

        let kept = store.get(id).unwrap().unwrap();
        assert_eq!(kept.description, "test schedule");
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn success_is_unique_per_period() {
        let store = store();
        let id = store.create(&new_schedule("foo"), now()).unwrap();

        assert!(store.try_record_success(id, "2024-07-01", now(), None).unwrap());
        assert!(!store.try_record_success(id, "2024-07-01", now(), None).unwrap());
        assert!(store.has_success(id, "2024-07-01").unwrap());

        // The losing attempt left an audit row behind.
        let log = store.recent_executions(id, 10).unwrap();
        assert_eq!(log.len(), 2);
        assert!(
            log.iter()
                .any(|rec| rec.status == ExecutionStatus::SkippedDuplicate)
        );

        // A different period is unaffected.
        assert!(store.try_record_success(id, "2024-07-02", now(), None).unwrap());
    }

    #[test]
    fn delete_cascades_to_log() {
        let store = store();
        let id = store.create(&new_schedule("foo"), now()).unwrap();
        store
            .record(id, "2024-07-01", ExecutionStatus::Failure, now(), Some("boom"))
            .unwrap();

        store.delete(id).unwrap();
        assert!(store.get(id).unwrap().is_none());
        assert!(matches!(
            store.delete(id),
            Err(ScheduleError::NotFound(_))
        ));
    }

    #[test]
    fn deactivation_hides_from_active_list() {
        let store = store();
        let id = store.create(&new_schedule("foo"), now()).unwrap();
        store.set_active(id, false).unwrap();

        assert!(store.list_active().unwrap().is_empty());
        assert_eq!(store.list().unwrap().len(), 1);
        assert!(!store.get(id).unwrap().unwrap().is_active);
    }
}
