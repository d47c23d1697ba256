use crate::errors::{AppError, AppResult};
use crate::models::{
    ActivityRecord, ActivityStatus, MetadataValue, NewActivity, NewScheduledTask, ScheduledTask, TaskKind,
};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SCHEMA_SQL: &str = include_str!("schema.sql");

const ACTIVITY_COLUMNS: &str = "id, timestamp, agent, action, details, status, metadata_json";
const TASK_COLUMNS: &str = "id, title, description, start_time, end_time, kind, status, recurrence";

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

struct ActivityRow {
    id: i64,
    timestamp: i64,
    agent: String,
    action: String,
    details: String,
    status: String,
    metadata_json: Option<String>,
}

struct TaskRow {
    id: i64,
    title: String,
    description: Option<String>,
    start_time: i64,
    end_time: Option<i64>,
    kind: String,
    status: String,
    recurrence: Option<String>,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn append_activity(&self, activity: NewActivity) -> AppResult<ActivityRecord> {
        let timestamp = Utc::now().timestamp_millis();
        let metadata_json = activity
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO activities (timestamp, agent, action, details, status, metadata_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                timestamp,
                activity.agent,
                activity.action,
                activity.details,
                activity.status.as_str(),
                metadata_json,
            ],
        )?;

        Ok(ActivityRecord {
            timestamp,
            agent: activity.agent,
            action: activity.action,
            details: activity.details,
            status: activity.status,
            metadata: activity.metadata,
        })
    }

    /// Every stored activity in insertion order, oldest first.
    pub fn activity_log(&self) -> AppResult<Vec<ActivityRecord>> {
        self.query_activities(
            &format!("SELECT {} FROM activities ORDER BY id ASC", ACTIVITY_COLUMNS),
            params![],
        )
    }

    /// Newest first by timestamp; rows inserted later win ties.
    pub fn recent_activities(&self, limit: usize) -> AppResult<Vec<ActivityRecord>> {
        self.query_activities(
            &format!(
                "SELECT {} FROM activities ORDER BY timestamp DESC, id DESC LIMIT ?1",
                ACTIVITY_COLUMNS
            ),
            params![limit as i64],
        )
    }

    pub fn add_task(&self, task: NewScheduledTask) -> AppResult<ScheduledTask> {
        if let Some(end_time) = task.end_time {
            if end_time < task.start_time {
                return Err(AppError::Config(format!(
                    "task '{}' ends before it starts",
                    task.title
                )));
            }
        }

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO scheduled_tasks (title, description, start_time, end_time, kind, status, recurrence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                task.title,
                task.description,
                task.start_time,
                task.end_time,
                task.kind.as_str(),
                task.status,
                task.recurrence,
            ],
        )?;

        Ok(ScheduledTask {
            id: conn.last_insert_rowid().to_string(),
            title: task.title,
            description: task.description,
            start_time: task.start_time,
            end_time: task.end_time,
            kind: task.kind,
            status: task.status,
            recurrence: task.recurrence,
        })
    }

    /// Stored tasks ordered by start time.
    pub fn scheduled_tasks(&self) -> AppResult<Vec<ScheduledTask>> {
        self.query_tasks(
            &format!("SELECT {} FROM scheduled_tasks ORDER BY start_time ASC, id ASC", TASK_COLUMNS),
            params![],
        )
    }

    /// Stored tasks starting within `[from, to]`, ordered by start time.
    pub fn tasks_between(&self, from: i64, to: i64) -> AppResult<Vec<ScheduledTask>> {
        self.query_tasks(
            &format!(
                "SELECT {} FROM scheduled_tasks
                 WHERE start_time >= ?1 AND start_time <= ?2
                 ORDER BY start_time ASC, id ASC",
                TASK_COLUMNS
            ),
            params![from, to],
        )
    }

    fn query_activities(&self, sql: &str, args: impl rusqlite::Params) -> AppResult<Vec<ActivityRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, |row| {
                Ok(ActivityRow {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    agent: row.get(2)?,
                    action: row.get(3)?,
                    details: row.get(4)?,
                    status: row.get(5)?,
                    metadata_json: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows.into_iter().filter_map(activity_from_row).collect())
    }

    fn query_tasks(&self, sql: &str, args: impl rusqlite::Params) -> AppResult<Vec<ScheduledTask>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, |row| {
                Ok(TaskRow {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    description: row.get(2)?,
                    start_time: row.get(3)?,
                    end_time: row.get(4)?,
                    kind: row.get(5)?,
                    status: row.get(6)?,
                    recurrence: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows.into_iter().filter_map(task_from_row).collect())
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> AppResult<()> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }
}

fn task_from_row(row: TaskRow) -> Option<ScheduledTask> {
    let Some(kind) = TaskKind::parse(&row.kind) else {
        tracing::warn!(row_id = row.id, kind = %row.kind, "skipping task row with unknown kind");
        return None;
    };
    Some(ScheduledTask {
        id: row.id.to_string(),
        title: row.title,
        description: row.description,
        start_time: row.start_time,
        end_time: row.end_time,
        kind,
        status: row.status,
        recurrence: row.recurrence,
    })
}

fn activity_from_row(row: ActivityRow) -> Option<ActivityRecord> {
    let Some(status) = ActivityStatus::parse(&row.status) else {
        tracing::warn!(row_id = row.id, status = %row.status, "skipping activity row with unknown status");
        return None;
    };
    let metadata = match row.metadata_json.as_deref() {
        None => None,
        Some(raw) => match serde_json::from_str::<BTreeMap<String, MetadataValue>>(raw) {
            Ok(metadata) => Some(metadata),
            Err(error) => {
                tracing::warn!(row_id = row.id, error = %error, "skipping activity row with malformed metadata");
                return None;
            }
        },
    };
    Some(ActivityRecord {
        timestamp: row.timestamp,
        agent: row.agent,
        action: row.action,
        details: row.details,
        status,
        metadata,
    })
}
