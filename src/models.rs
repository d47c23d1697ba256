use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivityStatus {
    Success,
    Error,
    Info,
    Pending,
}

impl ActivityStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Info => "info",
            Self::Pending => "pending",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            "info" => Some(Self::Info),
            "pending" => Some(Self::Pending),
            _ => None,
        }
    }
}

/// Scalar metadata value. Nested objects and arrays are rejected at decode time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub agent: String,
    pub action: String,
    pub details: String,
    pub status: ActivityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, MetadataValue>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewActivity {
    pub agent: String,
    pub action: String,
    pub details: String,
    pub status: ActivityStatus,
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, MetadataValue>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    Cron,
    Reminder,
    Task,
}

impl TaskKind {
    /// Maps a scheduler `schedule.kind`. Recurring kinds are cron, one-shot kinds are
    /// reminders, anything unrecognised is a plain task.
    pub fn from_schedule_kind(kind: &str) -> Self {
        match kind.trim().to_ascii_lowercase().as_str() {
            "cron" | "every" => Self::Cron,
            "at" | "reminder" => Self::Reminder,
            _ => Self::Task,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "cron" => Some(Self::Cron),
            "reminder" => Some(Self::Reminder),
            "task" => Some(Self::Task),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cron => "cron",
            Self::Reminder => "reminder",
            Self::Task => "task",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTask {
    #[serde(alias = "_id")]
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<String>,
}

/// A task to be stored. `start_time` and `end_time` are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewScheduledTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub start_time: i64,
    #[serde(default)]
    pub end_time: Option<i64>,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub status: String,
    #[serde(default)]
    pub recurrence: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CronJobList {
    #[serde(default)]
    pub jobs: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJob {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub schedule: CronSchedule,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub state: Option<CronJobState>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronSchedule {
    pub kind: String,
    #[serde(default)]
    pub expr: Option<String>,
    #[serde(default)]
    pub every_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJobState {
    #[serde(default)]
    pub next_run_at_ms: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemorySource {
    Memory,
    Deliverable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryHit {
    #[serde(alias = "_id")]
    pub id: String,
    pub title: String,
    pub content: String,
    pub source: MemorySource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskHit {
    #[serde(alias = "_id")]
    pub id: String,
    pub title: String,
    pub status: String,
    pub start_time: i64,
}

impl From<&ScheduledTask> for TaskHit {
    fn from(task: &ScheduledTask) -> Self {
        Self {
            id: task.id.clone(),
            title: task.title.clone(),
            status: task.status.clone(),
            start_time: task.start_time,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultSet {
    #[serde(default)]
    pub memories: Vec<MemoryHit>,
    #[serde(default)]
    pub tasks: Vec<TaskHit>,
}

impl SearchResultSet {
    pub fn is_empty(&self) -> bool {
        self.memories.is_empty() && self.tasks.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::{ActivityRecord, ActivityStatus, MetadataValue, ScheduledTask, TaskKind};

    #[test]
    fn activity_record_accepts_scalar_metadata() {
        let record: ActivityRecord = serde_json::from_str(
            r#"{"timestamp":1,"agent":"scout","action":"scan","details":"ok","status":"success",
                "metadata":{"files":3,"ratio":0.5,"dry":true,"branch":"main"}}"#,
        )
        .expect("decode record");
        let metadata = record.metadata.expect("metadata");
        assert_eq!(metadata.get("files"), Some(&MetadataValue::Integer(3)));
        assert_eq!(metadata.get("ratio"), Some(&MetadataValue::Float(0.5)));
        assert_eq!(metadata.get("dry"), Some(&MetadataValue::Bool(true)));
        assert_eq!(record.status, ActivityStatus::Success);
    }

    #[test]
    fn activity_record_rejects_nested_metadata_and_unknown_status() {
        let nested = serde_json::from_str::<ActivityRecord>(
            r#"{"timestamp":1,"agent":"a","action":"b","details":"c","status":"info","metadata":{"x":{"y":1}}}"#,
        );
        assert!(nested.is_err());

        let status = serde_json::from_str::<ActivityRecord>(
            r#"{"timestamp":1,"agent":"a","action":"b","details":"c","status":"exploded"}"#,
        );
        assert!(status.is_err());
    }

    #[test]
    fn scheduled_task_accepts_underscore_id() {
        let task: ScheduledTask = serde_json::from_str(
            r#"{"_id":"job-1","title":"Digest","startTime":10,"type":"cron","status":"scheduled"}"#,
        )
        .expect("decode task");
        assert_eq!(task.id, "job-1");
        assert_eq!(task.kind, TaskKind::Cron);

        let encoded = serde_json::to_value(&task).expect("encode task");
        assert_eq!(encoded["type"], "cron");
        assert_eq!(encoded["startTime"], 10);
        assert!(encoded.get("endTime").is_none());
        assert!(encoded.get("description").is_none());
    }

    #[test]
    fn schedule_kinds_map_to_task_kinds() {
        assert_eq!(TaskKind::from_schedule_kind("cron"), TaskKind::Cron);
        assert_eq!(TaskKind::from_schedule_kind("every"), TaskKind::Cron);
        assert_eq!(TaskKind::from_schedule_kind("at"), TaskKind::Reminder);
        assert_eq!(TaskKind::from_schedule_kind("something"), TaskKind::Task);
        assert_eq!(TaskKind::parse("reminder"), Some(TaskKind::Reminder));
        assert_eq!(TaskKind::parse("every"), None);
    }
}
