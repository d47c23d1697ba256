use crate::db::Database;
use crate::errors::AppResult;
use crate::models::{CronJob, CronJobList, ScheduledTask, TaskKind};
use crate::sources::TaskSource;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const UNNAMED_TASK: &str = "Unnamed Task";

/// Scheduler job dump (`{"jobs": [...]}`) exposed as scheduled tasks.
#[derive(Debug, Clone)]
pub struct CronJobSource {
    path: PathBuf,
}

impl CronJobSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TaskSource for CronJobSource {
    fn list(&self) -> AppResult<Vec<ScheduledTask>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        let list: CronJobList = serde_json::from_str(&raw)?;
        let now_ms = Utc::now().timestamp_millis();

        let mut tasks = Vec::with_capacity(list.jobs.len());
        for (index, job) in list.jobs.into_iter().enumerate() {
            match serde_json::from_value::<CronJob>(job) {
                Ok(job) => tasks.push(task_from_job(job, now_ms)),
                Err(error) => {
                    tracing::warn!(index, error = %error, "skipping malformed scheduler job");
                }
            }
        }
        Ok(tasks)
    }
}

impl TaskSource for Database {
    fn list(&self) -> AppResult<Vec<ScheduledTask>> {
        self.scheduled_tasks()
    }

    fn window(&self, from: i64, to: i64) -> AppResult<Vec<ScheduledTask>> {
        self.tasks_between(from, to)
    }
}

/// Several task sources served as one list ordered by start time. A failing
/// source is logged and contributes nothing.
#[derive(Clone, Default)]
pub struct TaskSources {
    sources: Vec<(&'static str, Arc<dyn TaskSource>)>,
}

impl TaskSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &'static str, source: Arc<dyn TaskSource>) -> Self {
        self.sources.push((name, source));
        self
    }

    fn collect(&self, read: impl Fn(&dyn TaskSource) -> AppResult<Vec<ScheduledTask>>) -> Vec<ScheduledTask> {
        let mut tasks = Vec::new();
        for (name, source) in &self.sources {
            match read(source.as_ref()) {
                Ok(found) => tasks.extend(found),
                Err(error) => {
                    tracing::warn!(source = *name, error = %error, "task source failed, skipping it");
                }
            }
        }
        tasks.sort_by_key(|task| task.start_time);
        tasks
    }
}

impl TaskSource for TaskSources {
    fn list(&self) -> AppResult<Vec<ScheduledTask>> {
        Ok(self.collect(|source| source.list()))
    }

    fn window(&self, from: i64, to: i64) -> AppResult<Vec<ScheduledTask>> {
        Ok(self.collect(|source| source.window(from, to)))
    }
}

pub fn task_from_job(job: CronJob, now_ms: i64) -> ScheduledTask {
    let title = job
        .name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| UNNAMED_TASK.to_string());
    let start_time = job
        .state
        .and_then(|state| state.next_run_at_ms)
        .unwrap_or(now_ms);
    let recurrence = match (job.schedule.expr, job.schedule.every_ms) {
        (Some(expr), _) if !expr.trim().is_empty() => Some(expr),
        (_, Some(every_ms)) => Some(format!("every {}ms", every_ms)),
        _ => None,
    };

    ScheduledTask {
        id: job.id,
        title,
        description: None,
        start_time,
        end_time: None,
        kind: TaskKind::from_schedule_kind(&job.schedule.kind),
        status: if job.enabled { "scheduled" } else { "disabled" }.to_string(),
        recurrence,
    }
}

/// Tasks whose start time falls within `[from, to]`, ordered by start time.
pub fn tasks_in_window(tasks: &[ScheduledTask], from: i64, to: i64) -> Vec<ScheduledTask> {
    let mut selected = tasks
        .iter()
        .filter(|task| task.start_time >= from && task.start_time <= to)
        .cloned()
        .collect::<Vec<_>>();
    selected.sort_by_key(|task| task.start_time);
    selected
}
