use crate::config::AppSettings;
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{ActivityRecord, HealthResponse, ScheduledTask, SearchResultSet};
use crate::sources::activity::JsonActivityLog;
use crate::sources::search::WorkspaceSearch;
use crate::sources::tasks::{CronJobSource, TaskSources};
use crate::sources::{or_degraded, ActivitySource, SearchBackend, TaskSource};
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Clone)]
pub struct ServerState {
    activity: Arc<dyn ActivitySource>,
    tasks: Arc<dyn TaskSource>,
    search: Arc<dyn SearchBackend>,
}

impl ServerState {
    pub fn new(
        activity: Arc<dyn ActivitySource>,
        tasks: Arc<dyn TaskSource>,
        search: Arc<dyn SearchBackend>,
    ) -> Self {
        Self {
            activity,
            tasks,
            search,
        }
    }

    pub fn from_settings(settings: &AppSettings) -> AppResult<Self> {
        let scheduler: Arc<dyn TaskSource> = Arc::new(CronJobSource::new(settings.cron_jobs()));
        let (activity, tasks) = match settings.database() {
            Some(path) => {
                let db = Arc::new(Database::new(&path)?);
                let activity: Arc<dyn ActivitySource> = db.clone();
                let tasks: Arc<dyn TaskSource> = Arc::new(
                    TaskSources::new()
                        .with("scheduler", scheduler)
                        .with("database", db),
                );
                (activity, tasks)
            }
            None => {
                let activity: Arc<dyn ActivitySource> = Arc::new(JsonActivityLog::new(settings.activity_log()));
                (activity, scheduler)
            }
        };
        let search = WorkspaceSearch::new(settings.workspace_root.clone())
            .with_tasks(Arc::clone(&tasks))
            .with_limits(
                settings.search_min_chars,
                settings.search_memory_cap,
                settings.search_task_cap,
            );
        Ok(Self::new(activity, tasks, Arc::new(search)))
    }
}

#[derive(Debug, Default, Deserialize)]
struct TaskWindow {
    from: Option<i64>,
    to: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchParams {
    q: Option<String>,
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/api/activity-logs", get(activity_logs))
        .route("/api/tasks", get(scheduled_tasks))
        .route("/api/search", get(search))
        .route("/api/health", get(health))
        .with_state(state)
}

async fn activity_logs(State(state): State<ServerState>) -> Json<Vec<ActivityRecord>> {
    let source = Arc::clone(&state.activity);
    Json(read_blocking("activity", move || source.recent(None)).await)
}

async fn scheduled_tasks(
    State(state): State<ServerState>,
    window: Option<Query<TaskWindow>>,
) -> Json<Vec<ScheduledTask>> {
    let source = Arc::clone(&state.tasks);
    let window = window.map(|Query(window)| window).unwrap_or_default();
    let tasks = match (window.from, window.to) {
        (None, None) => read_blocking("tasks", move || source.list()).await,
        (from, to) => {
            let (from, to) = (from.unwrap_or(i64::MIN), to.unwrap_or(i64::MAX));
            read_blocking("tasks", move || source.window(from, to)).await
        }
    };
    Json(tasks)
}

async fn search(
    State(state): State<ServerState>,
    params: Option<Query<SearchParams>>,
) -> Json<SearchResultSet> {
    let Some(query) = params.and_then(|Query(params)| params.q) else {
        return Json(SearchResultSet::default());
    };
    let backend = Arc::clone(&state.search);
    Json(read_blocking("search", move || backend.search(&query)).await)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Runs a synchronous adapter read off the async workers. Any failure degrades
/// to the empty payload.
async fn read_blocking<T, F>(kind: &'static str, read: F) -> T
where
    T: Default + Send + 'static,
    F: FnOnce() -> AppResult<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(read).await {
        Ok(result) => or_degraded(kind, result),
        Err(error) => or_degraded(kind, Err(AppError::Internal(error.to_string()))),
    }
}

pub async fn serve_on(
    listener: TcpListener,
    state: ServerState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> AppResult<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "read endpoints listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    tracing::info!(%addr, "read endpoints stopped");
    Ok(())
}

pub async fn serve(settings: &AppSettings) -> AppResult<()> {
    let state = ServerState::from_settings(settings)?;
    let listener = TcpListener::bind(&settings.bind_addr)
        .await
        .map_err(|error| AppError::Io(format!("bind {}: {}", settings.bind_addr, error)))?;
    serve_on(listener, state, async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %error, "failed to listen for ctrl-c");
        }
    })
    .await
}
