pub mod client;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod errors;
pub mod models;
pub mod server;
pub mod sources;
pub mod sync;

use crate::client::DashboardClient;
use crate::config::AppSettings;
use crate::dashboard::ReadModel;
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{ActivityStatus, MetadataValue, NewActivity, NewScheduledTask, TaskKind};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

#[derive(Debug, Parser)]
#[command(name = "mission-control", version, about = "Mission control read model and local read endpoints")]
struct Cli {
    /// Settings file (JSON). Missing file means defaults.
    #[arg(long, env = "MISSION_CONTROL_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the activity, task and search read endpoints.
    Serve,
    /// Poll the read endpoints and print every snapshot change as a JSON line.
    Watch {
        /// Search query to keep live alongside the polled feeds.
        #[arg(long)]
        query: Option<String>,
    },
    /// Append an entry to the SQLite activity log.
    Log {
        #[arg(long)]
        agent: String,
        #[arg(long)]
        action: String,
        #[arg(long, default_value = "")]
        details: String,
        #[arg(long, default_value = "info")]
        status: String,
        /// Metadata as key=value, repeatable.
        #[arg(long = "meta", value_parser = parse_meta)]
        metadata: Vec<(String, String)>,
    },
    /// Add a scheduled task to the SQLite store.
    Task {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: Option<String>,
        /// Epoch milliseconds or RFC 3339.
        #[arg(long, value_parser = parse_time)]
        start: i64,
        /// Epoch milliseconds or RFC 3339.
        #[arg(long, value_parser = parse_time)]
        end: Option<i64>,
        #[arg(long = "type", default_value = "task")]
        kind: String,
        #[arg(long, default_value = "scheduled")]
        status: String,
        #[arg(long)]
        recurrence: Option<String>,
    },
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = AppSettings::load(cli.config.as_deref())?;
    init_tracing(settings.log_dir.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(async move {
        match cli.command {
            Command::Serve => server::serve(&settings).await,
            Command::Watch { query } => watch(&settings, query).await,
            Command::Log {
                agent,
                action,
                details,
                status,
                metadata,
            } => append_activity(&settings, agent, action, details, &status, metadata),
            Command::Task {
                title,
                description,
                start,
                end,
                kind,
                status,
                recurrence,
            } => TaskKind::parse(&kind)
                .ok_or_else(|| AppError::Config(format!("unknown task type '{}'", kind)))
                .and_then(|kind| {
                    add_task(
                        &settings,
                        NewScheduledTask {
                            title,
                            description,
                            start_time: start,
                            end_time: end,
                            kind,
                            status,
                            recurrence,
                        },
                    )
                }),
        }
    })?;
    Ok(())
}

async fn watch(settings: &AppSettings, query: Option<String>) -> AppResult<()> {
    let client = DashboardClient::from_settings(settings)?;
    tracing::info!(base_url = %client.base_url(), "watching read endpoints");
    let model = ReadModel::connect(&client, settings);
    let mut activity = model.activity.mount();
    let mut tasks = model.tasks.mount();
    let mut search = model.search.subscribe();
    if let Some(query) = query.as_deref() {
        model.search.set_query(query);
    }

    loop {
        tokio::select! {
            Some(snapshot) = activity.changed() => {
                tracing::info!(records = snapshot.len(), "activity snapshot replaced");
                emit("activity", &*snapshot)?;
            }
            Some(snapshot) = tasks.changed() => {
                tracing::info!(tasks = snapshot.len(), "task snapshot replaced");
                emit("tasks", &*snapshot)?;
            }
            Ok(()) = search.changed() => {
                let results = search.borrow_and_update().clone();
                tracing::info!(
                    memories = results.memories.len(),
                    tasks = results.tasks.len(),
                    "search results replaced"
                );
                emit("search", &*results)?;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct Emitted<'a, T: ?Sized> {
    kind: &'a str,
    data: &'a T,
}

fn emit<T: Serialize + ?Sized>(kind: &str, data: &T) -> AppResult<()> {
    let line = serde_json::to_string(&Emitted { kind, data })?;
    println!("{}", line);
    Ok(())
}

fn append_activity(
    settings: &AppSettings,
    agent: String,
    action: String,
    details: String,
    status: &str,
    metadata: Vec<(String, String)>,
) -> AppResult<()> {
    let Some(path) = settings.database() else {
        return Err(AppError::Config(
            "databasePath must be set to append activity".to_string(),
        ));
    };
    let status = ActivityStatus::parse(status)
        .ok_or_else(|| AppError::Config(format!("unknown activity status '{}'", status)))?;
    let metadata = (!metadata.is_empty()).then(|| {
        metadata
            .into_iter()
            .map(|(key, value)| (key, MetadataValue::Text(value)))
            .collect::<BTreeMap<_, _>>()
    });

    let db = Database::new(&path)?;
    let record = db.append_activity(NewActivity {
        agent,
        action,
        details,
        status,
        metadata,
    })?;
    tracing::info!(db = %db.path().display(), timestamp = record.timestamp, "activity appended");
    emit("activity", &record)
}

fn add_task(settings: &AppSettings, task: NewScheduledTask) -> AppResult<()> {
    let Some(path) = settings.database() else {
        return Err(AppError::Config("databasePath must be set to add tasks".to_string()));
    };
    let db = Database::new(&path)?;
    let stored = db.add_task(task)?;
    tracing::info!(db = %db.path().display(), id = %stored.id, start_time = stored.start_time, "task added");
    emit("task", &stored)
}

fn parse_time(raw: &str) -> Result<i64, String> {
    if let Ok(millis) = raw.parse::<i64>() {
        return Ok(millis);
    }
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|time| time.timestamp_millis())
        .map_err(|error| format!("expected epoch millis or RFC 3339, got '{}': {}", raw, error))
}

fn parse_meta(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    if key.trim().is_empty() {
        return Err("metadata key cannot be empty".to_string());
    }
    Ok((key.trim().to_string(), value.to_string()))
}

fn init_tracing(log_dir: Option<&Path>) -> AppResult<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let Some(log_dir) = log_dir else {
        return tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|error| AppError::Internal(error.to_string()));
    };

    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "mission-control.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(error.to_string()))
}

#[cfg(test)]
mod tests {
    use super::{add_task, append_activity, parse_meta, parse_time};
    use crate::config::AppSettings;
    use crate::db::Database;
    use crate::models::{NewScheduledTask, TaskKind};

    #[test]
    fn parses_metadata_pairs() {
        assert_eq!(
            parse_meta("branch=main=x").expect("pair"),
            ("branch".to_string(), "main=x".to_string())
        );
        assert!(parse_meta("novalue").is_err());
        assert!(parse_meta("=value").is_err());
    }

    #[test]
    fn append_requires_a_database_path() {
        let err = append_activity(
            &AppSettings::default(),
            "scout".to_string(),
            "scan".to_string(),
            String::new(),
            "info",
            Vec::new(),
        )
        .expect_err("no db configured");
        assert!(err.to_string().contains("databasePath"));
    }

    #[test]
    fn append_writes_to_configured_database() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = AppSettings {
            workspace_root: dir.path().to_path_buf(),
            database_path: Some("state/activity.db".into()),
            ..AppSettings::default()
        };
        append_activity(
            &settings,
            "scout".to_string(),
            "scan".to_string(),
            "swept inbox".to_string(),
            "success",
            vec![("count".to_string(), "3".to_string())],
        )
        .expect("append");

        let db = Database::new(&dir.path().join("state/activity.db")).expect("open");
        let recent = db.recent_activities(5).expect("recent");
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].details, "swept inbox");
        assert!(recent[0].metadata.is_some());
    }

    #[test]
    fn parses_millis_and_rfc3339_times() {
        assert_eq!(parse_time("1760866200000"), Ok(1_760_866_200_000));
        assert_eq!(parse_time("1970-01-01T00:00:01Z"), Ok(1_000));
        assert_eq!(parse_time("2026-10-19T09:30:00+02:00"), Ok(1_792_395_000_000));
        assert!(parse_time("next tuesday").is_err());
    }

    #[test]
    fn add_task_writes_to_configured_database() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = AppSettings {
            workspace_root: dir.path().to_path_buf(),
            database_path: Some("state/mission.db".into()),
            ..AppSettings::default()
        };
        add_task(
            &settings,
            NewScheduledTask {
                title: "Board prep".to_string(),
                description: Some("Draft the deck".to_string()),
                start_time: 1_000,
                end_time: Some(4_600),
                kind: TaskKind::Reminder,
                status: "scheduled".to_string(),
                recurrence: None,
            },
        )
        .expect("add");

        let db = Database::new(&dir.path().join("state/mission.db")).expect("open");
        let tasks = db.scheduled_tasks().expect("tasks");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].end_time, Some(4_600));
    }
}
