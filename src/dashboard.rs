use crate::client::DashboardClient;
use crate::config::AppSettings;
use crate::models::{ActivityRecord, ScheduledTask};
use crate::sources::activity::newest_first;
use crate::sync::{DebouncedQuery, FetchFn, FetchFuture, SearchFn, SearchFuture, Synchronizer};
use std::sync::Arc;
use std::time::Duration;

pub const ACTIVITY_SOURCE: &str = "activity";
pub const TASKS_SOURCE: &str = "tasks";

/// The dashboard's read model: one synchronizer per polled data kind plus the
/// search channel. Each owns its snapshot; nothing is shared between them.
pub struct ReadModel {
    pub activity: Arc<Synchronizer<Vec<ActivityRecord>>>,
    pub tasks: Arc<Synchronizer<Vec<ScheduledTask>>>,
    pub search: DebouncedQuery,
}

impl ReadModel {
    pub fn connect(client: &DashboardClient, settings: &AppSettings) -> Self {
        let activity_client = client.clone();
        let activity_fetch: FetchFn<Vec<ActivityRecord>> = Arc::new(move || {
            let client = activity_client.clone();
            let future: FetchFuture<Vec<ActivityRecord>> = Box::pin(async move { client.fetch_activities().await });
            future
        });

        let tasks_client = client.clone();
        let tasks_fetch: FetchFn<Vec<ScheduledTask>> = Arc::new(move || {
            let client = tasks_client.clone();
            let future: FetchFuture<Vec<ScheduledTask>> = Box::pin(async move { client.fetch_tasks().await });
            future
        });

        let search_client = client.clone();
        let search: SearchFn = Arc::new(move |query: String| {
            let client = search_client.clone();
            let future: SearchFuture = Box::pin(async move { client.search(&query).await });
            future
        });

        Self {
            activity: Arc::new(activity_feed(
                activity_fetch,
                settings.activity_interval(),
                settings.activity_limit,
            )),
            tasks: Arc::new(task_list(tasks_fetch, settings.tasks_interval())),
            search: DebouncedQuery::new(search, settings.search_debounce(), settings.search_min_chars),
        }
    }
}

/// Activity synchronizer exposing at most `limit` records, newest first.
pub fn activity_feed(
    fetch: FetchFn<Vec<ActivityRecord>>,
    interval: Duration,
    limit: usize,
) -> Synchronizer<Vec<ActivityRecord>> {
    Synchronizer::new(ACTIVITY_SOURCE, fetch, interval)
        .with_post_process(move |records: Vec<ActivityRecord>| newest_first(records, limit))
}

pub fn task_list(fetch: FetchFn<Vec<ScheduledTask>>, interval: Duration) -> Synchronizer<Vec<ScheduledTask>> {
    Synchronizer::new(TASKS_SOURCE, fetch, interval)
}
