pub mod activity;
pub mod search;
pub mod tasks;

use crate::errors::AppResult;
use crate::models::{ActivityRecord, ScheduledTask, SearchResultSet};

/// Read side of an append-only activity log.
pub trait ActivitySource: Send + Sync {
    /// Returns records from the log. With `limit`, only the newest `limit` records
    /// are returned, newest first. A missing backing store is an empty log.
    fn recent(&self, limit: Option<usize>) -> AppResult<Vec<ActivityRecord>>;
}

pub trait TaskSource: Send + Sync {
    fn list(&self) -> AppResult<Vec<ScheduledTask>>;

    /// Tasks starting within `[from, to]`, ordered by start time.
    fn window(&self, from: i64, to: i64) -> AppResult<Vec<ScheduledTask>> {
        Ok(tasks::tasks_in_window(&self.list()?, from, to))
    }
}

pub trait SearchBackend: Send + Sync {
    fn search(&self, query: &str) -> AppResult<SearchResultSet>;
}

/// Collapses an adapter failure into the empty payload for `kind`.
pub fn or_degraded<T: Default>(kind: &'static str, result: AppResult<T>) -> T {
    match result {
        Ok(value) => value,
        Err(error) => {
            tracing::warn!(source = kind, error = %error, "source read failed, serving empty payload");
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::or_degraded;
    use crate::errors::AppError;
    use crate::models::SearchResultSet;

    #[test]
    fn degraded_reads_collapse_to_default() {
        let tasks: Vec<u32> = or_degraded("tasks", Err(AppError::Decode("bad".to_string())));
        assert!(tasks.is_empty());
        let search: SearchResultSet = or_degraded("search", Err(AppError::Io("gone".to_string())));
        assert!(search.is_empty());
        assert_eq!(or_degraded("tasks", Ok(vec![1u32])), vec![1]);
    }
}
