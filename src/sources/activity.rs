use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::ActivityRecord;
use crate::sources::ActivitySource;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Activity log kept as a single JSON array file, oldest entry first.
#[derive(Debug, Clone)]
pub struct JsonActivityLog {
    path: PathBuf,
}

impl JsonActivityLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> AppResult<Vec<ActivityRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        let Value::Array(entries) = serde_json::from_str::<Value>(&raw)? else {
            return Err(AppError::Decode(format!(
                "{} is not a JSON array",
                self.path.display()
            )));
        };

        let mut records = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            match serde_json::from_value::<ActivityRecord>(entry) {
                Ok(record) => records.push(record),
                Err(error) => {
                    tracing::warn!(index, error = %error, "skipping malformed activity record");
                }
            }
        }
        Ok(records)
    }
}

impl ActivitySource for JsonActivityLog {
    fn recent(&self, limit: Option<usize>) -> AppResult<Vec<ActivityRecord>> {
        let records = self.read_all()?;
        Ok(match limit {
            Some(limit) => newest_first(records, limit),
            None => records,
        })
    }
}

impl ActivitySource for Database {
    fn recent(&self, limit: Option<usize>) -> AppResult<Vec<ActivityRecord>> {
        match limit {
            Some(limit) => self.recent_activities(limit),
            None => self.activity_log(),
        }
    }
}

/// Orders by `timestamp` descending and keeps the first `limit`. Expects the full
/// log in append order, as every `ActivitySource::recent(None)` returns it, so
/// records sharing a timestamp put the later array entry first.
pub fn newest_first(records: Vec<ActivityRecord>, limit: usize) -> Vec<ActivityRecord> {
    let mut indexed = records.into_iter().enumerate().collect::<Vec<_>>();
    indexed.sort_by(|(left_index, left), (right_index, right)| {
        right
            .timestamp
            .cmp(&left.timestamp)
            .then_with(|| right_index.cmp(left_index))
    });
    indexed
        .into_iter()
        .take(limit)
        .map(|(_, record)| record)
        .collect()
}
