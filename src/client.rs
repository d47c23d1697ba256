use crate::config::AppSettings;
use crate::errors::{AppError, AppResult};
use crate::models::{ActivityRecord, ScheduledTask, SearchResultSet};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// HTTP client for the dashboard read endpoints.
#[derive(Debug, Clone)]
pub struct DashboardClient {
    http: reqwest::Client,
    base_url: String,
}

impl DashboardClient {
    pub fn new(base_url: &str, timeout: Duration) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| AppError::Internal(error.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_settings(settings: &AppSettings) -> AppResult<Self> {
        Self::new(&settings.base_url, settings.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn fetch_activities(&self) -> AppResult<Vec<ActivityRecord>> {
        self.get_json("/api/activity-logs", &[]).await
    }

    pub async fn fetch_tasks(&self) -> AppResult<Vec<ScheduledTask>> {
        self.get_json("/api/tasks", &[]).await
    }

    pub async fn search(&self, query: &str) -> AppResult<SearchResultSet> {
        self.get_json("/api/search", &[("q", query)]).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> AppResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.get(&url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Transport(format!("GET {} returned {}", path, status)));
        }
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|error| AppError::Decode(format!("GET {}: {}", path, error)))
    }
}
