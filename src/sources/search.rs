use crate::errors::AppResult;
use crate::models::{MemoryHit, MemorySource, SearchResultSet, TaskHit};
use crate::sources::{SearchBackend, TaskSource};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const SEARCH_DIRS: &[&str] = &["memory", "deliverables"];
const EXCLUDED_DIRS: &[&str] = &["node_modules", ".next", ".git"];
const MAX_SEARCH_FILE_BYTES: u64 = 4 * 1024 * 1024;

pub struct WorkspaceSearch {
    root: PathBuf,
    tasks: Option<Arc<dyn TaskSource>>,
    min_chars: usize,
    memory_cap: usize,
    task_cap: usize,
}

impl WorkspaceSearch {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tasks: None,
            min_chars: 2,
            memory_cap: 20,
            task_cap: 10,
        }
    }

    pub fn with_tasks(mut self, tasks: Arc<dyn TaskSource>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn with_limits(mut self, min_chars: usize, memory_cap: usize, task_cap: usize) -> Self {
        self.min_chars = min_chars;
        self.memory_cap = memory_cap;
        self.task_cap = task_cap;
        self
    }

    fn search_memories(&self, needle: &str) -> Vec<MemoryHit> {
        let mut hits = Vec::new();
        for dir in SEARCH_DIRS {
            if hits.len() >= self.memory_cap {
                break;
            }
            self.walk(&self.root.join(dir), needle, &mut hits);
        }
        hits
    }

    fn walk(&self, dir: &Path, needle: &str, hits: &mut Vec<MemoryHit>) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        let mut entries = entries.filter_map(Result::ok).collect::<Vec<_>>();
        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            if hits.len() >= self.memory_cap {
                return;
            }
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let path = entry.path();
            if file_type.is_dir() {
                let name = entry.file_name();
                if EXCLUDED_DIRS.iter().any(|excluded| name == *excluded) {
                    continue;
                }
                self.walk(&path, needle, hits);
            } else if file_type.is_file() && file_contains(&path, needle) {
                if let Some(hit) = self.memory_hit(&path) {
                    hits.push(hit);
                }
            }
        }
    }

    fn memory_hit(&self, path: &Path) -> Option<MemoryHit> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let relative_path = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let source = if relative_path.starts_with("memory/") {
            MemorySource::Memory
        } else {
            MemorySource::Deliverable
        };
        Some(MemoryHit {
            title: path.file_name()?.to_string_lossy().to_string(),
            content: format!("Found in {}", relative_path),
            id: relative_path,
            source,
        })
    }

    fn search_tasks(&self, needle: &str) -> Vec<TaskHit> {
        let Some(tasks) = self.tasks.as_ref() else {
            return Vec::new();
        };
        match tasks.list() {
            Ok(tasks) => tasks
                .iter()
                .filter(|task| task.title.to_lowercase().contains(needle))
                .take(self.task_cap)
                .map(TaskHit::from)
                .collect(),
            Err(error) => {
                tracing::warn!(error = %error, "task search skipped, task source unavailable");
                Vec::new()
            }
        }
    }
}

impl SearchBackend for WorkspaceSearch {
    fn search(&self, query: &str) -> AppResult<SearchResultSet> {
        if query.chars().count() < self.min_chars {
            return Ok(SearchResultSet::default());
        }
        let needle = query.to_lowercase();
        Ok(SearchResultSet {
            memories: self.search_memories(&needle),
            tasks: self.search_tasks(&needle),
        })
    }
}

fn file_contains(path: &Path, needle: &str) -> bool {
    match fs::metadata(path) {
        Ok(meta) if meta.len() <= MAX_SEARCH_FILE_BYTES => {}
        _ => return false,
    }
    match fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).to_lowercase().contains(needle),
        Err(error) => {
            tracing::debug!(path = %path.display(), error = %error, "unreadable file skipped");
            false
        }
    }
}
