//! Append-only job history.
//!
//! Each project keeps one init log, each job keeps a progress log, a result
//! log and a text event log. All mutations go through `json_log` so readers
//! never observe a partial document.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StoreError;
use crate::scheduler::job::{
    JobInitRecord, JobState, JobView, ProgressEntry, ResultEntry, SortOrder,
};

use super::json_log;
use super::layout::{validate_id, StoreLayout};

/// File-backed store of job init records and progress/result history.
///
/// Writers are serialised by an internal lock; readers never lock.
pub struct JobStore {
    layout: StoreLayout,
    write_lock: Mutex<()>,
}

impl JobStore {
    /// Creates a store rooted at `root`. Directories are created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            layout: StoreLayout::new(root),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Appends an init record to the project's init log and pre-creates the
    /// job's empty progress and result logs.
    ///
    /// Returns `false` when a record with the same id already exists; the log
    /// is left untouched in that case.
    pub async fn append_init(
        &self,
        project_id: &str,
        record: &JobInitRecord,
    ) -> Result<bool, StoreError> {
        let info_path = self.layout.jobs_info(project_id)?;
        let progress_path = self.layout.progress_log(project_id, &record.id)?;
        let result_path = self.layout.result_log(project_id, &record.id)?;

        let _guard = self.write_lock.lock().await;

        let mut entries = json_log::read_values_strict(&info_path).await?;
        let duplicate = entries
            .iter()
            .any(|value| value.get("id").and_then(|id| id.as_str()) == Some(record.id.as_str()));
        if duplicate {
            debug!(project_id, job_id = %record.id, "Init record already present");
            return Ok(false);
        }

        entries.push(serde_json::to_value(record)?);
        json_log::write_json_atomic(&info_path, &entries).await?;
        json_log::ensure_array(&progress_path).await?;
        json_log::ensure_array(&result_path).await?;

        Ok(true)
    }

    /// Appends a progress entry and returns the entry that was last before it.
    pub async fn append_progress(
        &self,
        project_id: &str,
        job_id: &str,
        entry: &ProgressEntry,
    ) -> Result<Option<ProgressEntry>, StoreError> {
        let path = self.layout.progress_log(project_id, job_id)?;

        let _guard = self.write_lock.lock().await;
        let previous = json_log::append_entry(&path, serde_json::to_value(entry)?).await?;

        Ok(previous
            .into_iter()
            .rev()
            .find_map(|value| serde_json::from_value(value).ok()))
    }

    /// Appends a result entry and returns the number of results recorded
    /// before it.
    pub async fn append_result(
        &self,
        project_id: &str,
        job_id: &str,
        entry: &ResultEntry,
    ) -> Result<usize, StoreError> {
        let path = self.layout.result_log(project_id, job_id)?;

        let _guard = self.write_lock.lock().await;
        let previous = json_log::append_entry(&path, serde_json::to_value(entry)?).await?;

        Ok(previous.len())
    }

    /// Appends a timestamped line to the job's event log.
    pub async fn append_log(
        &self,
        project_id: &str,
        job_id: &str,
        line: &str,
    ) -> Result<(), StoreError> {
        let path = self.layout.event_log(project_id, job_id)?;

        let _guard = self.write_lock.lock().await;
        let mut content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        content.push_str(&format!("[{}] {}\n", Utc::now().to_rfc3339(), line));
        json_log::write_atomic(&path, content.as_bytes()).await
    }

    /// Returns the job's event log. A job that exists but has not logged
    /// anything yet returns an empty string.
    pub async fn read_log(&self, project_id: &str, job_id: &str) -> Result<String, StoreError> {
        self.find_init(project_id, job_id).await?;

        let path = self.layout.event_log(project_id, job_id)?;
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the init record merged with the last progress and result
    /// entries.
    pub async fn read_job(&self, project_id: &str, job_id: &str) -> Result<JobView, StoreError> {
        let init = self.find_init(project_id, job_id).await?;
        self.merge(project_id, init).await
    }

    /// Returns every job of a project, optionally restricted to one state,
    /// ordered by creation time.
    pub async fn list_jobs(
        &self,
        project_id: &str,
        state: Option<JobState>,
        order: SortOrder,
    ) -> Result<Vec<JobView>, StoreError> {
        let info_path = self.layout.jobs_info(project_id)?;
        let records: Vec<JobInitRecord> = json_log::read_entries(&info_path).await;

        let mut seen = HashSet::new();
        let mut views = Vec::with_capacity(records.len());
        for record in records {
            if !seen.insert(record.id.clone()) {
                continue;
            }
            let view = self.merge(project_id, record).await?;
            if state.map_or(true, |s| view.state == s) {
                views.push(view);
            }
        }

        views.sort_by(|a, b| match order {
            SortOrder::Ascending => a.created_at.cmp(&b.created_at),
            SortOrder::Descending => b.created_at.cmp(&a.created_at),
        });

        Ok(views)
    }

    /// Current state derived from the job's logs alone.
    ///
    /// Unlike [`JobStore::read_job`] this does not require an init record.
    pub async fn current_state(
        &self,
        project_id: &str,
        job_id: &str,
    ) -> Result<JobState, StoreError> {
        let progress_path = self.layout.progress_log(project_id, job_id)?;
        let result_path = self.layout.result_log(project_id, job_id)?;

        let last_progress: Option<ProgressEntry> =
            json_log::read_last_entry(&progress_path).await;
        let last_result: Option<ResultEntry> = json_log::read_last_entry(&result_path).await;
        Ok(JobState::derive(last_progress.as_ref(), last_result.as_ref()))
    }

    /// Full progress history of a job, in append order.
    pub async fn read_progress(
        &self,
        project_id: &str,
        job_id: &str,
    ) -> Result<Vec<ProgressEntry>, StoreError> {
        let path = self.layout.progress_log(project_id, job_id)?;
        Ok(json_log::read_entries(&path).await)
    }

    /// Full result history of a job, in append order.
    pub async fn read_results(
        &self,
        project_id: &str,
        job_id: &str,
    ) -> Result<Vec<ResultEntry>, StoreError> {
        let path = self.layout.result_log(project_id, job_id)?;
        Ok(json_log::read_entries(&path).await)
    }

    async fn find_init(&self, project_id: &str, job_id: &str) -> Result<JobInitRecord, StoreError> {
        let info_path = self.layout.jobs_info(project_id)?;
        validate_id(job_id)?;

        let records: Vec<JobInitRecord> = json_log::read_entries(&info_path).await;
        records
            .into_iter()
            .find(|r| r.id == job_id)
            .ok_or_else(|| StoreError::NotFound {
                project_id: project_id.to_string(),
                job_id: job_id.to_string(),
            })
    }

    async fn merge(&self, project_id: &str, init: JobInitRecord) -> Result<JobView, StoreError> {
        let progress_path = self.layout.progress_log(project_id, &init.id)?;
        let result_path = self.layout.result_log(project_id, &init.id)?;

        let last_progress = json_log::read_last_entry(&progress_path).await;
        let last_result = json_log::read_last_entry(&result_path).await;

        Ok(JobView::merge(init, last_progress, last_result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::{JobConfig, TerminalStatus};
    use chrono::{Duration, Utc};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn record(project_id: &str, job_id: &str) -> JobInitRecord {
        JobInitRecord {
            id: job_id.to_string(),
            project_id: project_id.to_string(),
            name: format!("experiment-{}", project_id),
            config: JobConfig::new(),
            created_at: Utc::now(),
        }
    }

    fn progress(value: u8) -> ProgressEntry {
        ProgressEntry {
            progress: value,
            elapsed_ms: value as u64 * 10,
            timestamp: Utc::now(),
        }
    }

    fn result(status: TerminalStatus) -> ResultEntry {
        ResultEntry {
            status,
            timestamp: Utc::now(),
            artifact_refs: Vec::new(),
            error: None,
            elapsed_ms: 0,
            worker_id: None,
        }
    }

    #[tokio::test]
    async fn test_append_init_creates_empty_logs() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = JobStore::new(temp_dir.path());

        assert!(store
            .append_init("p1", &record("p1", "job-1"))
            .await
            .expect("append init"));

        let job_dir = temp_dir.path().join("projects/p1/jobs/job-1");
        assert!(job_dir.join("state.json").exists());
        assert!(job_dir.join("result.json").exists());

        let view = store.read_job("p1", "job-1").await.expect("read");
        assert_eq!(view.state, JobState::Pending);
        assert_eq!(view.progress, 0);
        assert_eq!(view.name, "experiment-p1");
    }

    #[tokio::test]
    async fn test_append_init_is_idempotent() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = JobStore::new(temp_dir.path());
        let rec = record("p1", "job-1");

        assert!(store.append_init("p1", &rec).await.expect("first"));
        assert!(!store.append_init("p1", &rec).await.expect("second"));

        let jobs = store
            .list_jobs("p1", None, SortOrder::default())
            .await
            .expect("list");
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_read_missing_job() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = JobStore::new(temp_dir.path());

        let err = store.read_job("p1", "job-404").await.expect_err("missing");
        assert!(matches!(err, StoreError::NotFound { .. }));

        let err = store.read_job("p1", "../job").await.expect_err("invalid");
        assert!(matches!(err, StoreError::InvalidId(_)));
    }

    #[tokio::test]
    async fn test_progress_and_result_merge() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = JobStore::new(temp_dir.path());
        store
            .append_init("p1", &record("p1", "job-1"))
            .await
            .expect("init");

        let prev = store
            .append_progress("p1", "job-1", &progress(10))
            .await
            .expect("progress");
        assert!(prev.is_none());
        let prev = store
            .append_progress("p1", "job-1", &progress(20))
            .await
            .expect("progress");
        assert_eq!(prev.map(|p| p.progress), Some(10));

        let view = store.read_job("p1", "job-1").await.expect("read");
        assert_eq!(view.state, JobState::Running);
        assert_eq!(view.progress, 20);

        let prior = store
            .append_result("p1", "job-1", &result(TerminalStatus::Completed))
            .await
            .expect("result");
        assert_eq!(prior, 0);

        let view = store.read_job("p1", "job-1").await.expect("read");
        assert_eq!(view.state, JobState::Completed);
        assert_eq!(view.progress, 20);
        assert_eq!(store.read_progress("p1", "job-1").await.expect("history").len(), 2);
    }

    #[tokio::test]
    async fn test_result_without_progress_is_terminal() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = JobStore::new(temp_dir.path());
        store
            .append_init("p1", &record("p1", "job-1"))
            .await
            .expect("init");
        store
            .append_result("p1", "job-1", &result(TerminalStatus::Cancelled))
            .await
            .expect("result");

        let view = store.read_job("p1", "job-1").await.expect("read");
        assert_eq!(view.state, JobState::Cancelled);
        assert_eq!(view.progress, 0);
    }

    #[tokio::test]
    async fn test_list_filters_and_sorts() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = JobStore::new(temp_dir.path());

        let base = Utc::now();
        for (i, id) in ["job-a", "job-b", "job-c"].iter().enumerate() {
            let mut rec = record("p1", id);
            rec.created_at = base + Duration::seconds(i as i64);
            store.append_init("p1", &rec).await.expect("init");
        }
        store
            .append_progress("p1", "job-b", &progress(50))
            .await
            .expect("progress");
        store
            .append_result("p1", "job-c", &result(TerminalStatus::Failed))
            .await
            .expect("result");

        let desc = store
            .list_jobs("p1", None, SortOrder::Descending)
            .await
            .expect("list");
        let ids: Vec<_> = desc.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["job-c", "job-b", "job-a"]);

        let asc = store
            .list_jobs("p1", None, SortOrder::Ascending)
            .await
            .expect("list");
        assert_eq!(asc[0].id, "job-a");

        let running = store
            .list_jobs("p1", Some(JobState::Running), SortOrder::Descending)
            .await
            .expect("list");
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, "job-b");

        let pending = store
            .list_jobs("p1", Some(JobState::Pending), SortOrder::Descending)
            .await
            .expect("list");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "job-a");

        assert!(store
            .list_jobs("p2", None, SortOrder::Descending)
            .await
            .expect("list")
            .is_empty());
    }

    #[tokio::test]
    async fn test_event_log() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = JobStore::new(temp_dir.path());
        store
            .append_init("p1", &record("p1", "job-1"))
            .await
            .expect("init");

        assert_eq!(store.read_log("p1", "job-1").await.expect("log"), "");

        store.append_log("p1", "job-1", "created").await.expect("log");
        store.append_log("p1", "job-1", "progress 10%").await.expect("log");

        let log = store.read_log("p1", "job-1").await.expect("log");
        let lines: Vec<_> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("] created"));
        assert!(lines[1].ends_with("] progress 10%"));

        assert!(matches!(
            store.read_log("p1", "job-2").await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_malformed_log_reads_as_empty() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = JobStore::new(temp_dir.path());
        store
            .append_init("p1", &record("p1", "job-1"))
            .await
            .expect("init");

        let path = temp_dir.path().join("projects/p1/jobs/job-1/state.json");
        fs::write(&path, b"[{\"progress\": 1").await.expect("write");

        let view = store.read_job("p1", "job-1").await.expect("read");
        assert_eq!(view.state, JobState::Pending);
    }

    #[tokio::test]
    async fn test_current_state_follows_logs() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = JobStore::new(temp_dir.path());

        assert_eq!(
            store.current_state("p1", "job-1").await.expect("state"),
            JobState::Pending
        );
        store
            .append_progress("p1", "job-1", &progress(30))
            .await
            .expect("progress");
        assert_eq!(
            store.current_state("p1", "job-1").await.expect("state"),
            JobState::Running
        );
        store
            .append_result("p1", "job-1", &result(TerminalStatus::Failed))
            .await
            .expect("result");
        assert_eq!(
            store.current_state("p1", "job-1").await.expect("state"),
            JobState::Failed
        );
    }

    #[tokio::test]
    async fn test_corrupted_init_log_is_not_overwritten() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = JobStore::new(temp_dir.path());
        for id in ["job-a", "job-b"] {
            store
                .append_init("p1", &record("p1", id))
                .await
                .expect("init");
        }

        let path = temp_dir.path().join("projects/p1/jobs/jobs_info.json");
        let mut corrupted = fs::read(&path).await.expect("read");
        corrupted.push(b'}');
        fs::write(&path, &corrupted).await.expect("write");

        let err = store
            .append_init("p1", &record("p1", "job-c"))
            .await
            .expect_err("append must fail");
        assert!(matches!(err, StoreError::Malformed { .. }));
        assert_eq!(fs::read(&path).await.expect("read"), corrupted);
        assert!(!temp_dir.path().join("projects/p1/jobs/job-c").exists());
    }

    #[tokio::test]
    async fn test_corrupted_progress_log_rejects_append() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = JobStore::new(temp_dir.path());
        store
            .append_init("p1", &record("p1", "job-1"))
            .await
            .expect("init");

        let path = temp_dir.path().join("projects/p1/jobs/job-1/state.json");
        fs::write(&path, b"[{\"progress\": 1").await.expect("write");

        let err = store
            .append_progress("p1", "job-1", &progress(50))
            .await
            .expect_err("append must fail");
        assert!(matches!(err, StoreError::Malformed { .. }));
        assert_eq!(
            fs::read(&path).await.expect("read"),
            b"[{\"progress\": 1".to_vec()
        );
    }

    #[tokio::test]
    async fn test_concurrent_init_appends_are_not_lost() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = Arc::new(JobStore::new(temp_dir.path()));

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let id = format!("job-{}", i);
                store
                    .append_init("p1", &record("p1", &id))
                    .await
                    .expect("init");
            }));
        }
        for handle in handles {
            handle.await.expect("task");
        }

        let jobs = store
            .list_jobs("p1", None, SortOrder::Descending)
            .await
            .expect("list");
        assert_eq!(jobs.len(), 20);
    }
}
