#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::scan::model::{StatusUpdate, Task};

/// Envelope version written by this build.
pub const STORE_VERSION: u32 = 1;

/// Most tasks ever persisted; older ones fall off the end.
pub const MAX_TASKS: usize = 50;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StoreEnvelope {
    pub version: u32,
    /// Newest first.
    pub tasks: Vec<Task>,
}

impl StoreEnvelope {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            version: STORE_VERSION,
            tasks: Vec::new(),
        }
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Replaces a task with the same id in place, otherwise inserts it first.
    pub fn upsert(&mut self, task: Task) {
        if let Some(existing) = self.tasks.iter_mut().find(|t| t.id == task.id) {
            *existing = task;
        } else {
            self.tasks.insert(0, task);
        }
    }

    pub fn merge(&mut self, id: &str, update: StatusUpdate) -> Option<&Task> {
        let task = self.tasks.iter_mut().find(|t| t.id == id)?;
        task.apply(update);
        Some(task)
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.id != id);
        self.tasks.len() != before
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }

    /// Ids of every task that can still change.
    #[must_use]
    pub fn active_ids(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| !t.status.is_terminal())
            .map(|t| t.id.clone())
            .collect()
    }
}

/// What a save ended up persisting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved { kept: usize },
    /// The full list did not fit; the newest 70% were kept instead.
    Shrunk { kept: usize },
    /// Nothing fit; an empty envelope was written.
    Cleared,
    Failed,
}

#[derive(Debug, Clone)]
pub struct TaskStore {
    path: PathBuf,
    max_tasks: usize,
    quota_bytes: u64,
}

impl TaskStore {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            max_tasks: MAX_TASKS,
            quota_bytes: 0,
        }
    }

    /// Lowers the cap; values above [`MAX_TASKS`] are clamped to it.
    #[must_use]
    pub fn with_max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = max_tasks.clamp(1, MAX_TASKS);
        self
    }

    #[must_use]
    pub fn with_quota(mut self, quota_bytes: u64) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Never fails: missing, corrupt or foreign payloads yield an empty envelope.
    #[must_use]
    pub fn load(&self) -> StoreEnvelope {
        let data = match std::fs::read(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return StoreEnvelope::empty();
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to read task store");
                return StoreEnvelope::empty();
            }
        };
        decode_envelope(&data)
    }

    /// Trims, strips logs and writes. Quota or IO failures shrink the list to
    /// 70% and retry, then fall back to an empty envelope. Errors are logged,
    /// never returned.
    pub fn save(&self, tasks: &[Task]) -> SaveOutcome {
        let prepared: Vec<Task> = tasks
            .iter()
            .take(self.max_tasks)
            .cloned()
            .map(|mut t| {
                t.log = None;
                t
            })
            .collect();

        match self.try_write(&prepared) {
            Ok(()) => {
                return SaveOutcome::Saved {
                    kept: prepared.len(),
                };
            }
            Err(e) => {
                tracing::warn!(
                    error = %format!("{e:#}"),
                    tasks = prepared.len(),
                    "task store write failed; shrinking"
                );
            }
        }

        let keep = prepared.len() * 7 / 10;
        if keep > 0 {
            match self.try_write(&prepared[..keep]) {
                Ok(()) => return SaveOutcome::Shrunk { kept: keep },
                Err(e) => {
                    tracing::warn!(
                        error = %format!("{e:#}"),
                        tasks = keep,
                        "shrunk task store write failed"
                    );
                }
            }
        }

        match self.try_write(&[]) {
            Ok(()) => SaveOutcome::Cleared,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "giving up on task store write");
                SaveOutcome::Failed
            }
        }
    }

    fn try_write(&self, tasks: &[Task]) -> anyhow::Result<()> {
        #[derive(Serialize)]
        struct Out<'a> {
            version: u32,
            tasks: &'a [Task],
        }

        let data = serde_json::to_vec_pretty(&Out {
            version: STORE_VERSION,
            tasks,
        })?;
        let size = u64::try_from(data.len()).unwrap_or(u64::MAX);
        if self.quota_bytes > 0 && size > self.quota_bytes {
            anyhow::bail!(
                "store payload of {size} bytes exceeds quota of {} bytes",
                self.quota_bytes
            );
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &data).with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path).with_context(|| {
            format!(
                "failed to rename {} -> {}",
                tmp.display(),
                self.path.display()
            )
        })?;
        Ok(())
    }
}

fn decode_envelope(data: &[u8]) -> StoreEnvelope {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) else {
        tracing::warn!("task store is not valid JSON; starting empty");
        return StoreEnvelope::empty();
    };

    let version = value
        .get("version")
        .and_then(serde_json::Value::as_u64)
        .and_then(|v| u32::try_from(v).ok());

    let items = match (&value, version) {
        (serde_json::Value::Object(map), Some(STORE_VERSION)) => match map.get("tasks") {
            Some(serde_json::Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        },
        // Pre-envelope payloads were a bare list.
        (serde_json::Value::Array(items), _) => items.clone(),
        _ => {
            tracing::warn!(?version, "unsupported task store version; starting empty");
            Vec::new()
        }
    };

    let tasks = items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<Task>(item).ok())
        .collect();
    StoreEnvelope {
        version: STORE_VERSION,
        tasks,
    }
}

enum WriterMsg {
    Save(Vec<Task>),
    Flush(oneshot::Sender<Option<SaveOutcome>>),
}

/// Single owner of the store file. Saves scheduled within the debounce
/// window coalesce into one write of the latest snapshot. The window opens
/// with the first pending save, so a steady stream still gets written.
#[derive(Debug)]
pub struct StoreWriter {
    tx: mpsc::UnboundedSender<WriterMsg>,
    writes: Arc<AtomicU64>,
    handle: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for WriterMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Save(tasks) => write!(f, "Save({} tasks)", tasks.len()),
            Self::Flush(_) => f.write_str("Flush"),
        }
    }
}

impl StoreWriter {
    #[must_use]
    pub fn spawn(store: TaskStore, debounce: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let writes = Arc::new(AtomicU64::new(0));
        let handle = tokio::spawn(run_writer(store, rx, debounce, Arc::clone(&writes)));
        Self { tx, writes, handle }
    }

    pub fn schedule(&self, tasks: Vec<Task>) {
        if self.tx.send(WriterMsg::Save(tasks)).is_err() {
            tracing::warn!("store writer has stopped; dropping save");
        }
    }

    /// Writes any pending snapshot now. `None` when nothing was pending.
    pub async fn flush(&self) -> Option<SaveOutcome> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(WriterMsg::Flush(reply)).ok()?;
        rx.await.ok().flatten()
    }

    /// Number of writes performed so far.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Writes what is pending and stops the writer task.
    pub async fn close(self) {
        drop(self.tx);
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "store writer task failed");
        }
    }
}

async fn run_writer(
    store: TaskStore,
    mut rx: mpsc::UnboundedReceiver<WriterMsg>,
    debounce: Duration,
    writes: Arc<AtomicU64>,
) {
    let mut pending: Option<Vec<Task>> = None;
    // Set by the first save after a write; later saves do not move it.
    let mut deadline: Option<tokio::time::Instant> = None;
    loop {
        let msg = if let Some(at) = deadline {
            tokio::select! {
                msg = rx.recv() => msg,
                () = tokio::time::sleep_until(at) => {
                    write_pending(&store, &mut pending, &writes);
                    deadline = None;
                    continue;
                }
            }
        } else {
            rx.recv().await
        };

        match msg {
            Some(WriterMsg::Save(tasks)) => {
                pending = Some(tasks);
                deadline.get_or_insert_with(|| tokio::time::Instant::now() + debounce);
            }
            Some(WriterMsg::Flush(reply)) => {
                let outcome = write_pending(&store, &mut pending, &writes);
                deadline = None;
                let _ = reply.send(outcome);
            }
            None => {
                write_pending(&store, &mut pending, &writes);
                break;
            }
        }
    }
}

fn write_pending(
    store: &TaskStore,
    pending: &mut Option<Vec<Task>>,
    writes: &AtomicU64,
) -> Option<SaveOutcome> {
    let tasks = pending.take()?;
    let outcome = store.save(&tasks);
    writes.fetch_add(1, Ordering::Relaxed);
    tracing::debug!(?outcome, path = %store.path().display(), "task store written");
    Some(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::model::TaskStatus;

    fn task(id: &str) -> Task {
        Task {
            id: id.to_owned(),
            repo_url: "https://github.com/acme/widgets".to_owned(),
            branch_name: "main".to_owned(),
            project_key: "widgets".to_owned(),
            status: TaskStatus::Queued,
            report_url: None,
            screenshot: None,
            has_log: false,
            log_size: 0,
            log: None,
            created_at: String::new(),
        }
    }

    fn store_in(dir: &tempfile::TempDir) -> TaskStore {
        TaskStore::new(dir.path().join("scans.json"))
    }

    #[test]
    fn saving_more_than_the_cap_keeps_the_newest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(&dir);

        let mut env = StoreEnvelope::empty();
        for i in 0..60 {
            env.upsert(task(&format!("t{i}")));
        }
        assert_eq!(store.save(&env.tasks), SaveOutcome::Saved { kept: 50 });

        let loaded = store.load();
        assert_eq!(loaded.tasks.len(), 50);
        assert_eq!(loaded.tasks[0].id, "t59");
        assert_eq!(loaded.tasks[49].id, "t10");
    }

    #[test]
    fn configured_cap_never_exceeds_the_hard_limit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(&dir).with_max_tasks(80);
        let tasks: Vec<Task> = (0..60).map(|i| task(&format!("t{i}"))).collect();

        assert_eq!(store.save(&tasks), SaveOutcome::Saved { kept: MAX_TASKS });
        assert_eq!(store.load().tasks.len(), MAX_TASKS);

        let small = store_in(&dir).with_max_tasks(0);
        assert_eq!(small.save(&tasks), SaveOutcome::Saved { kept: 1 });
    }

    #[test]
    fn saved_tasks_never_carry_log_text() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(&dir);

        let mut t = task("a");
        t.log = Some("x".repeat(1000));
        t.has_log = true;
        t.log_size = 1000;
        store.save(&[t]);

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("\"log\""));
        let loaded = store.load();
        assert_eq!(loaded.tasks[0].log, None);
        assert!(loaded.tasks[0].has_log);
        assert_eq!(loaded.tasks[0].log_size, 1000);
    }

    #[test]
    fn load_tolerates_missing_and_corrupt_payloads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(&dir);
        assert_eq!(store.load(), StoreEnvelope::empty());

        std::fs::write(store.path(), b"{not json").unwrap();
        assert_eq!(store.load(), StoreEnvelope::empty());

        std::fs::write(store.path(), br#"{"version":99,"tasks":[{"id":"x"}]}"#).unwrap();
        assert_eq!(store.load(), StoreEnvelope::empty());

        std::fs::write(store.path(), br#""just a string""#).unwrap();
        assert_eq!(store.load(), StoreEnvelope::empty());
    }

    #[test]
    fn load_accepts_a_bare_list() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(&dir);
        std::fs::write(
            store.path(),
            br#"[{"id":"a","repo_url":"https://github.com/o/r","status":"Running"},{"bogus":true}]"#,
        )
        .unwrap();

        let env = store.load();
        assert_eq!(env.version, STORE_VERSION);
        assert_eq!(env.tasks.len(), 1);
        assert_eq!(env.tasks[0].status, TaskStatus::Running);
    }

    #[test]
    fn quota_overflow_shrinks_then_clears() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tasks: Vec<Task> = (0..10).map(|i| task(&format!("task-{i}"))).collect();

        let one = serde_json::to_vec_pretty(&serde_json::json!({
            "version": STORE_VERSION,
            "tasks": &tasks[..7],
        }))
        .unwrap()
        .len() as u64;

        let store = store_in(&dir).with_quota(one);
        assert_eq!(store.save(&tasks), SaveOutcome::Shrunk { kept: 7 });
        assert_eq!(store.load().tasks.len(), 7);

        let tiny = store_in(&dir).with_quota(40);
        assert_eq!(tiny.save(&tasks), SaveOutcome::Cleared);
        assert!(tiny.load().tasks.is_empty());
    }

    #[test]
    fn envelope_upsert_merge_and_remove() {
        let mut env = StoreEnvelope::empty();
        env.upsert(task("a"));
        env.upsert(task("b"));
        assert_eq!(env.tasks[0].id, "b");

        let mut replacement = task("a");
        replacement.branch_name = "dev".to_owned();
        env.upsert(replacement);
        assert_eq!(env.tasks.len(), 2);
        assert_eq!(env.tasks[1].branch_name, "dev");

        let merged = env
            .merge(
                "a",
                StatusUpdate {
                    status: Some(TaskStatus::Completed(None)),
                    ..StatusUpdate::default()
                },
            )
            .unwrap();
        assert!(merged.status.is_terminal());
        assert_eq!(env.active_ids(), vec!["b".to_owned()]);

        assert!(env.remove("b"));
        assert!(!env.remove("b"));
        assert!(env.merge("b", StatusUpdate::default()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_writer_coalesces_bursts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(&dir);
        let writer = StoreWriter::spawn(store.clone(), Duration::from_millis(300));

        for i in 0..5 {
            let tasks: Vec<Task> = (0..=i).map(|n| task(&format!("t{n}"))).collect();
            writer.schedule(tasks);
        }
        assert_eq!(writer.flush().await, Some(SaveOutcome::Saved { kept: 5 }));
        assert_eq!(writer.write_count(), 1);
        assert_eq!(writer.flush().await, None);
        assert_eq!(store.load().tasks.len(), 5);
        writer.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_writer_writes_after_quiet_period() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(&dir);
        let writer = StoreWriter::spawn(store.clone(), Duration::from_millis(300));

        writer.schedule(vec![task("a")]);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(writer.write_count(), 0);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(writer.write_count(), 1);
        assert_eq!(store.load().tasks[0].id, "a");
        writer.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn steady_saves_do_not_postpone_the_write_forever() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(&dir);
        let writer = StoreWriter::spawn(store.clone(), Duration::from_millis(300));

        for i in 0..20 {
            writer.schedule(vec![task(&format!("t{i}"))]);
            tokio::time::sleep(Duration::from_millis(150)).await;
        }

        // 20 saves over 3s with a 300ms window: roughly one write per window.
        assert!(writer.write_count() >= 5, "writes = {}", writer.write_count());
        assert!(store.path().exists());
        writer.close().await;
        assert_eq!(store.load().tasks[0].id, "t19");
    }
}
