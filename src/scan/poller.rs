#![forbid(unsafe_code)]

//! Status polling for in-flight scans.
//!
//! [`PollSchedule`] is the synchronous bookkeeping: one entry per tracked
//! task holding its next fire time, its current interval and a generation.
//! [`Poller`] drives it from a single tokio task that also owns the task
//! store, so every mutation of stored tasks is serialized through one loop.
//!
//! Each task has at most one request in flight and its next poll is only
//! scheduled once that request settles. Pausing (or untracking) drops the
//! entry; a response that arrives afterwards carries a generation that no
//! longer matches and is discarded.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::error::ToolhubError;
use crate::scan::api::ScanApi;
use crate::scan::model::{StatusUpdate, Task};
use crate::scan::store::{StoreEnvelope, StoreWriter, TaskStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_interval: Duration,
}

impl PollPolicy {
    #[must_use]
    pub fn new(interval: Duration, max_interval: Duration) -> Self {
        Self {
            interval,
            max_interval: max_interval.max(interval),
        }
    }

    #[must_use]
    pub fn from_config(cfg: &crate::config::PollConfig) -> Self {
        Self::new(cfg.interval(), cfg.max_interval())
    }

    /// Doubles `current`, capped at the maximum.
    #[must_use]
    pub fn backoff(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_interval)
    }
}

#[derive(Debug, Clone)]
struct PollEntry {
    interval: Duration,
    next_fire: Instant,
    generation: u64,
    in_flight: bool,
}

#[derive(Debug)]
pub struct PollSchedule {
    policy: PollPolicy,
    entries: BTreeMap<String, PollEntry>,
    generations: u64,
    paused: bool,
}

impl PollSchedule {
    #[must_use]
    pub fn new(policy: PollPolicy) -> Self {
        Self {
            policy,
            entries: BTreeMap::new(),
            generations: 0,
            paused: false,
        }
    }

    #[must_use]
    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    #[must_use]
    pub fn is_tracked(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn interval(&self, id: &str) -> Option<Duration> {
        self.entries.get(id).map(|e| e.interval)
    }

    /// Starts polling `id` immediately. Already tracked ids are left alone;
    /// nothing is tracked while paused.
    pub fn track(&mut self, id: &str, now: Instant) -> bool {
        if self.paused || self.entries.contains_key(id) {
            return false;
        }
        self.generations += 1;
        self.entries.insert(
            id.to_owned(),
            PollEntry {
                interval: self.policy.interval,
                next_fire: now,
                generation: self.generations,
                in_flight: false,
            },
        );
        true
    }

    pub fn untrack(&mut self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Clears every timer and forgets all backoff state.
    pub fn pause(&mut self) {
        self.paused = true;
        self.entries.clear();
    }

    pub fn resume<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>, now: Instant) {
        self.paused = false;
        for id in ids {
            self.track(id, now);
        }
    }

    /// Marks every due entry in flight and returns `(id, generation)` pairs.
    pub fn take_due(&mut self, now: Instant) -> Vec<(String, u64)> {
        let mut due = Vec::new();
        for (id, entry) in &mut self.entries {
            if !entry.in_flight && entry.next_fire <= now {
                entry.in_flight = true;
                due.push((id.clone(), entry.generation));
            }
        }
        due
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries
            .values()
            .filter(|e| !e.in_flight)
            .map(|e| e.next_fire)
            .min()
    }

    /// Whether a response tagged with `generation` may still be applied.
    #[must_use]
    pub fn is_current(&self, id: &str, generation: u64) -> bool {
        self.entries
            .get(id)
            .is_some_and(|e| e.generation == generation && e.in_flight)
    }

    /// A status arrived. Terminal tasks stop; others go back to the normal
    /// interval.
    pub fn on_success(&mut self, id: &str, terminal: bool, now: Instant) {
        if terminal {
            self.entries.remove(id);
            return;
        }
        let interval = self.policy.interval;
        if let Some(e) = self.entries.get_mut(id) {
            e.interval = interval;
            e.next_fire = now + interval;
            e.in_flight = false;
        }
    }

    /// 404: the hub forgot the task. Stops without touching the interval.
    pub fn on_not_found(&mut self, id: &str) {
        self.entries.remove(id);
    }

    /// Transport failure: double the interval and try again later.
    pub fn on_error(&mut self, id: &str, now: Instant) -> Option<Duration> {
        let policy = self.policy;
        let e = self.entries.get_mut(id)?;
        e.interval = policy.backoff(e.interval);
        e.next_fire = now + e.interval;
        e.in_flight = false;
        Some(e.interval)
    }
}

#[derive(Debug)]
pub enum PollCommand {
    /// Store the task (insert or replace) and poll it unless terminal.
    Track(Task),
    /// Stop polling a task but keep it stored.
    Untrack(String),
    Remove(String),
    Clear,
    Pause,
    Resume,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    /// A stored task changed; patch its card.
    Updated(Task),
    Backoff { id: String, interval: Duration },
    Removed(String),
    /// Full task list after a resume or clear.
    Reloaded(Vec<Task>),
    Paused,
    Resumed { tracked: usize },
}

/// Cloneable handle used to steer a running poller.
#[derive(Debug, Clone)]
pub struct PollerHandle {
    tx: mpsc::UnboundedSender<PollCommand>,
}

impl PollerHandle {
    pub fn send(&self, cmd: PollCommand) {
        if self.tx.send(cmd).is_err() {
            tracing::debug!("poller already stopped");
        }
    }

    pub fn track(&self, task: Task) {
        self.send(PollCommand::Track(task));
    }

    pub fn pause(&self) {
        self.send(PollCommand::Pause);
    }

    pub fn resume(&self) {
        self.send(PollCommand::Resume);
    }

    pub fn shutdown(&self) {
        self.send(PollCommand::Shutdown);
    }
}

type FetchResult = (String, u64, Result<StatusUpdate, ToolhubError>);

pub struct Poller<A: ScanApi + 'static> {
    api: Arc<A>,
    store: TaskStore,
    writer: StoreWriter,
    envelope: StoreEnvelope,
    schedule: PollSchedule,
    rx: mpsc::UnboundedReceiver<PollCommand>,
    events: mpsc::UnboundedSender<PollEvent>,
}

impl<A: ScanApi + 'static> std::fmt::Debug for Poller<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("store", &self.store)
            .field("schedule", &self.schedule)
            .finish_non_exhaustive()
    }
}

impl<A: ScanApi + 'static> Poller<A> {
    /// Loads the store, tracks every non-terminal task and starts the loop.
    pub fn spawn(
        api: Arc<A>,
        store: TaskStore,
        policy: PollPolicy,
        debounce: Duration,
    ) -> (
        PollerHandle,
        mpsc::UnboundedReceiver<PollEvent>,
        tokio::task::JoinHandle<()>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let envelope = store.load();
        let writer = StoreWriter::spawn(store.clone(), debounce);

        let mut schedule = PollSchedule::new(policy);
        let now = Instant::now();
        for id in envelope.active_ids() {
            schedule.track(&id, now);
        }
        tracing::debug!(tracked = schedule.len(), "poller starting");

        let poller = Self {
            api,
            store,
            writer,
            envelope,
            schedule,
            rx,
            events,
        };
        let handle = tokio::spawn(poller.run());
        (PollerHandle { tx }, events_rx, handle)
    }

    async fn run(mut self) {
        let mut inflight: JoinSet<FetchResult> = JoinSet::new();
        // Lets a panicked fetch be traced back to its scan.
        let mut fetches: HashMap<tokio::task::Id, (String, u64)> = HashMap::new();

        loop {
            for (id, generation) in self.schedule.take_due(Instant::now()) {
                let api = Arc::clone(&self.api);
                let key = (id.clone(), generation);
                let abort = inflight.spawn(async move {
                    let res = api.status(&id, false).await;
                    (id, generation, res)
                });
                fetches.insert(abort.id(), key);
            }

            let deadline = self.schedule.next_deadline();
            let far = Instant::now() + Duration::from_secs(3600);

            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    None | Some(PollCommand::Shutdown) => break,
                    Some(cmd) => self.handle_command(cmd).await,
                },
                Some(joined) = inflight.join_next_with_id(), if !inflight.is_empty() => match joined {
                    Ok((task_id, (id, generation, res))) => {
                        fetches.remove(&task_id);
                        self.handle_result(&id, generation, res);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "status fetch task failed");
                        if let Some((id, generation)) = fetches.remove(&e.id()) {
                            let err =
                                ToolhubError::Other(format!("status fetch for {id} failed: {e}"));
                            self.handle_result(&id, generation, Err(err));
                        }
                    }
                },
                () = tokio::time::sleep_until(deadline.unwrap_or(far)), if deadline.is_some() => {}
            }
        }

        inflight.abort_all();
        self.writer.schedule(self.envelope.tasks.clone());
        self.writer.close().await;
        tracing::debug!("poller stopped");
    }

    async fn handle_command(&mut self, cmd: PollCommand) {
        let now = Instant::now();
        match cmd {
            PollCommand::Track(task) => {
                let id = task.id.clone();
                let terminal = task.status.is_terminal();
                self.envelope.upsert(task.clone());
                self.persist();
                if !terminal {
                    self.schedule.track(&id, now);
                }
                self.emit(PollEvent::Updated(task));
            }
            PollCommand::Untrack(id) => {
                self.schedule.untrack(&id);
            }
            PollCommand::Remove(id) => {
                self.schedule.untrack(&id);
                if self.envelope.remove(&id) {
                    self.persist();
                    self.emit(PollEvent::Removed(id));
                }
            }
            PollCommand::Clear => {
                for t in &self.envelope.tasks {
                    self.schedule.untrack(&t.id);
                }
                self.envelope.clear();
                self.persist();
                self.emit(PollEvent::Reloaded(Vec::new()));
            }
            PollCommand::Pause => {
                self.schedule.pause();
                tracing::debug!("polling paused");
                self.emit(PollEvent::Paused);
            }
            PollCommand::Resume => {
                // Re-read what is on disk so edits from other processes show up.
                self.writer.schedule(self.envelope.tasks.clone());
                self.writer.flush().await;
                self.envelope = self.store.load();
                let ids = self.envelope.active_ids();
                self.schedule.resume(ids.iter().map(String::as_str), now);
                tracing::debug!(tracked = self.schedule.len(), "polling resumed");
                self.emit(PollEvent::Reloaded(self.envelope.tasks.clone()));
                self.emit(PollEvent::Resumed {
                    tracked: self.schedule.len(),
                });
            }
            PollCommand::Shutdown => {}
        }
    }

    fn handle_result(
        &mut self,
        id: &str,
        generation: u64,
        res: Result<StatusUpdate, ToolhubError>,
    ) {
        if !self.schedule.is_current(id, generation) {
            tracing::debug!(task_id = %id, "dropping stale status response");
            return;
        }
        let now = Instant::now();

        let update = match res {
            Ok(update) => update,
            Err(e) if e.is_not_found() => {
                tracing::info!(task_id = %id, "scan task unknown to server; marking not found");
                self.schedule.on_not_found(id);
                StatusUpdate::not_found()
            }
            Err(e) => {
                if let Some(interval) = self.schedule.on_error(id, now) {
                    tracing::warn!(
                        task_id = %id,
                        error = %e,
                        next_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
                        "status poll failed; backing off"
                    );
                    self.emit(PollEvent::Backoff {
                        id: id.to_owned(),
                        interval,
                    });
                }
                return;
            }
        };

        let Some(task) = self.envelope.merge(id, update).cloned() else {
            self.schedule.untrack(id);
            return;
        };
        let terminal = task.status.is_terminal();
        if self.schedule.is_tracked(id) {
            self.schedule.on_success(id, terminal, now);
        }
        if terminal {
            tracing::info!(task_id = %id, status = %task.status, "scan finished");
        }
        self.persist();
        self.emit(PollEvent::Updated(task));
    }

    fn persist(&self) {
        self.writer.schedule(self.envelope.tasks.clone());
    }

    fn emit(&self, event: PollEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::scan::model::TaskStatus;

    fn policy() -> PollPolicy {
        PollPolicy::new(Duration::from_secs(1), Duration::from_secs(4))
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.backoff(Duration::from_secs(1)), Duration::from_secs(2));
        assert_eq!(p.backoff(Duration::from_secs(2)), Duration::from_secs(4));
        assert_eq!(p.backoff(Duration::from_secs(4)), Duration::from_secs(4));
    }

    #[test]
    fn consecutive_errors_double_then_success_resets() {
        let mut s = PollSchedule::new(policy());
        let t0 = Instant::now();
        assert!(s.track("a", t0));
        assert_eq!(s.take_due(t0).len(), 1);

        assert_eq!(s.on_error("a", t0), Some(Duration::from_secs(2)));
        assert!(s.take_due(t0 + Duration::from_secs(1)).is_empty());
        assert_eq!(s.take_due(t0 + Duration::from_secs(2)).len(), 1);
        assert_eq!(s.on_error("a", t0), Some(Duration::from_secs(4)));
        s.take_due(t0 + Duration::from_secs(10));
        assert_eq!(s.on_error("a", t0), Some(Duration::from_secs(4)));

        s.take_due(t0 + Duration::from_secs(10));
        s.on_success("a", false, t0);
        assert_eq!(s.interval("a"), Some(Duration::from_secs(1)));
    }

    #[test]
    fn not_found_stops_without_backoff() {
        let mut s = PollSchedule::new(policy());
        let t0 = Instant::now();
        s.track("a", t0);
        s.take_due(t0);
        s.on_not_found("a");
        assert!(!s.is_tracked("a"));
        assert_eq!(s.on_error("a", t0), None);
        assert_eq!(s.next_deadline(), None);
    }

    #[test]
    fn terminal_status_stops_polling() {
        let mut s = PollSchedule::new(policy());
        let t0 = Instant::now();
        s.track("a", t0);
        s.take_due(t0);
        let terminal = TaskStatus::parse("Failed: build error").is_terminal();
        s.on_success("a", terminal, t0);
        assert!(s.is_empty());
    }

    #[test]
    fn responses_after_pause_are_stale() {
        let mut s = PollSchedule::new(policy());
        let t0 = Instant::now();
        s.track("a", t0);
        let (_, generation) = s.take_due(t0).remove(0);

        s.pause();
        assert!(!s.is_current("a", generation));
        assert!(!s.track("a", t0), "nothing is tracked while paused");

        s.resume(["a"], t0);
        assert!(s.is_tracked("a"));
        assert!(!s.is_current("a", generation));
        let (_, fresh) = s.take_due(t0).remove(0);
        assert!(s.is_current("a", fresh));
    }

    #[test]
    fn one_request_in_flight_per_task() {
        let mut s = PollSchedule::new(policy());
        let t0 = Instant::now();
        s.track("a", t0);
        s.track("b", t0);
        assert_eq!(s.take_due(t0).len(), 2);
        assert!(s.take_due(t0 + Duration::from_secs(60)).is_empty());
        assert_eq!(s.next_deadline(), None);
    }

    #[derive(Default)]
    struct ScriptedApi {
        script: Mutex<HashMap<String, VecDeque<Result<StatusUpdate, ToolhubError>>>>,
        calls: Mutex<Vec<(String, Instant)>>,
        delays: Mutex<HashMap<String, Duration>>,
        panic_next: Mutex<Vec<String>>,
    }

    impl ScriptedApi {
        fn push(&self, id: &str, res: Result<StatusUpdate, ToolhubError>) {
            self.script
                .lock()
                .unwrap()
                .entry(id.to_owned())
                .or_default()
                .push_back(res);
        }

        fn delay(&self, id: &str, by: Duration) {
            self.delays.lock().unwrap().insert(id.to_owned(), by);
        }

        fn panic_once(&self, id: &str) {
            self.panic_next.lock().unwrap().push(id.to_owned());
        }

        fn calls(&self, id: &str) -> Vec<Instant> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(i, _)| i == id)
                .map(|(_, t)| *t)
                .collect()
        }
    }

    #[async_trait]
    impl ScanApi for ScriptedApi {
        async fn status(
            &self,
            task_id: &str,
            _include_log: bool,
        ) -> Result<StatusUpdate, ToolhubError> {
            self.calls
                .lock()
                .unwrap()
                .push((task_id.to_owned(), Instant::now()));
            let should_panic = {
                let mut panics = self.panic_next.lock().unwrap();
                let before = panics.len();
                panics.retain(|id| id != task_id);
                panics.len() != before
            };
            assert!(!should_panic, "scripted fetch panic for {task_id}");
            let res = self
                .script
                .lock()
                .unwrap()
                .get_mut(task_id)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| Ok(status("Running")));
            let delay = self.delays.lock().unwrap().get(task_id).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            res
        }

        async fn ping(&self) -> Result<(), ToolhubError> {
            Ok(())
        }
    }

    fn status(raw: &str) -> StatusUpdate {
        StatusUpdate {
            status: Some(TaskStatus::parse(raw)),
            ..StatusUpdate::default()
        }
    }

    fn server_error() -> Result<StatusUpdate, ToolhubError> {
        Err(ToolhubError::HttpStatus {
            status: 502,
            url: "http://hub/status".to_owned(),
        })
    }

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

    async fn next_terminal(rx: &mut mpsc::UnboundedReceiver<PollEvent>, id: &str) -> Task {
        loop {
            match rx.recv().await {
                Some(PollEvent::Updated(t)) if t.id == id && t.status.is_terminal() => return t,
                Some(_) => {}
                None => panic!("poller stopped before {id} finished"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn poller_backs_off_then_stops_on_terminal_status() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TaskStore::new(dir.path().join("scans.json"));
        let api = Arc::new(ScriptedApi::default());
        api.push("a", server_error());
        api.push("a", server_error());
        api.push("a", server_error());
        api.push("a", Ok(status("Failed: build error")));

        let (handle, mut events, join) = Poller::spawn(
            Arc::clone(&api),
            store.clone(),
            policy(),
            Duration::from_millis(100),
        );
        handle.track(task("a"));

        let done = next_terminal(&mut events, "a").await;
        assert_eq!(done.status.to_string(), "Failed: build error");

        let calls = api.calls("a");
        assert_eq!(calls.len(), 4);
        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(4)
            ]
        );

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(api.calls("a").len(), 4, "no polls after a terminal status");

        handle.shutdown();
        join.await.unwrap();
        let stored = store.load();
        assert_eq!(
            stored.get("a").and_then(|t| t.status.detail()),
            Some("build error")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_marks_task_and_stops() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TaskStore::new(dir.path().join("scans.json"));
        let api = Arc::new(ScriptedApi::default());
        api.push(
            "gone",
            Err(ToolhubError::HttpStatus {
                status: 404,
                url: "http://hub/status/gone".to_owned(),
            }),
        );

        let (handle, mut events, join) = Poller::spawn(
            Arc::clone(&api),
            store.clone(),
            policy(),
            Duration::from_millis(100),
        );
        handle.track(task("gone"));

        let done = next_terminal(&mut events, "gone").await;
        assert_eq!(done.status, TaskStatus::NotFound);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(api.calls("gone").len(), 1);

        handle.shutdown();
        join.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn pause_stops_polls_and_resume_restarts_active_tasks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TaskStore::new(dir.path().join("scans.json"));
        let mut done = task("done");
        done.status = TaskStatus::Completed(None);
        store.save(&[task("live"), done]);

        let api = Arc::new(ScriptedApi::default());
        let (handle, mut events, join) = Poller::spawn(
            Arc::clone(&api),
            store.clone(),
            policy(),
            Duration::from_millis(100),
        );

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let before = api.calls("live").len();
        assert_eq!(before, 3);
        assert!(api.calls("done").is_empty());

        handle.pause();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(api.calls("live").len(), before);

        handle.resume();
        loop {
            if let Some(PollEvent::Resumed { tracked }) = events.recv().await {
                assert_eq!(tracked, 1);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(api.calls("live").len(), before + 1);

        handle.shutdown();
        join.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn response_arriving_after_pause_is_dropped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TaskStore::new(dir.path().join("scans.json"));
        store.save(&[task("slow")]);

        let api = Arc::new(ScriptedApi::default());
        api.push("slow", Ok(status("Completed")));
        api.delay("slow", Duration::from_secs(2));

        let (handle, mut events, join) = Poller::spawn(
            Arc::clone(&api),
            store.clone(),
            policy(),
            Duration::from_millis(100),
        );

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(api.calls("slow").len(), 1, "fetch is in flight");
        handle.pause();
        tokio::time::sleep(Duration::from_secs(5)).await;

        handle.shutdown();
        join.await.unwrap();

        let mut updated = Vec::new();
        while let Ok(ev) = events.try_recv() {
            if let PollEvent::Updated(t) = ev {
                updated.push(t);
            }
        }
        assert!(updated.is_empty(), "stale response was applied: {updated:?}");
        assert_eq!(api.calls("slow").len(), 1);
        assert_eq!(
            store.load().get("slow").map(|t| t.status.clone()),
            Some(TaskStatus::Queued)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn panicked_fetch_backs_off_and_polling_continues() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TaskStore::new(dir.path().join("scans.json"));
        let api = Arc::new(ScriptedApi::default());
        api.panic_once("a");
        api.push("a", Ok(status("Completed")));

        let (handle, mut events, join) = Poller::spawn(
            Arc::clone(&api),
            store.clone(),
            policy(),
            Duration::from_millis(100),
        );
        handle.track(task("a"));

        let done = next_terminal(&mut events, "a").await;
        assert_eq!(done.status, TaskStatus::Completed(None));

        let calls = api.calls("a");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1] - calls[0], Duration::from_secs(2));

        handle.shutdown();
        join.await.unwrap();
    }
}
