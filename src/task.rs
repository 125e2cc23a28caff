//! Orchestration of one file-collection task.
//!
//! A [`FileCollectTask`] owns the task's discovery state end to end: the
//! watch entities, the failed-registration retry set and the event map all
//! live on the core loop and are touched nowhere else. The loop ticks at
//! one hertz; normal mode interleaves the periodic scan, watch draining and
//! time-gated release, retry mode runs one bounded backfill and reports
//! finish upstream. The paired [`TaskHandle`] is the only cross-thread
//! surface: terminal-state transition plus a quiescence wait.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};
use std::time::Duration;

use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::clock::ClockRef;
use crate::config::TaskProfile;
use crate::event_map::EventMap;
use crate::instance::{InstanceManagerRef, TaskAction, TaskManagerRef};
use crate::pattern::{DAY_TIMEOUT_INTERVAL_MS, DateCalc, DateExpression, PathLayers};
use crate::scanner::scan_task_between_times;
use crate::watcher::{WatchEntity, log_watch_error};

/// Tick period of the core loop; also the queue-full backoff.
pub const CORE_THREAD_SLEEP_TIME: Duration = Duration::from_secs(1);

/// Heartbeat staleness after which the loop is presumed stuck.
pub const CORE_THREAD_MAX_GAP_TIME_MS: i64 = 60 * 1000;

/// How often the compensating scan runs in normal mode.
pub const SCAN_INTERVAL_MS: i64 = 60 * 1000;

/// Lifecycle of a task. Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    New = 0,
    Running = 1,
    Succeeded = 2,
    Failed = 3,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskState::New,
            1 => TaskState::Running,
            2 => TaskState::Succeeded,
            _ => TaskState::Failed,
        }
    }
}

/// State shared between the loop and its handle.
#[derive(Debug)]
struct TaskShared {
    state: AtomicU8,
    running: AtomicBool,
    core_thread_update_ms: AtomicI64,
}

impl TaskShared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(TaskState::New as u8),
            running: AtomicBool::new(false),
            core_thread_update_ms: AtomicI64::new(0),
        }
    }

    fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Transition unless already terminal.
    fn change_state(&self, to: TaskState, task_id: &str) {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            let state = TaskState::from_u8(current);
            if state.is_terminal() || state == to {
                return;
            }
            match self.state.compare_exchange(
                current,
                to as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    info!(task_id = %task_id, from = ?state, to = ?to, "Task state changed");
                    return;
                }
                Err(actual) => current = actual,
            }
        }
    }
}

/// The discovery engine of one task.
pub struct FileCollectTask {
    profile: TaskProfile,
    calc: DateCalc,
    clock: ClockRef,
    task_manager: TaskManagerRef,
    instance_manager: InstanceManagerRef,
    init_ok: bool,
    retry: bool,
    start_time: i64,
    end_time: i64,
    origin_patterns: Vec<String>,
    watchers: IndexMap<String, WatchEntity>,
    watch_failed_dirs: HashSet<String>,
    event_map: EventMap,
    last_scan_time: i64,
    /// Strictly monotonic discovery stamp; keeps a batch's submission order
    /// equal to its discovery order even within one clock millisecond.
    last_created_at: i64,
    ran_at_least_once: bool,
    shared: Arc<TaskShared>,
    shutdown: CancellationToken,
}

impl FileCollectTask {
    pub fn new(
        profile: TaskProfile,
        calc: DateCalc,
        clock: ClockRef,
        task_manager: TaskManagerRef,
        instance_manager: InstanceManagerRef,
    ) -> Self {
        Self {
            profile,
            calc,
            clock,
            task_manager,
            instance_manager,
            init_ok: false,
            retry: false,
            start_time: 0,
            end_time: 0,
            origin_patterns: Vec::new(),
            watchers: IndexMap::new(),
            watch_failed_dirs: HashSet::new(),
            event_map: EventMap::new(),
            last_scan_time: 0,
            last_created_at: 0,
            ran_at_least_once: false,
            shared: Arc::new(TaskShared::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.profile.task_id
    }

    pub fn state(&self) -> TaskState {
        self.shared.state()
    }

    /// Validate the profile and set up discovery. A failed validation
    /// leaves the task idle: the loop runs but every tick is a no-op.
    pub fn init(&mut self) {
        if let Err(e) = self.profile.validate() {
            error!(task_id = %self.profile.task_id, error = %e, "Task profile invalid");
            return;
        }
        self.retry = self.profile.retry;
        self.origin_patterns = self.profile.origin_patterns();
        self.instance_manager.start();
        if self.retry {
            self.start_time = self.profile.start_time;
            self.end_time = self.profile.end_time;
        } else {
            for origin in self.origin_patterns.clone() {
                self.add_path_pattern(&origin);
            }
        }
        self.init_ok = true;
    }

    /// The cross-thread control surface for this task.
    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            task_id: self.profile.task_id.clone(),
            shared: Arc::clone(&self.shared),
            shutdown: self.shutdown.clone(),
            instance_manager: Arc::clone(&self.instance_manager),
            clock: Arc::clone(&self.clock),
        }
    }

    /// Start watching one origin pattern. A missing root parks the pattern
    /// in the retry set; an unusable pattern is dropped for good.
    fn add_path_pattern(&mut self, origin: &str) {
        let (expr, layers) = match (DateExpression::parse(origin), PathLayers::split(origin)) {
            (Ok(expr), Ok(layers)) => (expr, layers),
            (Err(e), _) | (_, Err(e)) => {
                error!(task_id = %self.profile.task_id, pattern = %origin, error = %e,
                    "Unusable origin pattern");
                return;
            }
        };
        info!(task_id = %self.profile.task_id, pattern = %origin,
            watch_path = %layers.static_root.display(), "Adding path pattern");
        if !layers.static_root.is_dir() {
            warn!(task_id = %self.profile.task_id,
                path = %layers.static_root.display(), "Watch directory not found");
            self.watch_failed_dirs.insert(origin.to_string());
            return;
        }
        match WatchEntity::new(origin, expr, layers.static_root) {
            Ok(entity) => {
                self.watchers.insert(origin.to_string(), entity);
                self.watch_failed_dirs.remove(origin);
            }
            Err(e) => {
                log_watch_error(origin, &e);
                self.watch_failed_dirs.insert(origin.to_string());
            }
        }
    }

    /// Run the core loop until a terminal state is reached.
    pub async fn run(mut self) {
        self.shared
            .change_state(TaskState::Running, &self.profile.task_id);
        self.shared.running.store(true, Ordering::SeqCst);
        info!(task_id = %self.profile.task_id, retry = self.retry, "Collection loop started");
        while !self.state().is_terminal() {
            self.shared
                .core_thread_update_ms
                .store(self.clock.now_ms(), Ordering::SeqCst);
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.shared
                        .change_state(TaskState::Succeeded, &self.profile.task_id);
                    break;
                }
                _ = tokio::time::sleep(CORE_THREAD_SLEEP_TIME) => {}
            }
            self.tick().await;
        }
        self.shared.running.store(false, Ordering::SeqCst);
        info!(task_id = %self.profile.task_id, "Collection loop stopped");
    }

    /// One loop iteration. Public so embedders and tests can drive the
    /// schedule themselves.
    pub async fn tick(&mut self) {
        if !self.init_ok {
            return;
        }
        if self.retry {
            self.run_for_retry().await;
        } else {
            self.run_for_normal().await;
        }
    }

    async fn run_for_normal(&mut self) {
        let now = self.clock.now_ms();
        if now - self.last_scan_time > SCAN_INTERVAL_MS {
            self.scan_existing_files(now);
            self.last_scan_time = now;
        }
        self.retry_failed_patterns();
        self.drain_watch_events(now);
        self.event_map
            .age_out(now, &self.calc, DAY_TIMEOUT_INTERVAL_MS);
        self.release_due(now).await;
    }

    async fn run_for_retry(&mut self) {
        if !self.ran_at_least_once {
            for origin in self.origin_patterns.clone() {
                let infos = scan_task_between_times(
                    &self.profile,
                    &origin,
                    &self.calc,
                    self.start_time,
                    self.end_time,
                    true,
                );
                info!(task_id = %self.profile.task_id, pattern = %origin,
                    count = infos.len(), "Backfill scan finished");
                for info in infos {
                    self.add_to_event_map(&info.file_path, &info.data_time);
                }
            }
            self.release_due(self.clock.now_ms()).await;
            self.ran_at_least_once = true;
        }
        if self.instance_manager.all_instance_finished() {
            info!(task_id = %self.profile.task_id,
                "Retry task finished, sending finish action to task manager");
            self.task_manager
                .submit_action(TaskAction::finish(self.profile.clone()));
            self.shared
                .change_state(TaskState::Succeeded, &self.profile.task_id);
        }
    }

    /// Scan the last two cycles of every pattern into the event map.
    fn scan_existing_files(&mut self, now: i64) {
        for origin in self.origin_patterns.clone() {
            let start = self.calc.minus_cycles(now, 2, self.profile.cycle_unit);
            let infos =
                scan_task_between_times(&self.profile, &origin, &self.calc, start, now, false);
            info!(task_id = %self.profile.task_id, pattern = %origin,
                count = infos.len(), "Scan finished");
            for info in infos {
                self.add_to_event_map(&info.file_path, &info.data_time);
            }
        }
    }

    fn retry_failed_patterns(&mut self) {
        let failed: Vec<String> = self.watch_failed_dirs.iter().cloned().collect();
        for origin in failed {
            self.add_path_pattern(&origin);
        }
    }

    fn drain_watch_events(&mut self, now: i64) {
        let mut batches: Vec<(String, Vec<std::path::PathBuf>)> = Vec::new();
        for (origin, entity) in self.watchers.iter_mut() {
            let files = entity.drain_events();
            if !files.is_empty() {
                batches.push((origin.clone(), files));
            }
        }
        for (origin, files) in batches {
            for path in files {
                let Some(path_str) = path.to_str() else {
                    continue;
                };
                self.handle_matched_file(&origin, path_str, now);
            }
        }
    }

    fn handle_matched_file(&mut self, origin: &str, file_path: &str, now: i64) {
        let Some(entity) = self.watchers.get(origin) else {
            return;
        };
        let expr = entity.date_expression();
        let data_time = expr.extract_data_time(file_path);
        if expr.has_date()
            && !self.calc.is_valid_creation_time_for_cycle(
                &data_time,
                now,
                self.profile.cycle_unit,
                self.profile.time_offset_ms(),
            )
        {
            error!(task_id = %self.profile.task_id, file = %file_path,
                data_time = %data_time, "File data time out of window");
            return;
        }
        self.add_to_event_map(file_path, &data_time);
    }

    fn add_to_event_map(&mut self, file_path: &str, data_time: &str) {
        let mtime = file_mtime_ms(file_path);
        let created_at = self.clock.now_ms().max(self.last_created_at + 1);
        self.last_created_at = created_at;
        let profile = &self.profile;
        let manager = &self.instance_manager;
        self.event_map.offer(
            file_path,
            data_time,
            mtime,
            |path, mtime| manager.should_add_again(path, mtime),
            || {
                crate::instance::InstanceProfile::for_file(
                    profile, file_path, data_time, mtime, created_at,
                )
            },
        );
    }

    async fn release_due(&mut self, now: i64) {
        let calc = self.calc;
        let offset_ms = self.profile.time_offset_ms();
        let task_id = self.profile.task_id.clone();
        let manager = Arc::clone(&self.instance_manager);
        let mut submit = move |action| manager.submit_action(action);
        self.event_map
            .release_due(now, &calc, offset_ms, &task_id, &mut submit)
            .await;
    }
}

fn file_mtime_ms(path: &str) -> i64 {
    std::fs::metadata(path)
        .ok()
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Control surface for a spawned [`FileCollectTask`].
#[derive(Clone)]
pub struct TaskHandle {
    task_id: String,
    shared: Arc<TaskShared>,
    shutdown: CancellationToken,
    instance_manager: InstanceManagerRef,
    clock: ClockRef,
}

impl TaskHandle {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn state(&self) -> TaskState {
        self.shared.state()
    }

    /// Tear the task down: transition to SUCCEEDED, stop the instance
    /// manager, then wait for the loop to quiesce. A loop whose heartbeat
    /// has gone stale for longer than [`CORE_THREAD_MAX_GAP_TIME_MS`] is
    /// presumed stuck and abandoned; its subscriptions close when it (or
    /// the process) ends.
    pub async fn destroy(&self) {
        self.shared
            .change_state(TaskState::Succeeded, &self.task_id);
        self.shutdown.cancel();
        self.instance_manager.stop();
        while self.shared.running.load(Ordering::SeqCst) {
            let gap =
                self.clock.now_ms() - self.shared.core_thread_update_ms.load(Ordering::SeqCst);
            if gap > CORE_THREAD_MAX_GAP_TIME_MS {
                error!(task_id = %self.task_id,
                    "Core loop heartbeat stale, proceeding with shutdown");
                break;
            }
            tokio::time::sleep(CORE_THREAD_SLEEP_TIME).await;
        }
    }
}
