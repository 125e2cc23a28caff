//! Per-pattern filesystem-change subscription.
//!
//! A [`WatchEntity`] owns one OS subscription rooted at its pattern's static
//! directory, registered per-directory so that creations anywhere in the
//! depth-bounded tree are observed. Draining is non-blocking; the entity
//! never waits for events. Losing the subscription (directory deleted,
//! channel gone) is recovered by rebuilding the whole service and
//! re-registering from the root; lost events are compensated by the
//! periodic scan, not reconstructed here.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, TryRecvError, channel};

use indexmap::IndexSet;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use snafu::ResultExt;
use tracing::{debug, error, info, warn};

use crate::error::{RootNotFoundSnafu, SubscribeSnafu, WatchError};
use crate::pattern::DateExpression;
use crate::scanner::SCAN_MAX_DEPTH;

/// Log a watch failure; fd exhaustion keeps the message short, everything
/// else carries the full error detail.
pub(crate) fn log_watch_error(context: &str, err: &WatchError) {
    if err.is_fd_exhausted() {
        error!(context = %context, error = %err, "Watch registration failed");
    } else {
        error!(context = %context, error = ?err, "Watch registration failed");
    }
}

pub struct WatchEntity {
    origin_pattern: String,
    expr: DateExpression,
    static_root: PathBuf,
    watcher: RecommendedWatcher,
    rx: Receiver<Result<Event, notify::Error>>,
    /// Every directory currently subscribed, insertion-ordered. Membership
    /// makes registration idempotent.
    registered: IndexSet<PathBuf>,
    rebuild_needed: bool,
}

impl WatchEntity {
    /// Create the subscription for `origin_pattern` and register the tree
    /// under `static_root`. Fails when the root is missing or the service
    /// cannot be created; the caller records the pattern for retry.
    pub fn new(
        origin_pattern: &str,
        expr: DateExpression,
        static_root: PathBuf,
    ) -> Result<Self, WatchError> {
        if !static_root.is_dir() {
            return RootNotFoundSnafu {
                path: static_root.display().to_string(),
            }
            .fail();
        }
        let (tx, rx) = channel();
        let watcher = notify::recommended_watcher(tx).context(SubscribeSnafu {
            path: static_root.display().to_string(),
        })?;
        let mut entity = Self {
            origin_pattern: origin_pattern.to_string(),
            expr,
            static_root,
            watcher,
            rx,
            registered: IndexSet::new(),
            rebuild_needed: false,
        };
        entity.register_recursively()?;
        Ok(entity)
    }

    pub fn origin_pattern(&self) -> &str {
        &self.origin_pattern
    }

    pub fn date_expression(&self) -> &DateExpression {
        &self.expr
    }

    /// Number of directories currently subscribed; also the per-drain event
    /// budget.
    pub fn total_path_size(&self) -> usize {
        self.registered.len()
    }

    /// Register every directory from the static root down. Idempotent:
    /// already-registered paths are skipped. Only a failure on the root
    /// itself is an error; deeper failures are logged and left to the next
    /// retry or rebuild.
    pub fn register_recursively(&mut self) -> Result<(), WatchError> {
        self.register_tree(&self.static_root.clone(), 0, true)
    }

    /// Register a subtree that appeared after the initial registration.
    fn register_subtree(&mut self, dir: &Path) {
        let depth = dir
            .strip_prefix(&self.static_root)
            .map(|rel| rel.components().count())
            .unwrap_or(usize::MAX);
        if depth > SCAN_MAX_DEPTH {
            return;
        }
        if let Err(e) = self.register_tree(&dir.to_path_buf(), depth, false) {
            log_watch_error(&self.origin_pattern, &e);
        }
    }

    fn register_tree(&mut self, dir: &PathBuf, depth: usize, strict: bool) -> Result<(), WatchError> {
        if depth > SCAN_MAX_DEPTH {
            return Ok(());
        }
        if !self.registered.contains(dir) {
            match self.watcher.watch(dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    debug!(path = %dir.display(), "Registered watch");
                    self.registered.insert(dir.clone());
                }
                Err(source) => {
                    let err = WatchError::Subscribe {
                        path: dir.display().to_string(),
                        source,
                    };
                    if strict && depth == 0 {
                        return Err(err);
                    }
                    log_watch_error(&self.origin_pattern, &err);
                    return Ok(());
                }
            }
        }
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Skipping unreadable directory");
                return Ok(());
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                self.register_tree(&path, depth + 1, strict)?;
            }
        }
        Ok(())
    }

    /// Drain pending events without blocking, at most one per registered
    /// directory. Newly created directories get registered on the spot;
    /// file creations matching the pattern (fully or as a prefix) are
    /// returned. A lost subscription triggers a full rebuild before
    /// returning.
    pub fn drain_events(&mut self) -> Vec<PathBuf> {
        let mut matched = Vec::new();
        let budget = self.total_path_size().max(1);
        for _ in 0..budget {
            match self.rx.try_recv() {
                Ok(Ok(event)) => self.process_event(event, &mut matched),
                Ok(Err(e)) => {
                    error!(pattern = %self.origin_pattern, error = %e, "Watch stream error");
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.rebuild_needed = true;
                    break;
                }
            }
        }
        if self.rebuild_needed {
            self.rebuild();
        }
        matched
    }

    fn process_event(&mut self, event: Event, matched: &mut Vec<PathBuf>) {
        if event.need_rescan() {
            // Backlog dropped by the OS. The periodic scan is the
            // compensation path; nothing to reconstruct here.
            error!(pattern = %self.origin_pattern, "Watch events lost in overflow");
            return;
        }
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                for path in event.paths {
                    if path.is_dir() {
                        info!(path = %path.display(), "Creation event for a directory");
                        self.register_subtree(&path);
                    } else if let Some(path_str) = path.to_str() {
                        if self.expr.match_regex().is_match(path_str) {
                            debug!(path = %path_str, pattern = %self.origin_pattern, "Matched file");
                            matched.push(path);
                        }
                    }
                }
            }
            EventKind::Remove(_) => {
                // Removal of a watched directory invalidates its key; the
                // whole service is rebuilt rather than patched.
                if event.paths.iter().any(|p| self.registered.contains(p)) {
                    warn!(pattern = %self.origin_pattern, "Watched directory removed");
                    self.rebuild_needed = true;
                }
            }
            _ => {}
        }
    }

    /// Close the service and start over: new channel, new watcher, full
    /// re-registration.
    fn rebuild(&mut self) {
        info!(pattern = %self.origin_pattern, "Rebuilding watch service");
        let (tx, rx) = channel();
        match notify::recommended_watcher(tx) {
            Ok(watcher) => {
                self.watcher = watcher;
                self.rx = rx;
                self.registered.clear();
                self.rebuild_needed = false;
                if let Err(e) = self.register_recursively() {
                    log_watch_error(&self.origin_pattern, &e);
                }
            }
            Err(e) => {
                // Keep the flag set; the next drain retries.
                error!(pattern = %self.origin_pattern, error = %e, "Watch service recreation failed");
            }
        }
    }
}

impl std::fmt::Debug for WatchEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchEntity")
            .field("origin_pattern", &self.origin_pattern)
            .field("static_root", &self.static_root)
            .field("registered", &self.registered.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::PathLayers;
    use notify::event::{CreateKind, Flag, RemoveKind};
    use std::fs;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn scratch() -> TempDir {
        loop {
            let dir = TempDir::new().unwrap();
            let s = dir.path().to_string_lossy().to_string();
            if !["YY", "MM", "DD", "HH", "hh", "mm"]
                .iter()
                .any(|t| s.contains(t))
            {
                return dir;
            }
        }
    }

    fn entity_for(pattern: &str) -> WatchEntity {
        let expr = DateExpression::parse(pattern).unwrap();
        let layers = PathLayers::split(pattern).unwrap();
        WatchEntity::new(pattern, expr, layers.static_root).unwrap()
    }

    /// Drain with a deadline; native event delivery is asynchronous.
    fn drain_until(entity: &mut WatchEntity, want: usize, timeout: Duration) -> Vec<PathBuf> {
        let deadline = Instant::now() + timeout;
        let mut all = Vec::new();
        while Instant::now() < deadline {
            all.extend(entity.drain_events());
            if all.len() >= want {
                break;
            }
            std::thread::sleep(Duration::from_millis(25));
        }
        all
    }

    #[test]
    fn test_new_fails_on_missing_root() {
        let tmp = scratch();
        let pattern = format!("{}/gone/*.log", tmp.path().display());
        let expr = DateExpression::parse(&pattern).unwrap();
        let layers = PathLayers::split(&pattern).unwrap();
        let err = WatchEntity::new(&pattern, expr, layers.static_root).unwrap_err();
        assert!(matches!(err, WatchError::RootNotFound { .. }));
    }

    #[test]
    fn test_registration_is_recursive_and_idempotent() {
        let tmp = scratch();
        fs::create_dir_all(tmp.path().join("a/b")).unwrap();
        let pattern = format!("{}/*.log", tmp.path().display());
        let mut entity = entity_for(&pattern);

        // root + a + a/b
        assert_eq!(entity.total_path_size(), 3);

        entity.register_recursively().unwrap();
        assert_eq!(entity.total_path_size(), 3);
    }

    #[test]
    fn test_file_creation_is_matched() {
        let tmp = scratch();
        let pattern = format!("{}/*.log", tmp.path().display());
        let mut entity = entity_for(&pattern);

        fs::write(tmp.path().join("a.log"), b"x").unwrap();
        fs::write(tmp.path().join("ignored.txt"), b"x").unwrap();

        let matched = drain_until(&mut entity, 1, Duration::from_secs(5));
        assert!(matched.iter().any(|p| p.ends_with("a.log")));
        assert!(!matched.iter().any(|p| p.ends_with("ignored.txt")));
    }

    #[test]
    fn test_new_directory_is_tracked() {
        let tmp = scratch();
        let pattern = format!("{}/*/out.log", tmp.path().display());
        let mut entity = entity_for(&pattern);
        assert_eq!(entity.total_path_size(), 1);

        fs::create_dir(tmp.path().join("run1")).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while entity.total_path_size() < 2 && Instant::now() < deadline {
            entity.drain_events();
            std::thread::sleep(Duration::from_millis(25));
        }
        assert_eq!(entity.total_path_size(), 2);

        fs::write(tmp.path().join("run1/out.log"), b"x").unwrap();
        let matched = drain_until(&mut entity, 1, Duration::from_secs(5));
        assert!(matched.iter().any(|p| p.ends_with("run1/out.log")));
    }

    #[test]
    fn test_overflow_event_only_logs() {
        let tmp = scratch();
        fs::write(tmp.path().join("x.log"), b"x").unwrap();
        let pattern = format!("{}/*.log", tmp.path().display());
        let mut entity = entity_for(&pattern);

        let mut matched = Vec::new();
        let overflow = Event::new(EventKind::Other).set_flag(Flag::Rescan);
        entity.process_event(overflow, &mut matched);
        assert!(matched.is_empty());
        assert!(!entity.rebuild_needed);
    }

    #[test]
    fn test_removal_of_registered_dir_triggers_rebuild() {
        let tmp = scratch();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        let pattern = format!("{}/*.log", tmp.path().display());
        let mut entity = entity_for(&pattern);
        assert_eq!(entity.total_path_size(), 2);

        let removed = tmp.path().join("sub");
        fs::remove_dir(&removed).unwrap();
        let remove_event =
            Event::new(EventKind::Remove(RemoveKind::Folder)).add_path(removed.clone());
        entity.process_event(remove_event, &mut Vec::new());
        assert!(entity.rebuild_needed);

        // Recreate and drain: the rebuild re-registers the new tree and
        // subsequent creations are seen again.
        fs::create_dir(&removed).unwrap();
        entity.drain_events();
        assert!(!entity.rebuild_needed);
        assert_eq!(entity.total_path_size(), 2);

        fs::write(tmp.path().join("z.log"), b"x").unwrap();
        let matched = drain_until(&mut entity, 1, Duration::from_secs(5));
        assert!(matched.iter().any(|p| p.ends_with("z.log")));
    }

    #[test]
    fn test_synthetic_create_event_matches_prefix() {
        let tmp = scratch();
        let pattern = format!("{}/app", tmp.path().display());
        fs::create_dir(tmp.path().join("app")).unwrap();
        // Pattern names a directory; a file under it is a prefix match.
        let expr = DateExpression::parse(&pattern).unwrap();
        let mut entity = WatchEntity::new(&pattern, expr, tmp.path().to_path_buf()).unwrap();

        let file = tmp.path().join("app").join("f.log");
        fs::write(&file, b"x").unwrap();
        let event = Event::new(EventKind::Create(CreateKind::File)).add_path(file.clone());
        let mut matched = Vec::new();
        entity.process_event(event, &mut matched);
        assert_eq!(matched, vec![file]);
    }
}
