//! Snowdrift: file-collection core for a log ingestion agent.
//!
//! For each configured task, snowdrift continuously discovers files under a
//! date-templated directory pattern, classifies every file by the data time
//! embedded in its path, and hands matching files off to a downstream
//! instance manager as they become due. This crate handles:
//!
//! - Expanding and matching date tokens (`YYYY`, `MM`, `DD`, `HH`, `mm`) in
//!   path patterns
//! - Recursive, self-healing filesystem-change subscriptions per pattern
//! - A periodic windowed scan that compensates for anything the watchers
//!   miss
//! - A time-gated event map that buffers discovered files per data time and
//!   releases them at their scheduled start
//! - A per-task core loop with normal (live tailing) and retry (bounded
//!   backfill) modes
//!
//! Tailing, shipping and persistence live behind the [`instance`] contracts
//! and are out of scope here.

pub mod clock;
pub mod config;
pub mod error;
pub mod event_map;
pub mod instance;
pub mod pattern;
pub mod scanner;
pub mod signal;
pub mod task;
pub mod watcher;

// Re-export commonly used items
pub use clock::{Clock, ClockRef, ManualClock, SystemClock};
pub use config::{Config, TaskProfile};
pub use event_map::EventMap;
pub use instance::{
    InstanceAction, InstanceActionKind, InstanceManager, InstanceManagerRef, InstanceProfile,
    TaskAction, TaskActionKind, TaskManager, TaskManagerRef,
};
pub use pattern::{CycleUnit, DateCalc, DateExpression, PathLayers, calc_offset};
pub use scanner::{BasicFileInfo, scan_task_between_times};
pub use signal::shutdown_signal;
pub use task::{FileCollectTask, TaskHandle, TaskState};
pub use watcher::WatchEntity;
