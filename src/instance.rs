//! Contracts with the downstream instance and task managers.
//!
//! The collection core discovers files; tailing and shipping them is the
//! instance manager's job. Everything the core needs from it is captured by
//! [`InstanceManager`]: non-blocking submission with queue-full feedback,
//! the re-offer gate, and completion observation. The task manager receives
//! exactly one action from this core, the retry-mode finish.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::TaskProfile;

/// What a submitted instance runs as. A closed tag, not a plugin class
/// name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceKind {
    /// Tail a single file.
    #[default]
    File,
}

/// Descriptor of one file to be ingested downstream.
///
/// Built from the task profile plus the discovered file's coordinates.
/// Instances order by `(created_at, instance_id)`; that is the submission
/// order inside a data-time bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceProfile {
    pub task_id: String,
    pub group_id: String,
    pub stream_id: String,
    pub source: String,
    pub sink: String,
    pub channel: String,
    pub kind: InstanceKind,
    /// The absolute file path; doubles as the instance identity.
    pub instance_id: String,
    /// Quantised data time the file belongs to.
    pub data_time: String,
    /// Last-modified time of the file at discovery, epoch ms.
    pub file_update_time: i64,
    /// When this core first buffered the file, epoch ms.
    pub created_at: i64,
    /// User-defined extension properties from the task profile.
    pub properties: HashMap<String, String>,
}

impl InstanceProfile {
    /// Build the descriptor for a discovered file.
    pub fn for_file(
        profile: &TaskProfile,
        file_path: &str,
        data_time: &str,
        file_update_time: i64,
        created_at: i64,
    ) -> Self {
        Self {
            task_id: profile.task_id.clone(),
            group_id: profile.group_id.clone(),
            stream_id: profile.stream_id.clone(),
            source: profile.source.clone(),
            sink: profile.sink.clone(),
            channel: profile.channel.clone(),
            kind: InstanceKind::File,
            instance_id: file_path.to_string(),
            data_time: data_time.to_string(),
            file_update_time,
            created_at,
            properties: profile.properties.clone(),
        }
    }

    fn order_key(&self) -> (i64, &str) {
        (self.created_at, &self.instance_id)
    }
}

impl PartialEq for InstanceProfile {
    fn eq(&self, other: &Self) -> bool {
        self.order_key() == other.order_key()
    }
}

impl Eq for InstanceProfile {}

impl PartialOrd for InstanceProfile {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InstanceProfile {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order_key().cmp(&other.order_key())
    }
}

/// What to do with an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceActionKind {
    Add,
}

/// An action submitted to the instance manager.
#[derive(Debug, Clone)]
pub struct InstanceAction {
    pub kind: InstanceActionKind,
    pub profile: InstanceProfile,
}

impl InstanceAction {
    pub fn add(profile: InstanceProfile) -> Self {
        Self {
            kind: InstanceActionKind::Add,
            profile,
        }
    }
}

/// What to do with a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskActionKind {
    Finish,
}

/// An action submitted to the task manager.
#[derive(Debug, Clone)]
pub struct TaskAction {
    pub kind: TaskActionKind,
    pub profile: TaskProfile,
}

impl TaskAction {
    pub fn finish(profile: TaskProfile) -> Self {
        Self {
            kind: TaskActionKind::Finish,
            profile,
        }
    }
}

/// Downstream manager of running file instances. Implementations are
/// thread-safe by contract; every method is non-blocking.
pub trait InstanceManager: Send + Sync {
    fn start(&self);

    fn stop(&self);

    /// Submit an action. `false` means the internal queue is full and the
    /// caller should back off and retry the same action.
    fn submit_action(&self, action: InstanceAction) -> bool;

    /// Whether a path already seen before may be offered again, given its
    /// current mtime.
    fn should_add_again(&self, file_path: &str, mtime_ms: i64) -> bool;

    /// True once every submitted instance has run to completion.
    fn all_instance_finished(&self) -> bool;
}

/// Shared handle to an instance manager.
pub type InstanceManagerRef = std::sync::Arc<dyn InstanceManager>;

/// Upstream manager of tasks; receives the terminal action of a retry task.
pub trait TaskManager: Send + Sync {
    fn submit_action(&self, action: TaskAction) -> bool;
}

/// Shared handle to a task manager.
pub type TaskManagerRef = std::sync::Arc<dyn TaskManager>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::CycleUnit;

    fn profile() -> TaskProfile {
        TaskProfile {
            task_id: "1".into(),
            group_id: "g".into(),
            stream_id: "s".into(),
            source: "file".into(),
            sink: "console".into(),
            channel: "memory".into(),
            cycle_unit: CycleUnit::Hour,
            file_dir_filter_patterns: "/d/YYYYMMDDHH/*.log".into(),
            time_offset: "0h".into(),
            file_max_num: 4096,
            retry: false,
            start_time: 0,
            end_time: 0,
            properties: HashMap::from([("team".to_string(), "infra".to_string())]),
        }
    }

    #[test]
    fn test_for_file_copies_task_coordinates() {
        let instance =
            InstanceProfile::for_file(&profile(), "/d/2024060112/a.log", "2024060112", 7, 9);
        assert_eq!(instance.task_id, "1");
        assert_eq!(instance.instance_id, "/d/2024060112/a.log");
        assert_eq!(instance.data_time, "2024060112");
        assert_eq!(instance.file_update_time, 7);
        assert_eq!(instance.created_at, 9);
        assert_eq!(instance.properties.get("team").unwrap(), "infra");
    }

    #[test]
    fn test_ordering_by_created_at_then_path() {
        let p = profile();
        let a = InstanceProfile::for_file(&p, "/d/b.log", "2024060112", 0, 100);
        let b = InstanceProfile::for_file(&p, "/d/a.log", "2024060112", 0, 200);
        let c = InstanceProfile::for_file(&p, "/d/a.log", "2024060112", 0, 100);

        let mut sorted = vec![a.clone(), b.clone(), c.clone()];
        sorted.sort();
        assert_eq!(sorted[0].instance_id, "/d/a.log");
        assert_eq!(sorted[0].created_at, 100);
        assert_eq!(sorted[1].instance_id, "/d/b.log");
        assert_eq!(sorted[2].created_at, 200);
        assert!(c < a && a < b);
    }
}
