//! Time-gated buffer of discovered files.
//!
//! Two levels: data time -> (file path -> instance profile). Discovery
//! (watch events and scans) offers entries in; the core loop releases a
//! bucket once its should-start time has arrived and ages out buckets that
//! drifted outside the validity horizon. A `(data_time, file_path)` pair is
//! never buffered twice without the downstream re-offer gate approving it.

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::instance::{InstanceAction, InstanceProfile};
use crate::pattern::DateCalc;
use crate::task::CORE_THREAD_SLEEP_TIME;

#[derive(Debug, Default)]
pub struct EventMap {
    buckets: IndexMap<String, IndexMap<String, InstanceProfile>>,
}

impl EventMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, data_time: &str, file_path: &str) -> bool {
        self.buckets
            .get(data_time)
            .is_some_and(|bucket| bucket.contains_key(file_path))
    }

    /// Entries currently buffered across all buckets.
    pub fn len(&self) -> usize {
        self.buckets.values().map(IndexMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offer a discovered file. Returns false when the pair is already
    /// buffered or the re-offer gate declines; the profile is only built
    /// when it will actually be inserted.
    pub fn offer(
        &mut self,
        file_path: &str,
        data_time: &str,
        mtime_ms: i64,
        should_add_again: impl FnOnce(&str, i64) -> bool,
        build: impl FnOnce() -> InstanceProfile,
    ) -> bool {
        if self.contains(data_time, file_path) {
            return false;
        }
        if !should_add_again(file_path, mtime_ms) {
            debug!(file = %file_path, "Re-offer declined downstream");
            return false;
        }
        self.buckets
            .entry(data_time.to_string())
            .or_default()
            .insert(file_path.to_string(), build());
        true
    }

    /// Submit every due bucket's entries in `(created_at, file_path)`
    /// order. A full downstream queue backs the releaser off for
    /// [`CORE_THREAD_SLEEP_TIME`] and the same entry is retried; entries
    /// leave the map only after a successful submit.
    pub async fn release_due(
        &mut self,
        now_ms: i64,
        calc: &DateCalc,
        offset_ms: i64,
        task_id: &str,
        submit: &mut (dyn FnMut(InstanceAction) -> bool + Send),
    ) {
        let data_times: Vec<String> = self.buckets.keys().cloned().collect();
        for data_time in data_times {
            let Some(bucket) = self.buckets.get(&data_time) else {
                continue;
            };
            if bucket.is_empty() {
                continue;
            }

            // A data time that does not parse has no schedule to wait for.
            let due = match calc.should_start_time_ms(&data_time, offset_ms) {
                Some(start_ms) => now_ms >= start_ms,
                None => true,
            };
            if !due {
                debug!(
                    task_id = %task_id,
                    data_time = %data_time,
                    current_time = %calc.format_wall_time(now_ms),
                    "Submit later"
                );
                continue;
            }

            info!(
                task_id = %task_id,
                data_time = %data_time,
                current_time = %calc.format_wall_time(now_ms),
                "Submit now"
            );
            let mut sorted: Vec<InstanceProfile> = bucket.values().cloned().collect();
            sorted.sort();
            for profile in sorted {
                let file_path = profile.instance_id.clone();
                let action = InstanceAction::add(profile);
                while !submit(action.clone()) {
                    warn!(task_id = %task_id, "Instance manager action queue is full");
                    tokio::time::sleep(CORE_THREAD_SLEEP_TIME).await;
                }
                if let Some(bucket) = self.buckets.get_mut(&data_time) {
                    bucket.shift_remove(&file_path);
                }
            }
        }
    }

    /// Drop buckets whose data time lies outside `now ± horizon`. Buckets
    /// keyed by an unparseable data time (no date token in the pattern)
    /// never age out. Returns the number of buckets dropped.
    pub fn age_out(&mut self, now_ms: i64, calc: &DateCalc, horizon_ms: i64) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|data_time, _| {
            match calc.parse_data_time(data_time) {
                Some(t) => {
                    let keep = (t - now_ms).abs() <= horizon_ms;
                    if !keep {
                        warn!(data_time = %data_time, "Removing too-old bucket from event map");
                    }
                    keep
                }
                None => true,
            }
        });
        before - self.buckets.len()
    }
}
