//! Agent configuration and task profiles.
//!
//! # Example
//!
//! ```yaml
//! time_zone: "+08:00"
//! tasks:
//!   app-logs:
//!     task_id: "10001"
//!     group_id: g
//!     stream_id: s
//!     source: file
//!     sink: console
//!     channel: memory
//!     cycle_unit: h
//!     file_dir_filter_patterns: "/var/log/app/YYYYMMDDHH/*.log"
//!     time_offset: "0h"
//! ```

use std::collections::HashMap;

use chrono::FixedOffset;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{
    BadTimeZoneSnafu, ConfigError, InvalidTaskSnafu, MissingKeySnafu, OffsetSnafu, ProfileError,
    ReadFileSnafu, RetryWindowSnafu, YamlParseSnafu,
};
use crate::pattern::{CycleUnit, DateCalc, calc_offset};
use snafu::ResultExt;

fn default_time_zone() -> String {
    "+08:00".to_string()
}

fn default_file_max_num() -> usize {
    4096
}

/// Profile of one collection task.
///
/// An explicit schema-typed record: the keys the core consumes are fields,
/// user-defined extensions ride in the `properties` bag and are forwarded
/// into instance profiles untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProfile {
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub stream_id: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub sink: String,
    #[serde(default)]
    pub channel: String,
    /// Temporal granularity of the task's data partitioning.
    pub cycle_unit: CycleUnit,
    /// Comma-separated origin patterns.
    #[serde(default)]
    pub file_dir_filter_patterns: String,
    /// Signed offset applied to wall clock before scans, e.g. `-1h`.
    #[serde(default)]
    pub time_offset: String,
    /// Per-scan file cap.
    #[serde(default = "default_file_max_num")]
    pub file_max_num: usize,
    /// Bounded historical backfill instead of live tailing.
    #[serde(default)]
    pub retry: bool,
    /// Backfill window start, epoch ms. Required when `retry`.
    #[serde(default)]
    pub start_time: i64,
    /// Backfill window end, epoch ms. Required when `retry`.
    #[serde(default)]
    pub end_time: i64,
    /// User-defined extension properties, passed through to instances.
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl TaskProfile {
    /// Check the presence rules the core loop relies on. A task whose
    /// profile fails here never leaves the idle state.
    pub fn validate(&self) -> Result<(), ProfileError> {
        let required: [(&'static str, &str); 8] = [
            ("task_id", &self.task_id),
            ("group_id", &self.group_id),
            ("stream_id", &self.stream_id),
            ("source", &self.source),
            ("sink", &self.sink),
            ("channel", &self.channel),
            ("file_dir_filter_patterns", &self.file_dir_filter_patterns),
            ("time_offset", &self.time_offset),
        ];
        for (key, value) in required {
            if value.is_empty() {
                return MissingKeySnafu { key }.fail();
            }
        }
        calc_offset(&self.time_offset).context(OffsetSnafu)?;
        if self.retry && (self.start_time == 0 || self.end_time == 0) {
            return RetryWindowSnafu {
                start: self.start_time,
                end: self.end_time,
            }
            .fail();
        }
        Ok(())
    }

    /// The task's origin patterns, split out of the comma-separated field.
    pub fn origin_patterns(&self) -> Vec<String> {
        self.file_dir_filter_patterns
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// The task offset in milliseconds; profiles are validated before use,
    /// so an unparseable value here degrades to zero.
    pub fn time_offset_ms(&self) -> i64 {
        calc_offset(&self.time_offset).unwrap_or(0)
    }
}

/// Root agent configuration: a set of named tasks plus the data-time zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Fixed offset the data-time calendar runs in.
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
    /// Named task profiles; insertion order is preserved.
    #[serde(default)]
    pub tasks: IndexMap<String, TaskProfile>,
}

impl Config {
    /// Load and validate a YAML config file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).context(ReadFileSnafu)?;
        Self::parse(&contents)
    }

    /// Parse and validate a YAML string.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(contents).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the zone and every task profile.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.date_calc()?;
        for (task, profile) in &self.tasks {
            profile
                .validate()
                .context(InvalidTaskSnafu { task: task.as_str() })?;
        }
        Ok(())
    }

    /// The calendar for this configuration's zone.
    pub fn date_calc(&self) -> Result<DateCalc, ConfigError> {
        let tz: FixedOffset = self.time_zone.parse().map_err(|_| {
            BadTimeZoneSnafu {
                value: self.time_zone.clone(),
            }
            .build()
        })?;
        Ok(DateCalc::new(tz))
    }
}
