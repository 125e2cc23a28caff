//! Error types for the snowdrift collection core.
//!
//! Failures are grouped by domain. None of them cross a component boundary
//! unhandled: the orchestrator turns every error into a log line plus
//! deferred retry state (see `task.rs`).

use snafu::prelude::*;

// ============ Config Errors ============

/// Errors raised while loading the agent configuration.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Failed to read a configuration file.
    #[snafu(display("Failed to read configuration file: {source}"))]
    ReadFile { source: std::io::Error },

    /// Failed to parse YAML.
    #[snafu(display("Failed to parse YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// The configured time zone offset is not `+HH:MM`-shaped.
    #[snafu(display("Invalid time zone offset: {value}"))]
    BadTimeZone { value: String },

    /// A task profile failed validation.
    #[snafu(display("Task '{task}' invalid: {source}"))]
    InvalidTask { task: String, source: ProfileError },
}

// ============ Profile Errors ============

/// Errors raised while validating a task profile before `init`.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProfileError {
    /// A required profile key is missing or empty.
    #[snafu(display("Task profile is missing required key: {key}"))]
    MissingKey { key: &'static str },

    /// A retry task needs both window bounds.
    #[snafu(display("Retry task window invalid: start {start} end {end}"))]
    RetryWindow { start: i64, end: i64 },

    /// The task time offset expression failed to parse.
    #[snafu(display("Task time offset invalid: {source}"))]
    Offset { source: PatternError },
}

// ============ Pattern Errors ============

/// Errors raised while parsing a path pattern or offset expression.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PatternError {
    /// The pattern has no literal leading directory to anchor scanning on.
    #[snafu(display("Pattern has no static root: {pattern}"))]
    NoStaticRoot { pattern: String },

    /// Two-digit year tokens are ambiguous and rejected outright.
    #[snafu(display("Two-digit year token in pattern: {pattern}"))]
    TwoDigitYear { pattern: String },

    /// The converted pattern did not compile as a regex.
    #[snafu(display("Pattern does not compile to a regex: {source}"))]
    BadRegex { source: regex::Error },

    /// A time offset expression like `-1h` failed to parse.
    #[snafu(display("Malformed time offset expression: {expression}"))]
    BadOffset { expression: String },
}

// ============ Watch Errors ============

/// Errors raised while creating or registering a filesystem subscription.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WatchError {
    /// The static root to watch does not exist yet.
    #[snafu(display("Watch root not found: {}", path))]
    RootNotFound { path: String },

    /// The OS subscription could not be created or a directory could not be
    /// registered.
    #[snafu(display("Watch subscription failed for {path}: {source}"))]
    Subscribe {
        path: String,
        source: notify::Error,
    },
}

impl WatchError {
    /// True when the underlying cause is fd exhaustion (EMFILE/ENFILE).
    ///
    /// These are logged without the source chain: the message is the whole
    /// story and the stack only drowns the log.
    pub fn is_fd_exhausted(&self) -> bool {
        match self {
            WatchError::Subscribe { source, .. } => match &source.kind {
                notify::ErrorKind::Io(io) => matches!(io.raw_os_error(), Some(23) | Some(24)),
                notify::ErrorKind::MaxFilesWatch => true,
                _ => false,
            },
            WatchError::RootNotFound { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_error_display() {
        let err = ProfileError::MissingKey { key: "task_id" };
        assert!(err.to_string().contains("task_id"));

        let err = ProfileError::RetryWindow { start: 0, end: 5 };
        assert!(err.to_string().contains("start 0"));
    }

    #[test]
    fn test_pattern_error_display() {
        let err = PatternError::NoStaticRoot {
            pattern: "*.log".to_string(),
        };
        assert!(err.to_string().contains("*.log"));
    }

    #[test]
    fn test_fd_exhausted_detection() {
        let emfile = std::io::Error::from_raw_os_error(24);
        let err = WatchError::Subscribe {
            path: "/var/log".to_string(),
            source: notify::Error::io(emfile),
        };
        assert!(err.is_fd_exhausted());

        let not_found = std::io::Error::from_raw_os_error(2);
        let err = WatchError::Subscribe {
            path: "/var/log".to_string(),
            source: notify::Error::io(not_found),
        };
        assert!(!err.is_fd_exhausted());
    }
}
