//! Windowed enumeration of existing files for a date-templated pattern.
//!
//! The scanner materialises a pattern at every cycle boundary of a time
//! window, walks each materialisation's static root to a bounded depth and
//! yields the files that match, oldest mtime first. It is the recovery
//! path: everything the watchers lose (overflow, missed registrations,
//! restarts) is picked up by a later scan.

use std::path::Path;

use tracing::{debug, warn};

use crate::config::TaskProfile;
use crate::pattern::{DateCalc, DateExpression, PathLayers, full_match};

/// Files deeper than this below a static root are never opened.
pub const SCAN_MAX_DEPTH: usize = 3;

/// A discovered file and the data time of the cycle it was found under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicFileInfo {
    pub file_path: String,
    pub data_time: String,
}

/// Enumerate files matching `origin_pattern` between two instants.
///
/// Outside retry mode both bounds are shifted back by the task offset
/// first. Results are capped at `file_max_num` per cycle boundary and
/// sorted mtime-ascending within each boundary. A missing static root is
/// an empty result, not an error; unreadable subtrees are logged and
/// skipped.
pub fn scan_task_between_times(
    profile: &TaskProfile,
    origin_pattern: &str,
    calc: &DateCalc,
    fail_time_ms: i64,
    recover_time_ms: i64,
    is_retry: bool,
) -> Vec<BasicFileInfo> {
    let (mut start, mut end) = (fail_time_ms, recover_time_ms);
    if !is_retry {
        let offset = profile.time_offset_ms();
        start -= offset;
        end -= offset;
    }

    let expr = match DateExpression::parse(origin_pattern) {
        Ok(expr) => expr,
        Err(e) => {
            warn!(task_id = %profile.task_id, pattern = %origin_pattern, error = %e,
                "Skipping unparseable pattern in scan");
            return Vec::new();
        }
    };

    debug!(
        task_id = %profile.task_id,
        start = %calc.format_data_time(start, profile.cycle_unit),
        end = %calc.format_data_time(end, profile.cycle_unit),
        "Scanning window"
    );

    let mut infos = Vec::new();
    for t in calc.date_region(start, end, profile.cycle_unit) {
        let rendered = expr.render(t, calc);
        let layers = match PathLayers::split(&rendered) {
            Ok(layers) => layers,
            Err(e) => {
                warn!(task_id = %profile.task_id, pattern = %rendered, error = %e,
                    "Skipping pattern without static root in scan");
                continue;
            }
        };

        let mut found: Vec<(String, i64)> = Vec::new();
        collect_matching(&layers.static_root, 0, &layers, profile.file_max_num, &mut found);
        // Stable sort: ties keep directory-walk order.
        found.sort_by_key(|(_, mtime)| *mtime);

        let data_time = calc.format_data_time(t, profile.cycle_unit);
        infos.extend(found.into_iter().map(|(file_path, _)| BasicFileInfo {
            file_path,
            data_time: data_time.clone(),
        }));
    }
    infos
}

/// Depth-bounded walk. Returns `false` once the cap is hit so callers can
/// stop descending.
fn collect_matching(
    dir: &Path,
    depth: usize,
    layers: &PathLayers,
    max_file_num: usize,
    out: &mut Vec<(String, i64)>,
) -> bool {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            if depth == 0 {
                // Missing static root: routine before the first cycle dir
                // appears.
                debug!(path = %dir.display(), error = %e, "Scan root unavailable");
            } else {
                warn!(path = %dir.display(), error = %e, "Skipping unreadable subtree");
            }
            return true;
        }
    };

    for entry in entries {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        let Some(path_str) = path.to_str() else {
            continue;
        };
        if path.is_dir() {
            if depth + 1 < SCAN_MAX_DEPTH && layers.dir_regex.is_match(path_str) {
                if !collect_matching(&path, depth + 1, layers, max_file_num, out) {
                    return false;
                }
            }
        } else if full_match(&layers.file_regex, path_str) {
            let mtime = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            out.push((path_str.to_string(), mtime));
            if out.len() >= max_file_num {
                return false;
            }
        }
    }
    true
}
