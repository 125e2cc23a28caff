//! Cycle units and calendar math for data times.
//!
//! A cycle unit is the granularity at which a task partitions data. It fixes
//! both the step of the scan window and the shape of the data-time string
//! (`h` -> `yyyyMMddHH`, and so on). All arithmetic happens in the task's
//! configured fixed offset, never in the process-local zone.

use chrono::{DateTime, Datelike, FixedOffset, Months, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BadOffsetSnafu, PatternError};

/// Two days in milliseconds, the default validity horizon for data times.
pub const DAY_TIMEOUT_INTERVAL_MS: i64 = 2 * 24 * 3600 * 1000;

/// Granularity of a task's data partitioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CycleUnit {
    #[serde(rename = "Y")]
    Year,
    #[serde(rename = "M")]
    Month,
    #[serde(rename = "D")]
    Day,
    #[serde(rename = "h")]
    Hour,
    #[serde(rename = "m")]
    Minute,
    #[serde(rename = "10m")]
    TenMinute,
}

impl CycleUnit {
    /// Digit count of a data time rendered at this granularity.
    pub fn format_len(self) -> usize {
        match self {
            CycleUnit::Year => 4,
            CycleUnit::Month => 6,
            CycleUnit::Day => 8,
            CycleUnit::Hour => 10,
            CycleUnit::Minute | CycleUnit::TenMinute => 12,
        }
    }

    /// Nominal cycle length. Months and years are additive approximations
    /// (30/365 days); window math that must be exact goes through
    /// [`DateCalc`] instead.
    pub fn duration_ms(self) -> i64 {
        match self {
            CycleUnit::Year => 365 * 24 * 3600 * 1000,
            CycleUnit::Month => 30 * 24 * 3600 * 1000,
            CycleUnit::Day => 24 * 3600 * 1000,
            CycleUnit::Hour => 3600 * 1000,
            CycleUnit::Minute => 60 * 1000,
            CycleUnit::TenMinute => 10 * 60 * 1000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CycleUnit::Year => "Y",
            CycleUnit::Month => "M",
            CycleUnit::Day => "D",
            CycleUnit::Hour => "h",
            CycleUnit::Minute => "m",
            CycleUnit::TenMinute => "10m",
        }
    }
}

/// Parse a signed offset expression like `-1h`, `+2D` or `0h` into
/// milliseconds.
///
/// Units: `s`, `m` (minute), `h`/`H`, `d`/`D`, `M` (30 days), `Y`/`y`
/// (365 days). Month/year offsets are additive approximations.
pub fn calc_offset(expression: &str) -> Result<i64, PatternError> {
    if expression.is_empty() {
        return Ok(0);
    }
    let (sign, rest) = match expression.as_bytes()[0] {
        b'-' => (-1i64, &expression[1..]),
        b'+' => (1, &expression[1..]),
        _ => (1, expression),
    };
    let Some(unit) = rest.chars().last().filter(char::is_ascii) else {
        return BadOffsetSnafu { expression }.fail();
    };
    let unit_ms: i64 = match unit {
        's' => 1000,
        'm' => 60 * 1000,
        'h' | 'H' => 3600 * 1000,
        'd' | 'D' => 24 * 3600 * 1000,
        'M' => 30 * 24 * 3600 * 1000,
        'Y' | 'y' => 365 * 24 * 3600 * 1000,
        _ => return BadOffsetSnafu { expression }.fail(),
    };
    let count: i64 = rest[..rest.len() - 1]
        .parse()
        .ok()
        .filter(|n| *n >= 0)
        .ok_or_else(|| {
            BadOffsetSnafu {
                expression: expression.to_string(),
            }
            .build()
        })?;
    Ok(sign * count * unit_ms)
}

/// Calendar arithmetic in a task's fixed time zone.
#[derive(Debug, Clone, Copy)]
pub struct DateCalc {
    tz: FixedOffset,
}

impl DateCalc {
    pub fn new(tz: FixedOffset) -> Self {
        Self { tz }
    }

    /// The domain-conventional default zone, UTC+8.
    pub fn default_zone() -> Self {
        Self {
            tz: FixedOffset::east_opt(8 * 3600).expect("fixed offset in range"),
        }
    }

    pub fn time_zone(&self) -> FixedOffset {
        self.tz
    }

    fn datetime(&self, epoch_ms: i64) -> Option<DateTime<FixedOffset>> {
        DateTime::<Utc>::from_timestamp_millis(epoch_ms).map(|dt| dt.with_timezone(&self.tz))
    }

    /// Quantise an instant down to the start of its cycle.
    pub fn floor_ms(&self, epoch_ms: i64, unit: CycleUnit) -> i64 {
        let Some(dt) = self.datetime(epoch_ms) else {
            return epoch_ms;
        };
        let (y, mo, d, h, mi) = (dt.year(), dt.month(), dt.day(), dt.hour(), dt.minute());
        let floored = match unit {
            CycleUnit::Year => self.tz.with_ymd_and_hms(y, 1, 1, 0, 0, 0),
            CycleUnit::Month => self.tz.with_ymd_and_hms(y, mo, 1, 0, 0, 0),
            CycleUnit::Day => self.tz.with_ymd_and_hms(y, mo, d, 0, 0, 0),
            CycleUnit::Hour => self.tz.with_ymd_and_hms(y, mo, d, h, 0, 0),
            CycleUnit::Minute => self.tz.with_ymd_and_hms(y, mo, d, h, mi, 0),
            CycleUnit::TenMinute => self.tz.with_ymd_and_hms(y, mo, d, h, mi - mi % 10, 0),
        };
        floored
            .single()
            .map(|dt| dt.timestamp_millis())
            .unwrap_or(epoch_ms)
    }

    /// Render an instant as the data-time string of the given cycle unit,
    /// quantised to the cycle start.
    pub fn format_data_time(&self, epoch_ms: i64, unit: CycleUnit) -> String {
        let floored = self.floor_ms(epoch_ms, unit);
        let Some(dt) = self.datetime(floored) else {
            return String::new();
        };
        let fmt = match unit {
            CycleUnit::Year => "%Y",
            CycleUnit::Month => "%Y%m",
            CycleUnit::Day => "%Y%m%d",
            CycleUnit::Hour => "%Y%m%d%H",
            CycleUnit::Minute | CycleUnit::TenMinute => "%Y%m%d%H%M",
        };
        dt.format(fmt).to_string()
    }

    /// Render an instant in the `yyyyMMddHHmm` shape used for wall-clock
    /// comparisons and logs.
    pub fn format_wall_time(&self, epoch_ms: i64) -> String {
        self.datetime(epoch_ms)
            .map(|dt| dt.format("%Y%m%d%H%M").to_string())
            .unwrap_or_default()
    }

    /// Parse a digits-only data time (`2024060112` and friends) into the
    /// epoch millis of its cycle start. Returns `None` when the digits do
    /// not describe a calendar instant.
    pub fn parse_data_time(&self, digits: &str) -> Option<i64> {
        let len = digits.len();
        if len < 4 || len > 12 || len % 2 != 0 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let field = |from: usize, to: usize, default: u32| -> u32 {
            if len >= to {
                digits[from..to].parse().unwrap_or(default)
            } else {
                default
            }
        };
        let year: i32 = digits[0..4].parse().ok()?;
        let month = field(4, 6, 1);
        let day = field(6, 8, 1);
        let hour = field(8, 10, 0);
        let minute = field(10, 12, 0);
        self.tz
            .with_ymd_and_hms(year, month, day, hour, minute, 0)
            .single()
            .map(|dt| dt.timestamp_millis())
    }

    /// Step one cycle forward, calendar-aware for months and years.
    fn advance(&self, epoch_ms: i64, unit: CycleUnit) -> i64 {
        match unit {
            CycleUnit::Year | CycleUnit::Month => {
                let months = if unit == CycleUnit::Year { 12 } else { 1 };
                self.datetime(epoch_ms)
                    .and_then(|dt| dt.checked_add_months(Months::new(months)))
                    .map(|dt| dt.timestamp_millis())
                    .unwrap_or(epoch_ms + unit.duration_ms())
            }
            _ => epoch_ms + unit.duration_ms(),
        }
    }

    /// Go back `n` cycles, calendar-aware for months and years.
    pub fn minus_cycles(&self, epoch_ms: i64, n: u32, unit: CycleUnit) -> i64 {
        match unit {
            CycleUnit::Year | CycleUnit::Month => {
                let months = if unit == CycleUnit::Year { 12 * n } else { n };
                self.datetime(epoch_ms)
                    .and_then(|dt| dt.checked_sub_months(Months::new(months)))
                    .map(|dt| dt.timestamp_millis())
                    .unwrap_or(epoch_ms - i64::from(n) * unit.duration_ms())
            }
            _ => epoch_ms - i64::from(n) * unit.duration_ms(),
        }
    }

    /// Every cycle boundary in `[start, end]`, inclusive, ascending.
    pub fn date_region(&self, start_ms: i64, end_ms: i64, unit: CycleUnit) -> Vec<i64> {
        let mut t = self.floor_ms(start_ms, unit);
        let end = self.floor_ms(end_ms, unit);
        let mut region = Vec::new();
        while t <= end {
            region.push(t);
            let next = self.advance(t, unit);
            if next <= t {
                break;
            }
            t = next;
        }
        region
    }

    /// The wall-clock instant from which files carrying `data_time` become
    /// due: cycle start plus the task offset. `None` when the data time
    /// cannot be parsed (such files are due immediately).
    pub fn should_start_time_ms(&self, data_time: &str, offset_ms: i64) -> Option<i64> {
        self.parse_data_time(data_time).map(|t| t + offset_ms)
    }

    /// Bounds check against an absolute window around now.
    pub fn is_valid_creation_time(&self, data_time: &str, now_ms: i64, window_ms: i64) -> bool {
        match self.parse_data_time(data_time) {
            Some(t) => (t - now_ms).abs() <= window_ms,
            None => false,
        }
    }

    /// Bounds check against the current cycle under the task offset. The
    /// window is the larger of one cycle and the two-day horizon.
    pub fn is_valid_creation_time_for_cycle(
        &self,
        data_time: &str,
        now_ms: i64,
        unit: CycleUnit,
        offset_ms: i64,
    ) -> bool {
        let window = unit.duration_ms().max(DAY_TIMEOUT_INTERVAL_MS);
        self.is_valid_creation_time(data_time, now_ms + offset_ms, window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calc() -> DateCalc {
        DateCalc::default_zone()
    }

    fn epoch_of(s: &str) -> i64 {
        calc().parse_data_time(s).unwrap()
    }

    #[test]
    fn test_cycle_format_len() {
        assert_eq!(CycleUnit::Year.format_len(), 4);
        assert_eq!(CycleUnit::Hour.format_len(), 10);
        assert_eq!(CycleUnit::TenMinute.format_len(), 12);
    }

    #[test]
    fn test_calc_offset() {
        assert_eq!(calc_offset("").unwrap(), 0);
        assert_eq!(calc_offset("0h").unwrap(), 0);
        assert_eq!(calc_offset("-1h").unwrap(), -3600 * 1000);
        assert_eq!(calc_offset("+2D").unwrap(), 2 * 24 * 3600 * 1000);
        assert_eq!(calc_offset("30m").unwrap(), 30 * 60 * 1000);
        assert_eq!(calc_offset("-1d").unwrap(), -24 * 3600 * 1000);
    }

    #[test]
    fn test_calc_offset_rejects_garbage() {
        assert!(calc_offset("h").is_err());
        assert!(calc_offset("-x").is_err());
        assert!(calc_offset("12").is_err());
        assert!(calc_offset("1w").is_err());
    }

    #[test]
    fn test_format_data_time_quantises() {
        // 2024-06-01 12:34 +08:00
        let t = epoch_of("202406011234");
        assert_eq!(calc().format_data_time(t, CycleUnit::Hour), "2024060112");
        assert_eq!(calc().format_data_time(t, CycleUnit::Day), "20240601");
        assert_eq!(calc().format_data_time(t, CycleUnit::Month), "202406");
        assert_eq!(calc().format_data_time(t, CycleUnit::Year), "2024");
        assert_eq!(
            calc().format_data_time(t, CycleUnit::TenMinute),
            "202406011230"
        );
        assert_eq!(
            calc().format_data_time(t, CycleUnit::Minute),
            "202406011234"
        );
    }

    #[test]
    fn test_parse_round_trip() {
        let t = epoch_of("2024060112");
        assert_eq!(calc().format_data_time(t, CycleUnit::Hour), "2024060112");
        assert_eq!(calc().parse_data_time("2024060112"), Some(t));
    }

    #[test]
    fn test_parse_rejects_non_calendar() {
        assert_eq!(calc().parse_data_time(""), None);
        assert_eq!(calc().parse_data_time("20"), None);
        assert_eq!(calc().parse_data_time("20241301"), None); // month 13
        assert_eq!(calc().parse_data_time("20240230"), None); // Feb 30
        assert_eq!(calc().parse_data_time("2024060112345"), None); // too long
        assert_eq!(calc().parse_data_time("20240601x2"), None);
    }

    #[test]
    fn test_date_region_hourly() {
        let start = epoch_of("2024010100");
        let end = epoch_of("2024010102");
        let region = calc().date_region(start, end, CycleUnit::Hour);
        assert_eq!(region.len(), 3);
        assert_eq!(calc().format_data_time(region[0], CycleUnit::Hour), "2024010100");
        assert_eq!(calc().format_data_time(region[2], CycleUnit::Hour), "2024010102");
    }

    #[test]
    fn test_date_region_inclusive_of_partial_end() {
        // End falls mid-cycle; its cycle is still included.
        let start = epoch_of("202401010030");
        let end = epoch_of("202401010230");
        let region = calc().date_region(start, end, CycleUnit::Hour);
        assert_eq!(region.len(), 3);
    }

    #[test]
    fn test_date_region_monthly_is_calendar_aware() {
        let start = epoch_of("202401");
        let end = epoch_of("202404");
        let region = calc().date_region(start, end, CycleUnit::Month);
        let rendered: Vec<String> = region
            .iter()
            .map(|t| calc().format_data_time(*t, CycleUnit::Month))
            .collect();
        assert_eq!(rendered, vec!["202401", "202402", "202403", "202404"]);
    }

    #[test]
    fn test_date_region_empty_when_reversed() {
        let start = epoch_of("2024010105");
        let end = epoch_of("2024010100");
        assert!(calc().date_region(start, end, CycleUnit::Hour).is_empty());
    }

    #[test]
    fn test_minus_cycles() {
        let t = epoch_of("2024030112");
        let back = calc().minus_cycles(t, 2, CycleUnit::Hour);
        assert_eq!(calc().format_data_time(back, CycleUnit::Hour), "2024030110");

        let back = calc().minus_cycles(t, 2, CycleUnit::Month);
        assert_eq!(calc().format_data_time(back, CycleUnit::Month), "202401");
    }

    #[test]
    fn test_should_start_time() {
        let t = epoch_of("2024060112");
        assert_eq!(calc().should_start_time_ms("2024060112", 0), Some(t));
        assert_eq!(
            calc().should_start_time_ms("2024060112", 3600 * 1000),
            Some(t + 3600 * 1000)
        );
        assert_eq!(calc().should_start_time_ms("", 0), None);
    }

    #[test]
    fn test_is_valid_creation_time() {
        let now = epoch_of("2024060112");
        assert!(calc().is_valid_creation_time("20240601", now, DAY_TIMEOUT_INTERVAL_MS));
        assert!(!calc().is_valid_creation_time("20190101", now, DAY_TIMEOUT_INTERVAL_MS));
        assert!(!calc().is_valid_creation_time("", now, DAY_TIMEOUT_INTERVAL_MS));
    }

    #[test]
    fn test_is_valid_creation_time_for_cycle() {
        let now = epoch_of("2024060112");
        assert!(calc().is_valid_creation_time_for_cycle("2024060112", now, CycleUnit::Hour, 0));
        assert!(!calc().is_valid_creation_time_for_cycle("2019010100", now, CycleUnit::Hour, 0));
    }

    #[test]
    fn test_wall_time_format() {
        let t = epoch_of("202406011234");
        assert_eq!(calc().format_wall_time(t), "202406011234");
    }
}
