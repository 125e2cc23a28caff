//! Date-templated path patterns.
//!
//! An origin pattern mixes literal path segments, glob wildcards and date
//! tokens (`YYYY`, `MM`, `DD`, `HH`/`hh`, `mm`). This module parses the
//! tokens once per pattern and derives everything the scanner and watcher
//! need from the parse: concrete rendering for a given instant, the match
//! regex over candidate paths, and data-time extraction from a path that
//! matched.
//!
//! Parsing policy: unknown tokens pass through verbatim, overlapping tokens
//! are unsupported, and a bare two-digit year is rejected.

mod cycle;
mod layers;

pub use cycle::{CycleUnit, DAY_TIMEOUT_INTERVAL_MS, DateCalc, calc_offset};
pub use layers::PathLayers;

use regex::Regex;

use crate::error::{BadRegexSnafu, PatternError, TwoDigitYearSnafu};
use snafu::ResultExt;

/// One date token inside a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DateToken {
    Year,
    Month,
    Day,
    Hour,
    Minute,
}

impl DateToken {
    /// Digit width of the rendered token.
    fn width(self) -> usize {
        match self {
            DateToken::Year => 4,
            _ => 2,
        }
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Token(DateToken),
}

/// A parsed origin pattern.
///
/// Holds the token segmentation, the compiled match regex (anchored at the
/// start, so a prefix test is `is_match` and a full test additionally checks
/// the match length), and the extraction regex capturing the longest run of
/// date tokens.
#[derive(Debug, Clone)]
pub struct DateExpression {
    pattern: String,
    segments: Vec<Segment>,
    /// Segment index range (inclusive start, exclusive end) of the longest
    /// contiguous date-token run, separators included.
    longest_run: Option<(usize, usize)>,
    match_regex: Regex,
    extract_regex: Option<Regex>,
}

/// Convert a literal pattern chunk into regex text: `*` widens to `.*`,
/// `.` is taken literally, everything else (including user-supplied regex
/// metacharacters) passes through.
fn literal_to_regex(literal: &str, out: &mut String) {
    for ch in literal.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '.' => out.push_str("\\."),
            _ => out.push(ch),
        }
    }
}

/// True when a literal can sit inside a date-token run without breaking it,
/// e.g. the `-` and `_` of `YYYY-MM-DD_HH`.
fn is_run_separator(literal: &str) -> bool {
    !literal.is_empty() && literal.chars().all(|c| matches!(c, '-' | '_' | '.' | ':'))
}

impl DateExpression {
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        let segments = tokenize(pattern)?;
        let longest_run = find_longest_run(&segments);

        let mut match_src = String::from("^");
        for seg in &segments {
            match seg {
                Segment::Literal(lit) => literal_to_regex(lit, &mut match_src),
                Segment::Token(tok) => match_src.push_str(&format!("\\d{{{}}}", tok.width())),
            }
        }
        let match_regex = Regex::new(&match_src).context(BadRegexSnafu)?;

        let extract_regex = match longest_run {
            Some((start, end)) => {
                let mut src = String::from("^");
                for (i, seg) in segments.iter().enumerate() {
                    if i == start {
                        // Named so user-supplied groups cannot shift it.
                        src.push_str("(?P<dt>");
                    }
                    match seg {
                        Segment::Literal(lit) => literal_to_regex(lit, &mut src),
                        Segment::Token(tok) => src.push_str(&format!("\\d{{{}}}", tok.width())),
                    }
                    if i + 1 == end {
                        src.push(')');
                    }
                }
                Some(Regex::new(&src).context(BadRegexSnafu)?)
            }
            None => None,
        };

        Ok(Self {
            pattern: pattern.to_string(),
            segments,
            longest_run,
            match_regex,
            extract_regex,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether the pattern carries any date token at all.
    pub fn has_date(&self) -> bool {
        self.longest_run.is_some()
    }

    /// Digit width of the longest date-token run; 0 without tokens.
    pub fn longest_width(&self) -> usize {
        let Some((start, end)) = self.longest_run else {
            return 0;
        };
        self.segments[start..end]
            .iter()
            .map(|seg| match seg {
                Segment::Token(tok) => tok.width(),
                Segment::Literal(_) => 0,
            })
            .sum()
    }

    /// Regex over candidate paths, `^`-anchored. A prefix test is
    /// `is_match`; use [`full_match`] for whole-path acceptance.
    pub fn match_regex(&self) -> &Regex {
        &self.match_regex
    }

    /// Substitute every date token with its value at `epoch_ms`.
    pub fn render(&self, epoch_ms: i64, calc: &DateCalc) -> String {
        let wall = calc.format_wall_time(epoch_ms);
        if wall.len() != 12 {
            return self.pattern.clone();
        }
        let mut out = String::with_capacity(self.pattern.len());
        for seg in &self.segments {
            match seg {
                Segment::Literal(lit) => out.push_str(lit),
                Segment::Token(tok) => {
                    let range = match tok {
                        DateToken::Year => 0..4,
                        DateToken::Month => 4..6,
                        DateToken::Day => 6..8,
                        DateToken::Hour => 8..10,
                        DateToken::Minute => 10..12,
                    };
                    out.push_str(&wall[range]);
                }
            }
        }
        out
    }

    /// Read the longest date-token region back out of a concrete path and
    /// normalise it to digits only (`2015-09-16_00` -> `2015091600`).
    /// Empty when the pattern has no date token or the path does not match.
    pub fn extract_data_time(&self, file_path: &str) -> String {
        let Some(re) = &self.extract_regex else {
            return String::new();
        };
        match re.captures(file_path) {
            Some(caps) => caps
                .name("dt")
                .map(|m| m.as_str().chars().filter(char::is_ascii_digit).collect())
                .unwrap_or_default(),
            None => String::new(),
        }
    }
}

/// Whole-string acceptance for a `^`-anchored pattern regex.
pub fn full_match(re: &Regex, candidate: &str) -> bool {
    re.find(candidate)
        .is_some_and(|m| m.end() == candidate.len())
}

fn tokenize(pattern: &str) -> Result<Vec<Segment>, PatternError> {
    let bytes = pattern.as_bytes();
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    let mut push_token = |literal: &mut String, segments: &mut Vec<Segment>, tok: DateToken| {
        if !literal.is_empty() {
            segments.push(Segment::Literal(std::mem::take(literal)));
        }
        segments.push(Segment::Token(tok));
    };

    while i < bytes.len() {
        let rest = &pattern[i..];
        if rest.starts_with("YYYY") {
            push_token(&mut literal, &mut segments, DateToken::Year);
            i += 4;
        } else if rest.starts_with("YY") {
            return TwoDigitYearSnafu { pattern }.fail();
        } else if rest.starts_with("MM") {
            push_token(&mut literal, &mut segments, DateToken::Month);
            i += 2;
        } else if rest.starts_with("DD") {
            push_token(&mut literal, &mut segments, DateToken::Day);
            i += 2;
        } else if rest.starts_with("HH") || rest.starts_with("hh") {
            push_token(&mut literal, &mut segments, DateToken::Hour);
            i += 2;
        } else if rest.starts_with("mm") {
            push_token(&mut literal, &mut segments, DateToken::Minute);
            i += 2;
        } else {
            let ch = rest.chars().next().expect("non-empty rest");
            literal.push(ch);
            i += ch.len_utf8();
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

/// Longest contiguous token run, where short separator literals (`-_.:`)
/// joining two tokens stay inside the run. Ties go to the earliest run.
fn find_longest_run(segments: &[Segment]) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize, usize)> = None; // (start, end, width)
    let mut i = 0;
    while i < segments.len() {
        if !matches!(segments[i], Segment::Token(_)) {
            i += 1;
            continue;
        }
        let start = i;
        let mut end = i + 1;
        let mut width = match segments[i] {
            Segment::Token(tok) => tok.width(),
            Segment::Literal(_) => 0,
        };
        loop {
            match (segments.get(end), segments.get(end + 1)) {
                (Some(Segment::Token(tok)), _) => {
                    width += tok.width();
                    end += 1;
                }
                (Some(Segment::Literal(lit)), Some(Segment::Token(tok)))
                    if is_run_separator(lit) =>
                {
                    width += tok.width();
                    end += 2;
                }
                _ => break,
            }
        }
        if best.is_none_or(|(_, _, w)| width > w) {
            best = Some((start, end, width));
        }
        i = end;
    }
    best.map(|(start, end, _)| (start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calc() -> DateCalc {
        DateCalc::default_zone()
    }

    fn hour(s: &str) -> i64 {
        calc().parse_data_time(s).unwrap()
    }

    #[test]
    fn test_render_compact_tokens() {
        let expr = DateExpression::parse("/var/log/app/YYYYMMDDHH/*.log").unwrap();
        assert_eq!(
            expr.render(hour("2024060112"), &calc()),
            "/var/log/app/2024060112/*.log"
        );
    }

    #[test]
    fn test_render_separated_tokens() {
        let expr = DateExpression::parse("/data/YYYY-MM-DD_HH/out.log").unwrap();
        assert_eq!(
            expr.render(hour("2024010205"), &calc()),
            "/data/2024-01-02_05/out.log"
        );
    }

    #[test]
    fn test_unknown_tokens_pass_through() {
        let expr = DateExpression::parse("/d/XQZ/file-M.log").unwrap();
        assert!(!expr.has_date());
        assert_eq!(expr.render(hour("2024010100"), &calc()), "/d/XQZ/file-M.log");
    }

    #[test]
    fn test_two_digit_year_rejected() {
        assert!(DateExpression::parse("/d/YYMMDD/a.log").is_err());
    }

    #[test]
    fn test_match_regex_accepts_rendered_path() {
        let expr = DateExpression::parse("/var/log/app/YYYYMMDDHH/*.log").unwrap();
        assert!(full_match(
            expr.match_regex(),
            "/var/log/app/2024060112/a.log"
        ));
        assert!(!full_match(
            expr.match_regex(),
            "/var/log/app/2024060112/a.txt"
        ));
        assert!(!full_match(expr.match_regex(), "/var/log/app/notadate/a.log"));
    }

    #[test]
    fn test_match_regex_prefix_semantics() {
        let expr = DateExpression::parse("/d/YYYYMMDDHH").unwrap();
        // lookingAt-style acceptance of a longer path
        assert!(expr.match_regex().is_match("/d/2024060112/deeper/a.log"));
        assert!(!full_match(expr.match_regex(), "/d/2024060112/deeper/a.log"));
    }

    #[test]
    fn test_extract_data_time() {
        let expr = DateExpression::parse("/var/log/app/YYYYMMDDHH/*.log").unwrap();
        assert_eq!(
            expr.extract_data_time("/var/log/app/2024060112/a.log"),
            "2024060112"
        );
    }

    #[test]
    fn test_extract_strips_separators() {
        let expr = DateExpression::parse("/data/YYYY-MM-DD_HH/out.log").unwrap();
        assert_eq!(
            expr.extract_data_time("/data/2024-01-02_05/out.log"),
            "2024010205"
        );
    }

    #[test]
    fn test_extract_without_date_is_empty() {
        let expr = DateExpression::parse("/d/*.log").unwrap();
        assert_eq!(expr.extract_data_time("/d/a.log"), "");
    }

    #[test]
    fn test_extract_with_wildcard_before_date() {
        let expr = DateExpression::parse("/logs/*-YYYYMMDD.log").unwrap();
        assert_eq!(expr.extract_data_time("/logs/app-20240601.log"), "20240601");
    }

    #[test]
    fn test_longest_run_prefers_widest() {
        // The run MMDD (4) is shorter than YYYYMMDD (8).
        let expr = DateExpression::parse("/a/MMDD/b/YYYYMMDD/c.log").unwrap();
        assert_eq!(expr.longest_width(), 8);
        assert_eq!(
            expr.extract_data_time("/a/0601/b/20240601/c.log"),
            "20240601"
        );
    }

    #[test]
    fn test_round_trip_render_extract() {
        let cases = [
            ("/d/YYYY/a.log", CycleUnit::Year, "2024"),
            ("/d/YYYYMM/a.log", CycleUnit::Month, "202406"),
            ("/d/YYYYMMDD/a.log", CycleUnit::Day, "20240601"),
            ("/d/YYYYMMDDhh/a.log", CycleUnit::Hour, "2024060112"),
            ("/d/YYYYMMDDHHmm/a.log", CycleUnit::Minute, "202406011230"),
        ];
        let t = calc().parse_data_time("202406011230").unwrap();
        for (pattern, unit, want) in cases {
            let expr = DateExpression::parse(pattern).unwrap();
            let rendered = expr.render(calc().floor_ms(t, unit), &calc());
            assert_eq!(expr.extract_data_time(&rendered), want, "{pattern}");
        }
    }
}
