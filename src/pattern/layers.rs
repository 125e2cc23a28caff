//! Splitting an origin pattern into its scan layers.
//!
//! The static root is the longest leading directory prefix containing no
//! wildcard, date token or regex metacharacter; it is what gets walked and
//! watched. The intermediate layer is the first dynamic path segment, used
//! to gate descent, and the file regex covers the whole pattern.

use std::path::PathBuf;

use regex::Regex;

use super::{DateExpression, Segment};
use crate::error::{NoStaticRootSnafu, PatternError};

/// Characters that end the static prefix when they appear in a literal.
fn is_dynamic_char(ch: char) -> bool {
    matches!(
        ch,
        '*' | '?' | '[' | ']' | '{' | '}' | '(' | ')' | '|' | '+' | '^' | '$' | '\\'
    )
}

/// The three derived layers of an origin pattern.
#[derive(Debug, Clone)]
pub struct PathLayers {
    /// Longest literal leading directory; the walk/watch anchor.
    pub static_root: PathBuf,
    /// `^`-anchored regex for the root-plus-first-dynamic-segment prefix;
    /// gates descent below the static root.
    pub dir_regex: Regex,
    /// `^`-anchored regex for the complete pattern.
    pub file_regex: Regex,
}

impl PathLayers {
    /// Derive the layers of `pattern`. Fails with
    /// [`PatternError::NoStaticRoot`] when no literal leading directory
    /// exists to anchor on.
    pub fn split(pattern: &str) -> Result<Self, PatternError> {
        let expr = DateExpression::parse(pattern)?;

        let mut dynamic_start = pattern.len();
        let mut offset = 0;
        'scan: for seg in &expr.segments {
            match seg {
                Segment::Token(_) => {
                    dynamic_start = offset;
                    break 'scan;
                }
                Segment::Literal(lit) => {
                    for (i, ch) in lit.char_indices() {
                        if is_dynamic_char(ch) {
                            dynamic_start = offset + i;
                            break 'scan;
                        }
                    }
                    offset += lit.len();
                }
            }
        }

        let head = &pattern[..dynamic_start];
        let root_end = head.rfind('/').filter(|end| *end < pattern.len() - 1);
        let Some(root_end) = root_end else {
            return NoStaticRootSnafu { pattern }.fail();
        };
        let static_root = if root_end == 0 {
            "/"
        } else {
            &pattern[..root_end]
        };

        let remainder = &pattern[root_end + 1..];
        let segment = &remainder[..remainder.find('/').unwrap_or(remainder.len())];
        let dir_pattern = if static_root == "/" {
            format!("/{segment}")
        } else {
            format!("{static_root}/{segment}")
        };

        let dir_regex = DateExpression::parse(&dir_pattern)?.match_regex().clone();
        let file_regex = expr.match_regex().clone();

        Ok(Self {
            static_root: PathBuf::from(static_root),
            dir_regex,
            file_regex,
        })
    }
}
