//! Pattern compilation for pattern rules.
//!
//! Patterns are regular expressions. The delimited form `/body/flags` used by
//! older rule files is also accepted.

use regex::{Regex, RegexBuilder};

use crate::error::{LedgerError, LedgerResult};

pub fn compile_pattern(pattern: &str) -> LedgerResult<Regex> {
    if pattern.is_empty() {
        return Err(LedgerError::Validation(
            "pattern is required for pattern rules".to_string(),
        ));
    }

    let (body, flags) = split_delimited(pattern).unwrap_or((pattern, ""));

    let mut builder = RegexBuilder::new(body);
    for flag in flags.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            'u' => &mut builder,
            other => {
                return Err(LedgerError::Validation(format!(
                    "Unsupported pattern flag '{}' in {}",
                    other, pattern
                )))
            }
        };
    }

    builder
        .build()
        .map_err(|e| LedgerError::Validation(format!("Invalid pattern {}: {}", pattern, e)))
}

/// `/body/flags` -> `(body, flags)`. Only `/` delimiters are recognized and the
/// trailing part must consist of ASCII letters.
fn split_delimited(pattern: &str) -> Option<(&str, &str)> {
    let rest = pattern.strip_prefix('/')?;
    let end = rest.rfind('/')?;
    let (body, flags) = (&rest[..end], &rest[end + 1..]);
    if flags.chars().all(|c| c.is_ascii_alphabetic()) {
        Some((body, flags))
    } else {
        None
    }
}
