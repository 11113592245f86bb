//! Shared utility functions used across the codebase.

use std::str::FromStr;

use crate::config::ConfigError;

/// Parse an environment variable as a boolean, returning `default` if unset.
///
/// Recognises `1`, `true`, `yes`, `y`, `on` (case-insensitive) as `true`;
/// any other set value maps to `false`.
pub fn env_var_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "on"
        ),
        Err(_) => default,
    }
}

/// Parse an environment variable into `T`, returning `default` if unset.
///
/// A value that is set but does not parse is reported as
/// `ConfigError::InvalidValue` rather than silently replaced.
pub fn env_var_parse<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        _ => Ok(default),
    }
}

/// Truncate `text` to at most `max_chars` characters, appending an ellipsis
/// when anything was cut. Never splits a UTF-8 code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Strip a surrounding markdown code fence (```json ... ```) if present.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello world", 5), "hello...");
        assert_eq!(truncate_chars("héllo", 2), "hé...");
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  plain text "), "plain text");
        assert_eq!(strip_code_fence("```\n[1, 2]\n```"), "[1, 2]");
    }

    #[test]
    fn test_env_var_parse_default_when_unset() {
        let value: u32 = env_var_parse("ADAPTIVE_AUTOMATION_TEST_UNSET_VAR", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_env_var_parse_rejects_garbage() {
        std::env::set_var("ADAPTIVE_AUTOMATION_TEST_GARBAGE_VAR", "not-a-number");
        let result: Result<u32, _> = env_var_parse("ADAPTIVE_AUTOMATION_TEST_GARBAGE_VAR", 7);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_, _))));
        std::env::remove_var("ADAPTIVE_AUTOMATION_TEST_GARBAGE_VAR");
    }
}
