use std::env;

/// Splits a comma-separated recipient list, trimming entries and dropping empties.
pub fn parse_recipients(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
        .collect()
}

/// Reads `key` from the environment and parses it with [`parse_recipients`].
/// An unset variable yields an empty list.
pub fn recipients_from_env(key: &str) -> Vec<String> {
    env::var(key)
        .map(|raw| parse_recipients(&raw))
        .unwrap_or_default()
}
