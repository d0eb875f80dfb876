//! Shell quoting helpers for remote command lines.

use std::collections::BTreeMap;

/// Quotes a word for POSIX `sh` when it contains anything beyond a safe set.
#[must_use]
pub fn quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Whether `name` is a portable environment variable name,
/// `[A-Za-z_][A-Za-z0-9_]*`.
#[must_use]
pub fn is_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Renders an `export` prefix for the given environment.
///
/// Keys must satisfy [`is_env_name`]; the stage resolver rejects anything
/// else. Values are double quoted so `$VAR` references expand on the remote side,
/// as in `PATH="$PATH:/usr/local/bin"`. Returns an empty string for an empty map.
#[must_use]
pub fn env_prefix(env: &BTreeMap<String, String>) -> String {
    if env.is_empty() {
        return String::new();
    }
    let assignments: Vec<String> = env
        .iter()
        .map(|(key, value)| {
            let escaped = value
                .replace('\\', r"\\")
                .replace('"', "\\\"")
                .replace('`', "\\`");
            format!("{key}=\"{escaped}\"")
        })
        .collect();
    format!("export {}; ", assignments.join(" "))
}
