/// Characters allowed in an env key: letters, digits, `_`, `.` and `-`.
///
/// Shared by [`validate_env_key`] and the env file parser, so every key
/// that can be written is also read back into the cache.
pub fn is_env_key_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '-')
}

/// Validate that `key` can be written as the left-hand side of a
/// `KEY=VALUE` line without changing the line structure of the file.
///
/// SECURITY: Always call before splicing caller input into the env file.
/// A key carrying `=`, `#`, whitespace or a line break would forge extra
/// lines or hide itself behind a comment marker.
pub fn validate_env_key(key: &str) -> Result<(), &'static str> {
    if key.is_empty() {
        return Err("key must not be empty");
    }
    if key.contains(['\n', '\r']) {
        return Err("key must not contain line breaks");
    }
    if key.contains('=') {
        return Err("key must not contain '='");
    }
    if key.chars().any(char::is_whitespace) {
        return Err("key must not contain whitespace");
    }
    if !key.chars().all(is_env_key_char) {
        return Err("key may only contain letters, digits, '_', '.' and '-'");
    }
    Ok(())
}

/// Validate that `value` fits on a single line.
pub fn validate_env_value(value: &str) -> Result<(), &'static str> {
    if value.contains(['\n', '\r']) {
        return Err("value must not contain line breaks");
    }
    Ok(())
}
