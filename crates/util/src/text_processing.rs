//! # Text Processing Utilities
//!
//! Sensitive data redaction for log and diagnostic output.

use once_cell::sync::Lazy;
use regex::Regex;

/// Redacts values that look like secrets in a string.
///
/// This function scans input text for patterns that commonly indicate
/// sensitive information like API keys, tokens, passwords, and worker
/// credentials. When found, these values are replaced with `[REDACTED]`
/// while preserving the key names for debugging purposes.
///
/// # Example
/// ```rust
/// use wfl_util::text_processing::redact_sensitive;
///
/// let input = "API_KEY=abc123 TOKEN=xyz789";
/// let redacted = redact_sensitive(input);
/// assert_eq!(redacted, "API_KEY=[REDACTED] TOKEN=[REDACTED]");
///
/// let input = "X-Worker-Key: secret123";
/// let redacted = redact_sensitive(input);
/// assert_eq!(redacted, "X-Worker-Key: [REDACTED]");
/// ```
pub fn redact_sensitive(input: &str) -> String {
    redact_sensitive_with(input, "[REDACTED]")
}

/// Redacts sensitive-looking values, using a custom replacement token.
pub fn redact_sensitive_with(input: &str, replacement: &str) -> String {
    let mut redacted = input.to_string();

    for pattern in get_redact_patterns().iter() {
        redacted = pattern
            .replace_all(&redacted, |captures: &regex::Captures| {
                let prefix = captures.get(1).map(|m| m.as_str()).unwrap_or("");
                format!("{}{}", prefix, replacement)
            })
            .to_string();
    }

    redacted
}

fn get_redact_patterns() -> &'static Vec<Regex> {
    static REDACT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
        vec![
            // Authorization / worker-key headers (keep prefix, redact value)
            Regex::new(r"(?i)(authorization:\s+)([^\s]+(?:\s+[^\s]+)*)").unwrap(),
            Regex::new(r"(?i)(x-worker-key:\s+)([^\s]+)").unwrap(),
            Regex::new(r"(?i)((?:^|\b)Bearer\s+)([A-Za-z0-9\-._~+/]+=*)").unwrap(),
            // Common key/token env or labels (keep prefix including delimiter)
            Regex::new(r"(?i)((?:api[\s_-]?key|auth[\s_-]?token|token|secret|password)\s*[:=]\s*)([^\s,;]+)").unwrap(),
            // Env-like KEY=VALUE patterns for KEY/TOKEN/SECRET/PASSWORD
            Regex::new(r"(?i)((?:[A-Z0-9_]*?(?:KEY|TOKEN|SECRET|PASSWORD))=)([^\s]+)").unwrap(),
            // JWT-like tokens (replace entirely)
            Regex::new(r"(eyJ[A-Za-z0-9\-._~+/]+=*)").unwrap(),
        ]
    });

    &REDACT_PATTERNS
}
