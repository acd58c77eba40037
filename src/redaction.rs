use once_cell::sync::Lazy;
use regex::Regex;

static JWT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\beyJ[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]*").expect("valid regex")
});

static BEARER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9_\-\.=]+").expect("valid regex"));

static NAMED_TOKEN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(refresh_?token|access_?token|token|jwt)(["']?\s*[:=]\s*["']?)([^"'&\s,}]{6,})"#)
        .expect("valid regex")
});

/// Masks access tokens, refresh tokens and bearer headers so transport error
/// text can be logged or shown without leaking credentials.
pub fn redact_secrets(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }

    let result = BEARER_PATTERN.replace_all(input, "Bearer [REDACTED]");
    let result = NAMED_TOKEN_PATTERN.replace_all(&result, |caps: &regex::Captures<'_>| {
        format!("{}{}[REDACTED]", &caps[1], &caps[2])
    });
    JWT_PATTERN.replace_all(&result, "[REDACTED_JWT]").into_owned()
}
