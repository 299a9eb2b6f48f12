//! Fanfetch utility functions: HTTP execution, parameter parsing, path
//! expansion and log redaction.

pub mod duration;
pub mod http;
pub mod paths;

pub use duration::{ParamParseError, parse_bool, parse_duration, parse_status_list};
pub use http::{HttpExecError, build_http_client, execute_request};
pub use paths::expand_tilde;

use once_cell::sync::Lazy;
use regex::Regex;

static SENSITIVE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(authorization: )([\w\-\.=:/+ ]+)",
        r"(?i)([A-Z0-9_]*?(?:KEY|TOKEN|SECRET|PASSWORD)=)([^\s&]+)",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Redacts values that look like secrets in a string.
pub fn redact_sensitive(input: &str) -> String {
    let mut redacted = input.to_string();
    for pattern in SENSITIVE_PATTERNS.iter() {
        redacted = pattern
            .replace_all(&redacted, |caps: &regex::Captures| {
                let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                format!("{}<redacted>", prefix)
            })
            .to_string();
    }
    redacted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_tokens_in_urls_and_headers() {
        assert_eq!(
            redact_sensitive("http://host/get?api_token=abc123&page=2"),
            "http://host/get?api_token=<redacted>&page=2"
        );
        assert_eq!(redact_sensitive("Authorization: Bearer xyz"), "Authorization: <redacted>");
        assert_eq!(redact_sensitive("nothing to see"), "nothing to see");
    }
}
