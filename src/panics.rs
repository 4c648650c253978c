// Panic containment and message sanitization
//
// User code runs under deferred recovery: adapters catch unwinds from user
// futures, fan-out connectors convert task panics surfaced through
// `JoinError`. Recovered messages are sanitized before they enter an error:
// pointer values, absolute paths, and null bytes leak memory layout or
// machine details and have no business in a pipeline failure.

use crate::error::Failure;
use regex::Regex;
use std::any::Any;
use std::sync::LazyLock;

/// Maximum sanitized message length, in characters
const MAX_MESSAGE_CHARS: usize = 200;

static HEX_POINTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"0x[0-9A-Fa-f]+").expect("valid pointer pattern"));

// Two or more path segments rooted at '/', e.g. /home/user/src/main.rs
static ABSOLUTE_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(?:[A-Za-z0-9._\-]+/)+[A-Za-z0-9._\-]+").expect("valid path pattern"));

/// Extract a printable message from a panic payload
///
/// Panics carry `&str` or `String` in practice; anything else gets a stable
/// placeholder.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Scrub a recovered panic message for safe reporting
///
/// Redacts hex pointer tokens and absolute filesystem paths, removes null
/// bytes, drops frame lines that point back into this crate, and truncates
/// to at most 200 characters on a character boundary.
pub fn sanitize(message: &str) -> String {
    let no_nul: String = message.chars().filter(|c| *c != '\0').collect();

    // Drop backtrace-style lines that reference runtime internals
    let kept: Vec<&str> = no_nul
        .lines()
        .filter(|line| !line.contains("pipz::") && !line.trim_start().starts_with("at "))
        .collect();
    let joined = kept.join("\n");

    let redacted = HEX_POINTER.replace_all(&joined, "0x***");
    let redacted = ABSOLUTE_PATH.replace_all(&redacted, "<path>");

    truncate_chars(&redacted, MAX_MESSAGE_CHARS)
}

/// Build the sentinel failure for a recovered panic
pub fn panic_failure(payload: &(dyn Any + Send)) -> Failure {
    Failure::Panic(sanitize(&panic_message(payload)))
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((byte_idx, _)) => s[..byte_idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_tokens_are_redacted() {
        let out = sanitize("dereferenced 0xDEADbeef and 0x7f8a2c004010 during apply");
        assert_eq!(out, "dereferenced 0x*** and 0x*** during apply");
        assert!(!out.contains("deadbeef"));
    }

    #[test]
    fn test_null_bytes_removed() {
        let out = sanitize("bad\0input\0here");
        assert_eq!(out, "badinputhere");
    }

    #[test]
    fn test_absolute_paths_redacted() {
        let out = sanitize("failed reading /home/svc/data/input.csv: corrupt row");
        assert_eq!(out, "failed reading <path>: corrupt row");
    }

    #[test]
    fn test_runtime_frames_stripped() {
        let msg = "index out of bounds\n   at pipz::adapters::transform\nuser context line";
        let out = sanitize(msg);
        assert!(!out.contains("pipz::"));
        assert!(out.contains("index out of bounds"));
        assert!(out.contains("user context line"));
    }

    #[test]
    fn test_truncation_is_inclusive_at_200() {
        let exact: String = "a".repeat(200);
        assert_eq!(sanitize(&exact).chars().count(), 200);
        assert_eq!(sanitize(&exact), exact);

        let over: String = "a".repeat(201);
        assert_eq!(sanitize(&over).chars().count(), 200);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let wide: String = "é".repeat(250);
        let out = sanitize(&wide);
        assert_eq!(out.chars().count(), 200);
        assert!(out.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(payload.as_ref()), "owned boom");

        let payload: Box<dyn std::any::Any + Send> = Box::new(17u64);
        assert_eq!(panic_message(payload.as_ref()), "panic with non-string payload");
    }

    #[test]
    fn test_panic_failure_wraps_sanitized_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("ptr 0xabc123 died");
        match panic_failure(payload.as_ref()) {
            Failure::Panic(msg) => assert_eq!(msg, "ptr 0x*** died"),
            other => panic!("expected Panic, got {:?}", other),
        }
    }
}
