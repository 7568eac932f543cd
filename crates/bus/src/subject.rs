//! Dotted-subject pattern matching.
//!
//! Subjects are dotted strings (`llm.chat.response`).  A subscription
//! pattern is either a literal subject or contains `*`, which matches
//! exactly one segment (`test.wildcard.*` matches `test.wildcard.x` but
//! not `test.wildcard.x.y`).  The bare pattern `*` is the match-all
//! subscription used by monitors and the universal processor.
//! Multi-segment wildcards (`#`) are not supported — a literal `#`
//! segment only matches itself.

/// Whether `pattern` contains a single-segment wildcard (or is match-all).
pub fn is_wildcard(pattern: &str) -> bool {
    pattern.split('.').any(|segment| segment == "*")
}

/// Match an event type against a subscription pattern.
pub fn matches(pattern: &str, event_type: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if !is_wildcard(pattern) {
        return pattern == event_type;
    }
    let mut pattern_segments = pattern.split('.');
    let mut type_segments = event_type.split('.');
    loop {
        match (pattern_segments.next(), type_segments.next()) {
            (None, None) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(t)) if p == t => continue,
            _ => return false,
        }
    }
}
