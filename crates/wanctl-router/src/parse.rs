//! RouterOS output parsing.
//!
//! RouterOS `print` output is a loose `key=value` stream. The parsers
//! here extract numeric fields with word boundaries (so `bytes=` does
//! not match inside `queued-bytes=`) and decode the rule flag column.

use wanctl_common::sample::QueueStats;

/// Extract the numeric value of `key=<digits>` from RouterOS output.
///
/// The match must start at a word boundary: beginning of input, or after
/// whitespace. `queued-bytes=` therefore never satisfies a `bytes` query.
pub fn field_u64(output: &str, key: &str) -> Option<u64> {
    let needle = format!("{key}=");
    let bytes = output.as_bytes();
    let mut search_from = 0;

    while let Some(rel) = output[search_from..].find(&needle) {
        let start = search_from + rel;
        let boundary_ok = start == 0 || bytes[start - 1].is_ascii_whitespace();
        if boundary_ok {
            let value_start = start + needle.len();
            let digits: String = output[value_start..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if !digits.is_empty() {
                return digits.parse().ok();
            }
        }
        search_from = start + needle.len();
    }
    None
}

/// Parse a `/queue/tree print stats detail` response into counters.
///
/// Missing fields default to zero; RouterOS omits fields that are zero
/// in some versions.
pub fn parse_queue_stats(output: &str) -> QueueStats {
    QueueStats {
        packets: field_u64(output, "packets").unwrap_or(0),
        bytes: field_u64(output, "bytes").unwrap_or(0),
        dropped: field_u64(output, "dropped").unwrap_or(0),
        queued_packets: field_u64(output, "queued-packets").unwrap_or(0),
        queued_bytes: field_u64(output, "queued-bytes").unwrap_or(0),
    }
}

/// Parse `max-limit=<bps>` from a `/queue/tree print detail` response.
///
/// `Some(0)` means unlimited; `None` means the field was absent entirely
/// (unknown queue).
pub fn parse_max_limit(output: &str) -> Option<u64> {
    if let Some(v) = field_u64(output, "max-limit") {
        return Some(v);
    }
    if output.contains("max-limit=") {
        // Present but non-numeric (e.g. "unlimited") — treat as 0.
        return Some(0);
    }
    None
}

/// Decode the enabled/disabled flag of the first rule in a
/// `/ip/firewall/mangle print where comment=...` response.
///
/// RouterOS prefixes each entry with an index and a flag column; a
/// disabled rule carries `X` there. Returns `None` when no rule line is
/// present (rule not found).
pub fn parse_rule_enabled(output: &str) -> Option<bool> {
    for line in output.lines() {
        let trimmed = line.trim_start();
        let mut tokens = trimmed.split_whitespace();
        let Some(first) = tokens.next() else { continue };
        if !first.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        // Flags sit between the index and the first key=value or comment.
        for token in tokens {
            if token.contains('=') || token.starts_with(";;;") {
                break;
            }
            if token == "X" || token.starts_with('X') {
                return Some(false);
            }
        }
        return Some(true);
    }
    None
}
