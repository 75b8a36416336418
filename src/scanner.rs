//! Preamble scanner
//!
//! Receive buffers are never assumed to be frame-aligned. The preamble is
//! long enough to be self-delimiting, so an exact first-occurrence search is
//! used; a single corrupted preamble byte rejects that occurrence and recovery
//! is left to the sender's retry timer.

/// Offset of the first exact occurrence of `pattern` in `haystack`
pub fn find(haystack: &[u8], pattern: &[u8]) -> Option<usize> {
    if pattern.is_empty() {
        return Some(0);
    }
    if haystack.len() < pattern.len() {
        return None;
    }

    let first = pattern[0];
    let last_start = haystack.len() - pattern.len();
    let mut start = 0;

    while start <= last_start {
        let candidate = haystack[start..=last_start].iter().position(|&b| b == first)?;
        let offset = start + candidate;
        if &haystack[offset..offset + pattern.len()] == pattern {
            return Some(offset);
        }
        start = offset + 1;
    }

    None
}

/// Offset of the first byte after the protocol preamble, if present
pub fn frame_start(haystack: &[u8]) -> Option<usize> {
    find(haystack, &crate::PREAMBLE).map(|offset| offset + crate::PREAMBLE.len())
}
