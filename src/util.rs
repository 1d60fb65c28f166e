// src/util.rs — Shared string helpers

/// Truncate to at most `max_len` bytes on a UTF-8 boundary.
pub fn truncate_str(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        s
    } else {
        let mut end = max_len;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        &s[..end]
    }
}

/// Short excerpt for model-facing digests and terminal tables. Appends
/// `...` only when something was cut.
pub fn excerpt(s: &str, max_len: usize) -> String {
    let cut = truncate_str(s, max_len);
    if cut.len() < s.len() {
        format!("{cut}...")
    } else {
        cut.to_string()
    }
}

/// Collapse a (possibly multi-line) string onto one line for table cells.
pub fn one_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short() {
        assert_eq!(truncate_str("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_long() {
        assert_eq!(truncate_str("hello world", 5), "hello");
    }

    #[test]
    fn test_truncate_multibyte() {
        // é is 2 bytes; cutting at 4 must not split it
        assert_eq!(truncate_str("café", 4), "caf");
    }

    #[test]
    fn test_excerpt_marks_cut() {
        assert_eq!(excerpt("hello world", 5), "hello...");
        assert_eq!(excerpt("hi", 5), "hi");
    }

    #[test]
    fn test_one_line() {
        assert_eq!(one_line("a\n  b\tc "), "a b c");
    }
}
