//! Effective rule line counting.
//!
//! A filter list is treated as plain lines. Every line that is neither
//! blank nor a `#` comment counts as one rule, whatever its syntax
//! (adblock-style `||example.org^` and hosts-style `0.0.0.0 example.org`
//! alike). Validating the rules themselves is left to the filtering engine.

use std::io::{self, BufRead};

const COMMENT_MARKER: u8 = b'#';
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Check whether a single line counts as a rule.
pub fn is_effective_line(line: &[u8]) -> bool {
    match line.trim_ascii().first() {
        None => false,
        Some(&first) => first != COMMENT_MARKER,
    }
}

/// Count the effective rule lines in `data`.
///
/// # Example
///
/// ```
/// use k2filter::count_rules;
///
/// let list = b"||example.org^\n# comment\n\n0.0.0.0 example.com\n";
/// assert_eq!(count_rules(list), 2);
/// ```
pub fn count_rules(data: &[u8]) -> usize {
    strip_bom(data)
        .split(|&b| b == b'\n')
        .filter(|line| is_effective_line(line))
        .count()
}

/// Count the effective rule lines while streaming from `reader`.
///
/// Produces the same result as [`count_rules`] on the full content without
/// holding it in memory.
pub fn count_rules_from<R: BufRead>(mut reader: R) -> io::Result<usize> {
    let mut line = Vec::new();
    let mut count = 0;
    let mut first = true;

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        let current = if first { strip_bom(&line) } else { &line[..] };
        first = false;
        if is_effective_line(current) {
            count += 1;
        }
    }

    Ok(count)
}

fn strip_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(UTF8_BOM).unwrap_or(data)
}
