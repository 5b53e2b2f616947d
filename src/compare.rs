//! Line ordering shared by the chunk sort, the spill files and the merge.

use crate::config::SortMode;
use crate::line::Line;
use std::cmp::Ordering;

/// Comparison configuration, built once per run and copied into every stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Comparator {
    mode: SortMode,
}

impl Comparator {
    pub fn new(mode: SortMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> SortMode {
        self.mode
    }

    /// Total order over lines. Numeric mode compares keys first and falls
    /// back to the raw bytes when keys are equal.
    #[inline]
    pub fn compare(&self, a: &Line, b: &Line) -> Ordering {
        match self.mode {
            SortMode::Lexicographic => a.as_bytes().cmp(b.as_bytes()),
            SortMode::Numeric => a
                .key()
                .cmp(&b.key())
                .then_with(|| a.as_bytes().cmp(b.as_bytes())),
        }
    }

    #[inline]
    pub fn is_in_order(&self, a: &Line, b: &Line) -> bool {
        self.compare(a, b) != Ordering::Greater
    }
}

/// Parse the leading integer of `bytes`: an optional `+` or `-` followed by
/// the longest run of ASCII digits. Returns `None` when there are no digits.
/// Values out of range saturate.
pub fn parse_numeric_prefix(bytes: &[u8]) -> Option<i64> {
    let (negative, digits) = match bytes.first() {
        Some(b'-') => (true, &bytes[1..]),
        Some(b'+') => (false, &bytes[1..]),
        _ => (false, bytes),
    };

    let run = digits.iter().take_while(|b| b.is_ascii_digit()).count();
    if run == 0 {
        return None;
    }

    // Accumulate towards the sign so i64::MIN itself is reachable.
    let mut value: i64 = 0;
    for &d in &digits[..run] {
        let d = i64::from(d - b'0');
        value = if negative {
            match value.checked_mul(10).and_then(|v| v.checked_sub(d)) {
                Some(v) => v,
                None => return Some(i64::MIN),
            }
        } else {
            match value.checked_mul(10).and_then(|v| v.checked_add(d)) {
                Some(v) => v,
                None => return Some(i64::MAX),
            }
        };
    }
    Some(value)
}

/// Sort key for numeric mode. `None` is the minimum key: it orders before
/// every parsed value, `i64::MIN` included.
pub fn numeric_key(bytes: &[u8]) -> Option<i64> {
    parse_numeric_prefix(bytes)
}
