use crate::compare::numeric_key;
use crate::config::SortMode;

/// One input line, terminator stripped, with its precomputed sort key.
///
/// The key is only meaningful in numeric mode; it is derived once when the
/// line is created so the comparator never re-parses during sort or merge.
/// Lines without a numeric prefix carry `None`, which orders first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    bytes: Vec<u8>,
    key: Option<i64>,
}

impl Line {
    pub fn new(bytes: Vec<u8>, mode: SortMode) -> Self {
        let key = match mode {
            SortMode::Numeric => numeric_key(&bytes),
            SortMode::Lexicographic => None,
        };
        Self { bytes, key }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn key(&self) -> Option<i64> {
        self.key
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}
