//! Chunk builder: groups lines into bounded batches and sorts each batch.

use crate::compare::Comparator;
use crate::config::SortConfig;
use crate::line::Line;
use crossbeam_channel::{Receiver, Sender};
use rayon::prelude::*;
use tracing::debug;

/// Above this many lines a parallel sort pays for itself.
const PARALLEL_THRESHOLD: usize = 10_000;

/// Upper bound on up-front allocation; huge capacities grow on demand.
const PREALLOC_LIMIT: usize = 64 * 1024;

/// Lines buffered in memory, never more than `capacity`.
#[derive(Debug)]
pub struct Chunk {
    lines: Vec<Line>,
    capacity: usize,
}

/// A chunk after sorting, tagged with its position in the input.
#[derive(Debug)]
pub struct SortedChunk {
    pub seq: usize,
    pub lines: Vec<Line>,
    /// No further chunks follow this one.
    pub last: bool,
}

impl Chunk {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: Vec::with_capacity(capacity.min(PREALLOC_LIMIT)),
            capacity,
        }
    }

    /// Add a line. Hands the line back if the chunk is already full.
    pub fn push(&mut self, line: Line) -> Result<(), Line> {
        if self.is_full() {
            return Err(line);
        }
        self.lines.push(line);
        Ok(())
    }

    pub fn is_full(&self) -> bool {
        self.lines.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Sort in place and freeze.
    pub fn seal(mut self, comparator: Comparator, parallel: bool, seq: usize, last: bool) -> SortedChunk {
        if parallel && self.lines.len() > PARALLEL_THRESHOLD {
            self.lines
                .par_sort_unstable_by(|a, b| comparator.compare(a, b));
        } else {
            self.lines.sort_unstable_by(|a, b| comparator.compare(a, b));
        }
        SortedChunk {
            seq,
            lines: self.lines,
            last,
        }
    }
}

/// Second pipeline stage.
pub struct ChunkBuilder {
    comparator: Comparator,
    capacity: usize,
    parallel: bool,
}

impl ChunkBuilder {
    pub fn new(config: &SortConfig, comparator: Comparator) -> Self {
        Self {
            comparator,
            capacity: config.chunk_capacity,
            parallel: config.parallel,
        }
    }

    /// Consume lines until the sender side closes, emitting sorted chunks in
    /// arrival order. A full chunk is held back until the next line shows up
    /// so the final chunk can always be flagged `last`. Returns the number of
    /// chunks emitted.
    pub fn run(self, lines: Receiver<Line>, chunks: Sender<SortedChunk>) -> usize {
        let mut chunk = Chunk::with_capacity(self.capacity);
        let mut seq = 0;

        for line in lines.iter() {
            let line = match chunk.push(line) {
                Ok(()) => continue,
                Err(line) => line,
            };

            let full = std::mem::replace(&mut chunk, Chunk::with_capacity(self.capacity));
            debug!(seq, lines = full.len(), "sorting chunk");
            if chunks
                .send(full.seal(self.comparator, self.parallel, seq, false))
                .is_err()
            {
                debug!("spill stage closed, stopping chunk builder");
                return seq;
            }
            seq += 1;

            // A fresh chunk has room for at least one line.
            let _ = chunk.push(line);
        }

        if !chunk.is_empty() {
            debug!(seq, lines = chunk.len(), "sorting final chunk");
            if chunks
                .send(chunk.seal(self.comparator, self.parallel, seq, true))
                .is_ok()
            {
                seq += 1;
            }
        }
        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SortMode;
    use crossbeam_channel::unbounded;

    fn line(s: &str) -> Line {
        Line::new(s.as_bytes().to_vec(), SortMode::Lexicographic)
    }

    fn build(capacity: usize, input: &[&str]) -> Vec<SortedChunk> {
        let config = SortConfig::default().with_chunk_capacity(capacity);
        let (line_tx, line_rx) = unbounded();
        let (chunk_tx, chunk_rx) = unbounded();
        for s in input {
            line_tx.send(line(s)).unwrap();
        }
        drop(line_tx);

        ChunkBuilder::new(&config, Comparator::new(SortMode::Lexicographic)).run(line_rx, chunk_tx);
        chunk_rx.iter().collect()
    }

    fn texts(chunk: &SortedChunk) -> Vec<&[u8]> {
        chunk.lines.iter().map(Line::as_bytes).collect()
    }

    #[test]
    fn test_chunk_never_exceeds_capacity() {
        let mut chunk = Chunk::with_capacity(2);
        assert!(chunk.push(line("a")).is_ok());
        assert!(chunk.push(line("b")).is_ok());
        assert!(chunk.is_full());
        assert_eq!(chunk.push(line("c")), Err(line("c")));
        assert_eq!(chunk.len(), 2);
    }

    #[test]
    fn test_chunks_sorted_and_in_arrival_order() {
        let chunks = build(2, &["d", "c", "b", "a", "e"]);
        assert_eq!(chunks.len(), 3);
        assert_eq!(texts(&chunks[0]), vec![&b"c"[..], b"d"]);
        assert_eq!(texts(&chunks[1]), vec![&b"a"[..], b"b"]);
        assert_eq!(texts(&chunks[2]), vec![&b"e"[..]]);
        assert_eq!(
            chunks.iter().map(|c| (c.seq, c.last)).collect::<Vec<_>>(),
            vec![(0, false), (1, false), (2, true)]
        );
    }

    #[test]
    fn test_exactly_full_single_chunk_is_last() {
        let chunks = build(3, &["z", "y", "x"]);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].last);
        assert_eq!(texts(&chunks[0]), vec![&b"x"[..], b"y", b"z"]);
    }

    #[test]
    fn test_empty_input_emits_nothing() {
        assert!(build(3, &[]).is_empty());
    }

    #[test]
    fn test_parallel_sort_matches_sequential() {
        let comparator = Comparator::new(SortMode::Numeric);
        let input: Vec<Line> = (0..PARALLEL_THRESHOLD * 2)
            .map(|i| Line::new(format!("{}", (i * 7919) % 1000).into_bytes(), SortMode::Numeric))
            .collect();

        let mut a = Chunk::with_capacity(input.len());
        let mut b = Chunk::with_capacity(input.len());
        for l in &input {
            a.push(l.clone()).unwrap();
            b.push(l.clone()).unwrap();
        }
        let a = a.seal(comparator, true, 0, true);
        let b = b.seal(comparator, false, 0, true);
        assert_eq!(a.lines, b.lines);
    }
}
