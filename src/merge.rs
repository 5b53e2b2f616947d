//! K-way merge of sorted runs, cascading through temporary files when there
//! are more runs than the merge degree.

use crate::compare::Comparator;
use crate::config::{SortConfig, SortMode};
use crate::error::{SortError, SortResult};
use crate::line::Line;
use crate::report::ErrorReporter;
use crate::spill::{SpillFile, TempKind, TempRegistry};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A sorted run waiting to be merged.
#[derive(Debug)]
pub enum MergeInput {
    Memory(Vec<Line>),
    Spill(SpillFile),
}

/// Reads lines back from a spill file.
struct SpillReader {
    reader: BufReader<File>,
    path: PathBuf,
    buf: Vec<u8>,
    mode: SortMode,
}

impl SpillReader {
    fn open(path: &Path, mode: SortMode, buffer_size: usize) -> SortResult<Self> {
        let file = File::open(path).map_err(|e| SortError::temp_read(path, e))?;
        Ok(Self {
            reader: BufReader::with_capacity(buffer_size, file),
            path: path.to_path_buf(),
            buf: Vec::new(),
            mode,
        })
    }

    fn next_line(&mut self) -> SortResult<Option<Line>> {
        self.buf.clear();
        let n = self
            .reader
            .read_until(b'\n', &mut self.buf)
            .map_err(|e| SortError::temp_read(&self.path, e))?;
        if n == 0 {
            return Ok(None);
        }
        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
        }
        Ok(Some(Line::new(std::mem::take(&mut self.buf), self.mode)))
    }
}

enum Cursor {
    Memory(std::vec::IntoIter<Line>),
    Spill(SpillReader),
}

/// One sorted run during a merge: its current head line and the means to
/// fetch the next one.
pub struct MergeSource {
    id: usize,
    head: Line,
    cursor: Cursor,
    backing: Option<PathBuf>,
}

impl MergeSource {
    /// Open a run and read its first line. Returns the backing path instead
    /// when the run turns out to be empty.
    fn open(
        id: usize,
        input: MergeInput,
        mode: SortMode,
        buffer_size: usize,
    ) -> SortResult<Result<Self, Option<PathBuf>>> {
        match input {
            MergeInput::Memory(lines) => {
                let mut iter = lines.into_iter();
                Ok(match iter.next() {
                    Some(head) => Ok(Self {
                        id,
                        head,
                        cursor: Cursor::Memory(iter),
                        backing: None,
                    }),
                    None => Err(None),
                })
            }
            MergeInput::Spill(spill) => {
                let mut reader = SpillReader::open(&spill.path, mode, buffer_size)?;
                Ok(match reader.next_line()? {
                    Some(head) => Ok(Self {
                        id,
                        head,
                        cursor: Cursor::Spill(reader),
                        backing: Some(spill.path),
                    }),
                    None => Err(Some(spill.path)),
                })
            }
        }
    }

    pub fn head(&self) -> &Line {
        &self.head
    }

    /// Move to the next line. `false` once the run is exhausted.
    pub fn advance(&mut self) -> SortResult<bool> {
        let next = match &mut self.cursor {
            Cursor::Memory(iter) => iter.next(),
            Cursor::Spill(reader) => reader.next_line()?,
        };
        match next {
            Some(line) => {
                self.head = line;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Close the source, handing back the file to delete.
    fn close(self) -> Option<PathBuf> {
        self.backing
    }
}

struct HeapEntry {
    source: MergeSource,
    comparator: Comparator,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap. Earlier sources win ties.
        self.comparator
            .compare(&self.source.head, &other.source.head)
            .then_with(|| self.source.id.cmp(&other.source.id))
            .reverse()
    }
}

/// Min-heap of merge sources keyed on their head lines.
pub struct MergeHeap {
    heap: BinaryHeap<HeapEntry>,
    comparator: Comparator,
}

impl MergeHeap {
    pub fn new(comparator: Comparator, capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity),
            comparator,
        }
    }

    pub fn push(&mut self, source: MergeSource) {
        self.heap.push(HeapEntry {
            source,
            comparator: self.comparator,
        });
    }

    /// Source with the smallest head.
    pub fn pop(&mut self) -> Option<MergeSource> {
        self.heap.pop().map(|entry| entry.source)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Where a merge round writes.
enum Sink<'p> {
    Output,
    Temp(&'p Path),
}

impl Sink<'_> {
    fn error(&self, source: io::Error) -> SortError {
        match self {
            Sink::Output => SortError::Output(source),
            Sink::Temp(path) => SortError::temp_write(path, source),
        }
    }
}

/// Final pipeline stage.
pub struct MergeEngine<'a> {
    comparator: Comparator,
    degree: usize,
    buffer_size: usize,
    registry: &'a TempRegistry,
    reporter: ErrorReporter,
}

impl<'a> MergeEngine<'a> {
    pub fn new(
        config: &SortConfig,
        comparator: Comparator,
        registry: &'a TempRegistry,
        reporter: ErrorReporter,
    ) -> Self {
        Self {
            comparator,
            degree: config.merge_degree,
            buffer_size: config.io_buffer_size,
            registry,
            reporter,
        }
    }

    /// Merge every input into `out`. While more runs are pending than the
    /// merge degree, the first `degree` runs are merged into a new temporary
    /// file appended to the back of the queue. Returns the number of lines
    /// written to `out`.
    pub fn merge_all<W: Write>(&self, inputs: Vec<MergeInput>, out: &mut W) -> SortResult<u64> {
        let mut pending: VecDeque<MergeInput> = inputs.into();
        let mut round = 0;

        while pending.len() > self.degree {
            if self.reporter.fatal_latched() {
                // No temp file may be created now, so the fan-in limit is
                // lifted for the last pass.
                warn!(
                    runs = pending.len(),
                    degree = self.degree,
                    beyond_degree = pending.len() - self.degree,
                    "earlier failure: final merge opens all {} pending runs, {} more than the merge degree",
                    pending.len(),
                    pending.len() - self.degree
                );
                break;
            }

            let batch: Vec<MergeInput> = pending.drain(..self.degree).collect();
            let (file, path) = self.registry.create(TempKind::Merge)?;
            let mut writer = BufWriter::with_capacity(self.buffer_size, file);
            let sink = Sink::Temp(&path);
            let lines = self.merge_round(batch, &mut writer, &sink)?;
            writer.flush().map_err(|e| sink.error(e))?;
            drop(writer);

            round += 1;
            debug!(round, lines, remaining = pending.len() + 1, "merge round complete");
            pending.push_back(MergeInput::Spill(SpillFile { path, lines: lines as usize }));
        }

        info!(runs = pending.len(), rounds = round, "final merge");
        let lines = self.merge_round(pending.into(), out, &Sink::Output)?;
        out.flush().map_err(SortError::Output)?;
        Ok(lines)
    }

    /// One k-way merge. Exhausted sources have their files released as soon
    /// as they run dry; on error the remaining ones are left to registry
    /// cleanup.
    fn merge_round<W: Write>(&self, inputs: Vec<MergeInput>, out: &mut W, sink: &Sink<'_>) -> SortResult<u64> {
        let mode = self.comparator.mode();
        let mut heap = MergeHeap::new(self.comparator, inputs.len());

        for (id, input) in inputs.into_iter().enumerate() {
            match MergeSource::open(id, input, mode, self.buffer_size)? {
                Ok(source) => heap.push(source),
                Err(Some(path)) => self.registry.release(&path),
                Err(None) => {}
            }
        }

        let mut written = 0u64;
        while let Some(mut source) = heap.pop() {
            out.write_all(source.head().as_bytes())
                .and_then(|()| out.write_all(b"\n"))
                .map_err(|e| sink.error(e))?;
            written += 1;

            if source.advance()? {
                heap.push(source);
            } else if let Some(path) = source.close() {
                self.registry.release(&path);
            }
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ErrorAggregator;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        config: SortConfig,
        aggregator: ErrorAggregator,
    }

    impl Fixture {
        fn new(degree: usize) -> Self {
            let dir = TempDir::new().unwrap();
            let config = SortConfig::default()
                .with_temp_dir(Some(dir.path().to_path_buf()))
                .with_merge_degree(degree);
            Self {
                dir,
                config,
                aggregator: ErrorAggregator::new(10),
            }
        }

        fn spill(&self, registry: &TempRegistry, content: &str) -> MergeInput {
            let (_file, path) = registry.create(TempKind::Chunk).unwrap();
            fs::write(&path, content).unwrap();
            MergeInput::Spill(SpillFile {
                path,
                lines: content.lines().count(),
            })
        }

        fn entries(&self) -> usize {
            fs::read_dir(self.dir.path()).unwrap().count()
        }
    }

    fn memory(mode: SortMode, input: &[&str]) -> MergeInput {
        MergeInput::Memory(
            input
                .iter()
                .map(|s| Line::new(s.as_bytes().to_vec(), mode))
                .collect(),
        )
    }

    #[test]
    fn test_heap_pops_smallest_head() {
        let cmp = Comparator::new(SortMode::Lexicographic);
        let mut heap = MergeHeap::new(cmp, 3);
        for (id, s) in ["m", "c", "x"].iter().enumerate() {
            let source = MergeSource::open(id, memory(SortMode::Lexicographic, &[s]), cmp.mode(), 64)
                .unwrap()
                .ok()
                .unwrap();
            heap.push(source);
        }
        assert_eq!(heap.len(), 3);
        let order: Vec<Vec<u8>> = std::iter::from_fn(|| heap.pop())
            .map(|s| s.head().as_bytes().to_vec())
            .collect();
        assert_eq!(order, vec![b"c".to_vec(), b"m".to_vec(), b"x".to_vec()]);
        assert!(heap.is_empty());
    }

    #[test]
    fn test_merges_spill_files_and_deletes_them() {
        let fx = Fixture::new(10);
        let registry = TempRegistry::new(&fx.config, fx.aggregator.reporter());
        let engine = MergeEngine::new(
            &fx.config,
            Comparator::new(SortMode::Numeric),
            &registry,
            fx.aggregator.reporter(),
        );

        let inputs = vec![
            fx.spill(&registry, "1\n3\n"),
            fx.spill(&registry, ""),
            fx.spill(&registry, "2\n4\n"),
        ];
        let mut out = Vec::new();
        let lines = engine.merge_all(inputs, &mut out).unwrap();

        assert_eq!(lines, 4);
        assert_eq!(String::from_utf8(out).unwrap(), "1\n2\n3\n4\n");
        assert_eq!(registry.pending(), 0);
        assert_eq!(fx.entries(), 0);
    }

    #[test]
    fn test_cascades_when_runs_exceed_degree() {
        let fx = Fixture::new(2);
        let registry = TempRegistry::new(&fx.config, fx.aggregator.reporter());
        let engine = MergeEngine::new(
            &fx.config,
            Comparator::new(SortMode::Lexicographic),
            &registry,
            fx.aggregator.reporter(),
        );

        let inputs: Vec<MergeInput> = ["e\n", "a\nf\n", "c\n", "b\nd\n", "g\n"]
            .iter()
            .map(|c| fx.spill(&registry, c))
            .collect();
        let mut out = Vec::new();
        engine.merge_all(inputs, &mut out).unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "a\nb\nc\nd\ne\nf\ng\n");
        assert_eq!(fx.entries(), 0);
        assert!(fx.aggregator.finish().is_success());
    }

    #[test]
    fn test_after_fatal_error_merges_everything_in_one_pass() {
        let fx = Fixture::new(2);
        let reporter = fx.aggregator.reporter();
        let registry = TempRegistry::new(&fx.config, reporter.clone());
        let engine = MergeEngine::new(
            &fx.config,
            Comparator::new(SortMode::Lexicographic),
            &registry,
            reporter.clone(),
        );

        let inputs: Vec<MergeInput> = ["c\n", "a\n", "d\n", "b\n"]
            .iter()
            .map(|c| fx.spill(&registry, c))
            .collect();
        reporter.report(SortError::Output(io::Error::new(io::ErrorKind::Other, "earlier")));

        let mut out = Vec::new();
        let lines = engine.merge_all(inputs, &mut out).unwrap();
        assert_eq!(lines, 4);
        assert_eq!(String::from_utf8(out).unwrap(), "a\nb\nc\nd\n");
        assert_eq!(registry.pending(), 0);
        assert_eq!(fx.entries(), 0);

        let report = fx.aggregator.finish();
        assert_eq!(report.total, 1);
        assert!(!report.errors.iter().any(|e| matches!(e, SortError::TempRefused)));
    }

    #[test]
    fn test_in_memory_run_streams_without_disk() {
        let fx = Fixture::new(10);
        let registry = TempRegistry::new(&fx.config, fx.aggregator.reporter());
        let engine = MergeEngine::new(
            &fx.config,
            Comparator::new(SortMode::Lexicographic),
            &registry,
            fx.aggregator.reporter(),
        );

        let mut out = Vec::new();
        engine
            .merge_all(vec![memory(SortMode::Lexicographic, &["a", "b"])], &mut out)
            .unwrap();
        assert_eq!(out, b"a\nb\n");
        assert_eq!(fx.entries(), 0);
    }

    #[test]
    fn test_missing_run_is_fatal_and_cleaned_up() {
        let fx = Fixture::new(10);
        let registry = TempRegistry::new(&fx.config, fx.aggregator.reporter());
        let engine = MergeEngine::new(
            &fx.config,
            Comparator::new(SortMode::Lexicographic),
            &registry,
            fx.aggregator.reporter(),
        );

        let good = fx.spill(&registry, "a\n");
        let missing = MergeInput::Spill(SpillFile {
            path: fx.dir.path().join("vanished"),
            lines: 1,
        });
        let err = engine.merge_all(vec![good, missing], &mut Vec::<u8>::new()).unwrap_err();
        assert!(matches!(err, SortError::TempRead { .. }));
        assert!(err.is_fatal());

        registry.cleanup();
        assert_eq!(fx.entries(), 0);
    }

    #[test]
    fn test_destination_failure_maps_to_output_error() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let fx = Fixture::new(10);
        let registry = TempRegistry::new(&fx.config, fx.aggregator.reporter());
        let engine = MergeEngine::new(
            &fx.config,
            Comparator::new(SortMode::Lexicographic),
            &registry,
            fx.aggregator.reporter(),
        );
        let input = fx.spill(&registry, "a\nb\n");
        let err = engine.merge_all(vec![input], &mut Broken).unwrap_err();
        assert!(matches!(err, SortError::Output(_)));

        registry.cleanup();
        assert_eq!(fx.entries(), 0);
    }
}
