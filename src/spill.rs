//! Spill manager and the registry of temporary files.

use crate::chunk::SortedChunk;
use crate::config::SortConfig;
use crate::error::{SortError, SortResult};
use crate::line::Line;
use crate::report::ErrorReporter;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Purpose of a temporary file, visible in its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempKind {
    Chunk,
    Merge,
}

impl fmt::Display for TempKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TempKind::Chunk => write!(f, "chunk"),
            TempKind::Merge => write!(f, "merge"),
        }
    }
}

/// Every temporary file alive in one run.
///
/// Each path is deleted exactly once: either through [`release`] when its
/// content has been consumed, or by [`cleanup`] at the end of the run. The
/// registry also cleans up on drop, so unwinding leaves nothing behind.
///
/// [`release`]: TempRegistry::release
/// [`cleanup`]: TempRegistry::cleanup
pub struct TempRegistry {
    dir: PathBuf,
    prefix: String,
    live: Mutex<Vec<PathBuf>>,
    reporter: ErrorReporter,
}

impl TempRegistry {
    pub fn new(config: &SortConfig, reporter: ErrorReporter) -> Self {
        Self {
            dir: config.effective_temp_dir(),
            prefix: config.temp_prefix.clone(),
            live: Mutex::new(Vec::new()),
            reporter,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create and register a new temporary file. Refused once a fatal error
    /// has been latched.
    pub fn create(&self, kind: TempKind) -> SortResult<(File, PathBuf)> {
        if self.reporter.fatal_latched() {
            return Err(SortError::TempRefused);
        }

        let temp_err = |source: io::Error| SortError::TempCreate {
            dir: self.dir.clone(),
            source,
        };
        let prefix = format!("{}{}-", self.prefix, kind);
        let named = tempfile::Builder::new()
            .prefix(&prefix)
            .tempfile_in(&self.dir)
            .map_err(temp_err)?;
        let (file, path) = named.keep().map_err(|e| temp_err(e.error))?;

        self.live.lock().push(path.clone());
        debug!(path = %path.display(), "created temporary file");
        Ok((file, path))
    }

    /// Delete a registered file. Unknown paths are left alone.
    pub fn release(&self, path: &Path) {
        let owned = {
            let mut live = self.live.lock();
            match live.iter().position(|p| p == path) {
                Some(i) => Some(live.swap_remove(i)),
                None => None,
            }
        };
        if let Some(path) = owned {
            self.remove(&path);
        }
    }

    /// Delete everything still registered.
    pub fn cleanup(&self) {
        let pending: Vec<PathBuf> = self.live.lock().drain(..).collect();
        if !pending.is_empty() {
            debug!(files = pending.len(), "removing leftover temporary files");
        }
        for path in pending {
            self.remove(&path);
        }
    }

    pub fn pending(&self) -> usize {
        self.live.lock().len()
    }

    fn remove(&self, path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                warn!(path = %path.display(), error = %source, "cannot remove temporary file");
                self.reporter.report(SortError::Cleanup {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }
    }
}

impl Drop for TempRegistry {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// A sorted run on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpillFile {
    pub path: PathBuf,
    pub lines: usize,
}

/// What the spill stage produced.
#[derive(Debug)]
pub enum SpillOutcome {
    /// No input lines at all.
    Empty,
    /// Everything fit in one chunk; nothing touched the disk.
    InMemory(Vec<Line>),
    /// Sorted runs in arrival order.
    Spilled(Vec<SpillFile>),
}

/// Third pipeline stage: writes sorted chunks to temporary files.
pub struct SpillManager<'a> {
    registry: &'a TempRegistry,
    reporter: ErrorReporter,
    buffer_size: usize,
}

impl<'a> SpillManager<'a> {
    pub fn new(config: &SortConfig, registry: &'a TempRegistry, reporter: ErrorReporter) -> Self {
        Self {
            registry,
            reporter,
            buffer_size: config.io_buffer_size,
        }
    }

    /// Drain `chunks`. On the first spill failure the receiver is dropped,
    /// which stops the upstream stages, and the runs written so far are
    /// returned for a best-effort merge.
    pub fn run(&self, chunks: Receiver<SortedChunk>) -> SpillOutcome {
        let mut spilled = Vec::new();

        for chunk in chunks.iter() {
            if chunk.seq == 0 && chunk.last {
                debug!(lines = chunk.lines.len(), "input fits in one chunk, skipping disk");
                return SpillOutcome::InMemory(chunk.lines);
            }

            match self.spill(&chunk.lines) {
                Ok(file) => {
                    debug!(seq = chunk.seq, lines = file.lines, path = %file.path.display(), "spilled chunk");
                    spilled.push(file);
                }
                Err(err) => {
                    self.reporter.report(err);
                    break;
                }
            }
        }

        if spilled.is_empty() {
            SpillOutcome::Empty
        } else {
            info!(runs = spilled.len(), "spilled sorted runs");
            SpillOutcome::Spilled(spilled)
        }
    }

    /// Write one sorted chunk to a new temporary file. A partial file is
    /// removed before the error is returned.
    pub fn spill(&self, lines: &[Line]) -> SortResult<SpillFile> {
        let (file, path) = self.registry.create(TempKind::Chunk)?;
        self.fill(BufWriter::with_capacity(self.buffer_size, file), path, lines)
    }

    /// Write `lines` through `out`, the writer of the registered file at
    /// `path`. The writer is dropped before a failed file is released.
    fn fill<W: Write>(&self, out: W, path: PathBuf, lines: &[Line]) -> SortResult<SpillFile> {
        match write_lines(out, lines) {
            Ok(()) => Ok(SpillFile {
                path,
                lines: lines.len(),
            }),
            Err(source) => {
                self.registry.release(&path);
                Err(SortError::temp_write(&path, source))
            }
        }
    }
}

fn write_lines<W: Write>(mut out: W, lines: &[Line]) -> io::Result<()> {
    for line in lines {
        out.write_all(line.as_bytes())?;
        out.write_all(b"\n")?;
    }
    out.flush()
}
