//! Configuration management for sort runs

use crate::error::{SortError, SortResult};
use std::path::PathBuf;

/// Lines held in memory before a chunk is sorted and spilled.
pub const DEFAULT_CHUNK_CAPACITY: usize = 500_000;
/// Sorted runs merged at once.
pub const DEFAULT_MERGE_DEGREE: usize = 10;
/// Longest accepted line, in bytes, terminator excluded.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 4096;
/// Buffer size for output and spill-file writers.
pub const DEFAULT_IO_BUFFER_SIZE: usize = 8 * 1024;
pub const DEFAULT_LINE_QUEUE_DEPTH: usize = 4096;
pub const DEFAULT_CHUNK_QUEUE_DEPTH: usize = 1;
pub const DEFAULT_TEMP_PREFIX: &str = "xsort-";
pub const DEFAULT_MAX_REPORTED_ERRORS: usize = 100;

/// Main configuration structure for sort runs
#[derive(Debug, Clone)]
pub struct SortConfig {
    /// Line comparison mode
    pub mode: SortMode,
    /// Maximum number of lines per in-memory chunk
    pub chunk_capacity: usize,
    /// Maximum number of sorted runs merged in one pass
    pub merge_degree: usize,
    /// Longest line accepted from input
    pub max_line_length: usize,
    /// Buffer size for I/O operations
    pub io_buffer_size: usize,
    /// Capacity of the reader -> sorter queue, in lines
    pub line_queue_depth: usize,
    /// Capacity of the sorter -> spill queue, in chunks
    pub chunk_queue_depth: usize,
    /// Temporary directory for spill files
    pub temp_dir: Option<PathBuf>,
    /// Prefix of every temporary file name
    pub temp_prefix: String,
    /// Sort large chunks on the rayon pool
    pub parallel: bool,
    /// Number of rayon worker threads
    pub parallel_threads: Option<usize>,
    /// Output file path
    pub output_file: Option<String>,
    /// Input files (empty means stdin)
    pub input_files: Vec<String>,
    /// How many error messages are retained for the final report
    pub max_reported_errors: usize,
}

/// Sort mode enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMode {
    /// Byte-wise ordering of the whole line
    Lexicographic,
    /// Leading signed integer, then the whole line
    Numeric,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            mode: SortMode::Lexicographic,
            chunk_capacity: DEFAULT_CHUNK_CAPACITY,
            merge_degree: DEFAULT_MERGE_DEGREE,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            io_buffer_size: DEFAULT_IO_BUFFER_SIZE,
            line_queue_depth: DEFAULT_LINE_QUEUE_DEPTH,
            chunk_queue_depth: DEFAULT_CHUNK_QUEUE_DEPTH,
            temp_dir: None,
            temp_prefix: DEFAULT_TEMP_PREFIX.to_string(),
            parallel: num_cpus::get() > 1,
            parallel_threads: None,
            output_file: None,
            input_files: Vec::new(),
            max_reported_errors: DEFAULT_MAX_REPORTED_ERRORS,
        }
    }
}

impl SortConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sort mode
    pub fn with_mode(mut self, mode: SortMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_chunk_capacity(mut self, lines: usize) -> Self {
        self.chunk_capacity = lines;
        self
    }

    pub fn with_merge_degree(mut self, degree: usize) -> Self {
        self.merge_degree = degree;
        self
    }

    pub fn with_max_line_length(mut self, bytes: usize) -> Self {
        self.max_line_length = bytes;
        self
    }

    /// Set the directory for spill files
    pub fn with_temp_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.temp_dir = dir;
        self
    }

    /// Set output file
    pub fn with_output_file(mut self, output_file: Option<String>) -> Self {
        self.output_file = output_file;
        self
    }

    /// Validate configuration for consistency
    pub fn validate(&self) -> SortResult<()> {
        if self.chunk_capacity == 0 {
            return Err(SortError::invalid_config(
                "chunk capacity must be at least one line",
            ));
        }

        // A degree of one would never shrink the pending run list.
        if self.merge_degree < 2 {
            return Err(SortError::invalid_config(
                "merge degree must be at least 2",
            ));
        }

        if self.max_line_length == 0 {
            return Err(SortError::invalid_config(
                "maximum line length must be positive",
            ));
        }

        if self.io_buffer_size == 0 || self.line_queue_depth == 0 || self.chunk_queue_depth == 0 {
            return Err(SortError::invalid_config(
                "buffer and queue sizes must be positive",
            ));
        }

        if let Some(dir) = &self.temp_dir {
            if !dir.is_dir() {
                return Err(SortError::invalid_config(&format!(
                    "temporary directory {} does not exist",
                    dir.display()
                )));
            }
        }

        // Validate thread count
        if let Some(threads) = self.parallel_threads {
            if threads == 0 {
                return Err(SortError::thread_pool_error(
                    "thread count must be positive",
                ));
            }
            if threads > 1024 {
                return Err(SortError::thread_pool_error(
                    "too many threads (maximum 1024)",
                ));
            }
        }

        Ok(())
    }

    /// Directory where spill files are created: the explicit setting, else
    /// the platform temporary directory (`$TMPDIR` on Unix).
    pub fn effective_temp_dir(&self) -> PathBuf {
        match &self.temp_dir {
            Some(dir) => dir.clone(),
            None => std::env::temp_dir(),
        }
    }
}

impl std::fmt::Display for SortMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SortMode::Lexicographic => "lexicographic",
            SortMode::Numeric => "numeric",
        };
        write!(f, "{name}")
    }
}

/// Builder pattern for creating configurations
pub struct SortConfigBuilder {
    config: SortConfig,
}

impl SortConfigBuilder {
    /// Start building a new configuration
    pub fn new() -> Self {
        Self {
            config: SortConfig::default(),
        }
    }

    /// Set sort mode
    pub fn mode(mut self, mode: SortMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Lines per in-memory chunk
    pub fn chunk_capacity(mut self, lines: usize) -> Self {
        self.config.chunk_capacity = lines;
        self
    }

    /// Merge fan-in
    pub fn merge_degree(mut self, degree: usize) -> Self {
        self.config.merge_degree = degree;
        self
    }

    pub fn max_line_length(mut self, bytes: usize) -> Self {
        self.config.max_line_length = bytes;
        self
    }

    /// Set the spill directory
    pub fn temp_dir(mut self, dir: PathBuf) -> Self {
        self.config.temp_dir = Some(dir);
        self
    }

    /// Set output file
    pub fn output_file(mut self, file: String) -> Self {
        self.config.output_file = Some(file);
        self
    }

    /// Files to sort, in order; empty means stdin
    pub fn input_files(mut self, files: Vec<String>) -> Self {
        self.config.input_files = files;
        self
    }

    /// Set worker threads, enabling parallel chunk sorting when more than one
    pub fn parallel_threads(mut self, threads: usize) -> Self {
        self.config.parallel_threads = Some(threads);
        self.config.parallel = threads > 1;
        self
    }

    /// Build the final configuration
    pub fn build(self) -> SortResult<SortConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for SortConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
