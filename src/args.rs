use crate::config::{SortConfig, SortConfigBuilder, SortMode};
use crate::error::SortResult;
use std::path::PathBuf;

/// Command line arguments, already parsed into plain values
#[derive(Debug, Clone, Default)]
pub struct SortArgs {
    pub files: Vec<String>,
    pub output: Option<String>,
    pub numeric_sort: bool,
    pub temp_dir: Option<PathBuf>,
    pub chunk_lines: Option<usize>,
    pub batch_size: Option<usize>,
    pub max_line_length: Option<usize>,
    pub parallel: Option<usize>,
    pub verbose: bool,
}

impl SortArgs {
    /// Build and validate the run configuration
    pub fn to_config(&self) -> SortResult<SortConfig> {
        let mode = if self.numeric_sort {
            SortMode::Numeric
        } else {
            SortMode::Lexicographic
        };
        let mut builder = SortConfigBuilder::new()
            .mode(mode)
            .input_files(self.files.clone());

        if let Some(lines) = self.chunk_lines {
            builder = builder.chunk_capacity(lines);
        }
        if let Some(degree) = self.batch_size {
            builder = builder.merge_degree(degree);
        }
        if let Some(bytes) = self.max_line_length {
            builder = builder.max_line_length(bytes);
        }
        if let Some(dir) = &self.temp_dir {
            builder = builder.temp_dir(dir.clone());
        }
        if let Some(output) = &self.output {
            builder = builder.output_file(output.clone());
        }
        if let Some(threads) = self.parallel {
            builder = builder.parallel_threads(threads);
        }

        builder.build()
    }
}
