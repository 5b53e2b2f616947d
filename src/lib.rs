//! External merge sort for text lines.
//!
//! Lines are read from any number of inputs, gathered into bounded chunks,
//! sorted in memory, spilled to temporary files when the input does not fit
//! in one chunk, and k-way merged back into a single ordered stream. Reading,
//! sorting and spilling run concurrently, connected by bounded queues.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]

pub mod error;
pub mod config;

// Engine stages
pub mod line;
pub mod compare;
pub mod source;
pub mod chunk;
pub mod spill;
pub mod merge;
pub mod report;
pub mod pipeline;
pub mod args;

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::Path;

// Re-export commonly used types
pub use error::{SortError, SortResult};
pub use config::{SortConfig, SortConfigBuilder, SortMode};
pub use pipeline::ExternalSorter;
pub use report::RunReport;

/// Exit codes matching GNU sort
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const SORT_FAILURE: i32 = 2;

/// Sort the configured input files, writing to the configured output file
/// or to stdout. Errors raised during the run are collected in the returned
/// report; `Err` means the run could not start at all.
pub fn sort(config: &SortConfig) -> SortResult<RunReport> {
    let sorter = ExternalSorter::new(config.clone())?;
    let buffer_size = config.io_buffer_size;

    let report = match &config.output_file {
        Some(path) if is_also_input(path, &config.input_files) => {
            // Inputs are fully consumed before the final merge writes, but the
            // file must not be truncated up front.
            let dir = Path::new(path)
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let staged = tempfile::Builder::new()
                .prefix(&config.temp_prefix)
                .tempfile_in(dir)
                .map_err(SortError::Output)?;
            let mut out = BufWriter::with_capacity(buffer_size, staged);
            let report = sorter.run(&mut out);
            if !report.fatal {
                let staged = out.into_inner().map_err(|e| SortError::Output(e.into_error()))?;
                staged.persist(path).map_err(|e| SortError::Output(e.error))?;
            }
            report
        }
        Some(path) => {
            let file = File::create(path).map_err(SortError::Output)?;
            let mut out = BufWriter::with_capacity(buffer_size, file);
            sorter.run(&mut out)
        }
        None => {
            let stdout = io::stdout();
            let mut out = BufWriter::with_capacity(buffer_size, stdout.lock());
            sorter.run(&mut out)
        }
    };
    Ok(report)
}

fn is_also_input(output: &str, inputs: &[String]) -> bool {
    let Ok(output) = Path::new(output).canonicalize() else {
        return false;
    };
    inputs
        .iter()
        .filter(|input| input.as_str() != "-")
        .filter_map(|input| Path::new(input).canonicalize().ok())
        .any(|input| input == output)
}

/// Size the global rayon pool used for parallel chunk sorting.
pub fn configure_thread_pool(config: &SortConfig) -> SortResult<()> {
    if let Some(threads) = config.parallel_threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .map_err(|e| SortError::thread_pool_error(&e.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_sort_to_output_file() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.txt");
        let output = dir.path().join("out.txt");
        fs::write(&input, "zebra\napple\nbanana\ncherry\n").unwrap();

        let config = SortConfig {
            input_files: vec![input.display().to_string()],
            ..SortConfig::default().with_output_file(Some(output.display().to_string()))
        };
        let report = sort(&config).unwrap();

        assert!(report.is_success());
        assert_eq!(fs::read_to_string(&output).unwrap(), "apple\nbanana\ncherry\nzebra\n");
    }

    #[test]
    fn test_sort_in_place_through_output_option() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.txt");
        fs::write(&path, "100\n20\n3\n1000\n").unwrap();
        let name = path.display().to_string();

        let config = SortConfig {
            input_files: vec![name.clone()],
            ..SortConfig::default()
                .with_mode(SortMode::Numeric)
                .with_output_file(Some(name))
        };
        let report = sort(&config).unwrap();

        assert!(report.is_success());
        assert_eq!(fs::read_to_string(&path).unwrap(), "3\n20\n100\n1000\n");
        assert!(is_also_input(path.to_str().unwrap(), &[path.display().to_string()]));
    }
}
