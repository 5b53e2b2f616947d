//! Error handling for the sort engine

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Every condition a sort run can report.
///
/// Errors are split in two classes. Recoverable ones (an unreadable input, an
/// overlong line, a temp file that could not be removed) are collected and the
/// run carries on. Fatal ones stop the stage that raised them; cleanup of
/// temporary files still happens.
#[derive(Error, Debug)]
pub enum SortError {
    #[error("{input}: {source}")]
    InputOpen {
        input: String,
        #[source]
        source: io::Error,
    },

    #[error("{input}: read error: {source}")]
    InputRead {
        input: String,
        #[source]
        source: io::Error,
    },

    #[error("{input}:{line}: line is too long ({len} bytes, limit {limit}): skipped")]
    LineTooLong {
        input: String,
        line: u64,
        len: usize,
        limit: usize,
    },

    #[error("cannot create temporary file in {}: {source}", .dir.display())]
    TempCreate {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write temporary file {}: {source}", .path.display())]
    TempWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot read temporary file {}: {source}", .path.display())]
    TempRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("temporary storage unavailable after an earlier failure")]
    TempRefused,

    #[error("write error: {0}")]
    Output(#[source] io::Error),

    #[error("cannot remove temporary file {}: {source}", .path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Thread pool error: {message}")]
    ThreadPoolError { message: String },

}

impl SortError {
    /// Whether this error stops the stage that raised it.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SortError::InputOpen { .. }
                | SortError::InputRead { .. }
                | SortError::LineTooLong { .. }
                | SortError::Cleanup { .. }
        )
    }

    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            SortError::InvalidConfig { .. }
            | SortError::ThreadPoolError { .. } => crate::SORT_FAILURE,

            _ => crate::EXIT_FAILURE,
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(message: &str) -> Self {
        SortError::InvalidConfig {
            message: message.to_string(),
        }
    }

    /// Create a thread pool error
    pub fn thread_pool_error(message: &str) -> Self {
        SortError::ThreadPoolError {
            message: message.to_string(),
        }
    }

    pub fn temp_write(path: &Path, source: io::Error) -> Self {
        SortError::TempWrite {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn temp_read(path: &Path, source: io::Error) -> Self {
        SortError::TempRead {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result type for sort operations
pub type SortResult<T> = Result<T, SortError>;

/// Context trait for attaching input names to raw I/O errors
pub trait SortContext<T> {
    /// Failure to open the named input
    fn open_context(self, input: &str) -> SortResult<T>;

    /// Failure while reading from the named input
    fn read_context(self, input: &str) -> SortResult<T>;
}

impl<T> SortContext<T> for Result<T, io::Error> {
    fn open_context(self, input: &str) -> SortResult<T> {
        self.map_err(|source| SortError::InputOpen {
            input: input.to_string(),
            source,
        })
    }

    fn read_context(self, input: &str) -> SortResult<T> {
        self.map_err(|source| SortError::InputRead {
            input: input.to_string(),
            source,
        })
    }
}
