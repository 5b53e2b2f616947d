//! Error collection shared by every pipeline stage.
//!
//! Stages never stop on a recoverable error: they hand it to an
//! [`ErrorReporter`] and keep going. Fatal errors additionally set a latch
//! that other stages consult before creating new temporary files.

use crate::error::SortError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

struct Shared {
    total: AtomicUsize,
    fatal: AtomicBool,
    recent: Mutex<VecDeque<SortError>>,
    retain: usize,
}

/// Owner of the error state for one run.
pub struct ErrorAggregator {
    shared: Arc<Shared>,
}

/// Handle given to each stage for reporting errors.
#[derive(Clone)]
pub struct ErrorReporter {
    shared: Arc<Shared>,
}

/// What a finished run reports back.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Most recent errors, oldest first
    pub errors: Vec<SortError>,
    /// Number of errors reported, including ones no longer retained
    pub total: usize,
    /// Whether any fatal error occurred
    pub fatal: bool,
}

impl ErrorAggregator {
    /// Keep at most `retain` messages; the count is always exact.
    pub fn new(retain: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                total: AtomicUsize::new(0),
                fatal: AtomicBool::new(false),
                recent: Mutex::new(VecDeque::new()),
                retain: retain.max(1),
            }),
        }
    }

    pub fn reporter(&self) -> ErrorReporter {
        ErrorReporter {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn finish(self) -> RunReport {
        let errors = self.shared.recent.lock().drain(..).collect();
        RunReport {
            errors,
            total: self.shared.total.load(Ordering::SeqCst),
            fatal: self.shared.fatal.load(Ordering::SeqCst),
        }
    }
}

impl ErrorReporter {
    pub fn report(&self, err: SortError) {
        if err.is_fatal() {
            self.shared.fatal.store(true, Ordering::SeqCst);
            warn!(error = %err, "fatal error");
        } else {
            debug!(error = %err, "recoverable error");
        }
        self.shared.total.fetch_add(1, Ordering::SeqCst);

        let mut recent = self.shared.recent.lock();
        if recent.len() == self.shared.retain {
            recent.pop_front();
        }
        recent.push_back(err);
    }

    /// True once any fatal error has been reported.
    pub fn fatal_latched(&self) -> bool {
        self.shared.fatal.load(Ordering::SeqCst)
    }
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.total == 0
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            crate::EXIT_SUCCESS
        } else {
            crate::EXIT_FAILURE
        }
    }

    /// Errors no longer held because the retention limit was reached.
    pub fn dropped(&self) -> usize {
        self.total.saturating_sub(self.errors.len())
    }
}
