//! External sort driver: reader, sorter and spill/merge stages connected by
//! bounded queues.

use crate::chunk::ChunkBuilder;
use crate::compare::Comparator;
use crate::config::SortConfig;
use crate::error::SortResult;
use crate::merge::{MergeEngine, MergeInput};
use crate::report::{ErrorAggregator, ErrorReporter, RunReport};
use crate::source::{Input, LineSource};
use crate::spill::{SpillManager, SpillOutcome, TempRegistry};
use crossbeam_channel::bounded;
use std::io::Write;
use std::thread;
use tracing::{debug, info};

/// Sorts any number of inputs into one writer with bounded memory.
pub struct ExternalSorter {
    config: SortConfig,
    comparator: Comparator,
}

impl ExternalSorter {
    pub fn new(config: SortConfig) -> SortResult<Self> {
        config.validate()?;
        let comparator = Comparator::new(config.mode);
        Ok(Self { config, comparator })
    }

    /// Sort the configured inputs (paths, `-` for stdin, none for stdin)
    /// into `out`.
    ///
    /// Never returns early on error: every problem ends up in the report and
    /// all temporary files are gone by the time this returns.
    pub fn run<W: Write>(&self, out: &mut W) -> RunReport {
        let aggregator = ErrorAggregator::new(self.config.max_reported_errors);
        let reporter = aggregator.reporter();
        let registry = TempRegistry::new(&self.config, reporter.clone());

        debug!(
            mode = %self.config.mode,
            chunk_capacity = self.config.chunk_capacity,
            merge_degree = self.config.merge_degree,
            inputs = self.config.input_files.len(),
            temp_dir = %registry.dir().display(),
            "starting sort"
        );

        if let Err(err) = self.execute(out, &registry, &reporter) {
            reporter.report(err);
        }
        registry.cleanup();

        let report = aggregator.finish();
        info!(errors = report.total, fatal = report.fatal, "sort finished");
        report
    }

    fn execute<W: Write>(
        &self,
        out: &mut W,
        registry: &TempRegistry,
        reporter: &ErrorReporter,
    ) -> SortResult<()> {
        let config = &self.config;
        let (line_tx, line_rx) = bounded(config.line_queue_depth);
        let (chunk_tx, chunk_rx) = bounded(config.chunk_queue_depth);

        let outcome = thread::scope(|s| {
            let inputs = Input::from_args(&config.input_files);
            let source = LineSource::new(inputs, config, reporter.clone());
            s.spawn(move || source.run(line_tx));

            let builder = ChunkBuilder::new(config, self.comparator);
            s.spawn(move || builder.run(line_rx, chunk_tx));

            SpillManager::new(config, registry, reporter.clone()).run(chunk_rx)
        });

        let inputs = match outcome {
            SpillOutcome::Empty => Vec::new(),
            SpillOutcome::InMemory(lines) => vec![MergeInput::Memory(lines)],
            SpillOutcome::Spilled(files) => files.into_iter().map(MergeInput::Spill).collect(),
        };

        let engine = MergeEngine::new(config, self.comparator, registry, reporter.clone());
        let lines = engine.merge_all(inputs, out)?;
        debug!(lines, "output written");
        Ok(())
    }
}
