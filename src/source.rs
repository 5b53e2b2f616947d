//! Line source: turns the list of inputs into one stream of lines.

use crate::config::SortConfig;
use crate::error::{SortContext, SortError, SortResult};
use crate::line::Line;
use crate::report::ErrorReporter;
use crossbeam_channel::Sender;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use tracing::debug;

/// Where lines come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Stdin,
    File(PathBuf),
}

impl Input {
    /// `-` names standard input, anything else is a path.
    pub fn parse(arg: &str) -> Self {
        if arg == "-" {
            Input::Stdin
        } else {
            Input::File(PathBuf::from(arg))
        }
    }

    /// Inputs for a command line; no arguments means stdin.
    pub fn from_args(args: &[String]) -> Vec<Self> {
        if args.is_empty() {
            vec![Input::Stdin]
        } else {
            args.iter().map(|a| Input::parse(a)).collect()
        }
    }

    pub fn name(&self) -> String {
        match self {
            Input::Stdin => "-".to_string(),
            Input::File(path) => path.display().to_string(),
        }
    }

    fn open(&self, buffer_size: usize) -> SortResult<Box<dyn BufRead>> {
        match self {
            Input::Stdin => Ok(Box::new(BufReader::with_capacity(buffer_size, io::stdin()))),
            Input::File(path) => {
                let file = File::open(path).open_context(&self.name())?;
                Ok(Box::new(BufReader::with_capacity(buffer_size, file)))
            }
        }
    }
}

/// One physical line as read by [`LineReader`].
#[derive(Debug, PartialEq, Eq)]
pub enum RawLine {
    Complete(Vec<u8>),
    /// The line exceeded the limit and was discarded; `len` is its full length.
    TooLong { len: usize },
}

/// Reads lines without ever holding more than `max_len` bytes of one line.
pub struct LineReader<R> {
    inner: R,
    buf: Vec<u8>,
    max_len: usize,
    line_no: u64,
}

impl<R: BufRead> LineReader<R> {
    pub fn new(inner: R, max_len: usize) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            max_len,
            line_no: 0,
        }
    }

    /// Number of physical lines returned so far.
    pub fn line_number(&self) -> u64 {
        self.line_no
    }

    /// Next line with `\n` or `\r\n` stripped, `None` at end of input.
    pub fn next_line(&mut self) -> io::Result<Option<RawLine>> {
        self.buf.clear();
        let mut seen_any = false;
        let mut terminated = false;
        let mut overflow = false;
        let mut last_byte = None;
        let mut total = 0usize;

        loop {
            let used = {
                let available = match self.inner.fill_buf() {
                    Ok(bytes) => bytes,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                };
                if available.is_empty() {
                    break;
                }
                seen_any = true;

                let (segment, used) = match available.iter().position(|&b| b == b'\n') {
                    Some(i) => {
                        terminated = true;
                        (&available[..i], i + 1)
                    }
                    None => (available, available.len()),
                };
                if let Some(&b) = segment.last() {
                    last_byte = Some(b);
                }
                total += segment.len();

                // One spare byte for the '\r' of a CRLF terminator.
                if !overflow {
                    if total > self.max_len + 1 {
                        overflow = true;
                        self.buf.clear();
                    } else {
                        self.buf.extend_from_slice(segment);
                    }
                }
                used
            };
            self.inner.consume(used);
            if terminated {
                break;
            }
        }

        if !seen_any {
            return Ok(None);
        }
        self.line_no += 1;

        let crlf = terminated && last_byte == Some(b'\r');
        let len = if crlf { total - 1 } else { total };
        if overflow || len > self.max_len {
            self.buf.clear();
            return Ok(Some(RawLine::TooLong { len }));
        }
        if crlf {
            self.buf.pop();
        }
        Ok(Some(RawLine::Complete(std::mem::take(&mut self.buf))))
    }
}

/// First pipeline stage: reads every input in order and feeds lines downstream.
pub struct LineSource<'a> {
    inputs: Vec<Input>,
    config: &'a SortConfig,
    reporter: ErrorReporter,
}

impl<'a> LineSource<'a> {
    pub fn new(inputs: Vec<Input>, config: &'a SortConfig, reporter: ErrorReporter) -> Self {
        Self {
            inputs,
            config,
            reporter,
        }
    }

    /// Send every line to `tx`. Returns the number of lines sent; stops early
    /// when the receiving side has gone away.
    pub fn run(self, tx: Sender<Line>) -> u64 {
        let mut sent = 0;
        for input in &self.inputs {
            let name = input.name();
            let reader = match input.open(self.config.io_buffer_size) {
                Ok(reader) => reader,
                Err(err) => {
                    self.reporter.report(err);
                    continue;
                }
            };

            match self.drain(&name, reader, &tx) {
                Some(n) => {
                    debug!(input = %name, lines = n, "input drained");
                    sent += n;
                }
                None => {
                    debug!(input = %name, "downstream closed, stopping reader");
                    return sent;
                }
            }
        }
        sent
    }

    /// Returns `None` when the channel is closed.
    fn drain(&self, name: &str, reader: Box<dyn BufRead>, tx: &Sender<Line>) -> Option<u64> {
        let mut lines = LineReader::new(reader, self.config.max_line_length);
        let mut sent = 0;
        loop {
            match lines.next_line().read_context(name) {
                Ok(Some(RawLine::Complete(bytes))) => {
                    if tx.send(Line::new(bytes, self.config.mode)).is_err() {
                        return None;
                    }
                    sent += 1;
                }
                Ok(Some(RawLine::TooLong { len })) => {
                    self.reporter.report(SortError::LineTooLong {
                        input: name.to_string(),
                        line: lines.line_number(),
                        len,
                        limit: self.config.max_line_length,
                    });
                }
                Ok(None) => return Some(sent),
                Err(err) => {
                    self.reporter.report(err);
                    return Some(sent);
                }
            }
        }
    }
}
