//! `sort`: memory-bounded external merge sort of text lines.

use std::path::PathBuf;
use std::process;

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use xsort::{
    args::SortArgs,
    configure_thread_pool,
    error::SortResult,
    report::RunReport,
    sort,
};

fn main() {
    let matches = build_cli().get_matches();
    let args = args_from_matches(&matches);
    setup_logging(args.verbose);

    match run(&args) {
        Ok(report) => {
            print_errors(&report);
            process::exit(report.exit_code());
        }
        Err(e) => {
            eprintln!("sort: {}", e);
            process::exit(e.exit_code());
        }
    }
}

fn run(args: &SortArgs) -> SortResult<RunReport> {
    let config = args.to_config()?;
    configure_thread_pool(&config)?;
    sort(&config)
}

fn print_errors(report: &RunReport) {
    for err in &report.errors {
        eprintln!("sort: {}", err);
    }
    if report.dropped() > 0 {
        eprintln!("sort: ... {} earlier errors not shown", report.dropped());
    }
}

/// Logs go to stderr; `RUST_LOG` takes precedence over `-v`.
fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("xsort={level}")));

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();

    // Only fails if a subscriber is already installed.
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn build_cli() -> Command {
    Command::new("sort")
        .version(env!("CARGO_PKG_VERSION"))
        .override_usage("sort [OPTION]... [FILE]...")
        .about("Sort lines of text files")
        .long_about("Sort lines of text files, spilling sorted runs to temporary files when the input does not fit in memory.\n\nWith no FILE, or when FILE is -, read standard input.")

        // Input files
        .arg(Arg::new("files")
            .help("Input files to sort (use '-' or omit for stdin)")
            .num_args(0..)
            .value_name("FILE"))

        // Ordering
        .arg(Arg::new("numeric-sort")
            .short('n')
            .long("numeric-sort")
            .help("Compare by leading integer, then by the whole line")
            .action(ArgAction::SetTrue))

        // I/O options
        .arg(Arg::new("output")
            .short('o')
            .long("output")
            .help("Write result to FILE instead of standard output")
            .value_name("FILE"))
        .arg(Arg::new("temporary-directory")
            .short('T')
            .long("temporary-directory")
            .help("Use DIR for temporaries, not $TMPDIR or /tmp")
            .value_name("DIR")
            .value_parser(value_parser!(PathBuf)))

        // Memory and merge tuning
        .arg(Arg::new("chunk-lines")
            .short('S')
            .long("chunk-lines")
            .help("Sort at most N lines in memory at once [default: 500000]")
            .value_name("N")
            .value_parser(value_parser!(usize)))
        .arg(Arg::new("batch-size")
            .long("batch-size")
            .help("Merge at most N sorted runs at once [default: 10]")
            .value_name("N")
            .value_parser(value_parser!(usize)))
        .arg(Arg::new("max-line-length")
            .long("max-line-length")
            .help("Skip lines longer than N bytes [default: 4096]")
            .value_name("N")
            .value_parser(value_parser!(usize)))
        .arg(Arg::new("parallel")
            .long("parallel")
            .help("Change the number of sorts run concurrently to N")
            .value_name("N")
            .value_parser(value_parser!(usize)))

        .arg(Arg::new("verbose")
            .short('v')
            .long("verbose")
            .help("Log pipeline progress to standard error")
            .action(ArgAction::SetTrue))
}

fn args_from_matches(matches: &ArgMatches) -> SortArgs {
    SortArgs {
        files: matches
            .get_many::<String>("files")
            .unwrap_or_default()
            .cloned()
            .collect(),
        output: matches.get_one::<String>("output").cloned(),
        numeric_sort: matches.get_flag("numeric-sort"),
        temp_dir: matches.get_one::<PathBuf>("temporary-directory").cloned(),
        chunk_lines: matches.get_one::<usize>("chunk-lines").copied(),
        batch_size: matches.get_one::<usize>("batch-size").copied(),
        max_line_length: matches.get_one::<usize>("max-line-length").copied(),
        parallel: matches.get_one::<usize>("parallel").copied(),
        verbose: matches.get_flag("verbose"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xsort::config::SortMode;

    #[test]
    fn test_parse_basic_config() {
        let matches = build_cli()
            .try_get_matches_from(["sort", "-n", "a.txt", "-", "b.txt"])
            .expect("Failed to parse test arguments");
        let args = args_from_matches(&matches);

        assert!(args.numeric_sort);
        assert_eq!(args.files, vec!["a.txt", "-", "b.txt"]);
        let config = args.to_config().expect("Failed to build test config");
        assert_eq!(config.mode, SortMode::Numeric);
    }

    #[test]
    fn test_parse_tuning_options() {
        let matches = build_cli()
            .try_get_matches_from([
                "sort",
                "-S", "1",
                "--batch-size", "2",
                "--max-line-length", "80",
                "-o", "out.txt",
                "-v",
            ])
            .expect("Failed to parse test arguments");
        let args = args_from_matches(&matches);

        assert_eq!(args.chunk_lines, Some(1));
        assert_eq!(args.batch_size, Some(2));
        assert_eq!(args.max_line_length, Some(80));
        assert_eq!(args.output.as_deref(), Some("out.txt"));
        assert!(args.verbose);
        assert!(args.files.is_empty());
    }

    #[test]
    fn test_rejects_non_numeric_sizes() {
        assert!(build_cli()
            .try_get_matches_from(["sort", "--batch-size", "many"])
            .is_err());
    }

    #[test]
    fn test_degenerate_batch_size_fails_config() {
        let matches = build_cli()
            .try_get_matches_from(["sort", "--batch-size", "1"])
            .expect("Failed to parse test arguments");
        let err = args_from_matches(&matches).to_config().unwrap_err();
        assert_eq!(err.exit_code(), xsort::SORT_FAILURE);
    }
}
