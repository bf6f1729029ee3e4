//! csv-split CLI - split a CSV file into header-preserving parts

use clap::Parser;
use csv_split::{
    Candidate, Level, LineTerminator, ProgressEvent, ProgressSink, Quote, SplitRequest, Splitter,
};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Split a CSV file into N parts, each starting with the original header.
///
/// The encoding is detected from utf-8-sig, gbk, gb2312, utf-8, cp936 and big5
/// (in that order) unless forced with --encoding. Parts are written in the
/// detected encoding as `{name}_part_{i}.csv`.
#[derive(Parser, Debug)]
#[command(name = "csv-split")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input CSV file to split
    file: String,

    /// Number of parts to produce
    #[arg(short = 'n', long, default_value = "3")]
    parts: String,

    /// Output directory (default: output_csv next to the input file)
    #[arg(short = 'o', long, default_value = "")]
    output: String,

    /// Force an encoding instead of detecting one
    #[arg(short = 'e', long)]
    encoding: Option<Candidate>,

    /// Field delimiter (single character)
    #[arg(short = 'd', long)]
    delimiter: Option<char>,

    /// Quote character (single character, or 'none')
    #[arg(short = 'q', long)]
    quote: Option<String>,

    /// End output records with LF instead of CRLF
    #[arg(long)]
    lf: bool,

    /// Pause between parts, in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Log engine diagnostics to stderr (RUST_LOG overrides)
    #[arg(short = 'v', long)]
    verbose: bool,
}

/// Prints events as they arrive; errors go to stderr.
struct TerminalSink;

impl ProgressSink for TerminalSink {
    fn on_event(&self, event: &ProgressEvent) {
        if event.level == Level::Error {
            eprintln!("{event}");
        } else {
            println!("{event}");
        }
    }

    fn on_busy(&self, _busy: bool) {}
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    let sink = TerminalSink;
    let Some(request) = SplitRequest::parse_or_report(&args.file, &args.parts, &args.output, &sink)
    else {
        return ExitCode::FAILURE;
    };

    let splitter = match build_splitter(&args) {
        Ok(splitter) => splitter,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match splitter.run(&request, &sink) {
        Ok(_) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}

fn build_splitter(args: &Args) -> Result<Splitter, String> {
    let mut splitter = Splitter::new();

    if let Some(encoding) = args.encoding {
        splitter.encoding(encoding);
    }

    if let Some(delim) = args.delimiter {
        splitter.delimiter(ascii_byte(delim, "delimiter")?);
    }

    if let Some(ref quote_str) = args.quote {
        if quote_str.eq_ignore_ascii_case("none") {
            splitter.quote(Quote::None);
        } else if let Some(c) = quote_str.chars().next() {
            splitter.quote(Quote::Some(ascii_byte(c, "quote")?));
        }
    }

    if args.lf {
        splitter.terminator(LineTerminator::Lf);
    }

    if let Some(ms) = args.delay_ms {
        splitter.part_delay(Duration::from_millis(ms));
    }

    Ok(splitter)
}

fn ascii_byte(c: char, what: &str) -> Result<u8, String> {
    if c.is_ascii() {
        Ok(c as u8)
    } else {
        Err(format!("{what} must be a single ASCII character, got {c:?}"))
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "csv_split=debug" } else { "off" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
