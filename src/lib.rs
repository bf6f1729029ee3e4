//! csv-split: split a large CSV file into header-preserving parts
//!
//! Built for files of unknown provenance: the encoding is picked from a fixed
//! list of candidates common in Chinese-locale exports (UTF-8 with or without a
//! BOM, GBK and its aliases, Big5), and malformed bytes trigger a tolerant
//! retry rather than an abort.
//!
//! # Quick Start
//!
//! ```no_run
//! use csv_split::run_split;
//!
//! let summary = run_split(
//!     "orders.csv",
//!     3,
//!     "output_csv",
//!     |message, level| println!("{level}: {message}"),
//!     |busy| println!("busy = {busy}"),
//! );
//!
//! if let Ok(summary) = summary {
//!     for part in &summary.report.parts {
//!         println!("{} ({} rows)", part.path.display(), part.rows);
//!     }
//! }
//! ```
//!
//! # Background Execution
//!
//! ```no_run
//! use std::sync::mpsc;
//! use csv_split::{Message, SplitRequest, Splitter};
//!
//! let (tx, rx) = mpsc::channel();
//! let request = SplitRequest::parse("orders.csv", "4", "").unwrap();
//! let handle = Splitter::new().spawn(request, tx).unwrap();
//!
//! for message in rx {
//!     match message {
//!         Message::Event(event) => println!("{event}"),
//!         Message::Busy(false) => break,
//!         Message::Busy(true) => {}
//!     }
//! }
//! let outcome = handle.join();
//! ```
//!
//! # How a Split Runs
//!
//! 1. Pick the first candidate encoding that decodes the first 2048 characters
//!    cleanly (falling back to GBK)
//! 2. Count raw lines, retrying tolerantly if an undecodable byte turns up
//! 3. Compute `chunk_size = ceil(data_rows / parts)`
//! 4. Stream the file once, writing the header plus `chunk_size` records to
//!    each part, restarting tolerantly on a decode failure

mod counter;
mod encoding;
mod error;
mod format;
mod plan;
mod progress;
mod request;
mod splitter;
mod transcode;
mod writer;

// Re-export public API
pub use error::{Result, SplitError, TranscodeError};
pub use format::{CsvFormat, LineTerminator, Quote};
pub use progress::{EventLog, FnSink, Level, Message, ProgressEvent, ProgressSink};
pub use request::{SplitRequest, ValidationError, DEFAULT_OUTPUT_DIR};
pub use splitter::{run_split, SplitHandle, SplitSummary, Splitter};

// Re-export the individual stages for callers that drive them directly
pub use counter::{count_lines, LineCount};
pub use encoding::{
    Candidate, Detection, EncodingDetector, DEFAULT_CANDIDATES, FALLBACK, PROBE_CHARS,
};
pub use plan::{chunk_size, SplitPlan};
pub use progress::{BusyGuard, Emitter};
pub use transcode::{DecodeMode, DecodeReader, EncodeWriter};
pub use writer::{part_file_name, PartInfo, PartWriter, SplitReport, SplitWriter};
