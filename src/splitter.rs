//! Main Splitter builder and the end-to-end split pipeline.
//!
//! Detection, counting, planning and writing run in order, each reporting
//! through the caller's [`ProgressSink`]. Every failure is funnelled into one
//! terminal event, and the busy flag is cleared on every exit path.

use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::counter::{count_lines_with_retry, open_source};
use crate::encoding::{Candidate, DEFAULT_CANDIDATES, EncodingDetector, PROBE_CHARS};
use crate::error::{Result, SplitError};
use crate::format::{CsvFormat, LineTerminator, Quote};
use crate::plan::SplitPlan;
use crate::progress::{BusyGuard, Emitter, FnSink, Level, ProgressSink};
use crate::request::SplitRequest;
use crate::writer::{SplitReport, SplitWriter};

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitSummary {
    pub encoding: Candidate,
    pub plan: SplitPlan,
    pub report: SplitReport,
    pub output_dir: PathBuf,
}

/// Splits CSV files into header-preserving parts.
///
/// # Example
///
/// ```no_run
/// use csv_split::{EventLog, SplitRequest, Splitter};
///
/// let log = EventLog::new();
/// let request = SplitRequest::new("orders.csv", 4, "out");
/// let summary = Splitter::new().delimiter(b';').run(&request, &log);
///
/// for event in log.events() {
///     println!("{event}");
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Splitter {
    candidates: Vec<Candidate>,
    forced_encoding: Option<Candidate>,
    probe_chars: usize,
    format: CsvFormat,
    part_delay: Option<Duration>,
}

impl Default for Splitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Splitter {
    /// Create a new Splitter with default settings.
    pub fn new() -> Self {
        Self {
            candidates: DEFAULT_CANDIDATES.to_vec(),
            forced_encoding: None,
            probe_chars: PROBE_CHARS,
            format: CsvFormat::default(),
            part_delay: None,
        }
    }

    /// Set the encodings tried during detection, in priority order.
    pub fn candidates(&mut self, candidates: Vec<Candidate>) -> &mut Self {
        self.candidates = candidates;
        self
    }

    /// Skip detection and use this encoding.
    pub fn encoding(&mut self, encoding: Candidate) -> &mut Self {
        self.forced_encoding = Some(encoding);
        self
    }

    /// Set the detection probe window, in decoded characters.
    pub fn probe_chars(&mut self, probe_chars: usize) -> &mut Self {
        self.probe_chars = probe_chars;
        self
    }

    /// Set the field delimiter.
    pub fn delimiter(&mut self, delimiter: u8) -> &mut Self {
        self.format.delimiter = delimiter;
        self
    }

    /// Set the quote character.
    pub fn quote(&mut self, quote: Quote) -> &mut Self {
        self.format.quote = quote;
        self
    }

    /// Set the record terminator for output parts.
    pub fn terminator(&mut self, terminator: LineTerminator) -> &mut Self {
        self.format.terminator = terminator;
        self
    }

    /// Pause after each written part, for callers that animate progress.
    pub fn part_delay(&mut self, delay: Duration) -> &mut Self {
        self.part_delay = Some(delay);
        self
    }

    /// Run a split on the current thread.
    ///
    /// `sink` sees `on_busy(true)` first and `on_busy(false)` last, whatever
    /// happens in between. Failures also arrive as a single error event; the
    /// returned value is for callers that want the details.
    pub fn run(&self, request: &SplitRequest, sink: &dyn ProgressSink) -> Result<SplitSummary> {
        self.run_guarded(request, sink, &AtomicBool::new(false))
    }

    /// Run a split on a background thread.
    pub fn spawn<S>(&self, request: SplitRequest, sink: S) -> Result<SplitHandle>
    where
        S: ProgressSink + 'static,
    {
        let splitter = self.clone();
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);

        let thread = thread::Builder::new()
            .name("csv-split".to_string())
            .spawn(move || splitter.run_guarded(&request, &sink, &flag))?;

        Ok(SplitHandle { cancel, thread })
    }

    fn run_guarded(
        &self,
        request: &SplitRequest,
        sink: &dyn ProgressSink,
        cancel: &AtomicBool,
    ) -> Result<SplitSummary> {
        let _busy = BusyGuard::new(sink);
        let emitter = Emitter::new(sink);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.pipeline(request, &emitter, cancel)
        }))
        .unwrap_or_else(|payload| Err(SplitError::Panicked(panic_message(payload.as_ref()))));

        // A sink that panics on the final event must not unwind into the caller.
        let reported =
            panic::catch_unwind(AssertUnwindSafe(|| report_outcome(&emitter, &outcome)));
        if let Err(payload) = reported {
            tracing::error!(panic = %panic_message(payload.as_ref()), "progress sink panicked");
        }

        outcome
    }

    fn pipeline(
        &self,
        request: &SplitRequest,
        emitter: &Emitter<'_>,
        cancel: &AtomicBool,
    ) -> Result<SplitSummary> {
        let source = request.source.as_path();
        emitter.info(format!("Starting: {}", display_name(source)));
        self.format.validate()?;

        // Fail on an unreadable source before anything is written.
        drop(open_source(source)?);

        let candidate = self.resolve_encoding(source, emitter);

        emitter.info("Counting rows (this may take a while)...");
        let count = count_lines_with_retry(source, candidate, emitter)?;
        let plan = SplitPlan::new(count.data_rows(), request.num_parts)?;
        emitter.info(format!(
            "Data rows: {} | Parts: {} | Rows per part: ~{} | Expected files: {}",
            plan.data_rows,
            plan.num_parts,
            plan.chunk_size,
            plan.expected_parts()
        ));

        let output_dir = request.output_dir.as_path();
        if !output_dir.is_dir() {
            fs::create_dir_all(output_dir)?;
            emitter.info(format!("Created output directory: {}", output_dir.display()));
        }

        let writer = SplitWriter::new(source, output_dir, candidate, plan)
            .format(self.format)
            .part_delay(self.part_delay);
        let report = writer.write_with_retry(emitter, cancel)?;

        tracing::info!(
            parts = report.parts.len(),
            rows = report.total_rows(),
            mode = ?report.mode,
            "split complete"
        );

        Ok(SplitSummary {
            encoding: candidate,
            plan,
            report,
            output_dir: output_dir.to_path_buf(),
        })
    }

    fn resolve_encoding(&self, source: &Path, emitter: &Emitter<'_>) -> Candidate {
        if let Some(candidate) = self.forced_encoding {
            emitter.info(format!("Using encoding: {candidate}"));
            return candidate;
        }

        emitter.info("Detecting file encoding...");
        let mut detector = EncodingDetector::new();
        detector
            .candidates(self.candidates.clone())
            .probe_chars(self.probe_chars);
        let detection = detector.detect(source);

        if detection.fell_back {
            let hint = detection
                .guess
                .map(|enc| format!(" (content looks like {})", enc.name()))
                .unwrap_or_default();
            emitter.warning(format!(
                "No candidate encoding decoded cleanly{hint}; falling back to {}",
                detection.candidate
            ));
        } else {
            emitter.info(format!("Detected encoding: {}", detection.candidate));
        }
        detection.candidate
    }
}

fn report_outcome(emitter: &Emitter<'_>, outcome: &Result<SplitSummary>) {
    match outcome {
        Ok(summary) => emitter.success(format!(
            "Done! Files saved in: {}",
            summary.output_dir.display()
        )),
        Err(e @ SplitError::Cancelled { .. }) => emitter.warning(format!("Stopped: {e}")),
        Err(
            e @ (SplitError::NoDataRows
            | SplitError::Open { .. }
            | SplitError::InvalidConfig(_)),
        ) => emitter.error(format!("Error: {e}")),
        Err(e) => {
            tracing::error!(error = %e, "split failed");
            emitter.error(format!("Unexpected error: {e}"));
        }
    }
}

/// A split running on a background thread.
pub struct SplitHandle {
    cancel: Arc<AtomicBool>,
    thread: JoinHandle<Result<SplitSummary>>,
}

impl SplitHandle {
    /// Ask the split to stop before its next part. Parts already written stay.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the split and return its outcome.
    pub fn join(self) -> Result<SplitSummary> {
        self.thread
            .join()
            .unwrap_or_else(|payload| Err(SplitError::Panicked(panic_message(payload.as_ref()))))
    }
}

/// Split `source` into `num_parts` parts under `output_dir`, reporting through
/// two callbacks: `on_event(message, level)` and `on_busy(busy)`.
///
/// `on_busy` is called exactly twice, `true` then `false`.
pub fn run_split<E, B>(
    source: impl AsRef<Path>,
    num_parts: usize,
    output_dir: impl AsRef<Path>,
    on_event: E,
    on_busy: B,
) -> Result<SplitSummary>
where
    E: Fn(&str, Level) + Send,
    B: Fn(bool) + Send,
{
    let sink = FnSink::new(on_event, on_busy);
    let request = SplitRequest::new(source.as_ref(), num_parts, output_dir.as_ref());
    Splitter::new().run(&request, &sink)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{EventLog, ProgressEvent};
    use tempfile::TempDir;

    #[test]
    fn test_splitter_builder() {
        let mut splitter = Splitter::new();
        splitter
            .delimiter(b';')
            .quote(Quote::None)
            .terminator(LineTerminator::Lf)
            .encoding(Candidate::Big5)
            .probe_chars(512);

        assert_eq!(splitter.format.delimiter, b';');
        assert_eq!(splitter.format.quote, Quote::None);
        assert_eq!(splitter.format.terminator, LineTerminator::Lf);
        assert_eq!(splitter.forced_encoding, Some(Candidate::Big5));
        assert_eq!(splitter.probe_chars, 512);
    }

    #[test]
    fn test_missing_source_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        let request = SplitRequest::new(dir.path().join("nope.csv"), 3, &out);
        let log = EventLog::new();

        let result = Splitter::new().run(&request, &log);

        assert!(matches!(result, Err(SplitError::Open { .. })));
        assert!(!out.exists());
        assert_eq!(log.messages(Level::Error).len(), 1);
        assert_eq!(log.busy_transitions(), vec![true, false]);
    }

    #[test]
    fn test_forced_encoding_skips_detection() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.csv");
        fs::write(&source, "h\n1\n2\n").unwrap();
        let log = EventLog::new();

        let summary = Splitter::new()
            .encoding(Candidate::Utf8)
            .run(&SplitRequest::new(&source, 2, dir.path().join("out")), &log)
            .unwrap();

        assert_eq!(summary.encoding, Candidate::Utf8);
        assert!(
            log.messages(Level::Info)
                .iter()
                .all(|m| !m.starts_with("Detecting"))
        );
    }

    #[test]
    fn test_plan_event_reports_expected_files() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.csv");
        let mut content = String::from("h\n");
        for i in 0..9 {
            content.push_str(&format!("{i}\n"));
        }
        fs::write(&source, content).unwrap();
        let log = EventLog::new();

        let summary = Splitter::new()
            .run(&SplitRequest::new(&source, 4, dir.path().join("out")), &log)
            .unwrap();

        assert_eq!(summary.report.parts.len(), 3);
        let infos = log.messages(Level::Info);
        assert!(
            infos
                .iter()
                .any(|m| m == "Data rows: 9 | Parts: 4 | Rows per part: ~3 | Expected files: 3")
        );
    }

    #[test]
    fn test_non_ascii_delimiter_is_config_error() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.csv");
        fs::write(&source, "h\n1\n").unwrap();
        let out = dir.path().join("out");
        let log = EventLog::new();

        let result = Splitter::new()
            .delimiter(0xA7)
            .run(&SplitRequest::new(&source, 1, &out), &log);

        assert!(matches!(result, Err(SplitError::InvalidConfig(_))));
        assert!(!out.exists());
        let errors = log.messages(Level::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Error: "));
    }

    /// Panics on the final success event.
    struct PanicOnSuccess(EventLog);

    impl ProgressSink for PanicOnSuccess {
        fn on_event(&self, event: &ProgressEvent) {
            if event.level == Level::Success {
                panic!("sink failed");
            }
            self.0.on_event(event);
        }

        fn on_busy(&self, busy: bool) {
            self.0.on_busy(busy);
        }
    }

    #[test]
    fn test_panicking_sink_does_not_escape() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.csv");
        fs::write(&source, "h\n1\n2\n").unwrap();
        let sink = PanicOnSuccess(EventLog::new());

        let request = SplitRequest::new(&source, 2, dir.path().join("out"));
        let result = Splitter::new().run(&request, &sink);

        assert!(result.is_ok());
        assert_eq!(sink.0.busy_transitions(), vec![true, false]);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
