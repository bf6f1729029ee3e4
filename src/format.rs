use std::fmt;
use std::io::{self, Read};

use csv::{ByteRecord, QuoteStyle, ReaderBuilder, Terminator, WriterBuilder};

use crate::error::{Result, SplitError};

/// Stands in for a blank source line. Decoded input is valid UTF-8, so this
/// byte never appears in real data.
pub(crate) const BLANK_LINE: u8 = 0xFF;

const READ_BUF: usize = 64 * 1024;

/// CSV syntax used both to parse the source and to write every part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvFormat {
    /// Field delimiter character.
    pub delimiter: u8,
    /// Quote character configuration.
    pub quote: Quote,
    /// Record terminator for output parts.
    pub terminator: LineTerminator,
}

impl Default for CsvFormat {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: Quote::default(),
            terminator: LineTerminator::default(),
        }
    }
}

impl CsvFormat {
    /// Create a new format with the given parameters.
    pub const fn new(delimiter: u8, quote: Quote, terminator: LineTerminator) -> Self {
        Self {
            delimiter,
            quote,
            terminator,
        }
    }

    /// Reject settings the reader and writer cannot honour: both characters
    /// must be ASCII, distinct, and not line breaks.
    pub fn validate(&self) -> Result<()> {
        let check = |what: &str, b: u8| {
            if !b.is_ascii() || b == b'\r' || b == b'\n' {
                return Err(SplitError::InvalidConfig(format!(
                    "{what} must be an ASCII character other than CR or LF (got byte 0x{b:02X})"
                )));
            }
            Ok(())
        };
        check("delimiter", self.delimiter)?;
        if let Quote::Some(q) = self.quote {
            check("quote", q)?;
            if q == self.delimiter {
                return Err(SplitError::InvalidConfig(
                    "delimiter and quote must differ".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Wrap a decoded stream so blank lines reach the csv reader as records.
    pub(crate) fn blank_lines<R: Read>(&self, inner: R) -> BlankLines<R> {
        BlankLines {
            inner,
            delimiter: self.delimiter,
            quote: match self.quote {
                Quote::None => None,
                Quote::Some(q) => Some(q),
            },
            state: LexState::LineStart,
            raw: vec![0u8; READ_BUF].into_boxed_slice(),
            buf: Vec::with_capacity(READ_BUF),
            pos: 0,
        }
    }

    /// Reader settings: no header handling (the header is just the first
    /// record), and ragged rows allowed.
    pub(crate) fn reader_builder(&self) -> ReaderBuilder {
        let mut builder = ReaderBuilder::new();
        builder
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimiter);
        match self.quote {
            Quote::None => {
                builder.quoting(false);
            }
            Quote::Some(q) => {
                builder.quoting(true).quote(q).double_quote(true);
            }
        }
        builder
    }

    /// Writer settings: quote only when needed, ragged rows allowed.
    pub(crate) fn writer_builder(&self) -> WriterBuilder {
        let mut builder = WriterBuilder::new();
        builder
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimiter)
            .terminator(self.terminator.to_csv());
        match self.quote {
            Quote::None => {
                builder.quote_style(QuoteStyle::Never);
            }
            Quote::Some(q) => {
                builder
                    .quote_style(QuoteStyle::Necessary)
                    .quote(q)
                    .double_quote(true);
            }
        }
        builder
    }
}

/// Quote character configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quote {
    /// No quoting.
    None,
    /// Quote with the specified character.
    Some(u8),
}

impl Default for Quote {
    fn default() -> Self {
        Quote::Some(b'"')
    }
}

impl fmt::Display for Quote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quote::None => write!(f, "none"),
            Quote::Some(c) => write!(f, "{}", *c as char),
        }
    }
}

/// Line ending written after each record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineTerminator {
    #[default]
    Crlf,
    Lf,
}

impl LineTerminator {
    fn to_csv(self) -> Terminator {
        match self {
            LineTerminator::Crlf => Terminator::CRLF,
            LineTerminator::Lf => Terminator::Any(b'\n'),
        }
    }

    pub(crate) const fn as_bytes(self) -> &'static [u8] {
        match self {
            LineTerminator::Crlf => b"\r\n",
            LineTerminator::Lf => b"\n",
        }
    }
}

/// True for the record [`BlankLines`] produces for an empty line.
pub(crate) fn is_blank_line(record: &ByteRecord) -> bool {
    record.len() == 1 && record.get(0) == Some(&[BLANK_LINE][..])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexState {
    LineStart,
    /// A line just ended with `\r`; a following `\n` belongs to it.
    AfterCr,
    FieldStart,
    Unquoted,
    Quoted,
    QuoteInQuoted,
}

/// `Read` adapter that marks every blank line with [`BLANK_LINE`].
///
/// The csv reader skips empty lines, but they are rows of the source and
/// have to land in a part. Quote state is tracked so a blank line inside a
/// quoted field is left alone. `\n`, `\r` and `\r\n` all end a line.
pub(crate) struct BlankLines<R> {
    inner: R,
    delimiter: u8,
    quote: Option<u8>,
    state: LexState,
    raw: Box<[u8]>,
    buf: Vec<u8>,
    pos: usize,
}

impl<R> BlankLines<R> {
    pub(crate) fn into_inner(self) -> R {
        self.inner
    }

    fn push(&mut self, b: u8) {
        let state = match self.state {
            LexState::AfterCr if b == b'\n' => {
                self.buf.push(b);
                self.state = LexState::LineStart;
                return;
            }
            LexState::AfterCr => LexState::LineStart,
            state => state,
        };

        if state == LexState::LineStart && (b == b'\r' || b == b'\n') {
            self.buf.push(BLANK_LINE);
        }
        self.buf.push(b);
        self.state = self.next_state(state, b);
    }

    fn next_state(&self, state: LexState, b: u8) -> LexState {
        let is_quote = self.quote == Some(b);
        match state {
            LexState::Quoted if is_quote => LexState::QuoteInQuoted,
            LexState::Quoted => LexState::Quoted,
            LexState::LineStart | LexState::FieldStart if is_quote => LexState::Quoted,
            LexState::QuoteInQuoted if is_quote => LexState::Quoted,
            _ if b == b'\r' => LexState::AfterCr,
            _ if b == b'\n' => LexState::LineStart,
            _ if b == self.delimiter => LexState::FieldStart,
            _ => LexState::Unquoted,
        }
    }
}

impl<R: Read> Read for BlankLines<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos == self.buf.len() {
            let n = self.inner.read(&mut self.raw)?;
            if n == 0 {
                return Ok(0);
            }
            self.buf.clear();
            self.pos = 0;
            for i in 0..n {
                let b = self.raw[i];
                self.push(b);
            }
        }

        let n = out.len().min(self.buf.len() - self.pos);
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
