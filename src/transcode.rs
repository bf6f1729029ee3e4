//! Streaming adapters between a candidate encoding and UTF-8.
//!
//! [`DecodeReader`] sits between the source file and the CSV parser, and
//! [`EncodeWriter`] sits between the CSV writer and a part file. Both can run
//! strict (first bad sequence is an `InvalidData` error carrying a
//! [`TranscodeError`]) or tolerant (bad sequences are dropped and counted).

use std::io::{self, Read, Write};

use encoding_rs::{Decoder, DecoderResult, Encoder, EncoderResult};

use crate::encoding::Candidate;
use crate::error::TranscodeError;

const INPUT_BUF: usize = 64 * 1024;
const OUTPUT_BUF: usize = 128 * 1024;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// How malformed input or unmappable output is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeMode {
    /// Fail on the first bad sequence.
    #[default]
    Strict,
    /// Drop bad sequences and keep going.
    Tolerant,
}

/// A `Read` adapter yielding UTF-8 decoded from `candidate`.
pub struct DecodeReader<R> {
    inner: R,
    candidate: Candidate,
    mode: DecodeMode,
    decoder: Decoder,
    input: Box<[u8]>,
    in_pos: usize,
    in_len: usize,
    output: Box<[u8]>,
    out_pos: usize,
    out_len: usize,
    consumed: u64,
    eof: bool,
    finished: bool,
    malformed: u64,
}

impl<R: Read> DecodeReader<R> {
    pub fn new(inner: R, candidate: Candidate, mode: DecodeMode) -> Self {
        Self {
            inner,
            candidate,
            mode,
            decoder: candidate.new_decoder(),
            input: vec![0u8; INPUT_BUF].into_boxed_slice(),
            in_pos: 0,
            in_len: 0,
            output: vec![0u8; OUTPUT_BUF].into_boxed_slice(),
            out_pos: 0,
            out_len: 0,
            consumed: 0,
            eof: false,
            finished: false,
            malformed: 0,
        }
    }

    /// Number of malformed sequences dropped so far (always 0 in strict mode).
    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Decode until there is output to hand out or the input is exhausted.
    fn fill(&mut self) -> io::Result<()> {
        self.out_pos = 0;
        self.out_len = 0;

        while self.out_len == 0 && !self.finished {
            if self.in_pos == self.in_len && !self.eof {
                self.in_len = self.inner.read(&mut self.input)?;
                self.in_pos = 0;
                self.eof = self.in_len == 0;
            }

            let src = &self.input[self.in_pos..self.in_len];
            let (result, read, written) =
                self.decoder
                    .decode_to_utf8_without_replacement(src, &mut self.output, self.eof);
            self.in_pos += read;
            self.consumed += read as u64;
            self.out_len = written;

            match result {
                DecoderResult::InputEmpty => {
                    if self.eof {
                        self.finished = true;
                    }
                }
                DecoderResult::OutputFull => {}
                DecoderResult::Malformed(bad, extra) => {
                    let offset = self
                        .consumed
                        .saturating_sub(u64::from(extra) + u64::from(bad));
                    match self.mode {
                        DecodeMode::Strict => {
                            return Err(TranscodeError::Malformed {
                                encoding: self.candidate.name(),
                                offset,
                            }
                            .into_io());
                        }
                        DecodeMode::Tolerant => {
                            self.malformed += 1;
                            tracing::trace!(offset, "dropped malformed sequence");
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

impl<R: Read> Read for DecodeReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.out_pos == self.out_len {
            self.fill()?;
        }

        let n = buf.len().min(self.out_len - self.out_pos);
        buf[..n].copy_from_slice(&self.output[self.out_pos..self.out_pos + n]);
        self.out_pos += n;
        Ok(n)
    }
}

/// A `Write` adapter accepting UTF-8 and emitting `candidate`.
///
/// Input may arrive split in the middle of a character; the incomplete tail is
/// held until the next write. Call [`EncodeWriter::finish`] to flush it.
pub struct EncodeWriter<W: Write> {
    inner: W,
    candidate: Candidate,
    mode: DecodeMode,
    encoder: Encoder,
    pending: Vec<u8>,
    buf: Box<[u8]>,
    bom_pending: bool,
    unmappable: u64,
}

impl<W: Write> EncodeWriter<W> {
    pub fn new(inner: W, candidate: Candidate, mode: DecodeMode) -> Self {
        Self {
            inner,
            candidate,
            mode,
            encoder: candidate.new_encoder(),
            pending: Vec::new(),
            buf: vec![0u8; OUTPUT_BUF].into_boxed_slice(),
            bom_pending: candidate.writes_bom(),
            unmappable: 0,
        }
    }

    /// Number of characters dropped because the target encoding lacks them.
    pub fn unmappable(&self) -> u64 {
        self.unmappable
    }

    /// Encode any held-back input, flush, and hand back the inner writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.write_bom()?;
        let pending = std::mem::take(&mut self.pending);
        let text = std::str::from_utf8(&pending)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.encode(text, true)?;
        self.inner.flush()?;
        Ok(self.inner)
    }

    fn write_bom(&mut self) -> io::Result<()> {
        if self.bom_pending {
            self.bom_pending = false;
            self.inner.write_all(UTF8_BOM)?;
        }
        Ok(())
    }

    fn encode(&mut self, mut text: &str, last: bool) -> io::Result<()> {
        loop {
            let (result, read, written) =
                self.encoder
                    .encode_from_utf8_without_replacement(text, &mut self.buf, last);
            self.inner.write_all(&self.buf[..written])?;
            text = &text[read..];

            match result {
                EncoderResult::InputEmpty => return Ok(()),
                EncoderResult::OutputFull => {}
                EncoderResult::Unmappable(ch) => match self.mode {
                    DecodeMode::Strict => {
                        return Err(TranscodeError::Unmappable {
                            encoding: self.candidate.name(),
                            ch,
                        }
                        .into_io());
                    }
                    DecodeMode::Tolerant => {
                        self.unmappable += 1;
                        tracing::trace!(?ch, "dropped unmappable character");
                    }
                },
            }
        }
    }
}

impl<W: Write> Write for EncodeWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.write_bom()?;

        let mut pending = std::mem::take(&mut self.pending);
        pending.extend_from_slice(data);

        let valid = match simdutf8::compat::from_utf8(&pending) {
            Ok(_) => pending.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "EncodeWriter input is not UTF-8",
                ));
            }
        };

        let text = std::str::from_utf8(&pending[..valid])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.encode(text, false)?;

        pending.drain(..valid);
        self.pending = pending;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
