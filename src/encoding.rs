//! Encoding detection over a fixed candidate list, using `encoding_rs` decoders.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use chardetng::EncodingDetector as ChardetDetector;
use encoding_rs::{Decoder, DecoderResult, Encoder, Encoding, BIG5, GBK, UTF_8};

use crate::error::SplitError;

/// Number of decoded characters that must come out clean for a candidate to win.
pub const PROBE_CHARS: usize = 2048;

/// Bytes fed to chardetng when every candidate fails.
const GUESS_BYTES: usize = 64 * 1024;

/// An encoding the detector may pick.
///
/// Several names share one `encoding_rs` table (the WHATWG `gbk` encoding covers
/// GB2312 and code page 936), but the name the caller sees is kept distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Candidate {
    /// UTF-8, skipping a leading byte-order mark on read and writing one on output.
    Utf8Sig,
    Gbk,
    Gb2312,
    /// UTF-8 with no BOM handling; a leading BOM decodes as U+FEFF.
    Utf8,
    Cp936,
    Big5,
}

/// Detection order used unless the caller supplies its own list.
pub const DEFAULT_CANDIDATES: [Candidate; 6] = [
    Candidate::Utf8Sig,
    Candidate::Gbk,
    Candidate::Gb2312,
    Candidate::Utf8,
    Candidate::Cp936,
    Candidate::Big5,
];

/// Returned when no candidate decodes the probe window cleanly.
pub const FALLBACK: Candidate = Candidate::Gbk;

impl Candidate {
    /// The conventional name of this encoding.
    pub const fn name(self) -> &'static str {
        match self {
            Candidate::Utf8Sig => "utf-8-sig",
            Candidate::Gbk => "gbk",
            Candidate::Gb2312 => "gb2312",
            Candidate::Utf8 => "utf-8",
            Candidate::Cp936 => "cp936",
            Candidate::Big5 => "big5",
        }
    }

    /// The `encoding_rs` table backing this candidate.
    pub fn encoding(self) -> &'static Encoding {
        match self {
            Candidate::Utf8Sig | Candidate::Utf8 => UTF_8,
            Candidate::Gbk | Candidate::Gb2312 | Candidate::Cp936 => GBK,
            Candidate::Big5 => BIG5,
        }
    }

    /// Whether output files start with a UTF-8 byte-order mark.
    pub const fn writes_bom(self) -> bool {
        matches!(self, Candidate::Utf8Sig)
    }

    /// A fresh decoder. Only `Utf8Sig` looks at a BOM; the others never let a
    /// stray BOM switch them to another encoding.
    pub fn new_decoder(self) -> Decoder {
        match self {
            Candidate::Utf8Sig => UTF_8.new_decoder_with_bom_removal(),
            other => other.encoding().new_decoder_without_bom_handling(),
        }
    }

    /// A fresh encoder for writing output in this encoding.
    pub fn new_encoder(self) -> Encoder {
        self.encoding().new_encoder()
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Candidate {
    type Err = SplitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        let candidate = match normalized.as_str() {
            "utf-8-sig" | "utf8-sig" => Candidate::Utf8Sig,
            "gbk" => Candidate::Gbk,
            "gb2312" => Candidate::Gb2312,
            "utf-8" | "utf8" => Candidate::Utf8,
            "cp936" => Candidate::Cp936,
            "big5" => Candidate::Big5,
            _ => {
                return Err(SplitError::InvalidConfig(format!(
                    "unsupported encoding: {s}"
                )));
            }
        };
        Ok(candidate)
    }
}

/// Outcome of [`EncodingDetector::detect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    /// The encoding to use for the rest of the run.
    pub candidate: Candidate,
    /// True when no candidate decoded cleanly and [`FALLBACK`] was returned.
    pub fell_back: bool,
    /// chardetng's opinion, only computed on fallback.
    pub guess: Option<&'static Encoding>,
}

/// Picks the first candidate that decodes the head of a file without error.
///
/// # Example
///
/// ```no_run
/// use csv_split::EncodingDetector;
///
/// let detection = EncodingDetector::new().detect("sales.csv");
/// println!("Encoding: {}", detection.candidate);
/// ```
#[derive(Debug, Clone)]
pub struct EncodingDetector {
    candidates: Vec<Candidate>,
    probe_chars: usize,
}

impl Default for EncodingDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl EncodingDetector {
    /// Create a detector over [`DEFAULT_CANDIDATES`].
    pub fn new() -> Self {
        Self {
            candidates: DEFAULT_CANDIDATES.to_vec(),
            probe_chars: PROBE_CHARS,
        }
    }

    /// Replace the candidate list. Order is priority order.
    pub fn candidates(&mut self, candidates: Vec<Candidate>) -> &mut Self {
        self.candidates = candidates;
        self
    }

    /// Set the probe window size in decoded characters.
    pub fn probe_chars(&mut self, probe_chars: usize) -> &mut Self {
        self.probe_chars = probe_chars.max(1);
        self
    }

    /// Detect the encoding of the file at `path`. Never fails: unreadable files
    /// and files no candidate accepts both yield [`FALLBACK`].
    pub fn detect<P: AsRef<Path>>(&self, path: P) -> Detection {
        let path = path.as_ref();

        for &candidate in &self.candidates {
            match probe(path, candidate, self.probe_chars) {
                Ok(true) => {
                    tracing::debug!(encoding = candidate.name(), "probe decoded cleanly");
                    return Detection {
                        candidate,
                        fell_back: false,
                        guess: None,
                    };
                }
                Ok(false) => {
                    tracing::debug!(encoding = candidate.name(), "probe rejected");
                }
                Err(e) => {
                    tracing::debug!(encoding = candidate.name(), error = %e, "probe could not read file");
                }
            }
        }

        Detection {
            candidate: FALLBACK,
            fell_back: true,
            guess: guess_encoding(path).ok(),
        }
    }
}

/// Decode the head of the file under `candidate`, stopping once `probe_chars`
/// characters have come out. Returns `Ok(false)` on the first malformed sequence.
fn probe(path: &Path, candidate: Candidate, probe_chars: usize) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut decoder = candidate.new_decoder();
    let mut buf = [0u8; 1024];
    let mut out = String::with_capacity(4096);
    let mut decoded = 0usize;

    loop {
        let n = file.read(&mut buf)?;
        let last = n == 0;
        let mut input = &buf[..n];

        loop {
            out.clear();
            let (result, read) = decoder.decode_to_string_without_replacement(input, &mut out, last);
            decoded += out.chars().count();
            input = &input[read..];
            match result {
                DecoderResult::InputEmpty => break,
                DecoderResult::OutputFull => continue,
                DecoderResult::Malformed(_, _) => return Ok(false),
            }
        }

        if last || decoded >= probe_chars {
            return Ok(true);
        }
    }
}

/// Ask chardetng what the head of the file looks like.
fn guess_encoding(path: &Path) -> io::Result<&'static Encoding> {
    let mut data = Vec::with_capacity(GUESS_BYTES);
    File::open(path)?
        .take(GUESS_BYTES as u64)
        .read_to_end(&mut data)?;

    let mut detector = ChardetDetector::new();
    detector.feed(&data, true);
    Ok(detector.guess(None, true))
}
