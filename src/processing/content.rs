//! Retention of the original log lines behind a record.
//!
//! Lines are kept either as a sorted, de-duplicated list or as one zlib-compressed block.
//! A compressed block is always decompressed, merged and re-compressed as a whole.

use std::io::{self, Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tracing::warn;

/// Whether and how original lines are retained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContentRetention {
    #[default]
    None,
    Plain,
    Compressed,
}

/// A zlib-compressed block of newline-joined lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedLines {
    bytes: Vec<u8>,
    original_size: usize,
}

impl CompressedLines {
    pub fn compress(text: &str) -> io::Result<Self> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(text.as_bytes())?;
        Ok(Self {
            bytes: enc.finish()?,
            original_size: text.len(),
        })
    }

    pub fn decompress(&self) -> io::Result<String> {
        let mut out = String::with_capacity(self.original_size);
        ZlibDecoder::new(self.bytes.as_slice()).read_to_string(&mut out)?;
        Ok(out)
    }

    pub fn compressed_size(&self) -> usize {
        self.bytes.len()
    }

    pub fn original_size(&self) -> usize {
        self.original_size
    }
}

/// Original lines of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetainedContent {
    Lines(Vec<String>),
    Compressed(CompressedLines),
}

impl RetainedContent {
    /// Content for a freshly parsed line, or `None` when retention is off.
    pub fn from_line(line: &str, retention: ContentRetention) -> Option<Self> {
        match retention {
            ContentRetention::None => None,
            ContentRetention::Plain => Some(Self::Lines(vec![line.to_owned()])),
            ContentRetention::Compressed => match CompressedLines::compress(line) {
                Ok(c) => Some(Self::Compressed(c)),
                Err(e) => {
                    warn!(error = %e, "line compression failed; keeping plain text");
                    Some(Self::Lines(vec![line.to_owned()]))
                }
            },
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::Compressed(_))
    }

    /// The retained lines, decompressing if needed.
    pub fn lines(&self) -> io::Result<Vec<String>> {
        match self {
            Self::Lines(lines) => Ok(lines.clone()),
            Self::Compressed(c) => Ok(c.decompress()?.split('\n').map(str::to_owned).collect()),
        }
    }

    /// Newline-joined text of all retained lines.
    pub fn text(&self) -> io::Result<String> {
        match self {
            Self::Lines(lines) => Ok(lines.join("\n")),
            Self::Compressed(c) => c.decompress(),
        }
    }

    /// Fold `donor` into `self`: lines are unioned (sorted, de-duplicated); the result is
    /// compressed if either side was.
    pub fn absorb(&mut self, donor: RetainedContent) {
        let compress = self.is_compressed() || donor.is_compressed();
        let (mine, theirs) = match (self.lines(), donor.lines()) {
            (Ok(a), Ok(b)) => (a, b),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "retained content could not be decompressed; dropping donor lines");
                return;
            }
        };

        let mut merged = mine;
        merged.extend(theirs);
        merged.sort_unstable();
        merged.dedup();

        *self = if compress {
            match CompressedLines::compress(&merged.join("\n")) {
                Ok(c) => Self::Compressed(c),
                Err(e) => {
                    warn!(error = %e, "line compression failed; keeping plain text");
                    Self::Lines(merged)
                }
            }
        } else {
            Self::Lines(merged)
        };
    }
}
