use memmap2::Mmap;
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{trace, warn};

use crate::config::EncodingMode;
use crate::errors::{CountError, CountResult};

const BUFFER_CAPACITY: usize = 65536;
pub(crate) const LARGE_FILE_THRESHOLD: u64 = 10 * 1024 * 1024; // 10MB

/// One input text file, identified by a label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Corpus {
    label: String,
    path: PathBuf,
}

impl Corpus {
    /// Creates a corpus labelled with its file name
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let label = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { label, path }
    }

    pub fn with_label(label: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            label: label.into(),
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the corpus for line-at-a-time reading
    pub fn lines(&self) -> CountResult<LineReader> {
        let file = File::open(&self.path).map_err(|e| CountError::from_open(&self.path, e))?;
        let expected = file.metadata()?.len();
        Ok(LineReader {
            reader: BufReader::with_capacity(BUFFER_CAPACITY, file),
            path: self.path.clone(),
            expected,
            read: 0,
            line_number: 0,
        })
    }

    /// Reads the whole corpus and ASCII-lowercases it.
    ///
    /// Files at or above [`LARGE_FILE_THRESHOLD`] are memory mapped and folded
    /// straight out of the mapping so only one copy is made.
    pub fn load_folded(&self, encoding_mode: EncodingMode) -> CountResult<Vec<u8>> {
        let file = File::open(&self.path).map_err(|e| CountError::from_open(&self.path, e))?;
        let expected = file.metadata()?.len();

        let folded = if expected >= LARGE_FILE_THRESHOLD {
            trace!("Memory mapping corpus: {}", self.path.display());
            let mmap = unsafe { Mmap::map(&file) }?;
            check_encoding(&mmap, &self.path, encoding_mode)?;
            mmap.to_ascii_lowercase()
        } else {
            drop(file);
            let mut bytes =
                std::fs::read(&self.path).map_err(|e| CountError::from_open(&self.path, e))?;
            check_encoding(&bytes, &self.path, encoding_mode)?;
            bytes.make_ascii_lowercase();
            bytes
        };

        let read = folded.len() as u64;
        if read < expected {
            return Err(CountError::Truncated {
                path: self.path.clone(),
                expected,
                read,
            });
        }
        Ok(folded)
    }
}

/// Streams raw lines out of a corpus, detecting truncation at end of input
#[derive(Debug)]
pub struct LineReader {
    reader: BufReader<File>,
    path: PathBuf,
    expected: u64,
    read: u64,
    line_number: u64,
}

impl LineReader {
    /// Reads the next line into `buf` without its trailing `\n`.
    /// Returns `Ok(false)` at end of input.
    pub fn next_line(&mut self, buf: &mut Vec<u8>) -> CountResult<bool> {
        buf.clear();
        let n = self.reader.read_until(b'\n', buf)?;
        if n == 0 {
            if self.read < self.expected {
                return Err(CountError::Truncated {
                    path: self.path.clone(),
                    expected: self.expected,
                    read: self.read,
                });
            }
            return Ok(false);
        }
        self.read += n as u64;
        self.line_number += 1;
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        Ok(true)
    }

    /// 1-based number of the line most recently returned
    pub fn line_number(&self) -> u64 {
        self.line_number
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes consumed so far
    pub fn bytes_read(&self) -> u64 {
        self.read
    }
}

/// Decodes one line as UTF-8 according to `mode`
pub fn decode_line<'a>(
    bytes: &'a [u8],
    path: &Path,
    line_number: u64,
    mode: EncodingMode,
) -> CountResult<Cow<'a, str>> {
    match mode {
        EncodingMode::FailFast => std::str::from_utf8(bytes)
            .map(Cow::Borrowed)
            .map_err(|_| CountError::encoding_error(path, line_number)),
        EncodingMode::Lossy => {
            let cow = String::from_utf8_lossy(bytes);
            if let Cow::Owned(_) = cow {
                warn!(
                    "Invalid UTF-8 replaced in {} at line {}",
                    path.display(),
                    line_number
                );
            }
            Ok(cow)
        }
    }
}

/// Whole-buffer counterpart of [`decode_line`]. Lossy mode keeps the raw
/// bytes: invalid sequences are non-word bytes either way, so counts match
/// the line-decoding counters.
fn check_encoding(bytes: &[u8], path: &Path, mode: EncodingMode) -> CountResult<()> {
    if mode == EncodingMode::Lossy {
        return Ok(());
    }
    match std::str::from_utf8(bytes) {
        Ok(_) => Ok(()),
        Err(e) => {
            let line = 1 + bytes[..e.valid_up_to()]
                .iter()
                .filter(|&&b| b == b'\n')
                .count() as u64;
            Err(CountError::encoding_error(path, line))
        }
    }
}
