//! Feature sources.
#![forbid(unsafe_code)]

use std::{
    io::{self, BufRead, BufReader},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::fs_utf8::File;
use strata_core::Feature;
use thiserror::Error;

/// Errors raised while reading features.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The input file could not be opened.
    #[error("failed to open feature file {path}")]
    Open {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    /// Reading from the input failed.
    #[error("failed to read line {line}")]
    Io {
        line: usize,
        #[source]
        source: io::Error,
    },
    /// A line is not a valid JSON feature.
    #[error("malformed feature on line {line}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Shared flag that stops a reader from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A source of features, read one at a time.
pub trait FeatureReader {
    /// Return the next feature, or `None` once the input is exhausted or the
    /// reader was cancelled.
    fn next_feature(&mut self) -> Result<Option<Feature>, ReadError>;

    /// Stop reading; subsequent calls to `next_feature` return `None`.
    fn cancel(&self);
}

/// Reads one JSON-encoded [`Feature`] per line. Blank lines are skipped.
///
/// # Examples
/// ```
/// use strata_data::{FeatureReader, JsonLinesReader};
///
/// let input = "{\"feature_type\":\"Building\",\"object_id\":\"B1\"}\n\n{\"feature_type\":\"Road\"}\n";
/// let mut reader = JsonLinesReader::new(input.as_bytes());
/// let first = reader.next_feature().expect("read line").expect("feature");
/// assert_eq!(first.object_id.as_deref(), Some("B1"));
/// assert_eq!(reader.next_feature().expect("read line").map(|f| f.feature_type), Some("Road".into()));
/// assert!(reader.next_feature().expect("end of input").is_none());
/// ```
#[derive(Debug)]
pub struct JsonLinesReader<R> {
    input: R,
    line: usize,
    buffer: String,
    token: CancelToken,
}

impl JsonLinesReader<BufReader<File>> {
    /// Open the newline-delimited JSON file at `path`.
    pub fn open(path: &Utf8Path) -> Result<Self, ReadError> {
        let file = strata_fs::open_file(path).map_err(|source| ReadError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> JsonLinesReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            line: 0,
            buffer: String::new(),
            token: CancelToken::new(),
        }
    }

    /// Token that cancels this reader from elsewhere.
    pub fn cancel_token(&self) -> CancelToken {
        self.token.clone()
    }

    /// Number of the last line read, starting at one.
    pub const fn line(&self) -> usize {
        self.line
    }
}

impl<R: BufRead> FeatureReader for JsonLinesReader<R> {
    fn next_feature(&mut self) -> Result<Option<Feature>, ReadError> {
        loop {
            if self.token.is_cancelled() {
                return Ok(None);
            }
            self.buffer.clear();
            let read = self
                .input
                .read_line(&mut self.buffer)
                .map_err(|source| ReadError::Io {
                    line: self.line + 1,
                    source,
                })?;
            if read == 0 {
                return Ok(None);
            }
            self.line += 1;
            let text = self.buffer.trim();
            if text.is_empty() {
                continue;
            }
            return serde_json::from_str(text)
                .map(Some)
                .map_err(|source| ReadError::Parse {
                    line: self.line,
                    source,
                });
        }
    }

    fn cancel(&self) {
        self.token.cancel();
    }
}

impl<R: BufRead> Iterator for JsonLinesReader<R> {
    type Item = Result<Feature, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_feature().transpose()
    }
}
