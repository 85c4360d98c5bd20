//! Where the source dataset comes from.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

/// Location of the dataset to partition.
///
/// The dataset is always fetched fully into memory before slicing starts.
#[derive(Debug, Clone)]
pub enum Source {
    /// `http://` or `https://` URL, fetched with a bounded wait.
    Url(String),
    /// Local file.
    Path(PathBuf),
    /// Bytes already in memory.
    Bytes(Bytes),
}

impl Source {
    /// Interpret a configured `source_url`.
    ///
    /// `http(s)://` becomes [`Source::Url`], `file://` and anything else a [`Source::Path`].
    pub fn from_location(location: &str) -> Self {
        let location = location.trim();
        if location.starts_with("http://") || location.starts_with("https://") {
            Source::Url(location.to_string())
        } else if let Some(path) = location.strip_prefix("file://") {
            Source::Path(PathBuf::from(path))
        } else {
            Source::Path(PathBuf::from(location))
        }
    }

    /// Fetch the whole dataset.
    ///
    /// Fails with [`PipelineError::SourceUnavailable`] if the fetch fails or yields zero bytes.
    pub fn fetch(&self, timeout: Duration) -> PipelineResult<Bytes> {
        let data = match self {
            Source::Url(url) => fetch_http(url, timeout).map_err(|e| self.unavailable(e))?,
            Source::Path(path) => fs::read(path)
                .map(Bytes::from)
                .map_err(|e| self.unavailable(e))?,
            Source::Bytes(data) => data.clone(),
        };
        if data.is_empty() {
            return Err(self.unavailable("fetch returned zero bytes"));
        }
        debug!(source = %self, bytes = data.len(), "source fetched");
        Ok(data)
    }

    fn unavailable(&self, err: impl fmt::Display) -> PipelineError {
        PipelineError::SourceUnavailable {
            location: self.to_string(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Url(url) => f.write_str(url),
            Source::Path(path) => write!(f, "{}", path.display()),
            Source::Bytes(data) => write!(f, "<memory: {} bytes>", data.len()),
        }
    }
}

fn fetch_http(url: &str, timeout: Duration) -> Result<Bytes, reqwest::Error> {
    let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
    client.get(url).send()?.error_for_status()?.bytes()
}
