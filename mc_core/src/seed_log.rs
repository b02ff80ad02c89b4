use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
#[error("failed to read seed log {path:?}: {source}")]
pub struct SeedLogError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Reads the progress log written by the seed cracker.
///
/// The cracker may not have started yet, so a missing file reads as empty
/// text. Bytes that are not valid UTF-8 are replaced rather than rejected.
#[derive(Debug, Clone)]
pub struct SeedLogReader {
    path: PathBuf,
}

impl SeedLogReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<String, SeedLogError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(source) => Err(SeedLogError {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// The last `lines` lines of the log.
    pub fn tail(&self, lines: usize) -> Result<String, SeedLogError> {
        let text = self.read()?;
        let all: Vec<&str> = text.lines().collect();
        let start = all.len().saturating_sub(lines);
        Ok(all[start..].join("\n"))
    }
}
