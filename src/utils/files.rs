//! File resolution for multi-file manuscripts.
//!
//! Loading a manuscript directory goes through [`FileResolver`] so that the
//! parser can be driven from real files or from in-memory content in tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum FileResolveError {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("read error: {0}")]
    ReadError(String),
}

impl From<FileResolveError> for crate::utils::error::ManuscriptError {
    fn from(err: FileResolveError) -> Self {
        crate::utils::error::ManuscriptError::IoError {
            message: err.to_string(),
        }
    }
}

pub type FileResolveResult<T> = Result<T, FileResolveError>;

pub trait FileResolver: Send + Sync {
    /// Read a file as text.
    fn read_text(&self, path: &Path) -> FileResolveResult<String>;

    /// Check if a file exists.
    fn exists(&self, path: &Path) -> bool;
}

/// An in-memory resolver for tests and bundled content.
#[derive(Debug, Clone, Default)]
pub struct MemoryFileResolver {
    files: HashMap<PathBuf, String>,
}

impl MemoryFileResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, path: impl Into<PathBuf>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        self.add_file(path, content);
        self
    }
}

impl FileResolver for MemoryFileResolver {
    fn read_text(&self, path: &Path) -> FileResolveResult<String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| FileResolveError::NotFound(path.display().to_string()))
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }
}

/// Resolver backed by the real file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFileResolver;

impl FileResolver for StdFileResolver {
    fn read_text(&self, path: &Path) -> FileResolveResult<String> {
        std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FileResolveError::NotFound(path.display().to_string()),
            _ => FileResolveError::ReadError(format!("{}: {}", path.display(), e)),
        })
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}
