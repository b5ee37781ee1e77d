//! Error Handling Module
//!
//! Defines the error type shared by the library. Uses thiserror for
//! ergonomic error definitions; the binary wraps these in `anyhow`.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for Mini-Xception operations
#[derive(Error, Debug)]
pub enum Error {
    /// Error loading or decoding an image
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Error with dataset layout or contents
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Parameter mapping could not be captured or applied
    #[error("Model state error: {0}")]
    ModelState(String),

    /// Checkpoint file missing, unreadable or malformed
    #[error("Checkpoint error at '{path}': {message}")]
    Checkpoint { path: PathBuf, message: String },

    /// Epoch log could not be parsed
    #[error("Log format error at line {line}: {message}")]
    LogFormat { line: usize, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
}

/// Convenience Result type for Mini-Xception operations
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl Error {
    /// Shorthand for a checkpoint error at `path`
    pub fn checkpoint(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::Checkpoint {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| Error::InvalidInput(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| Error::InvalidInput(format!("{}: {}", f(), e)))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| Error::InvalidInput(msg.to_string()))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.ok_or_else(|| Error::InvalidInput(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Dataset("no class folders".to_string());
        assert_eq!(format!("{}", err), "Dataset error: no class folders");
    }

    #[test]
    fn test_checkpoint_error_mentions_path() {
        let err = Error::checkpoint("/weights/y_3_fer_15.ckpt.json", "missing epoch");
        let msg = format!("{}", err);
        assert!(msg.contains("y_3_fer_15.ckpt.json"));
        assert!(msg.contains("missing epoch"));
    }

    #[test]
    fn test_result_context() {
        let result: std::result::Result<i32, std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"));

        let with_context = result.context("Failed to read file");
        assert!(matches!(with_context, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_option_context() {
        let value: Option<usize> = None;
        let err = value.with_context(|| "no faces".to_string()).unwrap_err();
        assert!(format!("{}", err).contains("no faces"));
    }
}
