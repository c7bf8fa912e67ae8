//! Definition of errors.

use std::fmt;

use thiserror::Error;

/// A specialized Result type for this crate.
pub type Result<T, E = GazetteerError> = std::result::Result<T, E>;

/// Errors in extgaz.
///
/// Configuration and data errors are raised while loading a lexicon and abort the whole load.
/// [`GazetteerError::InvalidOperation`] signals a broken contract inside the automaton and
/// must not be retried. [`GazetteerError::Interrupted`] only aborts the current document.
#[derive(Debug, Error)]
pub enum GazetteerError {
    /// Malformed configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Malformed lexicon data.
    #[error(transparent)]
    Data(#[from] DataError),

    /// Contract violation inside the automaton.
    #[error(transparent)]
    InvalidOperation(#[from] InvalidOperationError),

    /// A scan was interrupted from outside.
    #[error(transparent)]
    Interrupted(#[from] InterruptedError),

    /// A cache file could not be decoded.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// I/O failure while reading lexicons or cache files.
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
}

impl GazetteerError {
    pub(crate) fn config<M>(arg: &'static str, msg: M) -> Self
    where
        M: fmt::Display,
    {
        Self::Config(ConfigError {
            arg,
            msg: msg.to_string(),
        })
    }

    pub(crate) fn data<S, M>(origin: S, line: usize, msg: M) -> Self
    where
        S: fmt::Display,
        M: fmt::Display,
    {
        Self::Data(DataError {
            origin: origin.to_string(),
            line,
            msg: msg.to_string(),
        })
    }

    pub(crate) fn invalid_operation<M>(op: &'static str, msg: M) -> Self
    where
        M: fmt::Display,
    {
        Self::InvalidOperation(InvalidOperationError {
            op,
            msg: msg.to_string(),
        })
    }

    pub(crate) fn format<M>(msg: M) -> Self
    where
        M: fmt::Display,
    {
        Self::Format(FormatError {
            msg: msg.to_string(),
        })
    }

    pub(crate) const fn interrupted(position: usize) -> Self {
        Self::Interrupted(InterruptedError { position })
    }

    /// Returns `true` for contract violations that imply the store can no longer be trusted.
    pub const fn is_invalid_operation(&self) -> bool {
        matches!(self, Self::InvalidOperation(_))
    }

    /// Returns `true` if a scan was aborted by its interrupt flag.
    pub const fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }
}

/// Error used when a configuration setting or file is invalid.
#[derive(Debug, Error)]
#[error("ConfigError: {arg}: {msg}")]
pub struct ConfigError {
    /// Name of the setting.
    pub arg: &'static str,

    /// Error message.
    pub msg: String,
}

/// Error used when a lexicon line is malformed.
#[derive(Debug, Error)]
#[error("DataError: {origin}:{line}: {msg}")]
pub struct DataError {
    /// List file or other origin of the line.
    pub origin: String,

    /// 1-based line number, or 0 if unknown.
    pub line: usize,

    /// Error message.
    pub msg: String,
}

/// Error used when an operation is called against the automaton's contract.
#[derive(Debug, Error)]
#[error("InvalidOperationError: {op}: {msg}")]
pub struct InvalidOperationError {
    /// Name of the operation.
    pub op: &'static str,

    /// Error message.
    pub msg: String,
}

/// Error used when a scan stops because its interrupt flag was set.
#[derive(Debug, Error)]
#[error("InterruptedError: scan aborted at chunk position {position}")]
pub struct InterruptedError {
    pub position: usize,
}

/// Error used when serialized data is not a valid automaton.
#[derive(Debug, Error)]
#[error("FormatError: {msg}")]
pub struct FormatError {
    pub msg: String,
}
