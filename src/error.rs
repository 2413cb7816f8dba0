// src/error.rs
use crate::json::JsonError;
use crate::parser::ParseError;
use std::io;

/// Central error type for the PySpeed engine.
#[derive(Debug)]
pub enum PySpeedError {
    /// Underlying I/O error from the OS or network.
    Io(io::Error),
    /// Error during HTTP request parsing.
    Parse(ParseError),
    /// Error during JSON parsing.
    Json(JsonError),
    /// Connection slab reached its maximum capacity.
    SlabFull,
    /// An application handler panicked.
    HandlerPanic(String),
    /// Generic or miscellaneous error.
    Other(String),
}

impl std::fmt::Display for PySpeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PySpeedError::Io(e) => write!(f, "I/O error: {}", e),
            PySpeedError::Parse(e) => write!(f, "Parse error: {:?}", e),
            PySpeedError::Json(e) => write!(f, "JSON error: {}", e),
            PySpeedError::SlabFull => write!(f, "Connection slab is full"),
            PySpeedError::HandlerPanic(msg) => write!(f, "Handler panic: {}", msg),
            PySpeedError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for PySpeedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PySpeedError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for PySpeedError {
    fn from(e: io::Error) -> Self {
        PySpeedError::Io(e)
    }
}

impl From<ParseError> for PySpeedError {
    fn from(e: ParseError) -> Self {
        PySpeedError::Parse(e)
    }
}

impl From<JsonError> for PySpeedError {
    fn from(e: JsonError) -> Self {
        PySpeedError::Json(e)
    }
}

pub type PySpeedResult<T> = Result<T, PySpeedError>;
