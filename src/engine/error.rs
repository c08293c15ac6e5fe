//! Engine error types

use thiserror::Error;

/// Errors raised by the engine host API.
///
/// When returned from a native function these surface to the calling script
/// as a thrown error.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("out of memory: need {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },

    #[error("invalid stack index {index} (top {top})")]
    InvalidIndex { index: isize, top: usize },

    #[error("value stack overflow (limit {0})")]
    StackOverflow(usize),

    #[error("call depth limit {0} exceeded")]
    CallDepthExceeded(usize),

    #[error("not callable: {0}")]
    NotCallable(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("stale object reference")]
    StaleReference,
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
