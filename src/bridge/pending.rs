//! Result slot for a single in-flight asynchronous call.

use std::fmt;

use thiserror::Error;

use crate::value::Value;

/// Identifier handed to the native side as a completion token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub u32);

impl CallId {
    /// Reserved id. Never allocated, so completions carrying it are dropped.
    pub const FIRE_AND_FORGET: CallId = CallId(0);

    pub fn is_fire_and_forget(self) -> bool {
        self == Self::FIRE_AND_FORGET
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The native payload has no `Value` representation.
    InvalidReturnValue,
    /// The native layer reported a failure.
    OperationFailed,
    TimedOut,
    /// The owner was disposed while the call was waiting.
    Abandoned,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::InvalidReturnValue => "invalid return value",
            ErrorKind::OperationFailed => "operation failed",
            ErrorKind::TimedOut => "timed out",
            ErrorKind::Abandoned => "abandoned",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct CallError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CallError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_return_value(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidReturnValue, message)
    }

    pub fn operation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OperationFailed, message)
    }
}

/// Mutable slot filled in by the completion callback or by the waiting loop.
#[derive(Debug, Default)]
pub struct PendingCall {
    completed: bool,
    value: Option<Value>,
    error: Option<CallError>,
    timed_out: bool,
}

impl PendingCall {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn is_timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn error(&self) -> Option<&CallError> {
        self.error.as_ref()
    }

    /// Record the native result. Returns `false` if the slot already reached
    /// a terminal state, in which case nothing changes.
    pub fn complete(&mut self, result: Result<Value, CallError>) -> bool {
        if self.completed || self.timed_out {
            return false;
        }
        match result {
            Ok(value) => self.value = Some(value),
            Err(error) => self.error = Some(error),
        }
        self.completed = true;
        true
    }

    pub fn mark_timed_out(&mut self) {
        if !self.completed {
            self.timed_out = true;
        }
    }

    /// Move the terminal result out of a completed slot.
    pub fn take_result(&mut self) -> Option<Result<Value, CallError>> {
        if !self.completed {
            return None;
        }
        if let Some(error) = self.error.take() {
            return Some(Err(error));
        }
        Some(Ok(self.value.take().unwrap_or_default()))
    }
}
