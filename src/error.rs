//! Error kinds raised by the runtime and the richer value carried across a
//! protected-call boundary.

use std::fmt;

/// The kind of failure that unwound to a protected-call boundary.
///
/// Kept `Copy` and free of heap data so it stays cheap to thread through
/// every internal call via `Result<T, LuaError>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LuaError {
    /// A value-level failure raised by script code or by a type/domain check.
    RuntimeError,
    /// Failure to produce a function prototype (lexer/compiler boundary).
    SyntaxError,
    /// The allocator failed to satisfy a request.
    MemoryError,
    /// A metamethod raised while running a finalizer during collection.
    GCError,
    /// A requested stack slot or call-info slot would exceed the configured cap.
    StackOverflow,
    /// An index or offset fell outside the bounds it is required to satisfy.
    IndexOutOfBounds,
    /// The error handler (`errfunc`) itself raised while handling another error.
    ErrorInErrorHandling,
}

impl fmt::Display for LuaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LuaError::RuntimeError => "runtime error",
            LuaError::SyntaxError => "syntax error",
            LuaError::MemoryError => "not enough memory",
            LuaError::GCError => "error in garbage collection finalizer",
            LuaError::StackOverflow => "stack overflow",
            LuaError::IndexOutOfBounds => "index out of bounds",
            LuaError::ErrorInErrorHandling => "error in error handling",
        };
        f.write_str(s)
    }
}

impl std::error::Error for LuaError {}

/// A [`LuaError`] paired with a formatted message, produced at a
/// protected-call boundary. Composes with `?` via `std::error::Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LuaFullError {
    kind: LuaError,
    message: String,
}

impl LuaFullError {
    pub fn new(kind: LuaError, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> LuaError {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for LuaFullError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for LuaFullError {}

pub type LuaResult<T> = Result<T, LuaFullError>;
