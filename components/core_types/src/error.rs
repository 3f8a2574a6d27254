//! Host-facing error types.
//!
//! Inside the interpreter, failures are never thrown: they unwind by storing
//! a payload value in the callsite slot and returning `false`. This module
//! provides the typed surface embedders see when they want a `Result`
//! instead of the raw boolean protocol.

use std::fmt;

/// The kind of a runtime error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Arithmetic on incompatible kinds, indexing a non-table, iterating a
    /// non-iterable, invoking a non-function.
    Type,
    /// A value raised by the guest program itself.
    User,
    /// The page allocator returned null.
    Resource,
    /// An internal invariant the host should never see.
    Internal,
}

/// A runtime error with a rendered message.
///
/// # Examples
///
/// ```
/// use core_types::{ErrorKind, VmError};
///
/// let err = VmError::new(ErrorKind::Type, "invoking non-function");
/// assert_eq!(err.kind, ErrorKind::Type);
/// assert_eq!(err.to_string(), "type error: invoking non-function");
/// ```
#[derive(Debug, Clone)]
pub struct VmError {
    /// The error category.
    pub kind: ErrorKind,
    /// Human-readable message (for user errors, the rendered payload).
    pub message: String,
}

impl VmError {
    /// Create a new error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        VmError {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.kind {
            ErrorKind::Type => "type error",
            ErrorKind::User => "error",
            ErrorKind::Resource => "out of memory",
            ErrorKind::Internal => "internal error",
        };
        write!(f, "{}: {}", prefix, self.message)
    }
}

impl std::error::Error for VmError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VmError::new(ErrorKind::User, "boom");
        assert_eq!(err.to_string(), "error: boom");
    }

    #[test]
    fn test_error_kind_variants() {
        assert_ne!(ErrorKind::Type, ErrorKind::User);
        assert_ne!(ErrorKind::Resource, ErrorKind::Internal);
    }
}
