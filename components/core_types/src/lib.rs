//! Core value types and error handling for the Aster runtime.
//!
//! This crate provides the foundational types shared by the interpreter and
//! the bytecode layer:
//!
//! - [`Value`] - NaN-boxed 64-bit tagged value
//! - [`ValueType`] - the type tag carried by a value
//! - [`VmError`] / [`ErrorKind`] - host-facing error surface
//!
//! # Examples
//!
//! ```
//! use core_types::{Value, ValueType};
//!
//! let n = Value::number(42.0);
//! assert_eq!(n.value_type(), ValueType::Number);
//! assert!(n.is_truthy());
//!
//! // The encoding round-trips exactly.
//! let bits = n.to_bits();
//! assert_eq!(Value::from_bits(bits), n);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod value;

pub use error::{ErrorKind, VmError};
pub use value::{Value, ValueType};
