//! Bytecode representation for the Aster runtime.
//!
//! This crate is the contract between the external compiler front-end and
//! the interpreter core:
//!
//! - [`Opcode`] - the instruction set
//! - [`Insn`] - one fixed-width instruction word `(op, a, b, c)` with a
//!   64-bit immediate overlay for `KIMM`
//! - [`LineInfo`] - instruction-to-source-line mapping
//! - [`Chunk`] - everything the front-end emits for one function, consumed
//!   by the interpreter when it creates a function prototype

#![warn(missing_docs)]
#![warn(clippy::all)]

mod chunk;
mod insn;
mod opcode;

pub use chunk::Chunk;
pub use insn::{Insn, LineInfo};
pub use opcode::Opcode;
