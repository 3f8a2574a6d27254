//! The Aster virtual machine: tagged-value stack interpreter, page-backed
//! managed heap and mark-sweep garbage collector.
//!
//! The VM executes prototypes produced by an external compiler front-end
//! (see `bytecode_system`). All heap objects - strings, tables, arrays,
//! functions, prototypes, blobs - live in chunked pages acquired from a
//! pluggable allocator callback and are reclaimed by a stop-the-world
//! mark-sweep collector with weak string interning.
//!
//! # Examples
//!
//! ```
//! use bytecode_system::{Chunk, Opcode};
//! use core_types::Value;
//! use interpreter::Vm;
//!
//! let mut vm = Vm::new();
//! let mut chunk = Chunk::new("example");
//! chunk.num_locals = 2;
//! chunk.emit_imm(0, Value::number(40.0).to_bits());
//! chunk.emit_imm(1, Value::number(2.0).to_bits());
//! chunk.emit(Opcode::AAdd, 0, 0, 1);
//! chunk.emit(Opcode::Ret, 0, 0, 0);
//!
//! assert_eq!(vm.run(&chunk).unwrap(), Value::number(42.0));
//! ```

#![warn(clippy::all)]

mod array;
mod dispatch;
mod function;
mod gc;
mod heap;
mod operators;
mod string;
mod table;
mod vm;

pub use function::NativeFn;
pub use heap::{
    default_page_alloc, GcStats, Heap, ObjectKind, PageAllocFn, CHUNK_SIZE, PAGE_SIZE,
};
pub use vm::{BreakpointFn, Vm};
