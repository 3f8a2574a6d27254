//! Machine IR and the graph-coloring register allocator.
//!
//! The interpreter's IR layer lowers hot prototypes into an
//! [`MProcedure`]: basic blocks of machine instructions over an unbounded
//! supply of virtual registers. This crate assigns every virtual register
//! a physical register (or a stack spill slot) by Chaitin-style graph
//! coloring, so a machine-code emitter can translate instructions
//! one-for-one using [`arch::to_native`].

#![warn(clippy::all)]

pub mod arch;
mod bitset;
mod ir;
mod regalloc;

pub use bitset::BitSet;
pub use ir::{MBlock, MInsn, MMem, MOp, MProcedure, MReg, Operand, RegClass};
pub use regalloc::{
    allocate_registers, allocate_registers_limited, build_graph, compute_liveness, try_color,
    GraphNode,
};
