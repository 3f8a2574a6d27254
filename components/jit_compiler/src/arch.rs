//! Architectural register sets and calling-convention tables (SysV x86-64).
//!
//! Internally a register is a signed index: GP registers are positive, FP
//! registers negative, zero is invalid. Volatile registers come first in
//! each class so the allocator's initial color limits cover exactly the
//! registers that need no prolog save.

/// A real hardware register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeReg {
    Rax,
    Rdi,
    Rsi,
    Rdx,
    Rcx,
    R8,
    R9,
    R10,
    R11,
    Rbp,
    Rbx,
    R12,
    R13,
    R14,
    R15,
    Rsp,
    Xmm0,
    Xmm1,
    Xmm2,
    Xmm3,
    Xmm4,
    Xmm5,
    Xmm6,
    Xmm7,
    Xmm8,
    Xmm9,
    Xmm10,
    Xmm11,
    Xmm12,
    Xmm13,
    Xmm14,
    Xmm15,
}

/// Internal register encoding: `fp < 0 < gp`, 0 invalid.
pub type Reg = i32;

/// Caller-saved GP registers, in allocation order.
pub const GP_VOLATILE: [NativeReg; 9] = [
    NativeReg::Rax,
    NativeReg::Rdi,
    NativeReg::Rsi,
    NativeReg::Rdx,
    NativeReg::Rcx,
    NativeReg::R8,
    NativeReg::R9,
    NativeReg::R10,
    NativeReg::R11,
];

/// Callee-saved GP registers.
pub const GP_NONVOLATILE: [NativeReg; 6] = [
    NativeReg::Rbp,
    NativeReg::Rbx,
    NativeReg::R12,
    NativeReg::R13,
    NativeReg::R14,
    NativeReg::R15,
];

/// GP argument-passing order.
pub const GP_ARGUMENT: [NativeReg; 6] = [
    NativeReg::Rdi,
    NativeReg::Rsi,
    NativeReg::Rdx,
    NativeReg::Rcx,
    NativeReg::R8,
    NativeReg::R9,
];

/// Caller-saved FP registers (all of them, on SysV).
pub const FP_VOLATILE: [NativeReg; 16] = [
    NativeReg::Xmm0,
    NativeReg::Xmm1,
    NativeReg::Xmm2,
    NativeReg::Xmm3,
    NativeReg::Xmm4,
    NativeReg::Xmm5,
    NativeReg::Xmm6,
    NativeReg::Xmm7,
    NativeReg::Xmm8,
    NativeReg::Xmm9,
    NativeReg::Xmm10,
    NativeReg::Xmm11,
    NativeReg::Xmm12,
    NativeReg::Xmm13,
    NativeReg::Xmm14,
    NativeReg::Xmm15,
];

/// Callee-saved FP registers.
pub const FP_NONVOLATILE: [NativeReg; 0] = [];

/// FP argument-passing order.
pub const FP_ARGUMENT: [NativeReg; 8] = [
    NativeReg::Xmm0,
    NativeReg::Xmm1,
    NativeReg::Xmm2,
    NativeReg::Xmm3,
    NativeReg::Xmm4,
    NativeReg::Xmm5,
    NativeReg::Xmm6,
    NativeReg::Xmm7,
];

/// Allocatable GP register count.
pub const NUM_GP: usize = GP_VOLATILE.len() + GP_NONVOLATILE.len();
/// Allocatable FP register count.
pub const NUM_FP: usize = FP_VOLATILE.len() + FP_NONVOLATILE.len();

/// Recover the hardware register for an internal index.
pub fn to_native(r: Reg) -> Option<NativeReg> {
    if r > 0 && (r as usize) <= NUM_GP {
        let i = r as usize - 1;
        Some(if i < GP_VOLATILE.len() {
            GP_VOLATILE[i]
        } else {
            GP_NONVOLATILE[i - GP_VOLATILE.len()]
        })
    } else if r < 0 && (-r as usize) <= NUM_FP {
        let i = -r as usize - 1;
        Some(if i < FP_VOLATILE.len() {
            FP_VOLATILE[i]
        } else {
            FP_NONVOLATILE[i - FP_VOLATILE.len()]
        })
    } else {
        None
    }
}

/// The internal index of a hardware register; 0 when it is not
/// allocatable (the stack pointer).
pub fn from_native(n: NativeReg) -> Reg {
    for r in 1..=NUM_GP as Reg {
        if to_native(r) == Some(n) {
            return r;
        }
    }
    for r in 1..=NUM_FP as Reg {
        if to_native(-r) == Some(n) {
            return -r;
        }
    }
    0
}

/// True for registers the callee may clobber without saving.
pub fn is_volatile(r: Reg) -> bool {
    if r < 0 {
        (-r as usize) <= FP_VOLATILE.len()
    } else {
        r > 0 && (r as usize) <= GP_VOLATILE.len()
    }
}

/// The register carrying argument `gp_index` / `fp_index` of the given
/// class, or 0 past the register-passing window.
pub fn map_argument(gp_index: usize, fp_index: usize, fp: bool) -> Reg {
    if fp {
        if fp_index < FP_ARGUMENT.len() {
            from_native(FP_ARGUMENT[fp_index])
        } else {
            0
        }
    } else if gp_index < GP_ARGUMENT.len() {
        from_native(GP_ARGUMENT[gp_index])
    } else {
        0
    }
}
