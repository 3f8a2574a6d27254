//! The interpreter instruction set.

/// Bytecode opcodes.
///
/// Operand conventions: `a`, `b`, `c` are signed register indices
/// (non-negative = local slot, negative = argument `-(i + 1)`), constant
/// indices, upvalue indices or jump deltas depending on the opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// No operation.
    Nop = 0,
    /// Invoke the VM's breakpoint hook.
    Bp,

    // Unary: a = op b
    /// `a` = type name of `b` as an interned string.
    Type,
    /// `a` = logical not of `b` (by truthiness).
    LNot,
    /// `a` = arithmetic negation of `b`.
    ANeg,

    // Binary: a = b op c
    /// Addition; concatenates when both operands are strings.
    AAdd,
    /// Subtraction.
    ASub,
    /// Multiplication.
    AMul,
    /// Division.
    ADiv,
    /// Remainder.
    AMod,
    /// Exponentiation.
    APow,
    /// Logical and: selects `c` when `b` is truthy, else `b`.
    LAnd,
    /// Logical or: selects `b` when `b` is truthy, else `c`.
    LOr,
    /// Equality.
    CEq,
    /// Inequality.
    CNe,
    /// Less-than.
    CLt,
    /// Greater-than.
    CGt,
    /// Less-or-equal.
    CLe,
    /// Greater-or-equal.
    CGe,

    // Data movement.
    /// `a` = `b`.
    Mov,
    /// `a` = `c` when `b` is truthy, else `none`.
    CMov,
    /// `a` = the 64-bit immediate stored in the following instruction word.
    KImm,
    /// `a` = constant `b`.
    KGet,
    /// `a` = upvalue `b`.
    UGet,
    /// upvalue `a` = `b`.
    USet,
    /// `a` = globals\[`b`\].
    GGet,
    /// globals\[`a`\] = `b`.
    GSet,

    // Tables.
    /// `a` = `c`\[`b`\]; indexing `none` yields `none`.
    TGet,
    /// `c`\[`a`\] = `b`; a `none` slot auto-creates a table.
    TSet,
    /// `a` = new table with capacity `b`.
    TNew,
    /// `a` = duplicate of constant table `b`.
    TDup,
    /// `a` = closure over constant function `b`, upvalues from `c..`.
    FDup,

    // Control.
    /// `ip += a`.
    Jmp,
    /// `ip += a` when `b` is truthy.
    Js,
    /// `ip += a` when `b` is falsy.
    Jns,
    /// Return `a` from the current frame.
    Ret,
    /// Raise `a` as an exception unless it is `none`.
    Thrw,
    /// Call local `a` with `b` arguments.
    Call,
    /// Call local `b` with `c` arguments; a non-exceptional result
    /// branches `ip += a`.
    Invk,
    /// Iterate `c` with cursor at `b`, key/value in `b+1`/`b+2`;
    /// exhaustion branches `ip += a`.
    Iter,
}

impl Opcode {
    /// Decode an opcode byte. Returns `None` for bytes that are not
    /// opcodes (such as the payload word following `KIMM`).
    pub fn from_u8(byte: u8) -> Option<Opcode> {
        if byte <= Opcode::Iter as u8 {
            // SAFETY-free decode: discriminants are dense from 0.
            Some(match byte {
                0 => Opcode::Nop,
                1 => Opcode::Bp,
                2 => Opcode::Type,
                3 => Opcode::LNot,
                4 => Opcode::ANeg,
                5 => Opcode::AAdd,
                6 => Opcode::ASub,
                7 => Opcode::AMul,
                8 => Opcode::ADiv,
                9 => Opcode::AMod,
                10 => Opcode::APow,
                11 => Opcode::LAnd,
                12 => Opcode::LOr,
                13 => Opcode::CEq,
                14 => Opcode::CNe,
                15 => Opcode::CLt,
                16 => Opcode::CGt,
                17 => Opcode::CLe,
                18 => Opcode::CGe,
                19 => Opcode::Mov,
                20 => Opcode::CMov,
                21 => Opcode::KImm,
                22 => Opcode::KGet,
                23 => Opcode::UGet,
                24 => Opcode::USet,
                25 => Opcode::GGet,
                26 => Opcode::GSet,
                27 => Opcode::TGet,
                28 => Opcode::TSet,
                29 => Opcode::TNew,
                30 => Opcode::TDup,
                31 => Opcode::FDup,
                32 => Opcode::Jmp,
                33 => Opcode::Js,
                34 => Opcode::Jns,
                35 => Opcode::Ret,
                36 => Opcode::Thrw,
                37 => Opcode::Call,
                38 => Opcode::Invk,
                39 => Opcode::Iter,
                _ => unreachable!(),
            })
        } else {
            None
        }
    }

    /// True for the unary operator group (`a = op b`).
    pub fn is_unary(self) -> bool {
        matches!(self, Opcode::Type | Opcode::LNot | Opcode::ANeg)
    }

    /// True for the binary operator group (`a = b op c`).
    pub fn is_binary(self) -> bool {
        Opcode::AAdd as u8 <= self as u8 && self as u8 <= Opcode::CGe as u8
    }

    /// True for opcodes that can transfer control.
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Opcode::Jmp | Opcode::Js | Opcode::Jns | Opcode::Invk | Opcode::Iter
        )
    }
}
