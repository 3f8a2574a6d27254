//! Unary and binary operator semantics.
//!
//! Every operator returns `(value, ok)`; a false `ok` turns the value into
//! an exception payload at the instruction that applied it. Nothing here
//! throws.

use bytecode_system::Opcode;
use core_types::{Value, ValueType};

use crate::string::Str;
use crate::vm::Vm;

pub(crate) fn apply_unary(vm: &mut Vm, v: Value, op: Opcode) -> (Value, bool) {
    match op {
        Opcode::Type => (vm.intern(v.value_type().name()), true),
        Opcode::LNot => (Value::boolean(!v.is_truthy()), true),
        Opcode::ANeg => match v.as_number() {
            Some(n) => (Value::number(-n), true),
            None => type_error(vm, format_args!("negating {}", v.value_type().name())),
        },
        _ => unreachable!("not a unary opcode"),
    }
}

pub(crate) fn apply_binary(vm: &mut Vm, lhs: Value, rhs: Value, op: Opcode) -> (Value, bool) {
    match op {
        Opcode::LAnd => {
            let r = if lhs.is_truthy() { rhs } else { lhs };
            (r, true)
        }
        Opcode::LOr => {
            let r = if lhs.is_truthy() { lhs } else { rhs };
            (r, true)
        }
        Opcode::CEq => (Value::boolean(lhs == rhs), true),
        Opcode::CNe => (Value::boolean(lhs != rhs), true),
        Opcode::CLt | Opcode::CGt | Opcode::CLe | Opcode::CGe => compare(vm, lhs, rhs, op),
        Opcode::AAdd => {
            if let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) {
                return (Value::number(a + b), true);
            }
            if lhs.is(ValueType::String) && rhs.is(ValueType::String) {
                return concat(vm, lhs, rhs);
            }
            arith_error(vm, lhs, rhs)
        }
        Opcode::ASub | Opcode::AMul | Opcode::ADiv | Opcode::AMod | Opcode::APow => {
            match (lhs.as_number(), rhs.as_number()) {
                (Some(a), Some(b)) => {
                    let r = match op {
                        Opcode::ASub => a - b,
                        Opcode::AMul => a * b,
                        Opcode::ADiv => a / b,
                        Opcode::AMod => a % b,
                        Opcode::APow => a.powf(b),
                        _ => unreachable!(),
                    };
                    (Value::number(r), true)
                }
                _ => arith_error(vm, lhs, rhs),
            }
        }
        _ => unreachable!("not a binary opcode"),
    }
}

/// Ordering: numbers by IEEE, strings bytewise; anything else is an error.
fn compare(vm: &mut Vm, lhs: Value, rhs: Value, op: Opcode) -> (Value, bool) {
    if let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) {
        let r = match op {
            Opcode::CLt => a < b,
            Opcode::CGt => a > b,
            Opcode::CLe => a <= b,
            Opcode::CGe => a >= b,
            _ => unreachable!(),
        };
        return (Value::boolean(r), true);
    }
    if lhs.is(ValueType::String) && rhs.is(ValueType::String) {
        let (a, b) = unsafe {
            (
                Str::bytes(lhs.as_addr() as *const Str),
                Str::bytes(rhs.as_addr() as *const Str),
            )
        };
        let r = match op {
            Opcode::CLt => a < b,
            Opcode::CGt => a > b,
            Opcode::CLe => a <= b,
            Opcode::CGe => a >= b,
            _ => unreachable!(),
        };
        return (Value::boolean(r), true);
    }
    type_error(
        vm,
        format_args!(
            "comparing {} with {}",
            lhs.value_type().name(),
            rhs.value_type().name()
        ),
    )
}

fn concat(vm: &mut Vm, lhs: Value, rhs: Value) -> (Value, bool) {
    let joined = unsafe {
        let mut s = String::with_capacity(
            (*(lhs.as_addr() as *const Str)).len as usize
                + (*(rhs.as_addr() as *const Str)).len as usize,
        );
        s.push_str(Str::as_str(lhs.as_addr() as *const Str));
        s.push_str(Str::as_str(rhs.as_addr() as *const Str));
        s
    };
    (vm.intern(&joined), true)
}

fn arith_error(vm: &mut Vm, lhs: Value, rhs: Value) -> (Value, bool) {
    type_error(
        vm,
        format_args!(
            "arithmetic on {} and {}",
            lhs.value_type().name(),
            rhs.value_type().name()
        ),
    )
}

fn type_error(vm: &mut Vm, msg: std::fmt::Arguments<'_>) -> (Value, bool) {
    (vm.error_string(&msg.to_string()), false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unary_semantics() {
        let mut vm = Vm::new();
        let (t, ok) = apply_unary(&mut vm, Value::number(1.0), Opcode::Type);
        assert!(ok);
        assert_eq!(vm.describe(t), "number");

        let (v, ok) = apply_unary(&mut vm, Value::number(2.0), Opcode::ANeg);
        assert!(ok);
        assert_eq!(v, Value::number(-2.0));

        let (v, ok) = apply_unary(&mut vm, Value::none(), Opcode::LNot);
        assert!(ok);
        assert_eq!(v, Value::boolean(true));

        let (_, ok) = apply_unary(&mut vm, Value::boolean(true), Opcode::ANeg);
        assert!(!ok);
    }

    #[test]
    fn test_arithmetic() {
        let mut vm = Vm::new();
        let n = |x| Value::number(x);
        assert_eq!(apply_binary(&mut vm, n(2.0), n(3.0), Opcode::AAdd).0, n(5.0));
        assert_eq!(apply_binary(&mut vm, n(2.0), n(3.0), Opcode::ASub).0, n(-1.0));
        assert_eq!(apply_binary(&mut vm, n(7.0), n(4.0), Opcode::AMod).0, n(3.0));
        assert_eq!(apply_binary(&mut vm, n(2.0), n(10.0), Opcode::APow).0, n(1024.0));
        let (div, ok) = apply_binary(&mut vm, n(1.0), n(0.0), Opcode::ADiv);
        assert!(ok);
        assert_eq!(div.as_number(), Some(f64::INFINITY));
    }

    #[test]
    fn test_string_concat_and_compare() {
        let mut vm = Vm::new();
        let a = vm.intern("foo");
        let b = vm.intern("bar");
        let (joined, ok) = apply_binary(&mut vm, a, b, Opcode::AAdd);
        assert!(ok);
        assert_eq!(joined, vm.intern("foobar"));

        let (lt, ok) = apply_binary(&mut vm, b, a, Opcode::CLt);
        assert!(ok);
        assert_eq!(lt, Value::boolean(true));
    }

    #[test]
    fn test_mixed_arithmetic_fails() {
        let mut vm = Vm::new();
        let s = vm.intern("x");
        let (payload, ok) = apply_binary(&mut vm, s, Value::number(1.0), Opcode::AAdd);
        assert!(!ok);
        assert_eq!(vm.describe(payload), "arithmetic on string and number");
    }

    #[test]
    fn test_logical_select_without_coercion() {
        let mut vm = Vm::new();
        let n = Value::number(0.0); // truthy here
        let (v, ok) = apply_binary(&mut vm, n, Value::boolean(false), Opcode::LAnd);
        assert!(ok);
        assert_eq!(v, Value::boolean(false));
        let (v, _) = apply_binary(&mut vm, Value::none(), n, Opcode::LOr);
        assert_eq!(v, n);
    }

    #[test]
    fn test_equality_across_kinds() {
        let mut vm = Vm::new();
        let s = vm.intern("a");
        let (v, _) = apply_binary(&mut vm, s, Value::number(1.0), Opcode::CEq);
        assert_eq!(v, Value::boolean(false));
        let s2 = vm.intern("a");
        let (v, _) = apply_binary(&mut vm, s, s2, Opcode::CEq);
        assert_eq!(v, Value::boolean(true));
    }
}
