//! Call protocol and the bytecode dispatch loop.
//!
//! Frames are projected onto the value stack: the callee sits at the
//! callsite slot, its arguments in the slots after it, and its locals in a
//! region reserved past the caller's top. On every exit path the stack top
//! is restored and the callsite slot holds the return value or the
//! exception payload; the boolean result tells them apart. Failures are
//! never thrown - each caller propagates a false result itself.

use bytecode_system::Opcode;
use core_types::{Value, ValueType};

use crate::function::{Function, NativeFunction, Proto};
use crate::operators;
use crate::string::Str;
use crate::table::Table;
use crate::vm::Vm;

impl Vm {
    /// Call the value at `stack[callsite]` with `n_args` arguments in the
    /// slots after it. Returns true on success; either way the callsite
    /// slot holds the outcome and the stack top is back where it was.
    pub fn call(&mut self, callsite: usize, n_args: usize) -> bool {
        debug_assert!(callsite + n_args < self.stack_top, "arguments above stack top");

        // Call entry is the collection safe point: no allocation is in
        // flight and everything live is rooted from the stack.
        if self.heap.debt_exceeded() {
            self.collect_garbage();
        }

        let fv = self.stack[callsite];
        match fv.value_type() {
            ValueType::NativeFunction => {
                let callback = unsafe { (*(fv.as_addr() as *const NativeFunction)).callback };
                callback(self, callsite, n_args)
            }
            ValueType::Function => {
                let invoke = unsafe { (*(fv.as_addr() as *const Function)).invoke };
                invoke(self, callsite, n_args)
            }
            _ => {
                // Reserved for meta-method resolution.
                let e = self.error_string("invoking non-function");
                self.stack[callsite] = e;
                false
            }
        }
    }
}

/// The interpreter thunk installed on every prototype-backed function.
pub(crate) fn interpreter_invoke(vm: &mut Vm, callsite: usize, n_args: usize) -> bool {
    let stack_frame = vm.stack_top;
    let args_begin = callsite + 1;

    let fv = vm.stack[callsite];
    debug_assert!(fv.is(ValueType::Function));
    let func = fv.as_addr() as *mut Function;
    let proto = unsafe { (*func).proto };
    debug_assert!(!proto.is_null(), "function without a prototype");

    let num_locals = unsafe { (*proto).num_locals } as usize;
    let num_kval = unsafe { (*proto).num_kval } as usize;
    let num_uval = unsafe { (*func).num_uval } as usize;
    let opcode_len = unsafe { (*proto).length } as usize;
    let opcodes = Proto::opcode_ptr(proto);

    let locals_begin = vm.alloc_stack(num_locals);

    // Restore the caller's frame and deliver the outcome.
    macro_rules! ret {
        ($value:expr, $is_exception:expr) => {{
            let v = $value;
            vm.stack_top = stack_frame;
            vm.stack[callsite] = v;
            return !$is_exception;
        }};
    }

    // Operand index: locals for `r >= 0`, arguments for `r < 0`.
    macro_rules! reg {
        ($r:expr) => {{
            let r = $r;
            if r >= 0 {
                assert!((r as usize) < num_locals, "register out of range");
                locals_begin + r as usize
            } else {
                let i = (-(r as i32 + 1)) as usize;
                debug_assert!(i < n_args, "argument out of range");
                args_begin + i
            }
        }};
    }

    macro_rules! kval {
        ($i:expr) => {{
            let i = $i;
            assert!(0 <= i && (i as usize) < num_kval, "constant out of range");
            unsafe { *Proto::kval_ptr(proto).add(i as usize) }
        }};
    }

    macro_rules! uval_ptr {
        ($i:expr) => {{
            let i = $i;
            assert!(0 <= i && (i as usize) < num_uval, "upvalue out of range");
            unsafe { Function::uval_ptr(func).add(i as usize) }
        }};
    }

    let mut ip: usize = 0;
    loop {
        assert!(ip < opcode_len, "instruction pointer out of range");
        let insn = unsafe { *opcodes.add(ip) };
        ip += 1;
        let op = insn.op();
        let (a, b, c) = (insn.a(), insn.b(), insn.c());

        match op {
            Opcode::Type | Opcode::LNot | Opcode::ANeg => {
                let v = vm.stack[reg!(b)];
                let (r, ok) = operators::apply_unary(vm, v, op);
                if !ok {
                    ret!(r, true);
                }
                let dst = reg!(a);
                vm.stack[dst] = r;
            }
            Opcode::AAdd
            | Opcode::ASub
            | Opcode::AMul
            | Opcode::ADiv
            | Opcode::AMod
            | Opcode::APow
            | Opcode::LAnd
            | Opcode::LOr
            | Opcode::CEq
            | Opcode::CNe
            | Opcode::CLt
            | Opcode::CGt
            | Opcode::CLe
            | Opcode::CGe => {
                let lhs = vm.stack[reg!(b)];
                let rhs = vm.stack[reg!(c)];
                let (r, ok) = operators::apply_binary(vm, lhs, rhs, op);
                if !ok {
                    ret!(r, true);
                }
                let dst = reg!(a);
                vm.stack[dst] = r;
            }
            Opcode::Mov => {
                let v = vm.stack[reg!(b)];
                let dst = reg!(a);
                vm.stack[dst] = v;
            }
            Opcode::CMov => {
                let v = if vm.stack[reg!(b)].is_truthy() {
                    vm.stack[reg!(c)]
                } else {
                    Value::none()
                };
                let dst = reg!(a);
                vm.stack[dst] = v;
            }
            Opcode::Thrw => {
                let e = vm.stack[reg!(a)];
                if !e.is_none() {
                    ret!(e, true);
                }
            }
            Opcode::Ret => {
                ret!(vm.stack[reg!(a)], false);
            }
            Opcode::Jns => {
                if !vm.stack[reg!(b)].is_truthy() {
                    ip = jump(ip, a);
                }
            }
            Opcode::Js => {
                if vm.stack[reg!(b)].is_truthy() {
                    ip = jump(ip, a);
                }
            }
            Opcode::Jmp => {
                ip = jump(ip, a);
            }
            Opcode::KImm => {
                assert!(ip < opcode_len, "KIMM payload out of range");
                let imm = unsafe { *opcodes.add(ip) }.as_imm();
                ip += 1;
                let dst = reg!(a);
                vm.stack[dst] = Value::from_bits(imm);
            }
            Opcode::KGet => {
                let v = kval!(b);
                let dst = reg!(a);
                vm.stack[dst] = v;
            }
            Opcode::UGet => {
                let v = unsafe { *uval_ptr!(b) };
                let dst = reg!(a);
                vm.stack[dst] = v;
            }
            Opcode::USet => {
                let v = vm.stack[reg!(b)];
                unsafe {
                    *uval_ptr!(a) = v;
                }
            }
            Opcode::TGet => {
                let base = vm.stack[reg!(c)];
                match base.value_type() {
                    ValueType::Table => {
                        let k = vm.stack[reg!(b)];
                        let v = unsafe { (*(base.as_addr() as *const Table)).get(k) };
                        let dst = reg!(a);
                        vm.stack[dst] = v;
                    }
                    ValueType::None => {
                        let dst = reg!(a);
                        vm.stack[dst] = Value::none();
                    }
                    _ => {
                        let e = vm.error_string("indexing non-table");
                        ret!(e, true);
                    }
                }
            }
            Opcode::TSet => {
                let base_idx = reg!(c);
                let base = vm.stack[base_idx];
                let table = match base.value_type() {
                    ValueType::Table => base.as_addr() as *mut Table,
                    ValueType::None => {
                        let t = Table::create(&mut vm.heap, 4);
                        if t.is_null() {
                            ret!(vm.oom_value(), true);
                        }
                        let tv = unsafe { (*t).hdr.value() };
                        vm.stack[base_idx] = tv;
                        t
                    }
                    _ => {
                        let e = vm.error_string("indexing non-table");
                        ret!(e, true);
                    }
                };
                let key = vm.stack[reg!(a)];
                if key.is_none() {
                    let e = vm.error_string("indexing with none key");
                    ret!(e, true);
                }
                let value = vm.stack[reg!(b)];
                if !unsafe { (*table).set(key, value) } {
                    ret!(vm.oom_value(), true);
                }
            }
            Opcode::GGet => {
                let env = unsafe { (*func).environment };
                let k = vm.stack[reg!(b)];
                let v = unsafe { (*env).get(k) };
                let dst = reg!(a);
                vm.stack[dst] = v;
            }
            Opcode::GSet => {
                let env = unsafe { (*func).environment };
                let k = vm.stack[reg!(a)];
                let v = vm.stack[reg!(b)];
                if key_ok(k) {
                    unsafe {
                        (*env).set(k, v);
                    }
                } else {
                    let e = vm.error_string("indexing with none key");
                    ret!(e, true);
                }
            }
            Opcode::TNew => {
                assert!(b >= 0, "negative table capacity");
                let t = Table::create(&mut vm.heap, b as u32);
                if t.is_null() {
                    ret!(vm.oom_value(), true);
                }
                let dst = reg!(a);
                vm.stack[dst] = unsafe { (*t).hdr.value() };
            }
            Opcode::TDup => {
                let template = kval!(b);
                assert!(template.is(ValueType::Table), "TDUP constant is not a table");
                let t = Table::duplicate(&mut vm.heap, template.as_addr() as *const Table);
                if t.is_null() {
                    ret!(vm.oom_value(), true);
                }
                let dst = reg!(a);
                vm.stack[dst] = unsafe { (*t).hdr.value() };
            }
            Opcode::FDup => {
                let template = kval!(b);
                assert!(template.is(ValueType::Function), "FDUP constant is not a function");
                let src = template.as_addr() as *mut Function;
                let uv_count = unsafe { (*src).num_uval } as usize;
                let result = if uv_count != 0 {
                    let dup = Function::duplicate(&mut vm.heap, src);
                    if dup.is_null() {
                        ret!(vm.oom_value(), true);
                    }
                    for i in 0..uv_count {
                        let v = vm.stack[reg!(c + i as i16)];
                        unsafe {
                            *Function::uval_ptr(dup).add(i) = v;
                        }
                    }
                    unsafe { (*dup).hdr.value() }
                } else {
                    // No captures: the constant closure is shared as-is.
                    template
                };
                let dst = reg!(a);
                vm.stack[dst] = result;
            }
            Opcode::Call => {
                assert!(
                    a >= 0 && b >= 0 && (a as usize) + (b as usize) + 1 <= num_locals,
                    "call frame out of range"
                );
                let site = locals_begin + a as usize;
                if !vm.call(site, b as usize) {
                    let e = vm.stack[site];
                    ret!(e, true);
                }
            }
            Opcode::Invk => {
                assert!(
                    b >= 0 && c >= 0 && (b as usize) + (c as usize) + 1 <= num_locals,
                    "call frame out of range"
                );
                let site = locals_begin + b as usize;
                if vm.call(site, c as usize) {
                    ip = jump(ip, a);
                }
            }
            Opcode::Iter => {
                let target = vm.stack[reg!(c)];
                let cursor_idx = reg!(b);
                let key_idx = reg!(b + 1);
                let value_idx = reg!(b + 2);
                let cursor = vm.stack[cursor_idx].opaque_bits();

                match target.value_type() {
                    // `none` aliases the empty sequence.
                    ValueType::None => ip = jump(ip, a),
                    ValueType::String => {
                        let s = target.as_addr() as *const Str;
                        let (len, byte) = unsafe {
                            let bytes = Str::bytes(s);
                            let i = cursor as usize;
                            (bytes.len(), if i < bytes.len() { bytes[i] } else { 0 })
                        };
                        if (cursor as usize) < len {
                            vm.stack[key_idx] = Value::number(cursor as f64);
                            vm.stack[value_idx] = Value::number(byte as f64);
                            vm.stack[cursor_idx] = Value::opaque(cursor + 1);
                        } else {
                            ip = jump(ip, a);
                        }
                    }
                    ValueType::Table => {
                        let t = target.as_addr() as *const Table;
                        let total = unsafe { (*t).total_slots() } as u64;
                        let mut it = cursor;
                        let mut found = false;
                        while it < total {
                            let pair = unsafe { (*t).slot(it as usize) };
                            if !pair.key.is_none() {
                                vm.stack[key_idx] = pair.key;
                                vm.stack[value_idx] = pair.value;
                                vm.stack[cursor_idx] = Value::opaque(it + 1);
                                found = true;
                                break;
                            }
                            it += 1;
                        }
                        if !found {
                            ip = jump(ip, a);
                        }
                    }
                    ty => {
                        let e = vm.error_string(&format!("cannot iterate {}", ty.name()));
                        ret!(e, true);
                    }
                }
            }
            Opcode::Bp => {
                if let Some(hook) = vm.breakpoint {
                    hook(vm);
                }
            }
            Opcode::Nop => {}
        }
    }
}

#[inline]
fn jump(ip: usize, delta: i16) -> usize {
    (ip as isize + delta as isize) as usize
}

#[inline]
fn key_ok(key: Value) -> bool {
    !key.is_none()
}
