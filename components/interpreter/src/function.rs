//! Function prototypes, function instances and native callables.

use bytecode_system::{Chunk, Insn, LineInfo};
use core_types::Value;

use crate::heap::{Header, Heap, ObjectKind};
use crate::string::Str;
use crate::table::Table;
use crate::vm::Vm;

/// Dispatch callback stored in function instances and native callables.
///
/// The callee finds itself in `stack[callsite]` and its arguments in the
/// `n_args` slots after it. On return the callsite slot holds the result
/// or the exception payload, the stack top is restored, and the boolean
/// distinguishes the two.
pub type NativeFn = fn(vm: &mut Vm, callsite: usize, n_args: usize) -> bool;

/// Immutable compiled form of a function, shared by every closure over it.
///
/// The header is followed inline by the opcode array, the constant pool
/// and the line table, in that order.
#[repr(C)]
pub struct Proto {
    pub(crate) hdr: Header,
    /// Declared argument count.
    pub num_arguments: u32,
    /// Number of upvalues closures over this prototype carry.
    pub num_uval: u32,
    /// Locals region reserved on every call.
    pub num_locals: u32,
    pub(crate) num_kval: u32,
    pub(crate) length: u32,
    pub(crate) num_lines: u32,
    pub(crate) src_chunk: *mut Str,
    /// Optional JIT-compiled entry (a blob), `none` until installed.
    pub(crate) jit: Value,
}

impl Proto {
    /// Build a prototype from the front-end's output. Returns null when
    /// the allocator fails.
    pub(crate) fn create(heap: &mut Heap, chunk: &Chunk) -> *mut Proto {
        assert!(!chunk.opcodes.is_empty(), "empty opcode stream");

        let src = Str::create(heap, &chunk.src_chunk);
        if src.is_null() {
            return std::ptr::null_mut();
        }

        let total = std::mem::size_of::<Proto>()
            + std::mem::size_of_val(chunk.opcodes.as_slice())
            + std::mem::size_of_val(chunk.kvals.as_slice())
            + std::mem::size_of_val(chunk.lines.as_slice());
        let hdr = heap.alloc_raw(ObjectKind::Proto, total);
        if hdr.is_null() {
            return std::ptr::null_mut();
        }
        let p = hdr as *mut Proto;
        unsafe {
            (*p).num_arguments = chunk.num_arguments;
            (*p).num_uval = chunk.num_uval;
            (*p).num_locals = chunk.num_locals;
            (*p).num_kval = chunk.kvals.len() as u32;
            (*p).length = chunk.opcodes.len() as u32;
            (*p).num_lines = chunk.lines.len() as u32;
            (*p).src_chunk = src;
            (*p).jit = Value::none();

            std::ptr::copy_nonoverlapping(chunk.opcodes.as_ptr(), Proto::opcode_ptr(p), chunk.opcodes.len());
            std::ptr::copy_nonoverlapping(chunk.kvals.as_ptr(), Proto::kval_ptr(p), chunk.kvals.len());
            std::ptr::copy_nonoverlapping(chunk.lines.as_ptr(), Proto::line_ptr(p), chunk.lines.len());
        }
        p
    }

    pub(crate) fn opcode_ptr(p: *const Proto) -> *mut Insn {
        unsafe { (p as *mut u8).add(std::mem::size_of::<Proto>()) as *mut Insn }
    }

    pub(crate) fn kval_ptr(p: *const Proto) -> *mut Value {
        unsafe { Proto::opcode_ptr(p).add((*p).length as usize) as *mut Value }
    }

    pub(crate) fn line_ptr(p: *const Proto) -> *mut LineInfo {
        unsafe { Proto::kval_ptr(p).add((*p).num_kval as usize) as *mut LineInfo }
    }

    pub(crate) unsafe fn kvals<'a>(p: *const Proto) -> &'a [Value] {
        std::slice::from_raw_parts(Proto::kval_ptr(p), (*p).num_kval as usize)
    }

    /// The source line covering instruction `ip`, from the line table.
    pub(crate) unsafe fn line_at(p: *const Proto, ip: u32) -> Option<u32> {
        let lines = std::slice::from_raw_parts(Proto::line_ptr(p), (*p).num_lines as usize);
        let mut hit = None;
        for entry in lines {
            if entry.ip > ip {
                break;
            }
            hit = Some(entry.line);
        }
        hit
    }

    /// Name of the source chunk this prototype was compiled from.
    pub(crate) unsafe fn src_name<'a>(p: *const Proto) -> &'a str {
        Str::as_str((*p).src_chunk)
    }
}

/// Function instance: prototype plus captured upvalues and environment.
/// Upvalues follow the header inline.
#[repr(C)]
pub struct Function {
    pub(crate) hdr: Header,
    pub(crate) num_arguments: u32,
    pub(crate) num_uval: u32,
    /// Either the interpreter thunk or a JIT entry.
    pub(crate) invoke: NativeFn,
    /// Globals environment; defaults to the VM's globals table.
    pub(crate) environment: *mut Table,
    pub(crate) proto: *mut Proto,
}

impl Function {
    /// A closure over `proto` with every upvalue `none`.
    pub(crate) fn create(heap: &mut Heap, proto: *mut Proto, environment: *mut Table) -> *mut Function {
        unsafe {
            let total = std::mem::size_of::<Function>()
                + (*proto).num_uval as usize * std::mem::size_of::<Value>();
            let hdr = heap.alloc_raw(ObjectKind::Function, total);
            if hdr.is_null() {
                return std::ptr::null_mut();
            }
            let f = hdr as *mut Function;
            (*f).num_arguments = (*proto).num_arguments;
            (*f).num_uval = (*proto).num_uval;
            (*f).invoke = crate::dispatch::interpreter_invoke;
            (*f).environment = environment;
            (*f).proto = proto;
            let uvals = Function::uval_ptr(f);
            for i in 0..(*f).num_uval as usize {
                *uvals.add(i) = Value::none();
            }
            f
        }
    }

    /// Copy a closure, upvalues included (FDUP path).
    pub(crate) fn duplicate(heap: &mut Heap, src: *const Function) -> *mut Function {
        unsafe {
            let f = Function::create(heap, (*src).proto, (*src).environment);
            if f.is_null() {
                return f;
            }
            (*f).invoke = (*src).invoke;
            std::ptr::copy_nonoverlapping(
                Function::uval_ptr(src as *mut Function),
                Function::uval_ptr(f),
                (*src).num_uval as usize,
            );
            f
        }
    }

    pub(crate) fn uval_ptr(f: *mut Function) -> *mut Value {
        unsafe { (f as *mut u8).add(std::mem::size_of::<Function>()) as *mut Value }
    }
}

/// Host-native callable.
#[repr(C)]
pub struct NativeFunction {
    pub(crate) hdr: Header,
    pub(crate) callback: NativeFn,
}

impl NativeFunction {
    pub(crate) fn create(heap: &mut Heap, callback: NativeFn) -> *mut NativeFunction {
        let hdr = heap.alloc_raw(ObjectKind::NativeFunction, std::mem::size_of::<NativeFunction>());
        if hdr.is_null() {
            return std::ptr::null_mut();
        }
        let f = hdr as *mut NativeFunction;
        unsafe {
            (*f).callback = callback;
        }
        f
    }
}
