//! VM state and the host-facing API.

use bytecode_system::Chunk;
use core_types::{ErrorKind, Value, ValueType, VmError};

use crate::function::{Function, NativeFn, NativeFunction, Proto};
use crate::heap::{GcStats, Heap, PageAllocFn};
use crate::string::Str;
use crate::table::Table;

/// Hook invoked by the `BP` opcode.
pub type BreakpointFn = fn(&mut Vm);

/// A single-threaded virtual machine context.
///
/// The VM owns its managed heap, a contiguous value stack with an explicit
/// top index, and a globals table. One host thread owns a given VM and
/// calls into it serially; garbage collection is stop-the-world within
/// that thread and runs only at call-entry safe points or on request.
///
/// # Examples
///
/// ```
/// use bytecode_system::{Chunk, Opcode};
/// use core_types::Value;
/// use interpreter::Vm;
///
/// let mut vm = Vm::new();
/// let mut chunk = Chunk::new("demo");
/// chunk.num_locals = 1;
/// chunk.emit_imm(0, Value::number(42.0).to_bits());
/// chunk.emit(Opcode::Ret, 0, 0, 0);
///
/// assert_eq!(vm.run(&chunk).unwrap(), Value::number(42.0));
/// ```
pub struct Vm {
    pub(crate) heap: Heap,
    pub(crate) stack: Vec<Value>,
    pub(crate) stack_top: usize,
    pub(crate) globals: *mut Table,
    pub(crate) breakpoint: Option<BreakpointFn>,
}

impl Vm {
    /// A VM backed by the global allocator.
    pub fn new() -> Vm {
        Vm::from_heap(Heap::new()).expect("VM setup allocation failed")
    }

    /// A VM whose heap pages come from a custom allocator callback.
    pub fn with_allocator(alloc_fn: PageAllocFn, alloc_ctx: *mut ()) -> Result<Vm, VmError> {
        let heap = Heap::with_allocator(alloc_fn, alloc_ctx)
            .ok_or_else(|| VmError::new(ErrorKind::Resource, "initial page allocation failed"))?;
        Vm::from_heap(heap).ok_or_else(|| VmError::new(ErrorKind::Resource, "VM setup allocation failed"))
    }

    fn from_heap(mut heap: Heap) -> Option<Vm> {
        let globals = Table::create(&mut heap, 16);
        if globals.is_null() {
            return None;
        }
        Some(Vm {
            heap,
            stack: Vec::with_capacity(256),
            stack_top: 0,
            globals,
            breakpoint: None,
        })
    }

    // --- stack ---

    /// Current stack top index. Slots at and above it are dead to the GC.
    pub fn top(&self) -> usize {
        self.stack_top
    }

    /// Restore the stack top (native callees use this before returning).
    pub fn set_top(&mut self, top: usize) {
        debug_assert!(top <= self.stack.len());
        self.stack_top = top;
    }

    /// Read a stack slot.
    pub fn slot(&self, i: usize) -> Value {
        debug_assert!(i < self.stack_top);
        self.stack[i]
    }

    /// Write a stack slot.
    pub fn set_slot(&mut self, i: usize, v: Value) {
        debug_assert!(i < self.stack_top);
        self.stack[i] = v;
    }

    /// Push a value; returns its slot index.
    pub fn push(&mut self, v: Value) -> usize {
        if self.stack_top == self.stack.len() {
            self.stack.push(v);
        } else {
            self.stack[self.stack_top] = v;
        }
        self.stack_top += 1;
        self.stack_top - 1
    }

    /// Reserve `n` stack slots, all set to `none`; returns the first index.
    pub(crate) fn alloc_stack(&mut self, n: usize) -> usize {
        let begin = self.stack_top;
        let need = begin + n;
        if self.stack.len() < need {
            self.stack.resize(need, Value::none());
        }
        for slot in &mut self.stack[begin..need] {
            *slot = Value::none();
        }
        self.stack_top = need;
        begin
    }

    // --- values ---

    /// Intern a string and return its value handle.
    pub fn intern(&mut self, s: &str) -> Value {
        let p = Str::create(&mut self.heap, s);
        if p.is_null() {
            return self.oom_value();
        }
        Str::value(p)
    }

    /// The preallocated out-of-memory payload, used when even building an
    /// error string would need a fresh allocation.
    pub(crate) fn oom_value(&self) -> Value {
        Str::value(self.heap.oom_string)
    }

    /// A fresh error string, or the OOM sentinel when allocation fails.
    pub(crate) fn error_string(&mut self, msg: &str) -> Value {
        let p = Str::create(&mut self.heap, msg);
        if p.is_null() {
            return self.oom_value();
        }
        Str::value(p)
    }

    /// Create an empty table with about `reserve` slots.
    pub fn new_table(&mut self, reserve: u32) -> Value {
        let t = Table::create(&mut self.heap, reserve);
        if t.is_null() {
            return Value::none();
        }
        unsafe { (*t).hdr.value() }
    }

    /// Read `table[key]`. Missing keys and non-table bases read as `none`.
    pub fn table_get(&self, table: Value, key: Value) -> Value {
        if !table.is(ValueType::Table) {
            return Value::none();
        }
        unsafe { (*(table.as_addr() as *const Table)).get(key) }
    }

    /// Write `table[key] = value`. No-op on non-tables.
    pub fn table_set(&mut self, table: Value, key: Value, value: Value) {
        if table.is(ValueType::Table) && !key.is_none() {
            unsafe {
                (*(table.as_addr() as *mut Table)).set(key, value);
            }
        }
    }

    /// Number of occupied entries in a table value; 0 for non-tables.
    pub fn table_len(&self, table: Value) -> u32 {
        if !table.is(ValueType::Table) {
            return 0;
        }
        unsafe { (*(table.as_addr() as *const Table)).active_count() }
    }

    /// Create an array of `len` slots, all `none`.
    pub fn new_array(&mut self, len: u32) -> Value {
        let a = crate::array::Array::create(&mut self.heap, len);
        if a.is_null() {
            return Value::none();
        }
        unsafe { (*a).hdr.value() }
    }

    /// Read an array element. Out-of-range or non-array reads are `none`.
    pub fn array_get(&self, array: Value, i: u32) -> Value {
        if !array.is(ValueType::Array) {
            return Value::none();
        }
        let a = array.as_addr() as *const crate::array::Array;
        unsafe {
            if i < (*a).len() {
                crate::array::Array::get(a, i)
            } else {
                Value::none()
            }
        }
    }

    /// Write an array element. No-op out of range or on non-arrays.
    pub fn array_set(&mut self, array: Value, i: u32, value: Value) {
        if !array.is(ValueType::Array) {
            return;
        }
        let a = array.as_addr() as *mut crate::array::Array;
        unsafe {
            if i < (*a).len() {
                crate::array::Array::set(a, i, value);
            }
        }
    }

    /// Number of slots in an array value; 0 for non-arrays.
    pub fn array_len(&self, array: Value) -> u32 {
        if !array.is(ValueType::Array) {
            return 0;
        }
        unsafe { (*(array.as_addr() as *const crate::array::Array)).len() }
    }

    /// Build an immutable prototype from a compiled chunk.
    pub fn load_proto(&mut self, chunk: &Chunk) -> Value {
        let p = Proto::create(&mut self.heap, chunk);
        if p.is_null() {
            return Value::none();
        }
        unsafe { (*p).hdr.value() }
    }

    /// Instantiate a closure over `proto` with the globals environment and
    /// all upvalues `none`.
    pub fn instantiate(&mut self, proto: Value) -> Value {
        assert!(proto.is(ValueType::Proto), "instantiating a non-prototype");
        let f = Function::create(&mut self.heap, proto.as_addr() as *mut Proto, self.globals);
        if f.is_null() {
            return Value::none();
        }
        unsafe { (*f).hdr.value() }
    }

    /// The source-chunk name and line covering instruction `ip` of a
    /// prototype, for host-side diagnostics.
    pub fn source_of(&self, proto: Value, ip: u32) -> Option<(String, u32)> {
        if !proto.is(ValueType::Proto) {
            return None;
        }
        let p = proto.as_addr() as *const Proto;
        unsafe {
            let line = Proto::line_at(p, ip)?;
            Some((Proto::src_name(p).to_string(), line))
        }
    }

    /// Wrap a host callback as a callable value.
    pub fn native(&mut self, callback: NativeFn) -> Value {
        let f = NativeFunction::create(&mut self.heap, callback);
        if f.is_null() {
            return Value::none();
        }
        unsafe { (*f).hdr.value() }
    }

    // --- globals ---

    /// Read a global by name.
    pub fn get_global(&mut self, name: &str) -> Value {
        let key = self.intern(name);
        unsafe { (*self.globals).get(key) }
    }

    /// Write a global by name.
    pub fn set_global(&mut self, name: &str, value: Value) {
        let key = self.intern(name);
        unsafe {
            (*self.globals).set(key, value);
        }
    }

    /// The globals table as a value.
    pub fn globals(&self) -> Value {
        unsafe { (*self.globals).hdr.value() }
    }

    // --- execution ---

    /// Load, instantiate and call a chunk with no arguments, mapping the
    /// boolean call protocol onto a `Result` for embedders.
    pub fn run(&mut self, chunk: &Chunk) -> Result<Value, VmError> {
        let proto = self.load_proto(chunk);
        if !proto.is(ValueType::Proto) {
            return Err(VmError::new(ErrorKind::Resource, "prototype allocation failed"));
        }
        let f = self.instantiate(proto);
        if !f.is(ValueType::Function) {
            return Err(VmError::new(ErrorKind::Resource, "closure allocation failed"));
        }
        let callsite = self.push(f);
        let ok = self.call(callsite, 0);
        let result = self.stack[callsite];
        self.stack_top = callsite;
        if ok {
            Ok(result)
        } else {
            Err(VmError::new(ErrorKind::User, self.describe(result)))
        }
    }

    /// Render a value for host consumption: strings by content, numbers in
    /// their shortest integral form, everything else by kind.
    pub fn describe(&self, v: Value) -> String {
        match v.value_type() {
            ValueType::None => "none".to_string(),
            ValueType::Bool => (v.to_bits() & 1 == 1).to_string(),
            ValueType::Number => {
                let n = v.as_number().unwrap_or(f64::NAN);
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", n as i64)
                } else {
                    format!("{}", n)
                }
            }
            ValueType::String => unsafe { Str::as_str(v.as_addr() as *const Str).to_string() },
            _ => format!("{:?}", v),
        }
    }

    // --- garbage collection ---

    /// Run one mark-sweep cycle now.
    pub fn collect_garbage(&mut self) {
        let Vm {
            heap,
            stack,
            stack_top,
            globals,
            ..
        } = self;
        heap.collect(&stack[..*stack_top], *globals);
    }

    /// Heap counter snapshot.
    pub fn gc_stats(&self) -> GcStats {
        self.heap.stats()
    }

    /// Retain fully-dead pages for reuse instead of releasing them.
    pub fn set_greedy_gc(&mut self, greedy: bool) {
        self.heap.set_greedy(greedy);
    }

    /// The heap, for introspection.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// The heap, mutably.
    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Install the hook run by the `BP` opcode.
    pub fn set_breakpoint(&mut self, hook: Option<BreakpointFn>) {
        self.breakpoint = hook;
    }
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("stack_top", &self.stack_top)
            .field("stats", &self.heap.stats())
            .finish()
    }
}
