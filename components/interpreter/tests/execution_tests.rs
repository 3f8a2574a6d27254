//! End-to-end interpreter tests: call protocol, opcode semantics and the
//! exception model.

use bytecode_system::{Chunk, Opcode};
use core_types::{Value, ValueType};
use interpreter::Vm;

fn num(n: f64) -> Value {
    Value::number(n)
}

/// Load and instantiate a chunk, returning the closure value.
fn closure(vm: &mut Vm, chunk: &Chunk) -> Value {
    let proto = vm.load_proto(chunk);
    assert!(proto.is(ValueType::Proto));
    let f = vm.instantiate(proto);
    assert!(f.is(ValueType::Function));
    f
}

#[test]
fn immediate_and_return() {
    // KIMM a=0 imm=42 ; RET a=0  =>  returns number 42.
    let mut vm = Vm::new();
    let mut chunk = Chunk::new("s1");
    chunk.num_locals = 1;
    chunk.emit_imm(0, num(42.0).to_bits());
    chunk.emit(Opcode::Ret, 0, 0, 0);
    assert_eq!(vm.run(&chunk).unwrap(), num(42.0));
}

#[test]
fn throw_returns_payload_in_callsite_slot() {
    // KIMM a=0 imm="x" ; THRW a=0 ; RET a=0  =>  ok=false, payload "x".
    let mut vm = Vm::new();
    let x = vm.intern("x");
    let mut chunk = Chunk::new("s2");
    chunk.num_locals = 1;
    chunk.emit_imm(0, x.to_bits());
    chunk.emit(Opcode::Thrw, 0, 0, 0);
    chunk.emit(Opcode::Ret, 0, 0, 0);

    let f = closure(&mut vm, &chunk);
    let site = vm.push(f);
    let top_before = vm.top();
    let ok = vm.call(site, 0);
    assert!(!ok);
    assert_eq!(vm.slot(site), x);
    assert_eq!(vm.top(), top_before);
}

#[test]
fn throw_of_none_is_a_nop() {
    let mut vm = Vm::new();
    let mut chunk = Chunk::new("t");
    chunk.num_locals = 1;
    chunk.emit(Opcode::Thrw, 0, 0, 0); // local 0 is none
    chunk.emit_imm(0, num(5.0).to_bits());
    chunk.emit(Opcode::Ret, 0, 0, 0);
    assert_eq!(vm.run(&chunk).unwrap(), num(5.0));
}

#[test]
fn tset_autocreates_table_and_tget_reads_back() {
    // TSET on a none slot, then TGET of the same key.
    let mut vm = Vm::new();
    let mut chunk = Chunk::new("s3");
    chunk.num_locals = 4;
    chunk.emit_imm(1, num(1.0).to_bits()); // key
    chunk.emit_imm(2, num(42.0).to_bits()); // value
    chunk.emit(Opcode::TSet, 1, 2, 0); // local0[key] = value, auto-creates
    chunk.emit(Opcode::TGet, 3, 1, 0); // local3 = local0[key]
    chunk.emit(Opcode::Ret, 3, 0, 0);
    assert_eq!(vm.run(&chunk).unwrap(), num(42.0));

    // The slot itself now holds a table; observe by returning it.
    let mut chunk2 = Chunk::new("s3b");
    chunk2.num_locals = 3;
    chunk2.emit_imm(1, num(2.0).to_bits());
    chunk2.emit_imm(2, num(7.0).to_bits());
    chunk2.emit(Opcode::TSet, 1, 2, 0);
    chunk2.emit(Opcode::Ret, 0, 0, 0);
    let t = vm.run(&chunk2).unwrap();
    assert!(t.is(ValueType::Table));
    assert_eq!(vm.table_get(t, num(2.0)), num(7.0));
}

#[test]
fn tget_of_none_base_yields_none() {
    let mut vm = Vm::new();
    let mut chunk = Chunk::new("t");
    chunk.num_locals = 2;
    chunk.emit_imm(1, num(1.0).to_bits());
    chunk.emit(Opcode::TGet, 0, 1, 0); // base local0 is none
    chunk.emit(Opcode::Ret, 0, 0, 0);
    assert!(vm.run(&chunk).unwrap().is_none());
}

#[test]
fn indexing_non_table_fails() {
    let mut vm = Vm::new();
    let mut chunk = Chunk::new("t");
    chunk.num_locals = 2;
    chunk.emit_imm(0, num(9.0).to_bits());
    chunk.emit(Opcode::TGet, 1, 1, 0); // base local0 is a number
    chunk.emit(Opcode::Ret, 1, 0, 0);
    let err = vm.run(&chunk).unwrap_err();
    assert_eq!(err.message, "indexing non-table");
}

#[test]
fn arguments_are_negative_registers() {
    let mut vm = Vm::new();
    let mut callee = Chunk::new("sum2");
    callee.num_arguments = 2;
    callee.num_locals = 1;
    callee.emit(Opcode::AAdd, 0, -1, -2); // local0 = arg0 + arg1
    callee.emit(Opcode::Ret, 0, 0, 0);

    let f = closure(&mut vm, &callee);
    let site = vm.push(f);
    vm.push(num(3.0));
    vm.push(num(4.0));
    assert!(vm.call(site, 2));
    assert_eq!(vm.slot(site), num(7.0));
}

#[test]
fn call_opcode_invokes_and_propagates_result() {
    let mut vm = Vm::new();
    let mut callee = Chunk::new("callee");
    callee.num_arguments = 1;
    callee.num_locals = 1;
    callee.emit(Opcode::AMul, 0, -1, -1); // square the argument
    callee.emit(Opcode::Ret, 0, 0, 0);
    let f = closure(&mut vm, &callee);

    let mut caller = Chunk::new("caller");
    caller.num_locals = 2;
    let k = caller.add_constant(f) as i16;
    caller.emit(Opcode::KGet, 0, k, 0); // local0 = callee
    caller.emit_imm(1, num(6.0).to_bits()); // local1 = arg
    caller.emit(Opcode::Call, 0, 1, 0); // call local0 with 1 arg
    caller.emit(Opcode::Ret, 0, 0, 0); // callsite slot holds the result
    assert_eq!(vm.run(&caller).unwrap(), num(36.0));
}

#[test]
fn exceptions_propagate_through_nested_frames() {
    let mut vm = Vm::new();
    let boom = vm.intern("boom");

    let mut thrower = Chunk::new("thrower");
    thrower.num_locals = 1;
    thrower.emit_imm(0, boom.to_bits());
    thrower.emit(Opcode::Thrw, 0, 0, 0);
    thrower.emit(Opcode::Ret, 0, 0, 0);
    let tf = closure(&mut vm, &thrower);

    let mut middle = Chunk::new("middle");
    middle.num_locals = 1;
    let k = middle.add_constant(tf) as i16;
    middle.emit(Opcode::KGet, 0, k, 0);
    middle.emit(Opcode::Call, 0, 0, 0); // no handler: propagates
    middle.emit(Opcode::Ret, 0, 0, 0);

    let err = vm.run(&middle).unwrap_err();
    assert_eq!(err.message, "boom");
}

#[test]
fn invk_branches_on_success_and_falls_through_on_exception() {
    let mut vm = Vm::new();

    // A callee that returns 1 and one that throws.
    let mut ok_fn = Chunk::new("ok");
    ok_fn.num_locals = 1;
    ok_fn.emit_imm(0, num(1.0).to_bits());
    ok_fn.emit(Opcode::Ret, 0, 0, 0);
    let okf = closure(&mut vm, &ok_fn);

    let oops = vm.intern("oops");
    let mut bad_fn = Chunk::new("bad");
    bad_fn.num_locals = 1;
    bad_fn.emit_imm(0, oops.to_bits());
    bad_fn.emit(Opcode::Thrw, 0, 0, 0);
    bad_fn.emit(Opcode::Ret, 0, 0, 0);
    let badf = closure(&mut vm, &bad_fn);

    let build = |callee: Value| {
        let mut c = Chunk::new("invk");
        c.num_locals = 2;
        let k = c.add_constant(callee) as i16;
        c.emit(Opcode::KGet, 0, k, 0); //  0: local0 = callee
        c.emit(Opcode::Invk, 3, 0, 0); //  1: call; success skips handler
        c.emit_imm(1, num(99.0).to_bits()); // 2-3: handler result
        c.emit(Opcode::Ret, 1, 0, 0); //  4: return 99
        c.emit(Opcode::Ret, 0, 0, 0); //  5: return the call result
        c
    };

    assert_eq!(vm.run(&build(okf)).unwrap(), num(1.0));
    // The exceptional path runs the handler instead of unwinding.
    assert_eq!(vm.run(&build(badf)).unwrap(), num(99.0));
}

#[test]
fn invoking_non_function_fails() {
    let mut vm = Vm::new();
    let site = vm.push(num(5.0));
    assert!(!vm.call(site, 0));
    assert_eq!(vm.describe(vm.slot(site)), "invoking non-function");
}

#[test]
fn native_function_contract() {
    fn nat_sum(vm: &mut Vm, callsite: usize, n_args: usize) -> bool {
        let saved = vm.top();
        let mut sum = 0.0;
        for i in 0..n_args {
            sum += vm.slot(callsite + 1 + i).as_number().unwrap_or(0.0);
        }
        vm.set_slot(callsite, Value::number(sum));
        vm.set_top(saved);
        true
    }

    let mut vm = Vm::new();
    let f = vm.native(nat_sum);
    let site = vm.push(f);
    vm.push(num(1.0));
    vm.push(num(2.0));
    vm.push(num(3.0));
    assert!(vm.call(site, 3));
    assert_eq!(vm.slot(site), num(6.0));
}

#[test]
fn closures_capture_upvalues_via_fdup() {
    let mut vm = Vm::new();

    let mut inner = Chunk::new("inner");
    inner.num_uval = 1;
    inner.num_locals = 1;
    inner.emit(Opcode::UGet, 0, 0, 0);
    inner.emit(Opcode::Ret, 0, 0, 0);
    let template = closure(&mut vm, &inner);

    let mut outer = Chunk::new("outer");
    outer.num_locals = 2;
    let k = outer.add_constant(template) as i16;
    outer.emit_imm(1, num(7.0).to_bits()); // the captured value
    outer.emit(Opcode::FDup, 0, k, 1); // close over local1
    outer.emit(Opcode::Call, 0, 0, 0);
    outer.emit(Opcode::Ret, 0, 0, 0);
    assert_eq!(vm.run(&outer).unwrap(), num(7.0));
}

#[test]
fn fdup_without_upvalues_reuses_the_constant() {
    let mut vm = Vm::new();
    let mut plain = Chunk::new("plain");
    plain.num_locals = 1;
    plain.emit_imm(0, num(3.0).to_bits());
    plain.emit(Opcode::Ret, 0, 0, 0);
    let template = closure(&mut vm, &plain);

    let mut outer = Chunk::new("outer");
    outer.num_locals = 1;
    let k = outer.add_constant(template) as i16;
    outer.emit(Opcode::FDup, 0, k, 0);
    outer.emit(Opcode::Ret, 0, 0, 0);
    // No captures: the very same closure object comes back.
    assert_eq!(vm.run(&outer).unwrap(), template);
}

#[test]
fn uset_writes_the_closure_upvalue() {
    let mut vm = Vm::new();
    let mut inner = Chunk::new("inner");
    inner.num_uval = 1;
    inner.num_arguments = 1;
    inner.num_locals = 1;
    inner.emit(Opcode::USet, 0, -1, 0); // upvalue0 = arg0
    inner.emit(Opcode::UGet, 0, 0, 0);
    inner.emit(Opcode::Ret, 0, 0, 0);
    let f = closure(&mut vm, &inner);

    let site = vm.push(f);
    vm.push(num(11.0));
    assert!(vm.call(site, 1));
    assert_eq!(vm.slot(site), num(11.0));
}

#[test]
fn globals_are_shared_between_chunks_and_host() {
    let mut vm = Vm::new();
    let name = vm.intern("counter");

    let mut setter = Chunk::new("setter");
    setter.num_locals = 2;
    setter.emit_imm(0, name.to_bits());
    setter.emit_imm(1, num(33.0).to_bits());
    setter.emit(Opcode::GSet, 0, 1, 0); // globals[local0] = local1
    setter.emit(Opcode::Ret, 1, 0, 0);
    vm.run(&setter).unwrap();
    assert_eq!(vm.get_global("counter"), num(33.0));

    let mut getter = Chunk::new("getter");
    getter.num_locals = 2;
    getter.emit_imm(0, name.to_bits());
    getter.emit(Opcode::GGet, 1, 0, 0); // local1 = globals[local0]
    getter.emit(Opcode::Ret, 1, 0, 0);
    assert_eq!(vm.run(&getter).unwrap(), num(33.0));
}

#[test]
fn zero_and_empty_string_are_truthy() {
    let mut vm = Vm::new();
    let build = |v: Value| {
        let mut c = Chunk::new("truthy");
        c.num_locals = 2;
        c.emit_imm(0, v.to_bits()); // 0-1
        c.emit(Opcode::Js, 3, 0, 0); // 2: branch when truthy
        c.emit_imm(1, Value::boolean(false).to_bits()); // 3-4
        c.emit(Opcode::Ret, 1, 0, 0); // 5
        c.emit_imm(1, Value::boolean(true).to_bits()); // 6-7
        c.emit(Opcode::Ret, 1, 0, 0); // 8
        c
    };
    let empty = vm.intern("");
    assert_eq!(vm.run(&build(num(0.0))).unwrap(), Value::boolean(true));
    assert_eq!(vm.run(&build(empty)).unwrap(), Value::boolean(true));
    assert_eq!(vm.run(&build(Value::none())).unwrap(), Value::boolean(false));
    assert_eq!(
        vm.run(&build(Value::boolean(false))).unwrap(),
        Value::boolean(false)
    );
}

#[test]
fn cmov_selects_or_clears() {
    let mut vm = Vm::new();
    let mut chunk = Chunk::new("cmov");
    chunk.num_locals = 3;
    chunk.emit_imm(1, Value::boolean(false).to_bits());
    chunk.emit_imm(2, num(8.0).to_bits());
    chunk.emit(Opcode::CMov, 0, 1, 2); // condition false: none
    chunk.emit(Opcode::Ret, 0, 0, 0);
    assert!(vm.run(&chunk).unwrap().is_none());

    let mut chunk2 = Chunk::new("cmov2");
    chunk2.num_locals = 3;
    chunk2.emit_imm(1, Value::boolean(true).to_bits());
    chunk2.emit_imm(2, num(8.0).to_bits());
    chunk2.emit(Opcode::CMov, 0, 1, 2);
    chunk2.emit(Opcode::Ret, 0, 0, 0);
    assert_eq!(vm.run(&chunk2).unwrap(), num(8.0));
}

#[test]
fn string_iteration_yields_index_byte_pairs() {
    // Sum the bytes of "AB" (65 + 66).
    let mut vm = Vm::new();
    let s = vm.intern("AB");
    let mut chunk = Chunk::new("iter");
    chunk.num_locals = 5; // 0: target, 1: cursor, 2: key, 3: value, 4: sum
    let k = chunk.add_constant(s) as i16;
    chunk.emit(Opcode::KGet, 0, k, 0); // 0
    chunk.emit_imm(4, num(0.0).to_bits()); // 1-2
    chunk.emit(Opcode::Iter, 2, 1, 0); // 3: exhausted -> ip 6
    chunk.emit(Opcode::AAdd, 4, 4, 3); // 4: sum += byte
    chunk.emit(Opcode::Jmp, -3, 0, 0); // 5: back to ITER
    chunk.emit(Opcode::Ret, 4, 0, 0); // 6
    assert_eq!(vm.run(&chunk).unwrap(), num(131.0));
}

#[test]
fn table_iteration_visits_every_entry() {
    let mut vm = Vm::new();
    let t = vm.new_table(4);
    for i in 0..5 {
        vm.table_set(t, num(i as f64), num(1.0));
    }
    let mut chunk = Chunk::new("titer");
    chunk.num_locals = 5;
    let k = chunk.add_constant(t) as i16;
    chunk.emit(Opcode::KGet, 0, k, 0); // 0
    chunk.emit_imm(4, num(0.0).to_bits()); // 1-2: count
    chunk.emit(Opcode::Iter, 2, 1, 0); // 3
    chunk.emit(Opcode::AAdd, 4, 4, 3); // 4: count += value (1.0 each)
    chunk.emit(Opcode::Jmp, -3, 0, 0); // 5
    chunk.emit(Opcode::Ret, 4, 0, 0); // 6
    assert_eq!(vm.run(&chunk).unwrap(), num(5.0));
}

#[test]
fn iterating_none_is_empty() {
    let mut vm = Vm::new();
    let mut chunk = Chunk::new("niter");
    chunk.num_locals = 5;
    chunk.emit_imm(4, num(0.0).to_bits()); // 0-1
    chunk.emit(Opcode::Iter, 2, 1, 0); // 2: target local0 is none
    chunk.emit(Opcode::AAdd, 4, 4, 3); // 3
    chunk.emit(Opcode::Jmp, -3, 0, 0); // 4
    chunk.emit(Opcode::Ret, 4, 0, 0); // 5
    assert_eq!(vm.run(&chunk).unwrap(), num(0.0));
}

#[test]
fn iterating_a_number_fails() {
    let mut vm = Vm::new();
    let mut chunk = Chunk::new("berr");
    chunk.num_locals = 4;
    chunk.emit_imm(0, num(1.0).to_bits());
    chunk.emit(Opcode::Iter, 1, 1, 0);
    chunk.emit(Opcode::Ret, 0, 0, 0);
    let err = vm.run(&chunk).unwrap_err();
    assert_eq!(err.message, "cannot iterate number");
}

#[test]
fn tdup_copies_the_template() {
    let mut vm = Vm::new();
    let template = vm.new_table(4);
    vm.table_set(template, num(1.0), num(10.0));

    let mut chunk = Chunk::new("tdup");
    chunk.num_locals = 3;
    let k = chunk.add_constant(template) as i16;
    chunk.emit(Opcode::TDup, 0, k, 0);
    chunk.emit_imm(1, num(1.0).to_bits());
    chunk.emit_imm(2, num(99.0).to_bits());
    chunk.emit(Opcode::TSet, 1, 2, 0); // mutate the copy
    chunk.emit(Opcode::Ret, 0, 0, 0);
    let copy = vm.run(&chunk).unwrap();
    assert!(copy.is(ValueType::Table));
    assert_eq!(vm.table_get(copy, num(1.0)), num(99.0));
    // The template is untouched.
    assert_eq!(vm.table_get(template, num(1.0)), num(10.0));
}

#[test]
fn line_info_survives_into_the_prototype() {
    let mut vm = Vm::new();
    let mut chunk = Chunk::new("script.as");
    chunk.num_locals = 1;
    chunk.mark_line(3);
    chunk.emit_imm(0, num(1.0).to_bits());
    chunk.mark_line(9);
    chunk.emit(Opcode::Ret, 0, 0, 0);

    let proto = vm.load_proto(&chunk);
    assert_eq!(vm.source_of(proto, 0), Some(("script.as".to_string(), 3)));
    assert_eq!(vm.source_of(proto, 2), Some(("script.as".to_string(), 9)));
    assert_eq!(vm.source_of(Value::none(), 0), None);
}

#[test]
fn table_len_counts_entries() {
    let mut vm = Vm::new();
    let t = vm.new_table(4);
    assert_eq!(vm.table_len(t), 0);
    for i in 0..6 {
        vm.table_set(t, num(i as f64), num(0.0));
    }
    assert_eq!(vm.table_len(t), 6);
    vm.table_set(t, num(0.0), num(9.0)); // overwrite, not a new entry
    assert_eq!(vm.table_len(t), 6);
}

#[test]
fn breakpoint_hook_fires() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    static HITS: AtomicUsize = AtomicUsize::new(0);
    fn hook(_vm: &mut Vm) {
        HITS.fetch_add(1, Ordering::Relaxed);
    }

    let mut vm = Vm::new();
    vm.set_breakpoint(Some(hook));
    let mut chunk = Chunk::new("bp");
    chunk.num_locals = 1;
    chunk.emit(Opcode::Bp, 0, 0, 0);
    chunk.emit(Opcode::Nop, 0, 0, 0);
    chunk.emit(Opcode::Bp, 0, 0, 0);
    chunk.emit(Opcode::Ret, 0, 0, 0);
    vm.run(&chunk).unwrap();
    assert_eq!(HITS.load(Ordering::Relaxed), 2);
}

#[test]
fn interpreter_is_deterministic() {
    // A counting loop: sum 1..=10; two runs give identical results.
    let mut c = Chunk::new("det");
    c.num_locals = 4; // 0: i, 1: sum, 2: limit, 3: scratch
    c.emit_imm(0, num(0.0).to_bits()); //  0-1: i = 0
    c.emit_imm(1, num(0.0).to_bits()); //  2-3: sum = 0
    c.emit_imm(2, num(10.0).to_bits()); //  4-5: limit = 10
    c.emit(Opcode::CGe, 3, 0, 2); //  6: scratch = i >= limit
    c.emit(Opcode::Js, 5, 3, 0); //  7: done -> 13
    c.emit_imm(3, num(1.0).to_bits()); //  8-9
    c.emit(Opcode::AAdd, 0, 0, 3); // 10: i += 1
    c.emit(Opcode::AAdd, 1, 1, 0); // 11: sum += i
    c.emit(Opcode::Jmp, -7, 0, 0); // 12: back to 6
    c.emit(Opcode::Ret, 1, 0, 0); // 13

    let mut vm = Vm::new();
    let first = vm.run(&c).unwrap();
    let second = vm.run(&c).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, num(55.0));
}
