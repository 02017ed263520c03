//! Exercises the stack-oriented embedding surface end to end: calls,
//! tables, strings, and the `gc` selectors, rather than any one module in
//! isolation.

use crate::api;
use crate::config::RuntimeConfig;
use crate::thread::GlobalState;
use crate::value::Value;

fn new_global() -> (GlobalState, crate::value::ThreadId) {
    let mut global = GlobalState::new(RuntimeConfig::default());
    let thread = global.main_thread;
    (global, thread)
}

fn cf_sum(global: &mut GlobalState, thread: crate::value::ThreadId) -> crate::error::LuaResult<i32> {
    let top = api::gettop(global, thread);
    let mut sum = 0.0;
    for i in 1..=top {
        sum += api::to_number(global, thread, i).unwrap_or(0.0);
    }
    api::settop(global, thread, 0)?;
    api::push_number(global, thread, sum)?;
    Ok(1)
}

#[test]
fn call_foreign_closure_sums_its_arguments() {
    let (mut global, thread) = new_global();
    let closure = global.new_foreign_closure(cf_sum, vec![]);
    api::push_value(&mut global, thread, Value::Closure(closure)).unwrap();
    api::push_number(&mut global, thread, 10.0).unwrap();
    api::push_number(&mut global, thread, 32.0).unwrap();
    api::call(&mut global, thread, 2, 1, None).unwrap();
    assert_eq!(api::gettop(&global, thread), 1);
    assert_eq!(api::to_number(&global, thread, -1), Some(42.0));
}

#[test]
fn call_pads_missing_results_with_nil() {
    let (mut global, thread) = new_global();
    // cf_sum always returns exactly 1 value; ask for 3.
    let closure = global.new_foreign_closure(cf_sum, vec![]);
    api::push_value(&mut global, thread, Value::Closure(closure)).unwrap();
    api::push_number(&mut global, thread, 1.0).unwrap();
    api::call(&mut global, thread, 1, 3, None).unwrap();
    assert_eq!(api::gettop(&global, thread), 3);
    assert_eq!(api::to_number(&global, thread, -3), Some(1.0));
    assert!(api::is_nil(&global, thread, -2));
    assert!(api::is_nil(&global, thread, -1));
}

#[test]
fn calling_a_non_function_value_is_a_runtime_error() {
    let (mut global, thread) = new_global();
    api::push_number(&mut global, thread, 5.0).unwrap();
    let err = api::call(&mut global, thread, 0, 1, None).unwrap_err();
    assert_eq!(err.kind(), crate::error::LuaError::RuntimeError);
}

#[test]
fn createtable_rawset_rawget_roundtrip_t1() {
    let (mut global, thread) = new_global();
    api::createtable(&mut global, thread, 0, 0).unwrap();
    let table_index = api::gettop(&global, thread);

    api::push_string(&mut global, thread, b"key").unwrap();
    api::push_number(&mut global, thread, 99.0).unwrap();
    api::rawset(&mut global, thread, table_index).unwrap();

    api::push_string(&mut global, thread, b"key").unwrap();
    api::rawget(&mut global, thread, table_index).unwrap();
    assert_eq!(api::to_number(&global, thread, -1), Some(99.0));

    api::push_string(&mut global, thread, b"missing").unwrap();
    api::rawget(&mut global, thread, table_index).unwrap();
    assert!(api::is_nil(&global, thread, -1));
}

#[test]
fn rawseti_then_rawgeti_returns_the_set_value_t4() {
    let (mut global, thread) = new_global();
    api::createtable(&mut global, thread, 8, 0).unwrap();
    let idx = api::gettop(&global, thread);
    for i in 1..=8i64 {
        api::push_number(&mut global, thread, (i * 10) as f64).unwrap();
        api::rawseti(&mut global, thread, idx, i).unwrap();
    }
    for i in 1..=8i64 {
        api::rawgeti(&mut global, thread, idx, i).unwrap();
        assert_eq!(api::to_number(&global, thread, -1), Some((i * 10) as f64));
        api::pop(&mut global, thread, 1).unwrap();
    }
}

#[test]
fn next_visits_each_binding_exactly_once_t2() {
    let (mut global, thread) = new_global();
    api::createtable(&mut global, thread, 0, 4).unwrap();
    let idx = api::gettop(&global, thread);
    for (k, v) in [("a", 1.0), ("b", 2.0), ("c", 3.0)] {
        api::push_string(&mut global, thread, k.as_bytes()).unwrap();
        api::push_number(&mut global, thread, v).unwrap();
        api::rawset(&mut global, thread, idx).unwrap();
    }

    let mut seen = 0;
    api::push_nil(&mut global, thread).unwrap();
    loop {
        let has_more = api::next(&mut global, thread, idx).unwrap();
        if !has_more {
            break;
        }
        seen += 1;
        api::pop(&mut global, thread, 1).unwrap();
    }
    assert_eq!(seen, 3);
}

#[test]
fn concat_matches_left_to_right_byte_concatenation_t10() {
    let (mut global, thread) = new_global();
    api::push_string(&mut global, thread, b"foo").unwrap();
    api::push_string(&mut global, thread, b"bar").unwrap();
    api::push_string(&mut global, thread, b"baz").unwrap();
    api::concat(&mut global, thread, 3).unwrap();
    assert_eq!(api::gettop(&global, thread), 1);
    let idx = global.thread(thread).stack.top - 1;
    match global.thread(thread).stack.get(idx) {
        Value::String(id) => assert_eq!(global.strings.get(id).unwrap(), b"foobarbaz"),
        other => panic!("expected string, got {other:?}"),
    }
}

#[test]
fn concat_zero_pushes_the_empty_string() {
    let (mut global, thread) = new_global();
    api::concat(&mut global, thread, 0).unwrap();
    let idx = global.thread(thread).stack.top - 1;
    match global.thread(thread).stack.get(idx) {
        Value::String(id) => assert_eq!(global.strings.get(id).unwrap(), b""),
        other => panic!("expected string, got {other:?}"),
    }
}

#[test]
fn concat_one_is_a_no_op() {
    let (mut global, thread) = new_global();
    api::push_string(&mut global, thread, b"solo").unwrap();
    let before = api::gettop(&global, thread);
    api::concat(&mut global, thread, 1).unwrap();
    assert_eq!(api::gettop(&global, thread), before);
}

#[test]
fn pushing_equal_strings_yields_identical_handles_t5() {
    let (mut global, thread) = new_global();
    api::push_string(&mut global, thread, b"abc").unwrap();
    api::push_string(&mut global, thread, b"abc").unwrap();
    assert_eq!(
        api::to_pointer(&global, thread, -1),
        api::to_pointer(&global, thread, -2)
    );
}

#[test]
fn light_pointer_and_foreign_data_identity_scenario_6() {
    let (mut global, thread) = new_global();
    let x: u8 = 42;
    let addr = &x as *const u8 as usize;
    api::push_lightuserdata(&mut global, thread, addr).unwrap();
    api::push_lightuserdata(&mut global, thread, addr).unwrap();
    assert!(api::raw_equal(&global, thread, -1, -2));

    let u1 = api::newuserdata(&mut global, thread, 8).unwrap();
    let u2 = api::newuserdata(&mut global, thread, 8).unwrap();
    assert_ne!(u1, u2);
    assert!(!api::raw_equal(&global, thread, -1, -2));
}

#[test]
fn setmetatable_then_getmetatable_roundtrips() {
    let (mut global, thread) = new_global();
    api::createtable(&mut global, thread, 0, 0).unwrap();
    let t = api::gettop(&global, thread);
    api::createtable(&mut global, thread, 0, 0).unwrap();
    api::setmetatable(&mut global, thread, t).unwrap();

    assert!(api::getmetatable(&mut global, thread, t).unwrap());
    assert_eq!(api::gettop(&global, thread), t + 1);
}

#[test]
fn gc_count_tracks_allocations() {
    let (mut global, _thread) = new_global();
    let before = api::gc(&mut global, api::GcOp::Count);
    api::gc(&mut global, api::GcOp::Step { data: 64 });
    let after = api::gc(&mut global, api::GcOp::Count);
    assert!(after > before);
}
