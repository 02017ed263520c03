//! Scenario 5: a held index into the stack stays valid across a growth
//! that reallocates the backing buffer.

use crate::api;
use crate::config::RuntimeConfig;
use crate::thread::GlobalState;
use crate::value::Value;

#[test]
fn stack_growth_preserves_a_previously_obtained_index_scenario_5() {
    let mut global = GlobalState::new(RuntimeConfig::default());
    let thread = global.main_thread;

    api::push_number(&mut global, thread, 1.0).unwrap();
    api::push_number(&mut global, thread, 2.0).unwrap();
    api::push_number(&mut global, thread, 777.0).unwrap();
    let p = api::gettop(&global, thread); // index of 777.0

    api::checkstack(&mut global, thread, 50_000).unwrap();
    for i in 0..50_000 {
        api::push_number(&mut global, thread, i as f64).unwrap();
    }

    assert_eq!(api::to_number(&global, thread, p), Some(777.0));
}

#[test]
fn settop_growing_pads_with_nil_and_shrinking_closes_upvalues() {
    let mut global = GlobalState::new(RuntimeConfig::default());
    let thread = global.main_thread;

    api::push_number(&mut global, thread, 10.0).unwrap();
    let slot = global.thread(thread).stack.top - 1;
    let uv = global.find_or_create_upvalue(thread, slot);

    api::settop(&mut global, thread, 5).unwrap();
    assert_eq!(api::gettop(&global, thread), 5);
    assert!(api::is_nil(&global, thread, 2));

    api::settop(&mut global, thread, 0).unwrap();
    assert!(!global.upvalue(uv).is_open());
    assert_eq!(global.upvalue(uv).get(), Some(Value::Number(10.0)));
}
