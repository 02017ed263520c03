//! Multi-thread bookkeeping: shared globals, cross-thread move, and the
//! main-thread-only shutdown rule (§4.4).

use crate::config::RuntimeConfig;
use crate::error::LuaError;
use crate::thread::GlobalState;
use crate::value::Value;

#[test]
fn closing_a_non_main_thread_is_rejected() {
    let mut global = GlobalState::new(RuntimeConfig::default());
    let worker = global.new_thread();
    let err = global.close(worker).unwrap_err();
    assert_eq!(err.kind(), LuaError::RuntimeError);
}

#[test]
fn new_thread_starts_with_an_empty_private_stack() {
    let mut global = GlobalState::new(RuntimeConfig::default());
    let main = global.main_thread;
    global.thread_mut(main).stack.push(Value::Number(1.0)).unwrap();
    let worker = global.new_thread();
    assert_eq!(global.thread(worker).stack.top, global.thread(worker).stack.base());
}

#[test]
fn xmove_across_two_threads_only_touches_the_requested_count() {
    let mut global = GlobalState::new(RuntimeConfig::default());
    let a = global.main_thread;
    let b = global.new_thread();
    global.thread_mut(a).stack.push(Value::Number(1.0)).unwrap();
    global.thread_mut(a).stack.push(Value::Number(2.0)).unwrap();
    global.thread_mut(a).stack.push(Value::Number(3.0)).unwrap();

    global.xmove(a, b, 1).unwrap();

    assert_eq!(global.thread(a).stack.top - global.thread(a).stack.base(), 2);
    assert_eq!(global.thread(b).stack.top - global.thread(b).stack.base(), 1);
    assert_eq!(global.thread(b).stack.get(global.thread(b).stack.top - 1), Value::Number(3.0));
}
