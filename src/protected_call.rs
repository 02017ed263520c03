//! Protected call / error propagation (§4.5).
//!
//! The source unwinds to the innermost catch frame with a C `longjmp`,
//! bypassing normal function returns entirely. This crate instead follows
//! the early-return discipline idiomatic Rust error handling already gives:
//! every fallible internal operation returns
//! [`LuaResult`], and `?` already walks back to whoever is running the
//! protected call the moment something fails — no host-language exception
//! or panic is involved for an expected failure. [`pcall`] is the boundary
//! that turns that propagating `Err` back into a `Status` plus a restored
//! stack, exactly the way the source's `luaD_pcall` restores its saved
//! `(ci, base, top, nCcalls)` snapshot in its `catch` path.

use crate::error::{LuaError, LuaFullError, LuaResult};
use crate::thread::GlobalState;
use crate::value::{ThreadId, Value};

/// `pcall`/`xpcall` status (§6, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    RuntimeError,
    SyntaxError,
    MemoryError,
    GCError,
    /// The error handler (`errfunc`) itself raised while handling another
    /// error.
    ErrorInErrorHandling,
}

impl From<LuaError> for Status {
    fn from(e: LuaError) -> Self {
        match e {
            LuaError::SyntaxError => Status::SyntaxError,
            LuaError::MemoryError => Status::MemoryError,
            LuaError::GCError => Status::GCError,
            LuaError::ErrorInErrorHandling => Status::ErrorInErrorHandling,
            LuaError::RuntimeError | LuaError::StackOverflow | LuaError::IndexOutOfBounds => {
                Status::RuntimeError
            }
        }
    }
}

/// Everything a failed `pcall` restores: call-chain depth, stack top
/// (before truncating to `oldtop`), and the foreign-call depth counter
/// (§4.5 Contract).
struct Snapshot {
    ci_depth: usize,
    base: usize,
    c_call_depth: usize,
}

impl Snapshot {
    fn capture(global: &GlobalState, thread: ThreadId) -> Self {
        let t = global.thread(thread);
        Self {
            ci_depth: t.stack.call_infos.len(),
            base: t.stack.base(),
            c_call_depth: t.c_call_depth,
        }
    }

    /// Truncate the call chain back to this snapshot's depth and reset
    /// `top`/`base` to `oldtop`, the pre-call stack position (§4.5).
    fn restore(&self, global: &mut GlobalState, thread: ThreadId, oldtop: usize) {
        global.close_upvalues_from(thread, self.base);
        let t = global.thread_mut(thread);
        t.stack.call_infos.truncate(self.ci_depth.max(1));
        t.stack.top = oldtop;
        t.c_call_depth = self.c_call_depth;
    }
}

/// Message-handler invocation type: `errfunc`'s job is to transform the raw
/// error value before it replaces the error object on the stack. It is
/// itself a plain closure over `(global, thread, raw_error) -> LuaResult<Value>`
/// so callers can run either a foreign function directly or (once scripted
/// execution is wired up by an embedder) a script closure.
pub type ErrorHandler<'a> = dyn FnMut(&mut GlobalState, ThreadId, Value) -> LuaResult<Value> + 'a;

/// `pcall(thread, f, oldtop, errfunc)` (§4.5).
///
/// Runs `f`. On success, the thread is left exactly as `f` left it and
/// [`Status::Ok`] is returned. On failure at any nested depth, the snapshot
/// taken before `f` ran is restored, `top` is truncated to `oldtop`, and
/// exactly one value — the error object, passed through `errfunc` if
/// supplied — is left on top of the stack.
///
/// `errfunc` runs under the *outer* protected frame: if it itself raises,
/// the caller sees [`Status::ErrorInErrorHandling`] rather than the
/// original error (§4.5).
pub fn pcall<F>(
    global: &mut GlobalState,
    thread: ThreadId,
    oldtop: usize,
    mut errfunc: Option<&mut ErrorHandler<'_>>,
    f: F,
) -> Status
where
    F: FnOnce(&mut GlobalState, ThreadId) -> LuaResult<()>,
{
    let snapshot = Snapshot::capture(global, thread);
    let outcome = f(global, thread);
    match outcome {
        Ok(()) => Status::Ok,
        Err(e) => {
            let status = Status::from(e.kind());
            let raw_error = error_value_for(global, thread, &e);
            snapshot.restore(global, thread, oldtop);

            let final_value = match errfunc.as_deref_mut() {
                Some(handler) => match handler(global, thread, raw_error) {
                    Ok(v) => v,
                    Err(_) => {
                        let msg = global.strings.intern(b"error in error handling");
                        let t = global.thread_mut(thread);
                        t.stack.top = oldtop;
                        let _ = t.stack.push(Value::String(msg));
                        return Status::ErrorInErrorHandling;
                    }
                },
                None => raw_error,
            };

            let t = global.thread_mut(thread);
            t.stack.top = oldtop;
            let _ = t.stack.push(final_value);
            status
        }
    }
}

/// The raw error object that should be surfaced to `pcall`'s caller: the
/// value `error()` raised, or (for errors this crate detects internally,
/// which never had a chance to push a value) a fresh interned string
/// carrying [`LuaFullError::message`].
fn error_value_for(global: &mut GlobalState, thread: ThreadId, e: &LuaFullError) -> Value {
    if e.kind() == LuaError::MemoryError {
        return Value::String(global.out_of_memory_string());
    }
    let id = global.strings.intern(e.message().as_bytes());
    Value::String(id)
}

/// `error(thread)`: take the value on top of the stack as the error object
/// and raise it. Raising is simply producing the `Err` that the active
/// `pcall`'s `f(...)?` chain will propagate; there is no separate unwind
/// step to perform (§4.5 Raising).
pub fn raise(global: &mut GlobalState, thread: ThreadId) -> LuaFullError {
    let value = global.thread_mut(thread).stack.pop().unwrap_or(Value::Nil);
    let message = match value {
        Value::String(id) => String::from_utf8_lossy(global.strings.get(id).unwrap_or(b"")).into_owned(),
        other => other.to_string(),
    };
    // Leave the error value retrievable for whoever restores from this
    // catch point (mirrors the source leaving it at L->top-1 before the
    // longjmp; here the caller reads it back via `error_value_for`).
    let _ = global.thread_mut(thread).stack.push(value);
    LuaFullError::new(LuaError::RuntimeError, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;

    #[test]
    fn successful_call_leaves_status_ok() {
        let mut global = GlobalState::new(RuntimeConfig::default());
        let thread = global.main_thread;
        let oldtop = global.thread(thread).stack.top;
        let status = pcall(&mut global, thread, oldtop, None, |_g, _t| Ok(()));
        assert_eq!(status, Status::Ok);
    }

    #[test]
    fn failed_call_restores_stack_with_one_error_value_t8() {
        let mut global = GlobalState::new(RuntimeConfig::default());
        let thread = global.main_thread;
        let pre_top = global.thread(thread).stack.top;
        let status = pcall(&mut global, thread, pre_top, None, |g, t| {
            g.thread_mut(t).stack.push(Value::Number(1.0))?;
            g.thread_mut(t).stack.push(Value::Number(2.0))?;
            g.thread_mut(t).stack.push(Value::Number(3.0))?;
            Err(raise_test_error(g, t))
        });
        assert_eq!(status, Status::RuntimeError);
        assert_eq!(global.thread(thread).stack.top, pre_top + 1);
    }

    #[test]
    fn error_handler_transforms_the_error_value_scenario_4() {
        let mut global = GlobalState::new(RuntimeConfig::default());
        let thread = global.main_thread;
        let pre_top = global.thread(thread).stack.top;
        let mut handler: Box<ErrorHandler> = Box::new(|g, _t, v| {
            let msg = match v {
                Value::String(id) => String::from_utf8_lossy(g.strings.get(id).unwrap()).into_owned(),
                _ => String::new(),
            };
            let id = g.strings.intern(format!("[H] {msg}").as_bytes());
            Ok(Value::String(id))
        });
        let status = pcall(&mut global, thread, pre_top, Some(&mut handler), |g, t| {
            let oops = g.strings.intern(b"oops");
            let _ = g.thread_mut(t).stack.push(Value::String(oops));
            Err(raise(g, t))
        });
        assert_eq!(status, Status::RuntimeError);
        assert_eq!(global.thread(thread).stack.top, pre_top + 1);
        let result = global.thread(thread).stack.get(pre_top);
        match result {
            Value::String(id) => {
                assert_eq!(global.strings.get(id).unwrap(), b"[H] oops");
            }
            other => panic!("expected string, got {other:?}"),
        }
    }

    fn raise_test_error(global: &mut GlobalState, thread: ThreadId) -> LuaFullError {
        raise(global, thread)
    }
}
