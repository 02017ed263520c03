//! The stack-oriented embedding contract (§6): push/pop/get/set/call,
//! table access, metatables, and the `gc` selector family. Every function
//! here takes `(&mut GlobalState, ThreadId)` instead of a bare `lua_State*`
//! — see [`crate::thread`] for why.
//!
//! Full metamethod dispatch (`__index`, `__newindex`, `__call`, `__eq`,
//! arithmetic/`tostring` events) is opcode semantics and belongs to the
//! bytecode interpreter, an external collaborator. The
//! `gettable`/`settable`/`equal` family here perform the *raw* access and
//! note where a full implementation would consult a metatable instead.

use crate::closure::ClosureBody;
use crate::error::{LuaError, LuaFullError, LuaResult};
use crate::limits;
use crate::stack::{CallInfo, ResolvedIndex};
use crate::thread::GlobalState;
use crate::value::{ForeignDataId, StringId, TableId, ThreadId, Value};

/// Sentinel `nresults`/`nargs` requesting "all of them" (§4.2, §6).
pub const MULTRET: i32 = -1;

/// GC selectors (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcOp {
    Stop,
    Restart,
    Collect,
    Count,
    CountRemainder,
    Step { data: i32 },
    SetPause { data: i32 },
    SetStepMul { data: i32 },
}

/// An external collaborator hook point: the actual bytecode dispatch loop
/// that runs a script closure's instructions (out of scope here).
/// [`call`] drives the calling *convention* around it — pushing/popping the
/// `CallInfo`, adjusting varargs, truncating/padding results — and defers
/// to this trait only for what happens between "control enters the callee"
/// and "the callee executes RETURN".
pub trait ScriptExecutor {
    fn run(&mut self, global: &mut GlobalState, thread: ThreadId) -> LuaResult<()>;
}

fn resolve(global: &GlobalState, thread: ThreadId, index: i32) -> LuaResult<ResolvedIndex> {
    global
        .thread(thread)
        .stack
        .resolve_index(index)
        .ok_or_else(|| LuaFullError::new(LuaError::IndexOutOfBounds, format!("invalid index {index}")))
}

/// `gettop`.
pub fn gettop(global: &GlobalState, thread: ThreadId) -> i32 {
    let t = global.thread(thread);
    (t.stack.top - t.stack.base()) as i32
}

/// `settop(idx)`: grow with nils or shrink, relative to the current base.
pub fn settop(global: &mut GlobalState, thread: ThreadId, idx: i32) -> LuaResult<()> {
    let t = global.thread_mut(thread);
    let base = t.stack.base();
    let new_top = if idx >= 0 {
        base + idx as usize
    } else {
        let n = t.stack.top as i64 + idx as i64 + 1;
        if n < base as i64 {
            return Err(LuaFullError::new(LuaError::IndexOutOfBounds, "settop: index below base"));
        }
        n as usize
    };
    if new_top > t.stack.top {
        t.stack.checkstack(new_top - t.stack.top)?;
        for i in t.stack.top..new_top {
            t.stack.set(i, Value::Nil);
        }
    } else if new_top < t.stack.top {
        global.close_upvalues_from(thread, new_top);
    }
    global.thread_mut(thread).stack.top = new_top;
    Ok(())
}

pub fn checkstack(global: &mut GlobalState, thread: ThreadId, n: usize) -> LuaResult<()> {
    global.thread_mut(thread).stack.checkstack(n)
}

/// `pop(n)`.
pub fn pop(global: &mut GlobalState, thread: ThreadId, n: usize) -> LuaResult<()> {
    settop(global, thread, -(n as i32) - 1)
}

fn read(global: &GlobalState, thread: ThreadId, index: i32) -> LuaResult<Value> {
    match resolve(global, thread, index)? {
        ResolvedIndex::Stack(slot) => Ok(global.thread(thread).stack.get(slot)),
        ResolvedIndex::Registry => Ok(Value::Table(global.registry)),
        ResolvedIndex::Environ => Ok(Value::Table(global.thread(thread).environ)),
        ResolvedIndex::Globals => Ok(Value::Table(global.thread(thread).globals)),
        ResolvedIndex::Upvalue(k) => {
            let Some(closure_id) = global.thread(thread).current_closure else {
                return Ok(Value::Nil);
            };
            match &global.closure(closure_id).body {
                ClosureBody::Foreign { upvalues, .. } => {
                    Ok(upvalues.get(k - 1).copied().unwrap_or(Value::Nil))
                }
                ClosureBody::Script { .. } => Ok(Value::Nil),
            }
        }
    }
}

fn write(global: &mut GlobalState, thread: ThreadId, index: i32, value: Value) -> LuaResult<()> {
    match resolve(global, thread, index)? {
        ResolvedIndex::Stack(slot) => {
            global.thread_mut(thread).stack.set(slot, value);
            Ok(())
        }
        ResolvedIndex::Registry | ResolvedIndex::Environ | ResolvedIndex::Globals => Err(
            LuaFullError::new(LuaError::RuntimeError, "cannot replace a pseudo-table directly"),
        ),
        ResolvedIndex::Upvalue(_) => Err(LuaFullError::new(
            LuaError::RuntimeError,
            "use setupvalue to mutate a closure's upvalue",
        )),
    }
}

// ---- push family ----

pub fn push_nil(global: &mut GlobalState, thread: ThreadId) -> LuaResult<()> {
    global.thread_mut(thread).stack.push(Value::Nil)
}

pub fn push_bool(global: &mut GlobalState, thread: ThreadId, b: bool) -> LuaResult<()> {
    global.thread_mut(thread).stack.push(Value::Bool(b))
}

pub fn push_number(global: &mut GlobalState, thread: ThreadId, n: f64) -> LuaResult<()> {
    global.thread_mut(thread).stack.push(Value::Number(n))
}

pub fn push_lightuserdata(global: &mut GlobalState, thread: ThreadId, ptr: usize) -> LuaResult<()> {
    global.thread_mut(thread).stack.push(Value::LightPtr(ptr))
}

pub fn push_string(global: &mut GlobalState, thread: ThreadId, s: &[u8]) -> LuaResult<()> {
    let id = global.strings.intern(s);
    global.gc.check_gc(s.len());
    global.thread_mut(thread).stack.push(Value::String(id))
}

pub fn push_value(global: &mut GlobalState, thread: ThreadId, v: Value) -> LuaResult<()> {
    global.thread_mut(thread).stack.push(v)
}

/// `pushvalue(idx)`: duplicate the value at `idx` onto the top.
pub fn push_copy(global: &mut GlobalState, thread: ThreadId, index: i32) -> LuaResult<()> {
    let v = read(global, thread, index)?;
    push_value(global, thread, v)
}

// ---- stack shuffling ----

/// `remove(i)`: delete the value at `i`, shifting everything above down.
pub fn remove(global: &mut GlobalState, thread: ThreadId, index: i32) -> LuaResult<()> {
    let slot = match resolve(global, thread, index)? {
        ResolvedIndex::Stack(s) => s,
        _ => return Err(LuaFullError::new(LuaError::RuntimeError, "remove: not a stack index")),
    };
    let t = global.thread_mut(thread);
    for i in slot..t.stack.top.saturating_sub(1) {
        let next = t.stack.get(i + 1);
        t.stack.set(i, next);
    }
    if t.stack.top > 0 {
        t.stack.top -= 1;
    }
    Ok(())
}

/// `insert(i)`: move the top value down to `i`, shifting everything from
/// `i` up by one.
pub fn insert(global: &mut GlobalState, thread: ThreadId, index: i32) -> LuaResult<()> {
    let slot = match resolve(global, thread, index)? {
        ResolvedIndex::Stack(s) => s,
        _ => return Err(LuaFullError::new(LuaError::RuntimeError, "insert: not a stack index")),
    };
    let t = global.thread_mut(thread);
    let top_value = t
        .stack
        .pop()
        .ok_or_else(|| LuaFullError::new(LuaError::IndexOutOfBounds, "insert: stack empty"))?;
    let mut i = t.stack.top;
    t.stack.push(Value::Nil)?;
    while i > slot {
        let v = t.stack.get(i - 1);
        t.stack.set(i, v);
        i -= 1;
    }
    t.stack.set(slot, top_value);
    Ok(())
}

/// `replace(i)`: pop the top value and store it at `i`.
pub fn replace(global: &mut GlobalState, thread: ThreadId, index: i32) -> LuaResult<()> {
    let v = global
        .thread_mut(thread)
        .stack
        .pop()
        .ok_or_else(|| LuaFullError::new(LuaError::IndexOutOfBounds, "replace: stack empty"))?;
    write(global, thread, index, v)
}

// ---- type queries ----

pub fn type_name(global: &GlobalState, thread: ThreadId, index: i32) -> &'static str {
    read(global, thread, index).map(|v| v.type_name()).unwrap_or("none")
}

pub fn is_nil(global: &GlobalState, thread: ThreadId, index: i32) -> bool {
    matches!(read(global, thread, index), Ok(Value::Nil) | Err(_))
}

pub fn to_number(global: &GlobalState, thread: ThreadId, index: i32) -> Option<f64> {
    match read(global, thread, index).ok()? {
        Value::Number(n) => Some(n),
        _ => None,
    }
}

pub fn to_boolean(global: &GlobalState, thread: ThreadId, index: i32) -> bool {
    read(global, thread, index).map(|v| v.truthy()).unwrap_or(false)
}

pub fn to_pointer(global: &GlobalState, thread: ThreadId, index: i32) -> Option<usize> {
    match read(global, thread, index).ok()? {
        Value::LightPtr(p) => Some(p),
        Value::Table(id) => Some(id.0 as usize),
        Value::ForeignData(id) => Some(id.0 as usize),
        Value::String(id) => Some(id.0 as usize),
        Value::Closure(id) => Some(id.0 as usize),
        Value::Thread(id) => Some(id.0 as usize),
        _ => None,
    }
}

/// `rawequal(i, j)`: identity/value equality per §3, never invoking `__eq`.
pub fn raw_equal(global: &GlobalState, thread: ThreadId, i: i32, j: i32) -> bool {
    match (read(global, thread, i), read(global, thread, j)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// `objlen(i)`: table length (§4.1) or string byte length.
pub fn objlen(global: &GlobalState, thread: ThreadId, index: i32) -> LuaResult<i64> {
    match read(global, thread, index)? {
        Value::Table(id) => Ok(global.table_len(id)),
        Value::String(id) => Ok(global.strings.get(id).map(|b| b.len()).unwrap_or(0) as i64),
        _ => Ok(0),
    }
}

// ---- tables ----

pub fn createtable(global: &mut GlobalState, thread: ThreadId, narr: usize, nrec: usize) -> LuaResult<()> {
    let id = global.new_table(narr, nrec);
    push_value(global, thread, Value::Table(id))
}

fn as_table(v: Value) -> LuaResult<TableId> {
    match v {
        Value::Table(id) => Ok(id),
        other => Err(LuaFullError::new(
            LuaError::RuntimeError,
            format!("attempt to index a {} value", other.type_name()),
        )),
    }
}

/// `rawget(i)`: pop a key off the top, push `t[key]` where `t` is at `i`.
pub fn rawget(global: &mut GlobalState, thread: ThreadId, index: i32) -> LuaResult<()> {
    let table = as_table(read(global, thread, index)?)?;
    let key = global
        .thread_mut(thread)
        .stack
        .pop()
        .ok_or_else(|| LuaFullError::new(LuaError::IndexOutOfBounds, "rawget: stack empty"))?;
    let value = global.table_get(table, &key);
    push_value(global, thread, value)
}

/// `rawset(i)`: pop value then key off the top, store into `t` at `i`.
pub fn rawset(global: &mut GlobalState, thread: ThreadId, index: i32) -> LuaResult<()> {
    let table = as_table(read(global, thread, index)?)?;
    let value = global
        .thread_mut(thread)
        .stack
        .pop()
        .ok_or_else(|| LuaFullError::new(LuaError::IndexOutOfBounds, "rawset: stack empty"))?;
    let key = global
        .thread_mut(thread)
        .stack
        .pop()
        .ok_or_else(|| LuaFullError::new(LuaError::IndexOutOfBounds, "rawset: stack empty"))?;
    global
        .table_set(table, key, value)
        .map_err(|e| LuaFullError::new(e, "invalid table key"))
}

pub fn rawgeti(global: &mut GlobalState, thread: ThreadId, index: i32, i: i64) -> LuaResult<()> {
    let table = as_table(read(global, thread, index)?)?;
    let value = global.table_get(table, &Value::Number(i as f64));
    push_value(global, thread, value)
}

pub fn rawseti(global: &mut GlobalState, thread: ThreadId, index: i32, i: i64) -> LuaResult<()> {
    let table = as_table(read(global, thread, index)?)?;
    let value = global
        .thread_mut(thread)
        .stack
        .pop()
        .ok_or_else(|| LuaFullError::new(LuaError::IndexOutOfBounds, "rawseti: stack empty"))?;
    global
        .table_set(table, Value::Number(i as f64), value)
        .map_err(|e| LuaFullError::new(e, "invalid table key"))
}

/// `gettable(i)`/`settable(i)` perform the raw access; a complete
/// implementation would fall back to `__index`/`__newindex` when the raw
/// lookup misses and a metatable is present, which belongs to the
/// interpreter (§1).
pub fn gettable(global: &mut GlobalState, thread: ThreadId, index: i32) -> LuaResult<()> {
    rawget(global, thread, index)
}

pub fn settable(global: &mut GlobalState, thread: ThreadId, index: i32) -> LuaResult<()> {
    rawset(global, thread, index)
}

pub fn getmetatable(global: &mut GlobalState, thread: ThreadId, index: i32) -> LuaResult<bool> {
    match read(global, thread, index)? {
        Value::Table(id) => match global.table(id).metatable {
            Some(mt) => {
                push_value(global, thread, Value::Table(mt))?;
                Ok(true)
            }
            None => Ok(false),
        },
        _ => Ok(false),
    }
}

/// `setmetatable(i)`: pop a table (or nil) off the top and install it as
/// `t`'s metatable.
pub fn setmetatable(global: &mut GlobalState, thread: ThreadId, index: i32) -> LuaResult<()> {
    let table = as_table(read(global, thread, index)?)?;
    let mt_value = global
        .thread_mut(thread)
        .stack
        .pop()
        .ok_or_else(|| LuaFullError::new(LuaError::IndexOutOfBounds, "setmetatable: stack empty"))?;
    let mt = match mt_value {
        Value::Nil => None,
        Value::Table(id) => Some(id),
        other => {
            return Err(LuaFullError::new(
                LuaError::RuntimeError,
                format!("setmetatable: expected table or nil, got {}", other.type_name()),
            ));
        }
    };
    global.table_mut(table).metatable = mt;
    Ok(())
}

/// `next(i)`: pop a key, push the next key/value pair (or nothing, leaving
/// the caller to observe an unchanged top, if iteration is done).
pub fn next(global: &mut GlobalState, thread: ThreadId, index: i32) -> LuaResult<bool> {
    let table = as_table(read(global, thread, index)?)?;
    let key = global
        .thread_mut(thread)
        .stack
        .pop()
        .ok_or_else(|| LuaFullError::new(LuaError::IndexOutOfBounds, "next: stack empty"))?;
    match global
        .table_next(table, &key)
        .map_err(|e| LuaFullError::new(e, "invalid key to 'next'"))?
    {
        Some((k, v)) => {
            push_value(global, thread, k)?;
            push_value(global, thread, v)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// `concat(n)`: replace the top `n` stack values with their left-to-right
/// byte concatenation (§6, T10). `concat(0)` pushes the empty string;
/// `concat(1)` is a no-op.
pub fn concat(global: &mut GlobalState, thread: ThreadId, n: usize) -> LuaResult<()> {
    if n == 0 {
        return push_string(global, thread, b"");
    }
    if n == 1 {
        return Ok(());
    }
    let top = global.thread(thread).stack.top;
    let start = top - n;
    let mut bytes = Vec::new();
    for i in start..top {
        match global.thread(thread).stack.get(i) {
            Value::String(id) => bytes.extend_from_slice(global.strings.get(id).unwrap_or(b"")),
            Value::Number(num) => bytes.extend_from_slice(num.to_string().as_bytes()),
            other => {
                return Err(LuaFullError::new(
                    LuaError::RuntimeError,
                    format!("attempt to concatenate a {} value", other.type_name()),
                ));
            }
        }
    }
    global.thread_mut(thread).stack.top = start;
    push_string(global, thread, &bytes)
}

pub fn newuserdata(global: &mut GlobalState, thread: ThreadId, size: usize) -> LuaResult<ForeignDataId> {
    let id = global.new_foreign_data(size);
    push_value(global, thread, Value::ForeignData(id))?;
    Ok(id)
}

// ---- calls ----

/// `call(nargs, nresults)` (§4.2 Calls).
///
/// Expects the callee at `top - (nargs + 1)` and its arguments above it.
/// Foreign closures run directly; script closures need `executor` (the
/// external bytecode dispatcher) or this fails with [`LuaError::RuntimeError`] —
/// this crate implements the calling convention around the interpreter,
/// not the interpreter itself (§1).
pub fn call(
    global: &mut GlobalState,
    thread: ThreadId,
    nargs: usize,
    nresults: i32,
    executor: Option<&mut dyn ScriptExecutor>,
) -> LuaResult<()> {
    let top = global.thread(thread).stack.top;
    let func_idx = top
        .checked_sub(nargs + 1)
        .ok_or_else(|| LuaFullError::new(LuaError::IndexOutOfBounds, "call: not enough values for nargs"))?;
    let func_value = global.thread(thread).stack.get(func_idx);
    let Value::Closure(closure_id) = func_value else {
        return Err(LuaFullError::new(
            LuaError::RuntimeError,
            format!("attempt to call a {} value", func_value.type_name()),
        ));
    };

    let depth = global.thread(thread).stack.call_infos.len();
    if depth >= global.config.max_call_depth {
        return Err(LuaFullError::new(LuaError::StackOverflow, "call: max call depth exceeded"));
    }

    let base = func_idx + 1;
    let is_foreign = matches!(global.closure(closure_id).body, ClosureBody::Foreign { .. });

    let produced: usize = if is_foreign {
        global.thread_mut(thread).c_call_depth += 1;
        let prev_closure = global.thread(thread).current_closure;
        global.thread_mut(thread).current_closure = Some(closure_id);
        let ci = CallInfo::new_foreign(func_idx, base, base + nargs, nresults);
        global.thread_mut(thread).stack.call_infos.push(ci);

        let func = match &global.closure(closure_id).body {
            ClosureBody::Foreign { func, .. } => *func,
            ClosureBody::Script { .. } => unreachable!(),
        };
        let result = func(global, thread);

        global.thread_mut(thread).stack.call_infos.pop();
        global.thread_mut(thread).current_closure = prev_closure;
        global.thread_mut(thread).c_call_depth -= 1;
        result? as usize
    } else {
        let ClosureBody::Script { prototype, .. } = &global.closure(closure_id).body else {
            unreachable!()
        };
        let proto = global.prototype(*prototype);
        let max_stack = proto.max_stack_size;
        let frame_top = base + max_stack;
        global.thread_mut(thread).stack.checkstack(max_stack)?;
        let ci = CallInfo::new_script(func_idx, base, frame_top);
        global.thread_mut(thread).stack.call_infos.push(ci);
        global.thread_mut(thread).stack.top = base + nargs;

        let run_result = match executor {
            Some(ex) => ex.run(global, thread),
            None => Err(LuaFullError::new(
                LuaError::RuntimeError,
                "call: script closure requires a ScriptExecutor (bytecode interpreter is out of scope)",
            )),
        };

        let new_top = global.thread(thread).stack.top;
        global.close_upvalues_from(thread, base);
        global.thread_mut(thread).stack.call_infos.pop();
        run_result?;
        new_top.saturating_sub(base)
    };

    let results_start = global.thread(thread).stack.top - produced;
    let want = if nresults == MULTRET { produced } else { nresults as usize };
    for i in 0..want {
        let v = if i < produced {
            global.thread(thread).stack.get(results_start + i)
        } else {
            Value::Nil
        };
        global.thread_mut(thread).stack.set(func_idx + i, v);
    }
    global.thread_mut(thread).stack.top = func_idx + want;
    Ok(())
}

/// `pcall(nargs, nresults, errfunc)` (§4.5, §6).
pub fn pcall_api(
    global: &mut GlobalState,
    thread: ThreadId,
    nargs: usize,
    nresults: i32,
    errfunc_index: i32,
    executor: Option<&mut dyn ScriptExecutor>,
) -> crate::protected_call::Status {
    let top = global.thread(thread).stack.top;
    let oldtop = top - (nargs + 1);
    let handler = if errfunc_index != 0 {
        match read(global, thread, errfunc_index) {
            Ok(Value::Closure(id)) => Some(id),
            _ => None,
        }
    } else {
        None
    };

    let mut handler_fn: Box<crate::protected_call::ErrorHandler<'_>> = match handler {
        Some(closure_id) => Box::new(move |g: &mut GlobalState, t: ThreadId, err: Value| {
            g.thread_mut(t).stack.push(Value::Closure(closure_id))?;
            g.thread_mut(t).stack.push(err)?;
            call(g, t, 1, 1, None)?;
            Ok(g.thread_mut(t).stack.pop().unwrap_or(Value::Nil))
        }),
        None => Box::new(|_g: &mut GlobalState, _t: ThreadId, err: Value| Ok(err)),
    };

    crate::protected_call::pcall(global, thread, oldtop, Some(&mut handler_fn), |g, t| {
        call(g, t, nargs, nresults, executor)
    })
}

pub fn gc(global: &mut GlobalState, op: GcOp) -> i64 {
    match op {
        GcOp::Stop | GcOp::Restart => 0,
        GcOp::Collect => {
            global.gc.flip_white();
            0
        }
        GcOp::Count => (global.gc.total_bytes / 1024) as i64,
        GcOp::CountRemainder => (global.gc.total_bytes % 1024) as i64,
        GcOp::Step { data } => {
            global.gc.check_gc(data.max(0) as usize * 1024);
            0
        }
        GcOp::SetPause { data } => {
            let prev = global.gc.pause_pct;
            global.gc.pause_pct = data;
            prev as i64
        }
        GcOp::SetStepMul { data } => {
            let prev = global.gc.step_mul_pct;
            global.gc.step_mul_pct = data;
            prev as i64
        }
    }
}

pub fn status(global: &GlobalState, thread: ThreadId) -> crate::thread::ThreadStatus {
    global.thread(thread).status
}

pub fn atpanic(global: &mut GlobalState, cb: Option<Box<dyn FnMut(&LuaFullError)>>) {
    global.set_panic(cb);
}

pub fn getupvalue_name(index: usize) -> String {
    format!("upvalue#{index}")
}

pub fn max_stack_headroom() -> usize {
    limits::MIN_STACK
}

pub fn registry_string_key(global: &mut GlobalState, key: &str) -> StringId {
    global.strings.intern(key.as_bytes())
}
