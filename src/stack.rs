//! The per-thread value stack and its activation-record (`CallInfo`) stack,
//! plus index resolution for the embedding API (§4.2).
//!
//! The source holds raw pointers into its stack buffer and "saves" them as
//! integer offsets across any operation that might reallocate, because a
//! moved `Vec`'s old pointers dangle. This crate never takes a pointer into
//! the stack in the first place — every reference to a slot is a plain
//! `usize` offset — so growing `values` (a `Vec<Value>`) via `Vec::resize`
//! never invalidates anything held by a caller; the relocation hazard the
//! source has to guard against is structural here rather than something
//! call sites must remember to avoid.

use crate::error::{LuaError, LuaFullError, LuaResult};
use crate::limits;
use crate::value::Value;

/// Reserved pseudo-indices (§4.2, §6). Ordinary stack indices never reach
/// these values because `checkstack` caps `max_stack_size` well above them.
pub const REGISTRY_INDEX: i32 = -1_000_000;
pub const ENVIRON_INDEX: i32 = REGISTRY_INDEX - 1;
pub const GLOBALS_INDEX: i32 = REGISTRY_INDEX - 2;

/// What an API-level index resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedIndex {
    Stack(usize),
    Registry,
    Environ,
    Globals,
    /// The k-th upvalue (1-based) of the currently executing foreign
    /// closure.
    Upvalue(usize),
}

/// An activation record: which stack slot holds the callee, the frame's
/// local-variable window, and bookkeeping for script calls.
#[derive(Debug, Clone, Copy)]
pub struct CallInfo {
    pub func: usize,
    pub base: usize,
    pub top: usize,
    pub pc: u32,
    pub nresults: i32,
    pub is_c: bool,
    pub is_tail: bool,
    pub tailcalls: u32,
}

impl CallInfo {
    pub fn new_script(func: usize, base: usize, top: usize) -> Self {
        Self {
            func,
            base,
            top,
            pc: 0,
            nresults: 0,
            is_c: false,
            is_tail: false,
            tailcalls: 0,
        }
    }

    pub fn new_foreign(func: usize, base: usize, top: usize, nresults: i32) -> Self {
        Self {
            func,
            base,
            top,
            pc: 0,
            nresults,
            is_c: true,
            is_tail: false,
            tailcalls: 0,
        }
    }
}

pub struct Stack {
    values: Vec<Value>,
    /// One past the last live value.
    pub top: usize,
    /// High-water mark leaving `EXTRA_STACK` headroom for error handling.
    pub stack_last: usize,
    pub call_infos: Vec<CallInfo>,
    max_stack_size: usize,
}

impl Stack {
    pub fn new(max_stack_size: usize) -> Self {
        let initial = limits::BASIC_STACK_SIZE;
        let mut values = Vec::with_capacity(initial);
        values.resize(initial, Value::Nil);
        let top_call = CallInfo::new_script(0, 1, initial.saturating_sub(limits::EXTRA_STACK));
        Self {
            values,
            top: 1,
            stack_last: initial.saturating_sub(limits::EXTRA_STACK),
            call_infos: vec![top_call],
            max_stack_size,
        }
    }

    pub fn current_frame(&self) -> &CallInfo {
        self.call_infos.last().expect("call_infos is never empty")
    }

    pub fn current_frame_mut(&mut self) -> &mut CallInfo {
        self.call_infos
            .last_mut()
            .expect("call_infos is never empty")
    }

    pub fn base(&self) -> usize {
        self.current_frame().base
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn get(&self, index: usize) -> Value {
        self.values.get(index).copied().unwrap_or(Value::Nil)
    }

    pub fn set(&mut self, index: usize, value: Value) {
        if index >= self.values.len() {
            self.values.resize(index + 1, Value::Nil);
        }
        self.values[index] = value;
    }

    /// `checkstack(n)`: guarantee `stack_last - top >= n`, growing the
    /// buffer if needed. Growth just resizes `values`; no fixups are
    /// needed since every live reference is an index, not a pointer.
    pub fn checkstack(&mut self, n: usize) -> LuaResult<()> {
        if self.stack_last >= self.top + n {
            return Ok(());
        }
        let needed = self.top + n + limits::EXTRA_STACK;
        if needed > self.max_stack_size {
            return Err(LuaFullError::new(
                LuaError::StackOverflow,
                format!("stack overflow (requested {needed}, cap {})", self.max_stack_size),
            ));
        }
        let new_size = needed.max(self.values.len() * 2).min(self.max_stack_size);
        self.values.resize(new_size, Value::Nil);
        self.stack_last = new_size - limits::EXTRA_STACK;
        Ok(())
    }

    pub fn push(&mut self, value: Value) -> LuaResult<()> {
        self.checkstack(1)?;
        self.set(self.top, value);
        self.top += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Value> {
        if self.top <= self.base() {
            return None;
        }
        self.top -= 1;
        Some(self.get(self.top))
    }

    /// Resolve an API-level index per §4.2/§6.
    ///
    /// Positive indices are 1-based from the current frame's base; negative
    /// from top (`-1` is top); `0` is invalid. Large negative sentinels
    /// below `GLOBALS_INDEX` select the k-th upvalue of the executing
    /// foreign closure.
    pub fn resolve_index(&self, index: i32) -> Option<ResolvedIndex> {
        if index == 0 {
            return None;
        }
        if index > 0 {
            let slot = self.base() + (index as usize - 1);
            if slot >= self.current_frame().top {
                return None;
            }
            return Some(ResolvedIndex::Stack(slot));
        }
        if index <= REGISTRY_INDEX {
            if index == GLOBALS_INDEX {
                return Some(ResolvedIndex::Globals);
            }
            if index == ENVIRON_INDEX {
                return Some(ResolvedIndex::Environ);
            }
            if index == REGISTRY_INDEX {
                return Some(ResolvedIndex::Registry);
            }
            let k = (GLOBALS_INDEX - index) as usize;
            return Some(ResolvedIndex::Upvalue(k));
        }
        // index < 0, above the pseudo-index range: count back from top.
        let slot = self.top as i64 + index as i64;
        if slot < self.base() as i64 {
            return None;
        }
        Some(ResolvedIndex::Stack(slot as usize))
    }
}
