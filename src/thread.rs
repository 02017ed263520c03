//! Per-thread execution state and the global state shared by every thread
//! created from one universe (§4.4).
//!
//! The source keeps `global_State` and the main `lua_State` in one combined
//! allocation reached through `L->l_G`, with every other thread pointing
//! back at the same `global_State`. This crate has no raw pointers: every
//! collectable object (including threads themselves) lives in a
//! [`crate::gc::SlotVec`] arena owned by [`GlobalState`], and a thread is
//! named everywhere by its [`ThreadId`] handle rather than a pointer. Any
//! operation on "the current thread" therefore takes `(&mut GlobalState,
//! ThreadId)` instead of a bare `&mut LuaState`.

use crate::closure::{Closure, ForeignFunction, Upvalue};
use crate::config::RuntimeConfig;
use crate::error::{LuaError, LuaFullError, LuaResult};
use crate::gc::{ForeignData, GcState, SlotVec};
use crate::limits;
use crate::stack::Stack;
use crate::string_pool::StringPool;
use crate::table::Table;
use crate::value::{
    ClosureId, ForeignDataId, GcHeader, GcKind, PrototypeId, StringId, TableId, ThreadId,
    UpvalueId, Value,
};
use crate::prototype::Prototype;

/// A thread's run state (§4.4: "runnable / yielded / errored / dead").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    Runnable,
    Yielded,
    Errored,
    Dead,
}

/// One coroutine's worth of private state: its own stack and call chain,
/// plus the bits of debug/error configuration that are per-thread rather
/// than shared by the whole universe.
pub struct Thread {
    pub header: GcHeader,
    pub stack: Stack,
    pub status: ThreadStatus,
    /// Incremented on every foreign-function entry, independent of
    /// tail-call optimization, so a foreign-call recursion bomb is caught
    /// even when the script-level call chain looks shallow.
    pub c_call_depth: usize,
    /// Index (registry key) of the active error handler, if any, consulted
    /// by some embedders as an alternative to passing `errfunc` explicitly
    /// to every `pcall`.
    pub error_handler: Option<Value>,
    pub globals: TableId,
    pub environ: TableId,
    pub hooks_enabled: bool,
    /// The foreign closure currently executing on this thread, if any.
    /// Consulted to resolve the `GLOBALS_INDEX - k` upvalue pseudo-indices
    /// (§4.2, §6).
    pub current_closure: Option<ClosureId>,
}

impl Thread {
    fn new(header: GcHeader, config: &RuntimeConfig, globals: TableId, environ: TableId) -> Self {
        Self {
            header,
            stack: Stack::new(config.max_stack_size),
            status: ThreadStatus::Runnable,
            c_call_depth: 0,
            error_handler: None,
            globals,
            environ,
            hooks_enabled: false,
            current_closure: None,
        }
    }
}

/// Default metatable slots, one per primitive type that can carry a shared
/// metatable (collectables carry their own `metatable` field instead; see
/// [`crate::table::Table::metatable`]).
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeMetatables {
    pub nil: Option<TableId>,
    pub boolean: Option<TableId>,
    pub number: Option<TableId>,
    pub string: Option<TableId>,
    pub function: Option<TableId>,
    pub userdata: Option<TableId>,
    pub thread: Option<TableId>,
    pub light_ptr: Option<TableId>,
}

/// An open upvalue, named by its owning thread and the stack offset it
/// watches. Kept sorted by descending `stack_index` within each thread so
/// "close everything at or above base b" is a prefix walk (§9 design notes).
#[derive(Debug, Clone, Copy)]
struct OpenUpvalueEntry {
    thread: ThreadId,
    stack_index: usize,
    upvalue: UpvalueId,
}

/// Shared by every thread created from one universe: the allocator for
/// every collectable arena, the string pool, GC bookkeeping, the registry,
/// default metatables, and the panic callback (§4.4).
pub struct GlobalState {
    pub strings: StringPool,
    tables: SlotVec<Table>,
    closures: SlotVec<Closure>,
    foreign_data: SlotVec<ForeignData>,
    threads: SlotVec<Thread>,
    prototypes: SlotVec<Prototype>,
    upvalues: SlotVec<Upvalue>,
    pub gc: GcState,
    pub config: RuntimeConfig,
    pub registry: TableId,
    pub type_metatables: TypeMetatables,
    /// Process-wide doubly-linked list of open upvalues, modeled as a
    /// sorted `Vec` per §9 ("ordered by descending stack address... in
    /// terms of stack offsets within the owning thread").
    open_upvalues: Vec<OpenUpvalueEntry>,
    pub main_thread: ThreadId,
    panic_callback: Option<Box<dyn FnMut(&LuaFullError)>>,
}

impl GlobalState {
    /// `newstate`: allocate the combined global state + main thread,
    /// install the string pool, registry, and (absent) default metatables
    /// (§4.4 New-state).
    pub fn new(config: RuntimeConfig) -> Self {
        let mut strings = StringPool::new();
        for kw in RESERVED_KEYWORDS {
            strings.intern_reserved(kw.as_bytes());
        }
        strings.intern_reserved(OUT_OF_MEMORY_MESSAGE.as_bytes());

        let gc = GcState::new();
        let mut tables = SlotVec::new();
        let registry_id = TableId(tables.insert(Table::new(gc.new_header(GcKind::Table), 0, 8)));
        let globals_id = TableId(tables.insert(Table::new(gc.new_header(GcKind::Table), 0, 16)));
        let environ_id = globals_id;

        let mut global = Self {
            strings,
            tables,
            closures: SlotVec::new(),
            foreign_data: SlotVec::new(),
            threads: SlotVec::new(),
            prototypes: SlotVec::new(),
            upvalues: SlotVec::new(),
            gc,
            config,
            registry: registry_id,
            type_metatables: TypeMetatables::default(),
            open_upvalues: Vec::new(),
            main_thread: ThreadId(0),
            panic_callback: None,
        };

        let main_header = global.gc.new_header(GcKind::Thread);
        let main = Thread::new(main_header, &global.config, globals_id, environ_id);
        let main_id = ThreadId(global.threads.insert(main));
        global.main_thread = main_id;
        global
    }

    /// The fixed, GC-pinned "not enough memory" string allocated at init
    /// time so it remains available even when the allocator itself just
    /// failed (§4.5 Out-of-memory).
    pub fn out_of_memory_string(&mut self) -> StringId {
        self.strings.intern(OUT_OF_MEMORY_MESSAGE.as_bytes())
    }

    pub fn out_of_memory_error(&mut self) -> LuaFullError {
        LuaFullError::new(LuaError::MemoryError, OUT_OF_MEMORY_MESSAGE)
    }

    /// `newthread`: allocate a thread sharing this universe's globals table
    /// and a fresh stack/call-info vector (§4.4 New-thread).
    pub fn new_thread(&mut self) -> ThreadId {
        let globals = self.thread(self.main_thread).globals;
        let environ = globals;
        let header = self.gc.new_header(GcKind::Thread);
        self.gc.check_gc(limits::BASIC_STACK_SIZE * std::mem::size_of::<Value>());
        let thread = Thread::new(header, &self.config, globals, environ);
        ThreadId(self.threads.insert(thread))
    }

    pub fn thread(&self, id: ThreadId) -> &Thread {
        self.threads.get(id.0).expect("dangling ThreadId")
    }

    pub fn thread_mut(&mut self, id: ThreadId) -> &mut Thread {
        self.threads.get_mut(id.0).expect("dangling ThreadId")
    }

    pub fn table(&self, id: TableId) -> &Table {
        self.tables.get(id.0).expect("dangling TableId")
    }

    pub fn table_mut(&mut self, id: TableId) -> &mut Table {
        self.tables.get_mut(id.0).expect("dangling TableId")
    }

    pub fn new_table(&mut self, narray_hint: usize, nhash_hint: usize) -> TableId {
        let header = self.gc.new_header(GcKind::Table);
        self.gc
            .check_gc(std::mem::size_of::<Table>() + narray_hint * std::mem::size_of::<Value>());
        TableId(
            self.tables
                .insert(Table::new(header, narray_hint, nhash_hint)),
        )
    }

    /// `get(t, k)` (§4.1), split-borrowing `tables` and `strings` so a
    /// table op never needs `&mut self` just to read the string pool.
    pub fn table_get(&self, id: TableId, key: &Value) -> Value {
        self.tables
            .get(id.0)
            .expect("dangling TableId")
            .get(key, &self.strings)
    }

    /// The GC header of whichever arena `v` is a handle into, if it is a
    /// collectable value at all. Used to drive [`GcState::write_barrier`]
    /// (§4.7) without every call site needing to know which arena to probe.
    fn collectable_header(&self, v: &Value) -> Option<GcHeader> {
        match v {
            Value::String(_) | Value::LightPtr(_) | Value::Nil | Value::Bool(_) | Value::Number(_) => None,
            Value::Table(id) => self.tables.get(id.0).map(|t| t.header),
            Value::Closure(id) => self.closures.get(id.0).map(|c| c.header),
            Value::ForeignData(id) => self.foreign_data.get(id.0).map(|d| d.header),
            Value::Thread(id) => self.threads.get(id.0).map(|t| t.header),
            Value::Prototype(id) => self.prototypes.get(id.0).map(|p| p.header),
            Value::Upvalue(id) => self.upvalues.get(id.0).map(|u| u.header),
        }
    }

    /// `set(t, k, v)` (§4.1). A write that stores a collectable reference
    /// into the table triggers the §4.7 write barrier: a real collector
    /// uses this to either blacken the stored child or re-gray the table
    /// (the `objbarrier`/`barrierback` split), since `t` may already have
    /// been marked black in an earlier incremental step.
    pub fn table_set(&mut self, id: TableId, key: Value, value: Value) -> Result<(), LuaError> {
        let container_header = self.tables.get(id.0).map(|t| t.header);
        let child_header = self.collectable_header(&value);
        let Self { tables, strings, .. } = self;
        tables.get_mut(id.0).expect("dangling TableId").set(key, value, strings)?;
        if let (Some(container), Some(child)) = (container_header, child_header) {
            self.gc.write_barrier(&container, &child);
        }
        Ok(())
    }

    pub fn table_len(&self, id: TableId) -> i64 {
        self.tables
            .get(id.0)
            .expect("dangling TableId")
            .len(&self.strings)
    }

    pub fn table_next(
        &self,
        id: TableId,
        key: &Value,
    ) -> Result<Option<(Value, Value)>, LuaError> {
        self.tables
            .get(id.0)
            .expect("dangling TableId")
            .next(key, &self.strings)
    }

    pub fn closure(&self, id: ClosureId) -> &Closure {
        self.closures.get(id.0).expect("dangling ClosureId")
    }

    pub fn new_foreign_closure(&mut self, func: ForeignFunction, upvalues: Vec<Value>) -> ClosureId {
        let header = self.gc.new_header(GcKind::Closure);
        self.gc.check_gc(std::mem::size_of::<Closure>() + upvalues.len() * std::mem::size_of::<Value>());
        ClosureId(self.closures.insert(Closure::new_foreign(header, func, upvalues)))
    }

    pub fn new_script_closure(
        &mut self,
        prototype: PrototypeId,
        upvalues: Vec<UpvalueId>,
    ) -> ClosureId {
        let header = self.gc.new_header(GcKind::Closure);
        self.gc.check_gc(std::mem::size_of::<Closure>() + upvalues.len() * std::mem::size_of::<UpvalueId>());
        ClosureId(
            self.closures
                .insert(Closure::new_script(header, prototype, upvalues)),
        )
    }

    pub fn prototype(&self, id: PrototypeId) -> &Prototype {
        self.prototypes.get(id.0).expect("dangling PrototypeId")
    }

    pub fn new_prototype(
        &mut self,
        name: impl Into<String>,
        num_params: usize,
        is_vararg: bool,
    ) -> PrototypeId {
        let header = self.gc.new_header(GcKind::Prototype);
        PrototypeId(
            self.prototypes
                .insert(Prototype::new(header, name, num_params, is_vararg)),
        )
    }

    pub fn foreign_data(&self, id: ForeignDataId) -> &ForeignData {
        self.foreign_data.get(id.0).expect("dangling ForeignDataId")
    }

    pub fn foreign_data_mut(&mut self, id: ForeignDataId) -> &mut ForeignData {
        self.foreign_data
            .get_mut(id.0)
            .expect("dangling ForeignDataId")
    }

    pub fn new_foreign_data(&mut self, size: usize) -> ForeignDataId {
        let header = self.gc.new_header(GcKind::ForeignData);
        self.gc.check_gc(size);
        ForeignDataId(self.foreign_data.insert(ForeignData::new(header, size)))
    }

    pub fn upvalue(&self, id: UpvalueId) -> &Upvalue {
        self.upvalues.get(id.0).expect("dangling UpvalueId")
    }

    /// Find (or create) the open upvalue cell watching `thread`'s stack slot
    /// `stack_index`, sharing it with any other closure already captured
    /// over the same local (§4.3).
    pub fn find_or_create_upvalue(&mut self, thread: ThreadId, stack_index: usize) -> UpvalueId {
        if let Some(entry) = self
            .open_upvalues
            .iter()
            .find(|e| e.thread == thread && e.stack_index == stack_index)
        {
            return entry.upvalue;
        }
        let header = self.gc.new_header(GcKind::Upvalue);
        self.gc.check_gc(std::mem::size_of::<Upvalue>());
        let id = UpvalueId(
            self.upvalues
                .insert(Upvalue::open(header, thread, stack_index)),
        );
        let pos = self
            .open_upvalues
            .iter()
            .position(|e| e.thread != thread || e.stack_index < stack_index)
            .unwrap_or(self.open_upvalues.len());
        self.open_upvalues.insert(
            pos,
            OpenUpvalueEntry {
                thread,
                stack_index,
                upvalue: id,
            },
        );
        id
    }

    /// Close every open upvalue of `thread` whose watched slot is `>= base`
    /// (called when the enclosing frame returns; §4.3).
    pub fn close_upvalues_from(&mut self, thread: ThreadId, base: usize) {
        let stack_snapshot: Vec<Value> = {
            let t = self.thread(thread);
            (0..t.stack.len()).map(|i| t.stack.get(i)).collect()
        };
        let mut remaining = Vec::with_capacity(self.open_upvalues.len());
        for entry in self.open_upvalues.drain(..) {
            if entry.thread == thread && entry.stack_index >= base {
                let value = stack_snapshot
                    .get(entry.stack_index)
                    .copied()
                    .unwrap_or(Value::Nil);
                self.upvalues
                    .get_mut(entry.upvalue.0)
                    .expect("dangling UpvalueId")
                    .close(value);
            } else {
                remaining.push(entry);
            }
        }
        self.open_upvalues = remaining;
    }

    pub fn open_upvalue_count(&self) -> usize {
        self.open_upvalues.len()
    }

    /// `xmove(from, to, n)`: pop `n` values from `from`'s top and push them,
    /// in the same order, onto `to`'s top. Only ever called with threads of
    /// this same `GlobalState` (enforced by the caller holding one
    /// `GlobalState` for both thread ids); the source forbids moving across
    /// universes outright (§4.4 Cross-thread move).
    pub fn xmove(&mut self, from: ThreadId, to: ThreadId, n: usize) -> LuaResult<()> {
        let mut moved = Vec::with_capacity(n);
        {
            let source = self.thread_mut(from);
            for _ in 0..n {
                match source.stack.pop() {
                    Some(v) => moved.push(v),
                    None => {
                        return Err(LuaFullError::new(
                            LuaError::IndexOutOfBounds,
                            "xmove: not enough values on source stack",
                        ));
                    }
                }
            }
        }
        moved.reverse();
        let dest = self.thread_mut(to);
        for v in moved {
            dest.stack.push(v)?;
        }
        Ok(())
    }

    pub fn set_panic(&mut self, cb: Option<Box<dyn FnMut(&LuaFullError)>>) {
        self.panic_callback = cb;
    }

    /// Invoked only when an error reaches unprotected execution (no active
    /// catch frame). If the callback returns, the embedder is supposed to be
    /// aborted; this crate cannot literally abort the host process, so it
    /// panics after running the callback, matching "the embedder is
    /// aborted" as closely as a library can.
    pub fn panic(&mut self, err: &LuaFullError) -> ! {
        if let Some(cb) = self.panic_callback.as_mut() {
            cb(err);
        }
        panic!("unprotected error reached the top level: {err}");
    }

    /// `close`: only the main thread may close the universe. Runs upvalue
    /// finalization (closing every open upvalue of every thread) before the
    /// arenas are dropped, mirroring `close_state`'s shutdown order (§4.4).
    pub fn close(mut self, thread: ThreadId) -> LuaResult<()> {
        if thread != self.main_thread {
            return Err(LuaFullError::new(
                LuaError::RuntimeError,
                "only the main thread may close the universe",
            ));
        }
        let thread_ids: Vec<ThreadId> = self.threads.iter().map(|(id, _)| ThreadId(id)).collect();
        for id in thread_ids {
            self.close_upvalues_from(id, 0);
        }
        Ok(())
    }
}

/// Keywords pinned against collection at state init (§4.6).
const RESERVED_KEYWORDS: &[&str] = &[
    "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if",
    "in", "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
];

pub const OUT_OF_MEMORY_MESSAGE: &str = "not enough memory";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn new_state_has_distinct_registry_and_globals() {
        let global = GlobalState::new(RuntimeConfig::default());
        let main = global.main_thread;
        assert_ne!(global.registry.0, global.thread(main).globals.0);
    }

    #[test]
    fn new_thread_shares_globals_with_main() {
        let mut global = GlobalState::new(RuntimeConfig::default());
        let main_globals = global.thread(global.main_thread).globals;
        let t = global.new_thread();
        assert_eq!(global.thread(t).globals, main_globals);
    }

    #[test]
    fn xmove_transfers_values_in_order_t9() {
        let mut global = GlobalState::new(RuntimeConfig::default());
        let a = global.main_thread;
        let b = global.new_thread();
        global.thread_mut(a).stack.push(Value::Number(1.0)).unwrap();
        global.thread_mut(a).stack.push(Value::Number(2.0)).unwrap();
        let top_a_before = global.thread(a).stack.top;
        global.xmove(a, b, 2).unwrap();
        assert_eq!(global.thread(a).stack.top, top_a_before - 2);
        assert_eq!(global.thread(b).stack.get(global.thread(b).stack.top - 2), Value::Number(1.0));
        assert_eq!(global.thread(b).stack.get(global.thread(b).stack.top - 1), Value::Number(2.0));
    }

    #[test]
    fn upvalue_sharing_closes_on_base_return_t7() {
        let mut global = GlobalState::new(RuntimeConfig::default());
        let t = global.main_thread;
        global.thread_mut(t).stack.push(Value::Number(0.0)).unwrap();
        let slot = global.thread(t).stack.top - 1;
        let uv_a = global.find_or_create_upvalue(t, slot);
        let uv_b = global.find_or_create_upvalue(t, slot);
        assert_eq!(uv_a, uv_b);

        global.thread_mut(t).stack.set(slot, Value::Number(42.0));
        global.close_upvalues_from(t, slot);
        assert_eq!(global.upvalue(uv_a).get(), Some(Value::Number(42.0)));
    }
}
