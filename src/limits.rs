//! Centralized tunable constants for the runtime core.
//!
//! Mirrors the source's `luaconf.h` / `llimits.h` split: every magic
//! number that controls behavior lives here rather than scattered through
//! the modules that use it.

/// Extra stack slots above a frame's top, reserved for error handling and
/// temporaries a foreign call may need beyond what it declared.
pub const EXTRA_STACK: usize = 5;

/// Minimum guaranteed stack slots available to a foreign call.
pub const MIN_STACK: usize = 20;

/// Initial stack capacity for a newly created thread.
pub const BASIC_STACK_SIZE: usize = 2 * MIN_STACK;

/// Default maximum stack size (number of slots), unless overridden by a
/// [`crate::config::RuntimeConfig`].
pub const MAX_STACK_SIZE: usize = 1_000_000;

/// Default maximum call nesting depth.
pub const MAX_CALL_DEPTH: usize = 256;

/// Extra call depth allowance granted while running an error handler, so a
/// message handler can still run after a stack overflow was detected.
pub const EXTRA_CALL_DEPTH: usize = 30;

/// Maximum hash-part capacity, as a power of two: 2^26 slots.
pub const MAX_HASH_BITS: u32 = 26;

/// Threshold above which strings skip interning (treated as "long").
pub const MAX_SHORT_STRING_LEN: usize = 40;

/// Load factor past which the string pool's bucket array is doubled.
pub const STRING_POOL_MAX_LOAD: f64 = 1.0;

/// Default GC pause (percent): how much memory growth the collector waits
/// for before starting a new cycle.
pub const DEFAULT_GC_PAUSE: i32 = 200;

/// Default GC step multiplier (percent): how much work a step does relative
/// to bytes allocated since the last step.
pub const DEFAULT_GC_STEPMUL: i32 = 200;
