//! Core runtime for a small embeddable Lua-like scripting language.
//!
//! This crate implements the value model, calling conventions, and
//! protected-call error propagation that a bytecode interpreter and
//! standard library sit on top of. The interpreter loop itself — parsing,
//! compiling, and executing instructions — is an external collaborator:
//! [`api::ScriptExecutor`] is the seam it plugs into.
//!
//! Start at [`thread::GlobalState`] (the owner of every arena and the
//! string pool) and [`api`] (the embedding surface built on top of it).

pub mod api;
pub mod closure;
pub mod config;
pub mod error;
pub mod gc;
pub mod limits;
pub mod protected_call;
pub mod prototype;
pub mod stack;
pub mod string_pool;
pub mod table;
pub mod thread;
pub mod value;

pub use error::{LuaError, LuaFullError, LuaResult};
pub use thread::GlobalState;
pub use value::Value;

#[cfg(test)]
mod test;
