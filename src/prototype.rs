//! Opaque function-prototype placeholder.
//!
//! The lexer/compiler that produces prototypes, and the bytecode format a
//! prototype carries, are external collaborators — this type only
//! models the shape the runtime needs to reference: a name for
//! diagnostics, an upvalue-descriptor list script closures are built from,
//! and the parameter/vararg shape `adjust_varargs` consults. §3 lists
//! function-prototype among the collectable reference family, so it still
//! carries the shared [`GcHeader`] every other collectable does.

use crate::value::GcHeader;

/// Where a script closure's Nth upvalue comes from when the closure is
/// created: either the enclosing frame's local slot (captured as an open
/// upvalue cell) or the enclosing closure's own upvalue list (shared
/// as-is).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpvalueDesc {
    ParentLocal { stack_index: usize },
    ParentUpvalue { index: usize },
}

#[derive(Debug, Clone)]
pub struct Prototype {
    pub header: GcHeader,
    pub name: String,
    pub num_params: usize,
    pub is_vararg: bool,
    pub max_stack_size: usize,
    pub upvalues: Vec<UpvalueDesc>,
}

impl Prototype {
    pub fn new(header: GcHeader, name: impl Into<String>, num_params: usize, is_vararg: bool) -> Self {
        Self {
            header,
            name: name.into(),
            num_params,
            is_vararg,
            max_stack_size: num_params + 8,
            upvalues: Vec::new(),
        }
    }
}
