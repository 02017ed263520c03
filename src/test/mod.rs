//! Integration tests exercising more than one module together. Module-local
//! `#[cfg(test)]` blocks cover a single module's unit behavior; these cover
//! the seams between modules — mostly the public [`crate::api`] surface
//! built on [`crate::thread::GlobalState`].

mod test_api;
mod test_stack;
mod test_thread;
