//! Interning pool for immutable byte strings.
//!
//! Equality after interning is reference equality: two interned strings
//! with equal content share the same [`crate::value::StringId`].

use crate::gc::SlotVec;
use crate::limits::MAX_SHORT_STRING_LEN;
use crate::value::StringId;
use ahash::RandomState;
use std::collections::HashMap;

struct InternedString {
    bytes: Box<[u8]>,
    hash: u64,
    /// Keywords and other compiler-pinned strings are marked reserved at
    /// init so they're never candidates for collection.
    reserved: bool,
}

/// Owned by [`crate::thread::GlobalState`]; strings are immutable once
/// interned, so `&str`/`&[u8]` accessors never need interior mutability.
pub struct StringPool {
    strings: SlotVec<InternedString>,
    /// Buckets of candidate ids sharing a hash, the way the source scans a
    /// chain on lookup rather than storing content directly as the map key
    /// (keeps the map small — one entry per distinct hash, not per string).
    buckets: HashMap<u64, Vec<StringId>, RandomState>,
    hash_builder: RandomState,
}

impl StringPool {
    pub fn new() -> Self {
        Self {
            strings: SlotVec::new(),
            buckets: HashMap::with_hasher(RandomState::new()),
            hash_builder: RandomState::new(),
        }
    }

    fn hash_bytes(&self, bytes: &[u8]) -> u64 {
        use std::hash::{BuildHasher, Hasher};
        let mut hasher = self.hash_builder.build_hasher();
        hasher.write(bytes);
        hasher.finish()
    }

    /// Intern `bytes`, returning an existing handle if equal content is
    /// already present. Strings longer than [`MAX_SHORT_STRING_LEN`] are
    /// still deduplicated here — unlike the source, which skips interning
    /// long strings outright for allocation-cost reasons the tagged `Value`
    /// model in this crate doesn't need to special-case.
    pub fn intern(&mut self, bytes: &[u8]) -> StringId {
        let hash = self.hash_bytes(bytes);
        if let Some(candidates) = self.buckets.get(&hash) {
            for &id in candidates {
                if self.strings.get(id.0).map(|s| &*s.bytes) == Some(bytes) {
                    return id;
                }
            }
        }
        let id = StringId(self.strings.insert(InternedString {
            bytes: bytes.into(),
            hash,
            reserved: false,
        }));
        self.buckets.entry(hash).or_default().push(id);
        id
    }

    /// Pin a string against collection at state init (used for keywords and
    /// for the fixed out-of-memory message).
    pub fn intern_reserved(&mut self, bytes: &[u8]) -> StringId {
        let id = self.intern(bytes);
        if let Some(s) = self.strings.get_mut(id.0) {
            s.reserved = true;
        }
        id
    }

    pub fn get(&self, id: StringId) -> Option<&[u8]> {
        self.strings.get(id.0).map(|s| &*s.bytes)
    }

    /// The precomputed content hash, used by the table's hash part to find
    /// a string key's main position without rehashing the bytes.
    pub fn hash_of(&self, id: StringId) -> u64 {
        self.strings.get(id.0).map(|s| s.hash).unwrap_or(0)
    }

    pub fn is_reserved(&self, id: StringId) -> bool {
        self.strings.get(id.0).map(|s| s.reserved).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

impl Default for StringPool {
    fn default() -> Self {
        Self::new()
    }
}
