//! The hybrid array/hash associative container.
//!
//! Reworked in safe Rust from a raw-pointer port of the reference table
//! implementation: the array part is a plain `Vec<Value>`, the hash part is
//! a `Vec<Node>` whose chains are linked by absolute index rather than the
//! source's pointer-relative offsets. The algorithm itself — Brent's
//! variation on chained scatter, `computesizes`'s power-of-two bucket
//! counting, the `lenhint`-free boundary search — follows the source
//! closely; only the storage representation changed.

use crate::error::LuaError;
use crate::limits::MAX_HASH_BITS;
use crate::string_pool::StringPool;
use crate::value::{GcHeader, TableId, Value};

#[derive(Clone, Copy)]
struct Node {
    key: Value,
    value: Value,
    next: Option<usize>,
}

impl Node {
    fn empty() -> Self {
        Self {
            key: Value::Nil,
            value: Value::Nil,
            next: None,
        }
    }

    fn is_free(&self) -> bool {
        self.key.is_nil()
    }
}

pub struct Table {
    pub header: GcHeader,
    /// Logical index `i` (1-based) lives at `array[i - 1]`.
    array: Vec<Value>,
    /// Capacity is 0 or a power of two (I2). An empty `hash` plays the role
    /// of the source's single read-only `dummynode`: every hash lookup on a
    /// table with no hash part short-circuits to nil without probing.
    hash: Vec<Node>,
    /// Descending free-slot cursor (§4.1 `lastfree`); search for a free slot
    /// scans backward from here so repeated insertions don't rescan slots
    /// already known occupied.
    lastfree: usize,
    pub metatable: Option<TableId>,
}

fn fold_bits(bits: u64) -> u64 {
    ((bits >> 32) as u32 ^ bits as u32) as u64
}

/// Smallest `i` such that `2^i >= x`, for `x >= 1`. Buckets integer keys by
/// the power-of-two range they fall in for `computesizes`.
fn ceil_log2(x: i64) -> u32 {
    if x <= 1 {
        return 0;
    }
    let x = (x - 1) as u64;
    64 - x.leading_zeros()
}

fn count_int_key(key: i64, nums: &mut [usize]) {
    let bucket = (ceil_log2(key) as usize).min(nums.len() - 1);
    nums[bucket] += 1;
}

/// Picks the array size that keeps the array part's integer-key load at or
/// above 50%: the largest `2^i` such that over half of slots `1..=2^i` are
/// occupied by integer keys actually present. Returns `(array_size, count
/// of integer keys that will live in that array)`.
fn computesizes(nums: &[usize], total_int_keys: usize) -> (usize, usize) {
    let mut twotoi = 1usize;
    let mut a = 0usize;
    let mut na = 0usize;
    let mut optimal = 0usize;
    let mut i = 0usize;
    while i < nums.len() && twotoi / 2 < total_int_keys {
        a += nums[i];
        if a > twotoi / 2 {
            optimal = twotoi;
            na = a;
        }
        if a == total_int_keys {
            break;
        }
        twotoi *= 2;
        i += 1;
    }
    (optimal, na)
}

/// Main position of a key before collision handling (§4.1 Hashing).
fn mainposition(key: &Value, capacity: usize, strings: &StringPool) -> usize {
    debug_assert!(capacity > 0);
    match key {
        Value::Number(n) => {
            let n = if *n == 0.0 { 0.0 } else { *n };
            let h = fold_bits(n.to_bits());
            (h % (((capacity - 1) | 1) as u64)) as usize
        }
        Value::String(id) => (strings.hash_of(*id) & (capacity as u64 - 1)) as usize,
        Value::Bool(b) => (*b as usize) % capacity,
        Value::LightPtr(p) => (*p as u64 % (((capacity - 1) | 1) as u64)) as usize,
        other => {
            let bits = identity_bits(other);
            (bits % (((capacity - 1) | 1) as u64)) as usize
        }
    }
}

/// Reference-identity bits for collectable handles other than strings
/// (strings use their content hash instead).
fn identity_bits(key: &Value) -> u64 {
    match key {
        Value::Table(id) => id.0 as u64,
        Value::Closure(id) => id.0 as u64,
        Value::ForeignData(id) => id.0 as u64,
        Value::Thread(id) => id.0 as u64,
        Value::Prototype(id) => id.0 as u64,
        Value::Upvalue(id) => id.0 as u64,
        _ => 0,
    }
}

impl Table {
    pub fn new(header: GcHeader, narray_hint: usize, nhash_hint: usize) -> Self {
        let hash_size = if nhash_hint == 0 {
            0
        } else {
            nhash_hint.next_power_of_two()
        };
        Self {
            header,
            array: vec![Value::Nil; narray_hint],
            hash: (0..hash_size).map(|_| Node::empty()).collect(),
            lastfree: hash_size,
            metatable: None,
        }
    }

    pub fn array_size(&self) -> usize {
        self.array.len()
    }

    pub fn hash_capacity(&self) -> usize {
        self.hash.len()
    }

    fn find_hash_index(&self, key: &Value, strings: &StringPool) -> Option<usize> {
        if self.hash.is_empty() {
            return None;
        }
        let mut idx = Some(mainposition(key, self.hash.len(), strings));
        while let Some(i) = idx {
            let node = &self.hash[i];
            if !node.is_free() && node.key == *key {
                return Some(i);
            }
            idx = node.next;
        }
        None
    }

    /// `get(t, k)`: nil if absent. O(1) expected.
    pub fn get(&self, key: &Value, strings: &StringPool) -> Value {
        if let Some(i) = key.as_array_index() {
            if (i as usize) <= self.array.len() {
                return self.array[i as usize - 1];
            }
        }
        if !key.is_valid_key() {
            return Value::Nil;
        }
        match self.find_hash_index(key, strings) {
            Some(i) => self.hash[i].value,
            None => Value::Nil,
        }
    }

    /// `set(t, k, v)`: fails if `k` is nil or NaN (I4, I5).
    pub fn set(&mut self, key: Value, value: Value, strings: &StringPool) -> Result<(), LuaError> {
        if !key.is_valid_key() {
            return Err(LuaError::RuntimeError);
        }
        if let Some(i) = key.as_array_index() {
            let i = i as usize;
            if i <= self.array.len() {
                self.array[i - 1] = value;
                return Ok(());
            }
            if i == self.array.len() + 1 && !value.is_nil() {
                self.array.push(value);
                self.migrate_hash_tail_into_array(strings);
                return Ok(());
            }
        }
        if value.is_nil() {
            // Clearing an absent binding is a no-op; clearing a present one
            // leaves a dead key behind (design notes: "Dead keys").
            if let Some(i) = self.find_hash_index(&key, strings) {
                self.hash[i].value = Value::Nil;
            }
            return Ok(());
        }
        self.raw_set_hash(key, value, strings);
        Ok(())
    }

    /// After appending to the array part, pull any hash-part integer keys
    /// that now fall within range back into the array (mirrors the source's
    /// incremental array growth absorbing adjacent hash entries).
    fn migrate_hash_tail_into_array(&mut self, strings: &StringPool) {
        loop {
            let next_index = self.array.len() + 1;
            let key = Value::Number(next_index as f64);
            let Some(i) = self.find_hash_index(&key, strings) else {
                return;
            };
            if self.hash[i].value.is_nil() {
                return;
            }
            let value = self.hash[i].value;
            self.hash[i].value = Value::Nil;
            self.array.push(value);
        }
    }

    fn get_free_pos(&mut self) -> Option<usize> {
        while self.lastfree > 0 {
            self.lastfree -= 1;
            if self.hash[self.lastfree].is_free() {
                return Some(self.lastfree);
            }
        }
        None
    }

    /// Brent's variation on chained scatter (§4.1 Insertion).
    fn raw_set_hash(&mut self, key: Value, value: Value, strings: &StringPool) {
        if let Some(i) = self.find_hash_index(&key, strings) {
            self.hash[i].value = value;
            return;
        }
        if self.hash.is_empty() {
            self.rehash(Some(&key), strings);
            return self.raw_set_hash(key, value, strings);
        }
        let cap = self.hash.len();
        let mp = mainposition(&key, cap, strings);
        if self.hash[mp].is_free() {
            self.hash[mp] = Node {
                key,
                value,
                next: None,
            };
            return;
        }
        let occupant_key = self.hash[mp].key;
        let occupant_mp = mainposition(&occupant_key, cap, strings);
        if occupant_mp != mp {
            // Occupant is a displaced member of another chain: relocate it
            // to a free slot and fix up that chain's link, then give mp to
            // the new key.
            let Some(free) = self.get_free_pos() else {
                self.rehash(Some(&key), strings);
                return self.raw_set_hash(key, value, strings);
            };
            let mut pred = occupant_mp;
            while self.hash[pred].next != Some(mp) {
                pred = self.hash[pred]
                    .next
                    .expect("occupant's chain must reach its own slot");
            }
            self.hash[pred].next = Some(free);
            self.hash[free] = self.hash[mp];
            self.hash[mp] = Node {
                key,
                value,
                next: None,
            };
        } else {
            // Occupant is at home: splice the new key into a free slot at
            // the head of mp's chain.
            let Some(free) = self.get_free_pos() else {
                self.rehash(Some(&key), strings);
                return self.raw_set_hash(key, value, strings);
            };
            let old_next = self.hash[mp].next;
            self.hash[free] = Node {
                key,
                value,
                next: old_next,
            };
            self.hash[mp].next = Some(free);
        }
    }

    /// §4.1 Rehash: count integer keys per power-of-two bucket across both
    /// parts (plus the key about to be inserted), pick the new array size
    /// via `computesizes`, and resize.
    fn rehash(&mut self, extra_key: Option<&Value>, strings: &StringPool) {
        let mut nums = vec![0usize; MAX_HASH_BITS as usize + 2];
        let mut total_int = 0usize;
        let mut numusehash = 0usize;

        for (i, v) in self.array.iter().enumerate() {
            if !v.is_nil() {
                count_int_key((i + 1) as i64, &mut nums);
                total_int += 1;
            }
        }
        for node in &self.hash {
            if node.is_free() || node.value.is_nil() {
                continue;
            }
            if let Some(ik) = node.key.as_array_index() {
                count_int_key(ik, &mut nums);
                total_int += 1;
            } else {
                numusehash += 1;
            }
        }
        if let Some(k) = extra_key {
            if let Some(ik) = k.as_array_index() {
                count_int_key(ik, &mut nums);
                total_int += 1;
            } else {
                numusehash += 1;
            }
        }

        let (new_asize, na) = computesizes(&nums, total_int);
        let hash_needed = (total_int - na) + numusehash;
        let new_hash_size = if hash_needed == 0 {
            0
        } else {
            hash_needed.next_power_of_two()
        };
        self.resize(new_asize, new_hash_size, strings);
    }

    fn resize(&mut self, new_asize: usize, new_hash_size: usize, strings: &StringPool) {
        let old_array = std::mem::take(&mut self.array);
        let old_hash = std::mem::take(&mut self.hash);

        let mut new_array = vec![Value::Nil; new_asize];
        let mut overflow: Vec<(Value, Value)> = Vec::new();

        for (i, v) in old_array.into_iter().enumerate() {
            if v.is_nil() {
                continue;
            }
            let logical = i + 1;
            if logical <= new_asize {
                new_array[logical - 1] = v;
            } else {
                overflow.push((Value::Number(logical as f64), v));
            }
        }
        for node in old_hash {
            if node.is_free() || node.value.is_nil() {
                continue;
            }
            if let Some(ik) = node.key.as_array_index() {
                if (ik as usize) <= new_asize {
                    new_array[ik as usize - 1] = node.value;
                    continue;
                }
            }
            overflow.push((node.key, node.value));
        }

        self.array = new_array;
        self.hash = (0..new_hash_size).map(|_| Node::empty()).collect();
        self.lastfree = new_hash_size;

        for (k, v) in overflow {
            self.raw_set_hash(k, v, strings);
        }
    }

    /// `len(t)`: some integer `n` with `t[n] != nil` and `t[n+1] == nil`, or
    /// 0 if `t[1] == nil`. With holes the result is one valid boundary, not
    /// necessarily the largest (see DESIGN.md's Open Question entry).
    pub fn len(&self, strings: &StringPool) -> i64 {
        let n = self.array.len();
        if n > 0 && self.array[n - 1].is_nil() {
            // array has a hole before its end: binary-search the tail.
            let mut lo = 0usize;
            let mut hi = n;
            while hi - lo > 1 {
                let mid = (lo + hi) / 2;
                if self.array[mid - 1].is_nil() {
                    hi = mid;
                } else {
                    lo = mid;
                }
            }
            return lo as i64;
        }
        if n > 0 {
            if self.hash.is_empty() {
                return n as i64;
            }
            return self.hash_unbound_search(n as i64, strings);
        }
        if self.hash.is_empty() {
            return 0;
        }
        self.hash_unbound_search(0, strings)
    }

    fn hash_unbound_search(&self, start: i64, strings: &StringPool) -> i64 {
        let mut i = start;
        let mut j = start + 1;
        while !self
            .get(&Value::Number(j as f64), strings)
            .is_nil()
        {
            i = j;
            if j > i64::MAX / 2 {
                let mut k = i + 1;
                while !self.get(&Value::Number(k as f64), strings).is_nil() {
                    k += 1;
                }
                return k - 1;
            }
            j *= 2;
        }
        while j - i > 1 {
            let m = (i + j) / 2;
            if self.get(&Value::Number(m as f64), strings).is_nil() {
                j = m;
            } else {
                i = m;
            }
        }
        i
    }

    /// `next(t, k)`: array part in index order, then hash part in slot
    /// order (I7); dead slots are skipped for emission.
    pub fn next(
        &self,
        key: &Value,
        strings: &StringPool,
    ) -> Result<Option<(Value, Value)>, LuaError> {
        let array_start = if key.is_nil() {
            Some(0usize)
        } else if let Some(ik) = key.as_array_index() {
            if (ik as usize) <= self.array.len() {
                Some(ik as usize)
            } else {
                None
            }
        } else {
            None
        };

        if let Some(start) = array_start {
            for i in start..self.array.len() {
                if !self.array[i].is_nil() {
                    return Ok(Some((Value::Number((i + 1) as f64), self.array[i])));
                }
            }
            return self.next_from_hash_start(0);
        }

        let idx = self
            .find_hash_index(key, strings)
            .ok_or(LuaError::RuntimeError)?;
        self.next_from_hash_start(idx + 1)
    }

    fn next_from_hash_start(&self, start: usize) -> Result<Option<(Value, Value)>, LuaError> {
        for i in start..self.hash.len() {
            let node = &self.hash[i];
            if !node.is_free() && !node.value.is_nil() {
                return Ok(Some((node.key, node.value)));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::GcKind;

    fn table() -> (Table, StringPool) {
        (
            Table::new(GcHeader::new(GcKind::Table, 1), 0, 0),
            StringPool::new(),
        )
    }

    #[test]
    fn get_set_roundtrip_t1() {
        let (mut t, strings) = table();
        t.set(Value::Number(1.0), Value::Number(10.0), &strings)
            .unwrap();
        t.set(Value::Number(2.0), Value::Number(20.0), &strings)
            .unwrap();
        assert_eq!(t.get(&Value::Number(1.0), &strings), Value::Number(10.0));
        assert_eq!(t.get(&Value::Number(2.0), &strings), Value::Number(20.0));
        assert_eq!(t.get(&Value::Number(3.0), &strings), Value::Nil);
    }

    #[test]
    fn nil_and_nan_keys_are_rejected() {
        let (mut t, strings) = table();
        assert!(t.set(Value::Nil, Value::Number(1.0), &strings).is_err());
        assert!(t
            .set(Value::Number(f64::NAN), Value::Number(1.0), &strings)
            .is_err());
    }

    #[test]
    fn integer_keys_in_range_live_in_the_array_t3() {
        let (mut t, strings) = table();
        for i in 1..=16 {
            t.set(Value::Number(i as f64), Value::Number(i as f64 * 10.0), &strings)
                .unwrap();
        }
        assert!(t.array_size() >= 16);
        for i in 1..=16 {
            assert_eq!(
                t.get(&Value::Number(i as f64), &strings),
                Value::Number(i as f64 * 10.0)
            );
        }
    }

    #[test]
    fn scenario_1_boundary_with_hole() {
        let (mut t, strings) = table();
        t.set(Value::Number(1.0), Value::Number(10.0), &strings).unwrap();
        t.set(Value::Number(2.0), Value::Number(20.0), &strings).unwrap();
        t.set(Value::Number(3.0), Value::Number(30.0), &strings).unwrap();
        t.set(Value::Number(5.0), Value::Number(50.0), &strings).unwrap();
        let len = t.len(&strings);
        assert!(len == 3 || len == 5, "len was {len}");

        t.set(Value::Number(4.0), Value::Number(40.0), &strings).unwrap();
        assert_eq!(t.len(&strings), 5);

        t.set(Value::Number(3.0), Value::Nil, &strings).unwrap();
        let len = t.len(&strings);
        assert!(len == 2 || len == 5, "len was {len}");
    }

    #[test]
    fn scenario_2_rehash_preserves_bindings() {
        let mut strings = StringPool::new();
        let (mut t, _) = table();
        let mut keys = Vec::new();
        for i in 1..=1000i64 {
            let s = format!("k{i}");
            keys.push((i, strings.intern(s.as_bytes())));
        }
        for i in 1..=1000i64 {
            t.set(Value::Number(i as f64), Value::Number(i as f64), &strings)
                .unwrap();
            let (_, sid) = keys[(i - 1) as usize];
            t.set(Value::String(sid), Value::Number(i as f64), &strings)
                .unwrap();
        }
        for i in 1..=1000i64 {
            assert_eq!(t.get(&Value::Number(i as f64), &strings), Value::Number(i as f64));
            let (_, sid) = keys[(i - 1) as usize];
            assert_eq!(t.get(&Value::String(sid), &strings), Value::Number(i as f64));
        }
    }

    #[test]
    fn next_visits_each_binding_once_t2() {
        let (mut t, strings) = table();
        t.set(Value::Number(1.0), Value::Number(1.0), &strings).unwrap();
        t.set(Value::Number(2.0), Value::Number(2.0), &strings).unwrap();
        t.set(Value::Bool(true), Value::Number(3.0), &strings).unwrap();

        let mut seen = Vec::new();
        let mut key = Value::Nil;
        loop {
            match t.next(&key, &strings).unwrap() {
                Some((k, v)) => {
                    seen.push((k, v));
                    key = k;
                }
                None => break,
            }
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn setting_nil_on_missing_key_is_a_no_op() {
        let (mut t, strings) = table();
        t.set(Value::Bool(true), Value::Nil, &strings).unwrap();
        assert_eq!(t.get(&Value::Bool(true), &strings), Value::Nil);
    }
}
