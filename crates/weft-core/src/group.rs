//! Reference group
//!
//! Scope of one encode or decode call. Maps 16-bit keys to shared cells so
//! a cell reachable from several fields is written once, and later
//! occurrences (including back references in a cycle) write only the key.
//! Key 0 is reserved for "absent" and never stored.
//!
//! The group also counts how deeply messages are nested in the current
//! call, so a hostile stream cannot recurse without bound.

use crate::value::SharedRef;
use crate::{Error, Result};
use std::collections::HashMap;

/// Deepest chain of nested messages one encode or decode call accepts
pub const MAX_NESTING: usize = 256;

#[derive(Debug)]
pub struct Group {
    keys: HashMap<usize, u16>,
    objects: HashMap<u16, SharedRef>,
    next_key: u32,
    depth: usize,
}

impl Default for Group {
    fn default() -> Self {
        Self::new()
    }
}

impl Group {
    pub fn new() -> Self {
        Self {
            keys: HashMap::new(),
            objects: HashMap::new(),
            next_key: 1,
            depth: 0,
        }
    }

    /// Step into a nested message
    pub(crate) fn enter(&mut self) -> Result<()> {
        if self.depth >= MAX_NESTING {
            return Err(Error::NestingTooDeep(MAX_NESTING));
        }
        self.depth += 1;
        Ok(())
    }

    pub(crate) fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Key previously assigned to `object`
    pub fn key_of(&self, object: &SharedRef) -> Option<u16> {
        self.keys.get(&object.addr()).copied()
    }

    /// Key for `object`, allocating one on first sight. The flag is true
    /// when the key is new and the payload has to follow.
    pub fn assign(&mut self, object: &SharedRef) -> Result<(u16, bool)> {
        if let Some(key) = self.key_of(object) {
            return Ok((key, false));
        }
        let key = u16::try_from(self.next_key).map_err(|_| Error::GroupExhausted)?;
        self.next_key += 1;
        self.keys.insert(object.addr(), key);
        // keep the cell alive so its address is not reused within this scope
        self.objects.insert(key, object.clone());
        Ok((key, true))
    }

    pub fn get(&self, key: u16) -> Option<&SharedRef> {
        self.objects.get(&key)
    }

    /// Record a key read from the stream
    pub fn insert(&mut self, key: u16, object: SharedRef) {
        debug_assert_ne!(key, 0);
        self.keys.insert(object.addr(), key);
        self.objects.insert(key, object);
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
