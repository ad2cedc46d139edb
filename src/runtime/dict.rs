use super::{Array, RuntimeError, Str};
use crate::memory::Memory;

const KEYS: u32 = 0;
const VALUES: u32 = 4;
const OWNERSHIP: u32 = 8;
const HEADER_BYTES: u32 = 12;

/// Who frees the keys of a [`Dict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOwnership {
    /// The dictionary frees its keys when it is deleted.
    Owned,
    /// Keys belong to some other structure and outlive the dictionary.
    Shared,
}

/// String keyed map built on two parallel [`Array`]s.
///
/// Lookup is a linear scan comparing key contents, so it only suits the small
/// tables the compiler keeps.
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct Dict(u32);

impl Dict {
    /// Creates a dictionary that owns its keys.
    pub fn new(memory: &mut Memory) -> Result<Self, RuntimeError> {
        Self::with_keys(memory, KeyOwnership::Owned)
    }

    pub fn with_keys(memory: &mut Memory, ownership: KeyOwnership) -> Result<Self, RuntimeError> {
        let header = memory.alloc(HEADER_BYTES)?;
        let keys = Array::new(memory, 0)?;
        let values = Array::new(memory, 0)?;
        memory.write_u32(header + KEYS, keys.into_ptr());
        memory.write_u32(header + VALUES, values.into_ptr());
        let owned = match ownership {
            KeyOwnership::Owned => 1,
            KeyOwnership::Shared => 0,
        };
        memory.write_u32(header + OWNERSHIP, owned);
        Ok(Self(header))
    }

    pub fn ownership(&self, memory: &Memory) -> KeyOwnership {
        match memory.read_u32(self.0 + OWNERSHIP) {
            0 => KeyOwnership::Shared,
            _ => KeyOwnership::Owned,
        }
    }

    /// Takes ownership of the dictionary whose header is at `address`.
    pub fn from_ptr(address: u32) -> Self {
        Self(address)
    }

    pub fn as_ptr(&self) -> u32 {
        self.0
    }

    pub fn into_ptr(self) -> u32 {
        self.0
    }

    // The arrays stay owned by the header, so these views must never be deleted.
    fn keys(&self, memory: &Memory) -> Array {
        Array::from_ptr(memory.read_u32(self.0 + KEYS))
    }

    fn values_array(&self, memory: &Memory) -> Array {
        Array::from_ptr(memory.read_u32(self.0 + VALUES))
    }

    pub fn len(&self, memory: &Memory) -> u32 {
        self.keys(memory).len(memory)
    }

    pub fn is_empty(&self, memory: &Memory) -> bool {
        self.len(memory) == 0
    }

    pub fn find(&self, memory: &Memory, key: &Str) -> Option<u32> {
        self.position(memory, |candidate| candidate.cmp(memory, key).is_eq())
    }

    pub fn find_bytes(&self, memory: &Memory, key: &[u8]) -> Option<u32> {
        self.position(memory, |candidate| candidate.cmp_bytes(memory, key).is_eq())
    }

    fn position(&self, memory: &Memory, mut matches: impl FnMut(&Str) -> bool) -> Option<u32> {
        self.keys(memory)
            .values(memory)
            .into_iter()
            .position(|key| matches(&Str::from_ptr(key)))
            .map(|index| index as u32)
    }

    /// Value stored at `index`, as returned by [`Self::find`].
    pub fn value_at(&self, memory: &Memory, index: u32) -> Result<u32, RuntimeError> {
        self.values_array(memory).get(memory, index)
    }

    pub fn get(&self, memory: &Memory, key: &Str) -> u32 {
        self.get_or(memory, key, 0)
    }

    pub fn get_or(&self, memory: &Memory, key: &Str, default: u32) -> u32 {
        self.find(memory, key)
            .and_then(|index| self.value_at(memory, index).ok())
            .unwrap_or(default)
    }

    /// Binds `key` to `value`.
    ///
    /// When an equal key is already present its value is replaced, and an
    /// owning dictionary frees the incoming key. A sharing dictionary never
    /// frees it: its other owner still does.
    pub fn set(&mut self, memory: &mut Memory, key: Str, value: u32) -> Result<(), RuntimeError> {
        let replaced = self.insert(memory, key.as_ptr(), value)?;
        if replaced && self.ownership(memory) == KeyOwnership::Owned {
            key.delete(memory)?;
        } else {
            let _ = key.into_ptr();
        }
        Ok(())
    }

    /// Binds a key the caller keeps owning. Only valid on a
    /// [`KeyOwnership::Shared`] dictionary.
    pub fn set_shared(
        &mut self,
        memory: &mut Memory,
        key: &Str,
        value: u32,
    ) -> Result<(), RuntimeError> {
        if self.ownership(memory) == KeyOwnership::Owned {
            return Err(RuntimeError::SharedKeyInOwningDict);
        }
        self.insert(memory, key.as_ptr(), value)?;
        Ok(())
    }

    /// Returns whether an equal key was already present.
    fn insert(&mut self, memory: &mut Memory, key: u32, value: u32) -> Result<bool, RuntimeError> {
        match self.find(memory, &Str::from_ptr(key)) {
            Some(index) => {
                self.values_array(memory).set(memory, index, value)?;
                Ok(true)
            }
            None => {
                self.keys(memory).push(memory, key)?;
                self.values_array(memory).push(memory, value)?;
                Ok(false)
            }
        }
    }

    /// Stored values in insertion order.
    pub fn values(&self, memory: &Memory) -> Vec<u32> {
        self.values_array(memory).values(memory)
    }

    /// Frees both arrays, the header and, if the dictionary owns them, the
    /// keys. Values are left alone.
    pub fn delete(self, memory: &mut Memory) -> Result<(), RuntimeError> {
        if self.ownership(memory) == KeyOwnership::Owned {
            for key in self.keys(memory).values(memory) {
                Str::from_ptr(key).delete(memory)?;
            }
        }
        self.keys(memory).delete(memory)?;
        self.values_array(memory).delete(memory)?;
        memory.free(self.0)?;
        Ok(())
    }
}
