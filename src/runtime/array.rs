use super::RuntimeError;
use crate::memory::{Memory, MemoryError};

const CAPACITY: u32 = 0;
const LEN: u32 = 4;
const DATA: u32 = 8;
const HEADER_BYTES: u32 = 12;

pub const MIN_CAPACITY: u32 = 4;

/// Growable vector of 32 bit cells: a 12 byte header (`capacity`, `len`,
/// `data`) and a separately allocated data block that doubles when full.
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct Array(u32);

impl Array {
    pub fn new(memory: &mut Memory, min_capacity: u32) -> Result<Self, RuntimeError> {
        let capacity = min_capacity.max(MIN_CAPACITY);
        let bytes = capacity
            .checked_mul(4)
            .ok_or(MemoryError::OutOfMemory { requested: u32::MAX })?;
        let header = memory.alloc(HEADER_BYTES)?;
        let data = memory.alloc(bytes)?;
        memory.write_u32(header + CAPACITY, capacity);
        memory.write_u32(header + LEN, 0);
        memory.write_u32(header + DATA, data);
        Ok(Self(header))
    }

    /// Takes ownership of the array whose header is at `address`.
    pub fn from_ptr(address: u32) -> Self {
        Self(address)
    }

    pub fn as_ptr(&self) -> u32 {
        self.0
    }

    pub fn into_ptr(self) -> u32 {
        self.0
    }

    pub fn len(&self, memory: &Memory) -> u32 {
        memory.read_u32(self.0 + LEN)
    }

    pub fn is_empty(&self, memory: &Memory) -> bool {
        self.len(memory) == 0
    }

    pub fn capacity(&self, memory: &Memory) -> u32 {
        memory.read_u32(self.0 + CAPACITY)
    }

    fn cell(&self, memory: &Memory, index: u32) -> Result<u32, RuntimeError> {
        let len = self.len(memory);
        if index >= len {
            return Err(RuntimeError::IndexOutOfBounds { index, len });
        }
        Ok(memory.read_u32(self.0 + DATA) + index * 4)
    }

    pub fn get(&self, memory: &Memory, index: u32) -> Result<u32, RuntimeError> {
        Ok(memory.read_u32(self.cell(memory, index)?))
    }

    pub fn set(&mut self, memory: &mut Memory, index: u32, value: u32) -> Result<(), RuntimeError> {
        let cell = self.cell(memory, index)?;
        memory.write_u32(cell, value);
        Ok(())
    }

    pub fn last(&self, memory: &Memory) -> Option<u32> {
        let len = self.len(memory);
        len.checked_sub(1).and_then(|index| self.get(memory, index).ok())
    }

    pub fn push(&mut self, memory: &mut Memory, value: u32) -> Result<(), RuntimeError> {
        let len = self.len(memory);
        let capacity = self.capacity(memory);
        if len == capacity {
            let grown = capacity * 2;
            let old = memory.read_u32(self.0 + DATA);
            let data = memory.alloc(grown * 4)?;
            memory.copy_within(old, data, len * 4);
            memory.free(old)?;
            memory.write_u32(self.0 + DATA, data);
            memory.write_u32(self.0 + CAPACITY, grown);
        }
        let data = memory.read_u32(self.0 + DATA);
        memory.write_u32(data + len * 4, value);
        memory.write_u32(self.0 + LEN, len + 1);
        Ok(())
    }

    pub fn pop(&mut self, memory: &mut Memory) -> Result<u32, RuntimeError> {
        let value = self.last(memory).ok_or(RuntimeError::Empty)?;
        let len = self.len(memory);
        memory.write_u32(self.0 + LEN, len - 1);
        Ok(value)
    }

    pub fn values(&self, memory: &Memory) -> Vec<u32> {
        let data = memory.read_u32(self.0 + DATA);
        (0..self.len(memory))
            .map(|index| memory.read_u32(data + index * 4))
            .collect()
    }

    /// Frees the array itself; values are left alone.
    pub fn delete(self, memory: &mut Memory) -> Result<(), RuntimeError> {
        memory.free(memory.read_u32(self.0 + DATA))?;
        memory.free(self.0)?;
        Ok(())
    }

    /// Frees the array and treats every non-null value as an allocation to free.
    pub fn delete_with_values(self, memory: &mut Memory) -> Result<(), RuntimeError> {
        for value in self.values(memory) {
            memory.free(value)?;
        }
        self.delete(memory)
    }
}
