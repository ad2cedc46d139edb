//! Chunked strings.
//!
//! A string is an 8 byte header (`len`, `first`) pointing at a singly linked
//! list of chunks. Each chunk is a 12 byte header (`capacity`, `len`, `next`)
//! followed by `capacity` bytes of data. Appending links new chunks instead of
//! copying, and a string is flattened back into one chunk once it grows past
//! [`MAX_CHUNKS`].
use std::{cmp::Ordering, iter};

use tracing::trace;

use super::RuntimeError;
use crate::memory::{Memory, MemoryError};

const LEN: u32 = 0;
const FIRST: u32 = 4;
const HEADER_BYTES: u32 = 8;

const CAPACITY: u32 = 0;
const CHUNK_LEN: u32 = 4;
const NEXT: u32 = 8;
const DATA: u32 = 12;

/// Smallest capacity a chunk is created with.
pub const MIN_CAPACITY: u32 = 32;
/// Chunk count above which a string is flattened.
pub const MAX_CHUNKS: usize = 8;

fn capacity_for(len: u32) -> Result<u32, MemoryError> {
    len.max(MIN_CAPACITY)
        .checked_next_multiple_of(4)
        .filter(|cap| cap.checked_add(DATA).is_some())
        .ok_or(MemoryError::OutOfMemory { requested: len })
}

fn new_chunk(memory: &mut Memory, min_capacity: u32) -> Result<u32, MemoryError> {
    let capacity = capacity_for(min_capacity)?;
    let chunk = memory.alloc(DATA + capacity)?;
    memory.write_u32(chunk + CAPACITY, capacity);
    memory.write_u32(chunk + CHUNK_LEN, 0);
    memory.write_u32(chunk + NEXT, 0);
    Ok(chunk)
}

fn byte_len(bytes: &[u8]) -> Result<u32, MemoryError> {
    u32::try_from(bytes.len()).map_err(|_| MemoryError::OutOfMemory {
        requested: u32::MAX,
    })
}

/// Inspection copy of one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrChunk {
    pub capacity: u32,
    pub len: u32,
    pub text: String,
}

/// Owning handle to a string in memory.
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct Str(u32);

impl Str {
    /// Creates an empty string whose first chunk holds at least `min_capacity` bytes.
    pub fn new(memory: &mut Memory, min_capacity: u32) -> Result<Self, RuntimeError> {
        let header = memory.alloc(HEADER_BYTES)?;
        let chunk = new_chunk(memory, min_capacity)?;
        memory.write_u32(header + LEN, 0);
        memory.write_u32(header + FIRST, chunk);
        Ok(Self(header))
    }

    pub fn from_bytes(memory: &mut Memory, bytes: &[u8]) -> Result<Self, RuntimeError> {
        let mut string = Self::new(memory, byte_len(bytes)?)?;
        string.push_bytes(memory, bytes)?;
        Ok(string)
    }

    pub fn from_str(memory: &mut Memory, text: &str) -> Result<Self, RuntimeError> {
        Self::from_bytes(memory, text.as_bytes())
    }

    /// Copies the NUL terminated span at `address` into a new string.
    pub fn from_raw(memory: &mut Memory, address: u32) -> Result<Self, RuntimeError> {
        let bytes = memory.read_raw_str(address)?.to_vec();
        Self::from_bytes(memory, &bytes)
    }

    /// Takes ownership of the string whose header is at `address`.
    ///
    /// The caller is responsible for there being no other owner left.
    pub fn from_ptr(address: u32) -> Self {
        Self(address)
    }

    pub fn as_ptr(&self) -> u32 {
        self.0
    }

    /// Gives up the handle without freeing anything.
    pub fn into_ptr(self) -> u32 {
        self.0
    }

    pub fn len(&self, memory: &Memory) -> u32 {
        memory.read_u32(self.0 + LEN)
    }

    pub fn is_empty(&self, memory: &Memory) -> bool {
        self.len(memory) == 0
    }

    fn first(&self, memory: &Memory) -> u32 {
        memory.read_u32(self.0 + FIRST)
    }

    fn chunk_addresses<'m>(&self, memory: &'m Memory) -> impl Iterator<Item = u32> + 'm {
        iter::successors(Some(self.first(memory)), move |chunk| {
            Some(memory.read_u32(chunk + NEXT)).filter(|next| *next != 0)
        })
    }

    fn tail(&self, memory: &Memory) -> u32 {
        self.chunk_addresses(memory)
            .last()
            .unwrap_or_else(|| self.first(memory))
    }

    pub fn chunk_count(&self, memory: &Memory) -> usize {
        self.chunk_addresses(memory).count()
    }

    pub fn chunks(&self, memory: &Memory) -> Vec<StrChunk> {
        self.chunk_addresses(memory)
            .map(|chunk| {
                let len = memory.read_u32(chunk + CHUNK_LEN);
                StrChunk {
                    capacity: memory.read_u32(chunk + CAPACITY),
                    len,
                    text: String::from_utf8_lossy(memory.slice(chunk + DATA, len)).into_owned(),
                }
            })
            .collect()
    }

    /// Streams the content across chunk boundaries.
    pub fn bytes<'m>(&self, memory: &'m Memory) -> Bytes<'m> {
        Bytes {
            memory,
            chunk: self.first(memory),
            offset: 0,
        }
    }

    pub fn to_vec(&self, memory: &Memory) -> Vec<u8> {
        self.bytes(memory).collect()
    }

    pub fn to_string(&self, memory: &Memory) -> String {
        String::from_utf8_lossy(&self.to_vec(memory)).into_owned()
    }

    pub fn push_bytes(&mut self, memory: &mut Memory, bytes: &[u8]) -> Result<(), RuntimeError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let added = byte_len(bytes)?;
        let len = self.len(memory);
        let tail = self.tail(memory);
        let capacity = memory.read_u32(tail + CAPACITY);
        let used = memory.read_u32(tail + CHUNK_LEN);

        if capacity - used >= added {
            memory
                .slice_mut(tail + DATA + used, added)
                .copy_from_slice(bytes);
            memory.write_u32(tail + CHUNK_LEN, used + added);
        } else {
            // Growing by at least the current length keeps appends amortized.
            let chunk = new_chunk(memory, added.max(len))?;
            memory.slice_mut(chunk + DATA, added).copy_from_slice(bytes);
            memory.write_u32(chunk + CHUNK_LEN, added);
            memory.write_u32(tail + NEXT, chunk);
        }
        memory.write_u32(self.0 + LEN, len + added);

        if self.chunk_count(memory) > MAX_CHUNKS {
            self.flatten(memory)?;
        }
        Ok(())
    }

    pub fn push_str(&mut self, memory: &mut Memory, text: &str) -> Result<(), RuntimeError> {
        self.push_bytes(memory, text.as_bytes())
    }

    pub fn push_char(&mut self, memory: &mut Memory, byte: u8) -> Result<(), RuntimeError> {
        self.push_bytes(memory, &[byte])
    }

    /// Appends the NUL terminated span at `address`.
    pub fn push_raw(&mut self, memory: &mut Memory, address: u32) -> Result<(), RuntimeError> {
        let bytes = memory.read_raw_str(address)?.to_vec();
        self.push_bytes(memory, &bytes)
    }

    /// Appends `src` to this string, consuming it.
    pub fn merge(&mut self, memory: &mut Memory, src: Str) -> Result<(), RuntimeError> {
        let added = src.len(memory);
        if added == 0 {
            return src.delete(memory);
        }

        let len = self.len(memory);
        if len == 0 {
            for chunk in self.chunk_addresses(memory).collect::<Vec<_>>() {
                memory.free(chunk)?;
            }
            memory.write_u32(self.0 + FIRST, src.first(memory));
            memory.write_u32(self.0 + LEN, added);
            memory.free(src.into_ptr())?;
            return Ok(());
        }

        let tail = self.tail(memory);
        let capacity = memory.read_u32(tail + CAPACITY);
        let used = memory.read_u32(tail + CHUNK_LEN);
        if capacity - used >= added {
            let mut at = tail + DATA + used;
            for chunk in src.chunk_addresses(memory).collect::<Vec<_>>() {
                let chunk_len = memory.read_u32(chunk + CHUNK_LEN);
                memory.copy_within(chunk + DATA, at, chunk_len);
                at += chunk_len;
            }
            memory.write_u32(tail + CHUNK_LEN, used + added);
            memory.write_u32(self.0 + LEN, len + added);
            return src.delete(memory);
        }

        memory.write_u32(tail + NEXT, src.first(memory));
        memory.write_u32(self.0 + LEN, len + added);
        memory.free(src.into_ptr())?;
        if self.chunk_count(memory) > MAX_CHUNKS {
            self.flatten(memory)?;
        }
        Ok(())
    }

    /// Copies the content into a single chunk. Does nothing for a single chunk string.
    pub fn flatten(&mut self, memory: &mut Memory) -> Result<(), RuntimeError> {
        let chunks: Vec<u32> = self.chunk_addresses(memory).collect();
        if chunks.len() <= 1 {
            return Ok(());
        }
        let len = self.len(memory);
        let target = new_chunk(memory, len)?;
        let mut at = target + DATA;
        for chunk in chunks {
            let chunk_len = memory.read_u32(chunk + CHUNK_LEN);
            memory.copy_within(chunk + DATA, at, chunk_len);
            at += chunk_len;
            memory.free(chunk)?;
        }
        memory.write_u32(target + CHUNK_LEN, len);
        memory.write_u32(self.0 + FIRST, target);
        trace!(string = self.0, len, "flattened string");
        Ok(())
    }

    /// Empties the string, keeping only its first chunk.
    pub fn clear(&mut self, memory: &mut Memory) -> Result<(), RuntimeError> {
        let first = self.first(memory);
        for chunk in self.chunk_addresses(memory).skip(1).collect::<Vec<_>>() {
            memory.free(chunk)?;
        }
        memory.write_u32(first + CHUNK_LEN, 0);
        memory.write_u32(first + NEXT, 0);
        memory.write_u32(self.0 + LEN, 0);
        Ok(())
    }

    /// Flattens the string and NUL terminates it in place, returning the
    /// address of its bytes.
    ///
    /// The string stays owned; the address is valid until it is next modified.
    pub fn to_raw(&mut self, memory: &mut Memory) -> Result<u32, RuntimeError> {
        self.flatten(memory)?;
        let mut chunk = self.first(memory);
        let len = self.len(memory);
        if memory.read_u32(chunk + CAPACITY) == len {
            let target = new_chunk(memory, len + 1)?;
            memory.copy_within(chunk + DATA, target + DATA, len);
            memory.write_u32(target + CHUNK_LEN, len);
            memory.free(chunk)?;
            memory.write_u32(self.0 + FIRST, target);
            chunk = target;
        }
        memory.write_u8(chunk + DATA + len, 0);
        Ok(chunk + DATA)
    }

    pub fn cmp(&self, memory: &Memory, other: &Str) -> Ordering {
        self.bytes(memory).cmp(other.bytes(memory))
    }

    pub fn cmp_bytes(&self, memory: &Memory, bytes: &[u8]) -> Ordering {
        self.bytes(memory).cmp(bytes.iter().copied())
    }

    /// Compares against the NUL terminated span at `address`.
    pub fn cmp_raw(&self, memory: &Memory, address: u32) -> Result<Ordering, RuntimeError> {
        Ok(self.cmp_bytes(memory, memory.read_raw_str(address)?))
    }

    pub fn delete(self, memory: &mut Memory) -> Result<(), RuntimeError> {
        for chunk in self.chunk_addresses(memory).collect::<Vec<_>>() {
            memory.free(chunk)?;
        }
        memory.free(self.0)?;
        Ok(())
    }
}

pub struct Bytes<'m> {
    memory: &'m Memory,
    chunk: u32,
    offset: u32,
}

impl Iterator for Bytes<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        while self.chunk != 0 {
            if self.offset < self.memory.read_u32(self.chunk + CHUNK_LEN) {
                let byte = self.memory.read_u8(self.chunk + DATA + self.offset);
                self.offset += 1;
                return Some(byte);
            }
            self.chunk = self.memory.read_u32(self.chunk + NEXT);
            self.offset = 0;
        }
        None
    }
}
