//! A linear memory window managed by a first-fit free-list allocator.
//!
//! Every allocation is preceded by a 16 byte chunk header:
//!
//! ```text
//! +0  size  u32   payload bytes following the header
//! +4  next  u32   address of the next chunk header (0 = tail)
//! +8  prev  u32   address of the previous chunk header (0 = head)
//! +12 used  u8    1 if handed out, 0 if free
//! ```
//!
//! Chunks are kept in address order and always tile the whole window, and
//! two neighbouring chunks are never both free.
use tracing::{trace, warn};

/// Size of the header in front of every chunk.
pub const HEADER_SIZE: u32 = 16;
/// Allocation requests are rounded up to a multiple of this.
pub const GRANULE: u32 = 16;

const SIZE_OFFSET: u32 = 0;
const NEXT_OFFSET: u32 = 4;
const PREV_OFFSET: u32 = 8;
const USED_OFFSET: u32 = 12;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("out of memory: no free chunk can hold {requested} bytes")]
    OutOfMemory { requested: u32 },
    #[error("invalid memory window [{start}, {end})")]
    InvalidWindow { start: u32, end: u32 },
    #[error("address {address} is not a live allocation")]
    InvalidFree { address: u32 },
    #[error("span at {address} of {len} bytes is outside of memory")]
    OutOfBounds { address: u32, len: u32 },
}

/// Snapshot of one chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Address of the header (the payload starts [`HEADER_SIZE`] bytes later).
    pub address: u32,
    pub size: u32,
    pub next: u32,
    pub prev: u32,
    pub used: bool,
}

impl Chunk {
    pub fn payload(&self) -> u32 {
        self.address + HEADER_SIZE
    }
}

/// Receiver of the debug text a window can produce about itself.
///
/// Mirrors the pair of host callbacks the compiled runtime imports for
/// printing strings and numbers.
pub trait DebugHost {
    fn puts(&mut self, text: &str);
    fn putn(&mut self, number: u32);
}

/// Forwards debug output to `tracing` at debug level.
#[derive(Debug, Default)]
pub struct TracingHost {
    line: String,
}

impl DebugHost for TracingHost {
    fn puts(&mut self, text: &str) {
        for (idx, part) in text.split('\n').enumerate() {
            if idx > 0 {
                tracing::debug!(target: "quo::debug", "{}", self.line);
                self.line.clear();
            }
            self.line.push_str(part);
        }
    }

    fn putn(&mut self, number: u32) {
        self.line.push_str(&number.to_string());
    }
}

/// A byte buffer with an allocator managing the window `[start, end)`.
#[derive(Debug, Clone)]
pub struct Memory {
    bytes: Vec<u8>,
    start: u32,
    end: u32,
}

impl Memory {
    /// Creates `len` zeroed bytes without an initialized window.
    pub fn new(len: u32) -> Self {
        Self {
            bytes: vec![0; len as usize],
            start: 0,
            end: 0,
        }
    }

    pub fn len(&self) -> u32 {
        self.bytes.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The currently managed window, `None` before [`Self::init`].
    pub fn window(&self) -> Option<(u32, u32)> {
        (self.end > self.start).then_some((self.start, self.end))
    }

    /// (Re)initializes the window to a single free chunk, forgetting every
    /// previous allocation.
    pub fn init(&mut self, start: u32, end: u32) -> Result<(), MemoryError> {
        let valid = start > 0
            && start < end
            && end <= self.len()
            && end - start >= HEADER_SIZE + GRANULE;
        if !valid {
            return Err(MemoryError::InvalidWindow { start, end });
        }
        self.start = start;
        self.end = end;
        self.write_header(Chunk {
            address: start,
            size: end - start - HEADER_SIZE,
            next: 0,
            prev: 0,
            used: false,
        });
        trace!(start, end, "memory window initialized");
        Ok(())
    }

    /// Hands out at least `size` bytes, or the null address for a zero sized request.
    pub fn alloc(&mut self, size: u32) -> Result<u32, MemoryError> {
        if size == 0 {
            return Ok(0);
        }
        let rounded = size
            .checked_next_multiple_of(GRANULE)
            .ok_or(MemoryError::OutOfMemory { requested: size })?;

        let Some(mut chunk) = self
            .chunks()
            .find(|chunk| !chunk.used && chunk.size >= rounded)
        else {
            warn!(requested = size, "allocator exhausted");
            return Err(MemoryError::OutOfMemory { requested: size });
        };

        // Only split if the remainder can stand on its own as a chunk
        if chunk.size >= rounded + HEADER_SIZE + GRANULE {
            let rest = Chunk {
                address: chunk.payload() + rounded,
                size: chunk.size - rounded - HEADER_SIZE,
                next: chunk.next,
                prev: chunk.address,
                used: false,
            };
            if rest.next != 0 {
                self.write_u32(rest.next + PREV_OFFSET, rest.address);
            }
            self.write_header(rest);
            trace!(at = chunk.address, size = rounded, rest = rest.size, "split chunk");
            chunk.size = rounded;
            chunk.next = rest.address;
        }
        chunk.used = true;
        self.write_header(chunk);
        Ok(chunk.payload())
    }

    /// Returns an allocation to the free list, merging it with free neighbours.
    ///
    /// Freeing the null address does nothing.
    pub fn free(&mut self, address: u32) -> Result<(), MemoryError> {
        if address == 0 {
            return Ok(());
        }
        let header = address.wrapping_sub(HEADER_SIZE);
        if address < self.start + HEADER_SIZE || address >= self.end {
            return Err(MemoryError::InvalidFree { address });
        }
        let mut chunk = self.header(header);
        if !chunk.used {
            return Err(MemoryError::InvalidFree { address });
        }
        chunk.used = false;

        if chunk.next != 0 {
            let next = self.header(chunk.next);
            if !next.used {
                trace!(at = chunk.address, with = next.address, "merge with next chunk");
                chunk.size += HEADER_SIZE + next.size;
                chunk.next = next.next;
                if chunk.next != 0 {
                    self.write_u32(chunk.next + PREV_OFFSET, chunk.address);
                }
            }
        }

        if chunk.prev != 0 {
            let mut prev = self.header(chunk.prev);
            if !prev.used {
                trace!(at = prev.address, with = chunk.address, "merge with previous chunk");
                prev.size += HEADER_SIZE + chunk.size;
                prev.next = chunk.next;
                if prev.next != 0 {
                    self.write_u32(prev.next + PREV_OFFSET, prev.address);
                }
                self.write_header(prev);
                return Ok(());
            }
        }

        self.write_header(chunk);
        Ok(())
    }

    /// Walks the chunk list in address order.
    pub fn chunks(&self) -> Chunks<'_> {
        Chunks {
            memory: self,
            cursor: if self.window().is_some() { self.start } else { 0 },
        }
    }

    pub fn used_chunks(&self) -> usize {
        self.chunks().filter(|chunk| chunk.used).count()
    }

    /// Prints the chunk list through a debug host.
    pub fn dump_chunks(&self, host: &mut impl DebugHost) {
        for chunk in self.chunks() {
            host.puts(if chunk.used { "used " } else { "free " });
            host.putn(chunk.address);
            host.puts(" size ");
            host.putn(chunk.size);
            host.puts("\n");
        }
    }

    fn header(&self, address: u32) -> Chunk {
        Chunk {
            address,
            size: self.read_u32(address + SIZE_OFFSET),
            next: self.read_u32(address + NEXT_OFFSET),
            prev: self.read_u32(address + PREV_OFFSET),
            used: self.read_u8(address + USED_OFFSET) != 0,
        }
    }

    fn write_header(&mut self, chunk: Chunk) {
        self.write_u32(chunk.address + SIZE_OFFSET, chunk.size);
        self.write_u32(chunk.address + NEXT_OFFSET, chunk.next);
        self.write_u32(chunk.address + PREV_OFFSET, chunk.prev);
        self.write_u8(chunk.address + USED_OFFSET, chunk.used as u8);
    }

    // Accessors below index the buffer directly. Addresses handed to them come
    // from the allocator, so going out of bounds means the heap is corrupt.

    pub fn read_u8(&self, address: u32) -> u8 {
        self.bytes[address as usize]
    }

    pub fn write_u8(&mut self, address: u32, value: u8) {
        self.bytes[address as usize] = value;
    }

    pub fn read_u32(&self, address: u32) -> u32 {
        let at = address as usize;
        let mut word = [0; 4];
        word.copy_from_slice(&self.bytes[at..at + 4]);
        u32::from_le_bytes(word)
    }

    pub fn write_u32(&mut self, address: u32, value: u32) {
        let at = address as usize;
        self.bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn slice(&self, address: u32, len: u32) -> &[u8] {
        &self.bytes[address as usize..(address + len) as usize]
    }

    pub fn slice_mut(&mut self, address: u32, len: u32) -> &mut [u8] {
        &mut self.bytes[address as usize..(address + len) as usize]
    }

    /// Copies `len` bytes from `src` to `dst`; the spans may overlap.
    pub fn copy_within(&mut self, src: u32, dst: u32, len: u32) {
        let src = src as usize;
        self.bytes
            .copy_within(src..src + len as usize, dst as usize);
    }

    /// Writes `text` followed by a NUL byte at `address`.
    pub fn write_raw_str(&mut self, address: u32, text: &[u8]) -> Result<(), MemoryError> {
        let len = u32::try_from(text.len() + 1).map_err(|_| MemoryError::OutOfBounds {
            address,
            len: u32::MAX,
        })?;
        let end = address
            .checked_add(len)
            .filter(|end| *end <= self.len())
            .ok_or(MemoryError::OutOfBounds { address, len })?;
        let span = &mut self.bytes[address as usize..end as usize];
        span[..text.len()].copy_from_slice(text);
        span[text.len()] = 0;
        Ok(())
    }

    /// Reads the NUL terminated span starting at `address`.
    pub fn read_raw_str(&self, address: u32) -> Result<&[u8], MemoryError> {
        let tail = self
            .bytes
            .get(address as usize..)
            .ok_or(MemoryError::OutOfBounds { address, len: 1 })?;
        let len = tail
            .iter()
            .position(|byte| *byte == 0)
            .ok_or(MemoryError::OutOfBounds {
                address,
                len: tail.len() as u32,
            })?;
        Ok(&tail[..len])
    }
}

pub struct Chunks<'m> {
    memory: &'m Memory,
    cursor: u32,
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == 0 {
            return None;
        }
        let chunk = self.memory.header(self.cursor);
        self.cursor = chunk.next;
        Some(chunk)
    }
}
