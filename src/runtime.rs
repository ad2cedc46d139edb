//! Data structures living inside a [`Memory`](crate::memory::Memory) window.
//!
//! Handles are plain addresses. They carry no reference to the memory they
//! live in, so every operation takes the window explicitly. Handles that own
//! their allocation are not `Copy`: operations that take ownership consume
//! them, and a consumed handle cannot be used again.

use crate::memory::MemoryError;

pub mod array;
pub mod dict;
pub mod string;

pub use array::Array;
pub use dict::{Dict, KeyOwnership};
pub use string::Str;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: u32, len: u32 },
    #[error("array is empty")]
    Empty,
    #[error("a dictionary that owns its keys cannot hold a shared key")]
    SharedKeyInOwningDict,
}
