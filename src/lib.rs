pub mod compiler;
pub mod error;
pub mod lexer;
pub mod memory;
pub mod parser;
pub mod runtime;
pub mod stage;

pub use compiler::{compile_source, Compiled, Compiler, Granularity, Options};
pub use error::Error;
pub use memory::{DebugHost, Memory, MemoryError, TracingHost};
pub use runtime::{Array, Dict, KeyOwnership, RuntimeError, Str};
pub use stage::{Feature, Stage};
