//! Embedded engine host API
//!
//! The script engine is an external collaborator; this module models the
//! part of its host API the bridge depends on: a value stack with call
//! frames, an object heap with a byte budget and a collector, native
//! functions with declared arity, and the debugger transport slots.

pub mod context;
pub mod debug;
pub mod error;
pub mod heap;
pub mod json;
pub mod value;

pub use context::{Context, DEFAULT_HEAP_SIZE, MAX_CALL_DEPTH, MAX_STACK};
pub use debug::DebugTransport;
pub use error::{EngineError, EngineResult};
pub use value::{format_number, Arity, JsString, NativeFn, ObjectRef, Return, Value, ValueType};
