//! espbridge - ESP32 host bridge for an embedded script engine
//!
//! Exposes a small host surface to scripts running in a stack-based engine
//! context: system control, logging, a remote-debugger handshake and a
//! capability table of native functions that scripts fetch by name.
//!
//! # Script surface
//!
//! ```text
//! log(msg)                          debug-level log under tag "debug"
//! console.log(value)                write to the console sink
//! ESP32.reset()                     request a restart
//! ESP32.getState()                  { heapSize }
//! ESP32.getNativeFunction(id)       capability lookup, or null
//! ESP32.debug()                     wait for a debugger and attach it
//! ESP32.setLogLevel(tag, level)     none|error|warn|info|debug|verbose
//! ESP32.gc()                        full collection
//! ESP32.loadFile(path)              whole file as a string, or undefined
//! MONGOOSE.nextRequest()            { id, method, path, body } or null
//! ```
//!
//! # Example
//!
//! ```rust
//! use espbridge::{Bridge, BridgeConfig, Value};
//!
//! let mut bridge = Bridge::boot(&BridgeConfig::default()).unwrap();
//! let state = bridge.call("ESP32.getState", &[]).unwrap();
//! let heap = bridge.context().get_property(&state, "heapSize").unwrap();
//! assert!(heap.as_number().unwrap() > 0.0);
//!
//! let start = bridge
//!     .call("ESP32.getNativeFunction", &[Value::from("startMongoose")])
//!     .unwrap();
//! assert!(bridge.context().is_function(&start));
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │   Bridge::boot   │  config, host data
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │ ModuleRegistrar  │  console → ESP32 → MONGOOSE → host modules
//! └────────┬─────────┘
//!          │
//!     ┌────┴─────┬──────────────┐
//!     ▼          ▼              ▼
//! ┌───────┐  ┌──────────┐  ┌──────────┐
//! │ Level │  │Capability│  │ Debugger │  accept on a worker thread
//! │Mapper │  │ Registry │  │ Session  │
//! └───────┘  └──────────┘  └──────────┘
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod bridge;
pub mod config;
pub mod debugger;
pub mod engine;
pub mod modules;
pub mod net;
pub mod runtime;

// Re-export commonly used types
pub use bridge::{Bridge, BridgeError};
pub use config::{BridgeConfig, ConfigError, ConfigResult};
pub use debugger::{AttachOutcome, DebugError, DebugSession, SessionState, SocketTransport};
pub use engine::{
    Arity, Context, DebugTransport, EngineError, EngineResult, NativeFn, Return, Value, ValueType,
};
pub use runtime::{
    CapabilityEntry, ModuleRegistrar, ModuleDef, RegistrationError, ResetSignal, CAPABILITIES,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
