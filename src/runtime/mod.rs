//! Runtime module
//!
//! Host-side plumbing shared by the script-visible modules: the capability
//! table, module registration, severity names, the tag-filtered logger and
//! the reset flag.

pub mod capabilities;
pub mod levels;
pub mod logging;
pub mod registrar;
pub mod state;

pub use capabilities::{lookup as lookup_capability, CapabilityEntry, CAPABILITIES};
pub use levels::{LevelMapping, LEVELS};
pub use logging::{LevelTable, TagLogger, ALL_TAGS};
pub use registrar::{
    put_function, ModuleRegistrar, ModuleDef, Registered, RegistrationError, StackScope,
    BUILTIN_MODULES,
};
pub use state::ResetSignal;
