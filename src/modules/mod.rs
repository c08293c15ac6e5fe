//! Script-visible modules
//!
//! Each module exposes an `install` function that the
//! [`ModuleRegistrar`](crate::runtime::ModuleRegistrar) runs once per
//! context. Installers leave the value stack exactly as they found it.

pub mod console;
pub mod esp32;
pub mod web;

pub use console::ConsoleSink;
pub use web::{Request, WebHub, WebSettings};

/// Log tag shared by the builtin modules.
pub const TAG: &str = "modules";
