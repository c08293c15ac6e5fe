//! Capability Registry
//!
//! Native functions that scripts hand to other subsystems by name rather
//! than by value. A script asks for one with `ESP32.getNativeFunction(id)`
//! and receives a fresh function value bound with the registered arity.
//!
//! | Id | Arity | Implemented by |
//! |----|-------|----------------|
//! | `startMongoose` | 1 | [`web::start_mongoose`] |
//! | `serverResponseMongoose` | 3 | [`web::server_response_mongoose`] |

use std::fmt;

use log::debug;

use crate::engine::{Arity, Context, EngineResult, NativeFn};
use crate::modules::web;

const TAG: &str = "modules";

/// A named native function.
#[derive(Clone, Copy)]
pub struct CapabilityEntry {
    pub id: &'static str,
    pub func: NativeFn,
    pub arity: Arity,
}

impl fmt::Debug for CapabilityEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityEntry")
            .field("id", &self.id)
            .field("arity", &self.arity)
            .finish()
    }
}

/// Every capability known to this build. Ids are unique.
pub static CAPABILITIES: &[CapabilityEntry] = &[
    CapabilityEntry {
        id: "startMongoose",
        func: web::start_mongoose,
        arity: Arity::Fixed(1),
    },
    CapabilityEntry {
        id: "serverResponseMongoose",
        func: web::server_response_mongoose,
        arity: Arity::Fixed(3),
    },
];

/// Find a capability by exact id. First match wins.
pub fn lookup(id: &str) -> Option<&'static CapabilityEntry> {
    CAPABILITIES.iter().find(|entry| entry.id == id)
}

/// Resolve the string at stack `index` and push the bound function, or
/// `null` when the value is not a string or names no capability.
pub fn push_capability(ctx: &mut Context, index: isize) -> EngineResult<()> {
    let entry = match ctx.get_string(index) {
        Some(id) => {
            let entry = lookup(id);
            if entry.is_none() {
                debug!(target: TAG, "no native function called {}", id);
            }
            entry
        }
        None => {
            debug!(target: TAG, "no native function id supplied");
            None
        }
    };
    match entry {
        Some(entry) => ctx.push_native_function(entry.func, entry.arity).map(|_| ()),
        None => ctx.push_null(),
    }
}
