//! Module Registrar
//!
//! Installs modules into a context in a fixed order, once. Every installer
//! runs inside a [`StackScope`], which records the stack depth on entry:
//!
//! - an installer that returns normally with a different depth is a defect
//!   and panics, since every later value-stack access would be off;
//! - an installer that fails or panics has its leftovers removed before the
//!   error propagates.
//!
//! Registration is all-or-nothing: the first installer failure aborts the
//! whole sequence and the caller is expected to treat it as fatal.

use std::ops::{Deref, DerefMut};

use log::{debug, info};
use thiserror::Error;

use crate::engine::{Arity, Context, EngineError, EngineResult, NativeFn};
use crate::modules;

const TAG: &str = "modules";

/// Module installer signature.
pub type Installer = fn(ctx: &mut Context) -> EngineResult<()>;

/// A named installer.
#[derive(Debug, Clone, Copy)]
pub struct ModuleDef {
    pub name: &'static str,
    pub install: Installer,
}

impl ModuleDef {
    pub const fn new(name: &'static str, install: Installer) -> Self {
        Self { name, install }
    }
}

/// Registration errors.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("modules are already registered in this context")]
    AlreadyRegistered,

    #[error("module '{module}' failed to install: {source}")]
    Install {
        module: &'static str,
        #[source]
        source: EngineError,
    },
}

/// Marker left in the context's host data once registration succeeded.
#[derive(Debug, Clone)]
pub struct Registered {
    pub modules: Vec<&'static str>,
}

/// Stack-depth guard around one installer.
pub struct StackScope<'a> {
    ctx: &'a mut Context,
    base: usize,
    module: &'static str,
}

impl<'a> StackScope<'a> {
    pub fn enter(ctx: &'a mut Context, module: &'static str) -> Self {
        let base = ctx.get_top();
        Self { ctx, base, module }
    }

    pub fn base(&self) -> usize {
        self.base
    }

    /// Check the depth on a normal exit.
    ///
    /// # Panics
    ///
    /// Panics when the installer left the stack unbalanced.
    pub fn leave(self) {
        let top = self.ctx.get_top();
        assert_eq!(
            top, self.base,
            "module '{}' left the value stack unbalanced ({} -> {})",
            self.module, self.base, top
        );
    }

    /// Check that nothing below the base was consumed. Leftovers above it
    /// are trimmed on drop, values popped from below cannot be restored.
    ///
    /// # Panics
    ///
    /// Panics when the stack is shallower than on entry.
    pub fn check_floor(&self) {
        let top = self.ctx.get_top();
        assert!(
            top >= self.base,
            "module '{}' left the value stack unbalanced ({} -> {})",
            self.module, self.base, top
        );
    }
}

impl Deref for StackScope<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        self.ctx
    }
}

impl DerefMut for StackScope<'_> {
    fn deref_mut(&mut self) -> &mut Context {
        self.ctx
    }
}

impl Drop for StackScope<'_> {
    fn drop(&mut self) {
        // Only shrinks; under-popping is caught by leave() or check_floor()
        if self.ctx.get_top() > self.base {
            let _ = self.ctx.set_top(self.base);
        }
    }
}

/// Builtin modules in install order.
pub const BUILTIN_MODULES: &[ModuleDef] = &[
    ModuleDef::new("console", modules::console::install),
    ModuleDef::new("ESP32", modules::esp32::install),
    ModuleDef::new("MONGOOSE", modules::web::install),
];

pub struct ModuleRegistrar {
    modules: Vec<ModuleDef>,
}

impl ModuleRegistrar {
    /// A registrar holding the builtin modules.
    pub fn new() -> Self {
        Self {
            modules: BUILTIN_MODULES.to_vec(),
        }
    }

    /// A registrar with no modules at all.
    pub fn empty() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    /// Append a module; it installs after every module added before it.
    pub fn with_module(mut self, module: ModuleDef) -> Self {
        self.modules.push(module);
        self
    }

    pub fn modules(&self) -> &[ModuleDef] {
        &self.modules
    }

    /// Run every installer in order.
    pub fn register(&self, ctx: &mut Context) -> Result<(), RegistrationError> {
        if ctx.host_data::<Registered>().is_some() {
            return Err(RegistrationError::AlreadyRegistered);
        }

        let mut scope = StackScope::enter(ctx, "registration");
        for module in &self.modules {
            install_one(&mut scope, module)?;
        }
        scope.leave();

        let names = self.modules.iter().map(|m| m.name).collect::<Vec<_>>();
        info!(target: TAG, "registered {} modules: {}", names.len(), names.join(", "));
        ctx.set_host_data(Registered { modules: names });
        Ok(())
    }
}

impl Default for ModuleRegistrar {
    fn default() -> Self {
        Self::new()
    }
}

fn install_one(ctx: &mut Context, module: &ModuleDef) -> Result<(), RegistrationError> {
    debug!(target: TAG, "installing module {}", module.name);
    let mut scope = StackScope::enter(ctx, module.name);
    let installed = (module.install)(&mut scope);
    scope.check_floor();
    installed.map_err(|source| RegistrationError::Install {
        module: module.name,
        source,
    })?;
    scope.leave();
    Ok(())
}

/// Bind `func` and store it as `name` on the object at the top of the stack.
pub fn put_function(ctx: &mut Context, name: &str, func: NativeFn, arity: Arity) -> EngineResult<()> {
    ctx.push_native_function(func, arity)?;
    ctx.put_prop_string(-2, name)
}
