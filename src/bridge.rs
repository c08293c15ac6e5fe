//! Bridge startup
//!
//! Builds a context from a [`BridgeConfig`], seeds the host-side state the
//! builtin modules read, and registers every module.

use log::info;
use thiserror::Error;

use crate::config::BridgeConfig;
use crate::debugger::DebugSession;
use crate::engine::{Context, EngineError, EngineResult, Value};
use crate::modules::{ConsoleSink, WebHub, WebSettings};
use crate::runtime::{ModuleRegistrar, ModuleDef, RegistrationError, ResetSignal};

/// Startup errors. Both are fatal.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to create engine context: {0}")]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),
}

pub struct Bridge {
    ctx: Context,
    reset: ResetSignal,
}

impl Bridge {
    /// Boot with the builtin modules only.
    pub fn boot(config: &BridgeConfig) -> Result<Self, BridgeError> {
        Self::boot_with(config, &[])
    }

    /// Boot with host-supplied modules installed after the builtins.
    pub fn boot_with(config: &BridgeConfig, extra: &[ModuleDef]) -> Result<Self, BridgeError> {
        let mut ctx = Context::new(config.engine.heap_size)?;
        let reset = ResetSignal::new();
        ctx.set_host_data(reset.clone());
        ctx.set_host_data(DebugSession::new(config.debugger.bind_addr.clone()));
        ctx.set_host_data(WebHub::new(WebSettings::from(&config.web)));
        ctx.set_host_data(ConsoleSink::stdout());

        let registrar = extra
            .iter()
            .fold(ModuleRegistrar::new(), |registrar, module| registrar.with_module(*module));
        registrar.register(&mut ctx)?;

        info!(
            target: "bridge",
            "bridge ready: heap {} bytes, {} free",
            ctx.heap_size(),
            ctx.heap_free()
        );
        Ok(Self { ctx, reset })
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    /// A handle a supervisor can poll, from any thread, for `ESP32.reset()`.
    pub fn reset_signal(&self) -> ResetSignal {
        self.reset.clone()
    }

    /// Call a script-visible function by dotted path.
    pub fn call(&mut self, path: &str, args: &[Value]) -> EngineResult<Value> {
        self.ctx.call_path(path, args)
    }

    /// Names of the registered modules in install order.
    pub fn modules(&self) -> Vec<&'static str> {
        self.ctx
            .host_data::<crate::runtime::Registered>()
            .map(|r| r.modules.clone())
            .unwrap_or_default()
    }
}
