//! espb - ESP32 host bridge
//!
//! Main CLI entry point for inspecting and driving the script-visible
//! surface of a bridge context.

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use espbridge::debugger::{DebugSession, SessionState};
use espbridge::engine::json;
use espbridge::runtime::logging;
use espbridge::{Bridge, BridgeConfig, Context, Value, CAPABILITIES};
use std::path::PathBuf;

/// Deepest namespace level printed by `list`.
const LIST_DEPTH: usize = 4;

#[derive(Parser)]
#[command(name = "espb")]
#[command(version)]
#[command(about = "ESP32 host bridge for an embedded script engine", long_about = None)]
struct Cli {
    /// Configuration file (default: espbridge.toml in this or a parent directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the registered native capabilities
    Capabilities,

    /// Call a script-visible function with JSON arguments
    Call {
        /// Dotted path from the global object, e.g. ESP32.getState
        path: String,

        /// Arguments as JSON values; anything that is not JSON is passed as a string
        #[arg(value_name = "JSON_ARGS")]
        args: Vec<String>,
    },

    /// Wait for a remote debugger and serve it until it disconnects
    Debug,

    /// Print the installed namespaces and functions
    List,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => BridgeConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => BridgeConfig::load_from_cwd().context("Failed to load config")?,
    };
    logging::init(&config.logging).context("Failed to install logger")?;

    match cli.command {
        Commands::Capabilities => cmd_capabilities(),
        Commands::Call { path, args } => cmd_call(&config, &path, &args),
        Commands::Debug => cmd_debug(&config),
        Commands::List => cmd_list(&config),
    }
}

fn boot(config: &BridgeConfig) -> Result<Bridge> {
    Bridge::boot(config).context("Bridge startup failed")
}

fn cmd_capabilities() -> Result<()> {
    println!("Native capabilities ({} total):", CAPABILITIES.len());
    for entry in CAPABILITIES {
        println!("  {:<24} arity {}", entry.id, entry.arity);
    }
    Ok(())
}

fn cmd_list(config: &BridgeConfig) -> Result<()> {
    let bridge = boot(config)?;
    let ctx = bridge.context();
    println!("Modules: {}", bridge.modules().join(", "));
    print_tree(ctx, &ctx.global_object(), 1)?;
    Ok(())
}

fn print_tree(ctx: &Context, object: &Value, depth: usize) -> Result<()> {
    let indent = "  ".repeat(depth);
    for name in ctx.property_names(object)? {
        let value = ctx.get_property(object, &name)?;
        if let Some(arity) = ctx.native_arity(&value) {
            println!("{}{}({})", indent, name, arity);
        } else if value.as_object().is_some() {
            println!("{}{}", indent, name);
            if depth < LIST_DEPTH {
                print_tree(ctx, &value, depth + 1)?;
            }
        } else {
            println!("{}{} = {}", indent, name, ctx.stringify(&value));
        }
    }
    Ok(())
}

fn parse_arg(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

fn cmd_call(config: &BridgeConfig, path: &str, raw_args: &[String]) -> Result<()> {
    let mut bridge = boot(config)?;
    let reset = bridge.reset_signal();
    let ctx = bridge.context_mut();

    let function = ctx.lookup_path(path)?;
    if !ctx.is_function(&function) {
        bail!("'{}' is not a function", path);
    }

    // Arguments stay on the stack, so a collection during conversion keeps them
    let base = ctx.get_top();
    ctx.push_value(function)?;
    for raw in raw_args {
        json::push_json(ctx, &parse_arg(raw))
            .with_context(|| format!("Failed to convert argument {}", raw))?;
    }
    let called = ctx.call(raw_args.len());
    if called.is_err() {
        ctx.set_top(base)?;
    }
    called.with_context(|| format!("Call to {} failed", path))?;
    let result = ctx.pop()?;

    let out = json::to_json(ctx, &result);
    println!("{}", serde_json::to_string_pretty(&out)?);

    if reset.take() {
        eprintln!("Reset requested");
    }
    Ok(())
}

fn cmd_debug(config: &BridgeConfig) -> Result<()> {
    let mut bridge = boot(config)?;
    eprintln!("Waiting for debugger on {}", config.debugger.bind_addr);
    bridge.call("ESP32.debug", &[])?;

    let ctx = bridge.context_mut();
    let peer = match ctx.host_data::<DebugSession>() {
        Some(session) if session.state() == SessionState::Attached => session.peer(),
        _ => bail!("Debugger did not attach"),
    };
    if let Some(peer) = peer {
        eprintln!("Debugger attached from {}", peer);
    }

    let mut buf = [0u8; 1024];
    let mut total = 0usize;
    while ctx.is_debugger_attached() {
        let n = ctx.debugger_read(&mut buf);
        if n == 0 {
            break;
        }
        total += n;
        ctx.debugger_read_flush();
    }
    eprintln!("Debugger disconnected after {} bytes", total);
    Ok(())
}
