//! `ESP32` host control surface
//!
//! | Function | Arity |
//! |----------|-------|
//! | `reset()` | 0 |
//! | `getState()` | 0 |
//! | `getNativeFunction(id)` | 1 |
//! | `debug()` | 0 |
//! | `setLogLevel(tag, level)` | 2 |
//! | `gc()` | 0 |
//! | `loadFile(path)` | 1 |

use std::fs::{self, File};
use std::io::{self, Read};

use log::debug;

use super::TAG;
use crate::debugger::DebugSession;
use crate::engine::{Arity, Context, EngineResult, Return};
use crate::runtime::{capabilities, levels, logging, put_function, ResetSignal};

pub fn install(ctx: &mut Context) -> EngineResult<()> {
    ctx.push_global_object()?;
    ctx.push_object()?;
    put_function(ctx, "reset", reset, Arity::Fixed(0))?;
    put_function(ctx, "getState", get_state, Arity::Fixed(0))?;
    put_function(ctx, "getNativeFunction", get_native_function, Arity::Fixed(1))?;
    put_function(ctx, "debug", debug_attach, Arity::Fixed(0))?;
    put_function(ctx, "setLogLevel", set_log_level, Arity::Fixed(2))?;
    put_function(ctx, "gc", gc, Arity::Fixed(0))?;
    put_function(ctx, "loadFile", load_file, Arity::Fixed(1))?;
    ctx.put_prop_string(-2, "ESP32")?;
    ctx.pop()?;
    Ok(())
}

fn reset(ctx: &mut Context) -> EngineResult<Return> {
    debug!(target: TAG, "reset requested");
    ctx.host_data_or_default::<ResetSignal>().request();
    Ok(Return::Void)
}

fn get_state(ctx: &mut Context) -> EngineResult<Return> {
    let free = ctx.heap_free();
    ctx.push_object()?;
    ctx.push_number(free as f64)?;
    ctx.put_prop_string(-2, "heapSize")?;
    Ok(Return::Value)
}

fn get_native_function(ctx: &mut Context) -> EngineResult<Return> {
    capabilities::push_capability(ctx, 0)?;
    Ok(Return::Value)
}

fn debug_attach(ctx: &mut Context) -> EngineResult<Return> {
    // The session is taken out so the handshake can borrow the context
    let mut session = ctx.take_host_data::<DebugSession>().unwrap_or_default();
    let outcome = session.attach(ctx);
    ctx.set_host_data(session);
    if let Err(e) = outcome {
        debug!(target: TAG, "debugger not attached: {}", e);
    }
    Ok(Return::Void)
}

fn set_log_level(ctx: &mut Context) -> EngineResult<Return> {
    let (Some(tag), Some(name)) = (ctx.get_string(0), ctx.get_string(1)) else {
        return Ok(Return::Void);
    };
    if let Some(level) = levels::resolve(name) {
        logging::set_level(tag, level);
    }
    Ok(Return::Void)
}

fn gc(ctx: &mut Context) -> EngineResult<Return> {
    let freed = ctx.gc();
    debug!(target: TAG, "gc freed {} objects", freed);
    Ok(Return::Void)
}

fn load_file(ctx: &mut Context) -> EngineResult<Return> {
    let Some(path) = ctx.get_string(0).map(str::to_string) else {
        debug!(target: TAG, "loadFile: path is not a string");
        return Ok(Return::Void);
    };
    let contents = match read_file(&path) {
        Ok(contents) => contents,
        Err(e) => {
            debug!(target: TAG, "loadFile: {}: {}", path, e);
            return Ok(Return::Void);
        }
    };
    if let Err(e) = ctx.push_lstring(&contents) {
        debug!(target: TAG, "loadFile: {}: {}", path, e);
        return Ok(Return::Void);
    }
    Ok(Return::Value)
}

/// Read a whole file sized by an up-front stat. A file that shrinks
/// afterwards yields what could be read; growth is not observed.
pub fn read_file(path: &str) -> io::Result<Vec<u8>> {
    let size = usize::try_from(fs::metadata(path)?.len())
        .map_err(|_| io::Error::new(io::ErrorKind::OutOfMemory, "file too large"))?;

    let mut buf = Vec::new();
    buf.try_reserve_exact(size)
        .map_err(|e| io::Error::new(io::ErrorKind::OutOfMemory, e))?;
    buf.resize(size, 0);

    let mut file = File::open(path)?;
    let mut filled = 0;
    while filled < size {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}
