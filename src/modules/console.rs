//! `log` and `console`

use std::io::{self, Write};

use log::debug;

use crate::engine::{Arity, Context, EngineResult, Return};
use crate::runtime::put_function;

/// Tag for script `log()` output.
pub const LOG_TAG: &str = "debug";

/// Destination for `console.log` output, stored in host data.
pub struct ConsoleSink(Box<dyn Write>);

impl ConsoleSink {
    pub fn new(writer: impl Write + 'static) -> Self {
        Self(Box::new(writer))
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.0, "{}", line)?;
        self.0.flush()
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::stdout()
    }
}

/// Install global `log` and `console.log`.
pub fn install(ctx: &mut Context) -> EngineResult<()> {
    ctx.push_global_object()?;
    put_function(ctx, "log", script_log, Arity::Fixed(1))?;

    ctx.push_object()?;
    put_function(ctx, "log", console_log, Arity::Fixed(1))?;
    ctx.put_prop_string(-2, "console")?;

    ctx.pop()?;
    Ok(())
}

fn message(ctx: &mut Context) -> EngineResult<String> {
    if let Some(text) = ctx.get_string(0) {
        return Ok(text.to_string());
    }
    ctx.to_string(0)?;
    Ok(ctx
        .get_lstring(0)
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        .unwrap_or_default())
}

/// `log(message)`
fn script_log(ctx: &mut Context) -> EngineResult<Return> {
    let text = message(ctx)?;
    debug!(target: LOG_TAG, "{}", text);
    Ok(Return::Void)
}

/// `console.log(value)`
fn console_log(ctx: &mut Context) -> EngineResult<Return> {
    let text = message(ctx)?;
    if let Err(e) = ctx.host_data_or_default::<ConsoleSink>().write_line(&text) {
        debug!(target: super::TAG, "console write failed: {}", e);
    }
    Ok(Return::Void)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Value, DEFAULT_HEAP_SIZE};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn setup() -> (Context, Captured) {
        let mut ctx = Context::new(DEFAULT_HEAP_SIZE).unwrap();
        install(&mut ctx).unwrap();
        let captured = Captured::default();
        ctx.set_host_data(ConsoleSink::new(captured.clone()));
        (ctx, captured)
    }

    #[test]
    fn test_install_is_balanced() {
        let (ctx, _) = setup();
        assert_eq!(ctx.get_top(), 0);
        assert!(ctx.is_function(&ctx.lookup_path("log").unwrap()));
        assert!(ctx.is_function(&ctx.lookup_path("console.log").unwrap()));
    }

    #[test]
    fn test_console_log_coerces() {
        let (mut ctx, captured) = setup();
        ctx.call_path("console.log", &[Value::from("hello")]).unwrap();
        ctx.call_path("console.log", &[Value::from(42.0)]).unwrap();
        ctx.call_path("console.log", &[Value::Boolean(false)]).unwrap();
        ctx.call_path("console.log", &[]).unwrap();
        let out = String::from_utf8(captured.0.lock().clone()).unwrap();
        assert_eq!(out, "hello\n42\nfalse\nundefined\n");
    }

    #[test]
    fn test_log_returns_undefined() {
        let (mut ctx, _) = setup();
        let result = ctx.call_path("log", &[Value::from("quiet")]).unwrap();
        assert!(result.is_undefined());
        assert_eq!(ctx.get_top(), 0);
    }
}
