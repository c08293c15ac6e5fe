//! JSON bridging for host tooling
//!
//! Converts `serde_json` values to engine values and back so a host can pass
//! arguments to script-visible functions and print their results.

use serde_json::{Map, Number};

use super::context::Context;
use super::error::EngineResult;
use super::value::{Value, ValueType};

/// Nesting limit when converting engine objects, which may be cyclic.
const MAX_DEPTH: usize = 32;

/// Push `json` onto the stack. Arrays become objects with index keys and a
/// `length` property.
pub fn push_json(ctx: &mut Context, json: &serde_json::Value) -> EngineResult<()> {
    match json {
        serde_json::Value::Null => ctx.push_null(),
        serde_json::Value::Bool(b) => ctx.push_boolean(*b),
        serde_json::Value::Number(n) => ctx.push_number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => ctx.push_string(s),
        serde_json::Value::Array(items) => {
            ctx.push_object()?;
            for (i, item) in items.iter().enumerate() {
                push_json(ctx, item)?;
                ctx.put_prop_string(-2, &i.to_string())?;
            }
            ctx.push_number(items.len() as f64)?;
            ctx.put_prop_string(-2, "length")
        }
        serde_json::Value::Object(fields) => {
            ctx.push_object()?;
            for (key, item) in fields {
                push_json(ctx, item)?;
                ctx.put_prop_string(-2, key)?;
            }
            Ok(())
        }
    }
}

/// Convert `json` to an engine value. Objects are created on the heap and
/// are only kept alive while the caller holds them somewhere reachable.
pub fn from_json(ctx: &mut Context, json: &serde_json::Value) -> EngineResult<Value> {
    push_json(ctx, json)?;
    ctx.pop()
}

/// Convert an engine value to JSON. Functions are rendered as their string
/// conversion; non-finite numbers become `null`.
pub fn to_json(ctx: &Context, value: &Value) -> serde_json::Value {
    to_json_depth(ctx, value, 0)
}

/// Integral values print as JSON integers.
fn number_to_json(n: f64) -> Option<Number> {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Some(Number::from(n as i64))
    } else {
        Number::from_f64(n)
    }
}

fn to_json_depth(ctx: &Context, value: &Value, depth: usize) -> serde_json::Value {
    match value.value_type() {
        ValueType::None | ValueType::Undefined | ValueType::Null => serde_json::Value::Null,
        ValueType::Boolean => serde_json::Value::Bool(value.as_bool().unwrap_or(false)),
        ValueType::Number => value
            .as_number()
            .and_then(number_to_json)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueType::String => serde_json::Value::String(ctx.stringify(value)),
        ValueType::Object if ctx.is_function(value) => {
            serde_json::Value::String(ctx.stringify(value))
        }
        ValueType::Object => {
            if depth >= MAX_DEPTH {
                return serde_json::Value::String("[object Object]".to_string());
            }
            let mut map = Map::new();
            for key in ctx.property_names(value).unwrap_or_default() {
                let field = ctx.get_property(value, &key).unwrap_or_default();
                map.insert(key, to_json_depth(ctx, &field, depth + 1));
            }
            serde_json::Value::Object(map)
        }
    }
}
