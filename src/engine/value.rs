//! Script-visible values
//!
//! Values are small and cheap to clone: strings are reference counted byte
//! buffers and objects are handles into the context heap.

use std::fmt;
use std::rc::Rc;

use super::context::Context;
use super::error::EngineResult;

/// Native function signature.
///
/// The callee sees only its own arguments on the value stack (index 0 is the
/// first argument). It reports whether the top of its frame is the return
/// value.
pub type NativeFn = fn(ctx: &mut Context) -> EngineResult<Return>;

/// What a native function leaves behind for its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Return {
    /// The call evaluates to `undefined`.
    Void,
    /// The call evaluates to the value on top of the callee's frame.
    Value,
}

/// Number of arguments a native function expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Arguments are padded with `undefined` or truncated to exactly this count.
    Fixed(u8),
    /// All arguments are passed through unchanged.
    Variadic,
}

impl Arity {
    pub fn count(&self) -> Option<usize> {
        match self {
            Arity::Fixed(n) => Some(*n as usize),
            Arity::Variadic => None,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Fixed(n) => write!(f, "{}", n),
            Arity::Variadic => write!(f, "varargs"),
        }
    }
}

/// Handle to an object living in the context heap.
///
/// The generation distinguishes a live object from a slot that was reused
/// after a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// Byte-preserving string value.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct JsString(Rc<[u8]>);

impl JsString {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(Rc::from(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The string as UTF-8, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for JsString {
    fn from(s: &str) -> Self {
        Self::from_bytes(s.as_bytes())
    }
}

impl From<String> for JsString {
    fn from(s: String) -> Self {
        Self::from_bytes(s.as_bytes())
    }
}

impl fmt::Debug for JsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_string_lossy())
    }
}

impl fmt::Display for JsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_lossy())
    }
}

/// Type tag of a stack slot, as reported by [`Context::get_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// The index does not refer to a slot in the current frame.
    None,
    Undefined,
    Null,
    Boolean,
    Number,
    String,
    Object,
}

/// A script value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(JsString),
    Object(ObjectRef),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Undefined => ValueType::Undefined,
            Value::Null => ValueType::Null,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Number(_) => ValueType::Number,
            Value::String(_) => ValueType::String,
            Value::Object(_) => ValueType::Object,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_js_string(&self) -> Option<&JsString> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<ObjectRef> {
        match self {
            Value::Object(r) => Some(*r),
            _ => None,
        }
    }

    /// Bytes held by this value that count against the heap budget.
    pub(crate) fn heap_bytes(&self) -> usize {
        match self {
            Value::String(s) => s.len(),
            _ => 0,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(JsString::from(s))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

/// Number to string conversion following the script language's rules for
/// the common cases: integral values print without a fraction, non-finite
/// values print by name.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i128)
    } else {
        format!("{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(42.0), "42");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_js_string_preserves_bytes() {
        let s = JsString::from_bytes(&[0x66, 0x00, 0xff]);
        assert_eq!(s.len(), 3);
        assert_eq!(s.as_bytes(), &[0x66, 0x00, 0xff]);
        assert!(s.as_str().is_none());
    }

    #[test]
    fn test_arity_count() {
        assert_eq!(Arity::Fixed(3).count(), Some(3));
        assert_eq!(Arity::Variadic.count(), None);
        assert_eq!(Arity::Fixed(1).to_string(), "1");
    }
}
