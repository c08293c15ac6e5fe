//! Engine context
//!
//! A single-threaded, stack-based host API. Native code builds values on the
//! value stack and moves them into objects; script code (or a host) calls
//! functions through [`Context::call`].
//!
//! ```text
//! push_global_object       [ global ]
//! push_object              [ global obj ]
//! push_native_function     [ global obj fn ]
//! put_prop_string(-2, "f") [ global obj ]        obj.f = fn
//! put_prop_string(-2, "O") [ global ]            global.O = obj
//! pop                      [ ]
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::io;

use log::{debug, warn};

use super::debug::DebugTransport;
use super::error::{EngineError, EngineResult};
use super::heap::{Heap, ObjectKind};
use super::value::{format_number, Arity, JsString, NativeFn, ObjectRef, Return, Value, ValueType};

/// Maximum number of values on the stack across all frames.
pub const MAX_STACK: usize = 10_000;

/// Maximum nesting of native calls.
pub const MAX_CALL_DEPTH: usize = 64;

/// Default heap budget in bytes.
pub const DEFAULT_HEAP_SIZE: usize = 128 * 1024;

const TAG: &str = "engine";

pub struct Context {
    heap: Heap,
    global: ObjectRef,
    stack: Vec<Value>,
    /// Absolute stack position of the current frame's index 0
    frame_base: usize,
    call_depth: usize,
    debugger: Option<Box<dyn DebugTransport>>,
    host_data: HashMap<TypeId, Box<dyn Any>>,
}

impl Context {
    /// Create a context whose heap may hold `heap_size` accounted bytes.
    pub fn new(heap_size: usize) -> EngineResult<Self> {
        let mut heap = Heap::new(heap_size);
        let global = heap.alloc(ObjectKind::Plain)?;
        Ok(Self {
            heap,
            global,
            stack: Vec::with_capacity(64),
            frame_base: 0,
            call_depth: 0,
            debugger: None,
            host_data: HashMap::new(),
        })
    }

    // =========================================================================
    // Heap
    // =========================================================================

    pub fn heap_size(&self) -> usize {
        self.heap.budget()
    }

    pub fn heap_used(&self) -> usize {
        self.heap.used()
    }

    /// Bytes still available to new objects.
    pub fn heap_free(&self) -> usize {
        self.heap.free_bytes()
    }

    pub fn live_objects(&self) -> usize {
        self.heap.live_objects()
    }

    /// Run a full mark-and-sweep pass. Returns once the pass is complete.
    pub fn gc(&mut self) -> usize {
        let global = Value::Object(self.global);
        let freed = self
            .heap
            .collect(self.stack.iter().chain(std::iter::once(&global)));
        debug!(target: TAG, "gc freed {} objects, {} bytes free", freed, self.heap_free());
        freed
    }

    fn alloc(&mut self, kind: ObjectKind) -> EngineResult<ObjectRef> {
        match self.heap.alloc(kind) {
            Err(EngineError::OutOfMemory { .. }) => {
                self.gc();
                self.heap.alloc(kind)
            }
            other => other,
        }
    }

    fn put(&mut self, obj: ObjectRef, key: JsString, value: Value) -> EngineResult<()> {
        match self.heap.put(obj, key.clone(), value.clone()) {
            Err(EngineError::OutOfMemory { .. }) => {
                // The value is still on the stack, so it survives the pass
                self.gc();
                self.heap.put(obj, key, value)
            }
            other => other,
        }
    }

    // =========================================================================
    // Stack
    // =========================================================================

    /// Number of values in the current frame.
    pub fn get_top(&self) -> usize {
        self.stack.len() - self.frame_base
    }

    /// Grow the frame with `undefined` or shrink it to exactly `top` values.
    pub fn set_top(&mut self, top: usize) -> EngineResult<()> {
        let target = self.frame_base + top;
        if target > MAX_STACK {
            return Err(EngineError::StackOverflow(MAX_STACK));
        }
        self.stack.resize(target, Value::Undefined);
        Ok(())
    }

    fn abs_index(&self, index: isize) -> EngineResult<usize> {
        let top = self.get_top();
        let rel = if index < 0 {
            top as isize + index
        } else {
            index
        };
        if rel < 0 || rel as usize >= top {
            return Err(EngineError::InvalidIndex { index, top });
        }
        Ok(self.frame_base + rel as usize)
    }

    fn value_at(&self, index: isize) -> Option<&Value> {
        self.abs_index(index).ok().map(|i| &self.stack[i])
    }

    /// Push a value. Object handles must refer to live objects.
    pub fn push_value(&mut self, value: Value) -> EngineResult<()> {
        if self.stack.len() >= MAX_STACK {
            return Err(EngineError::StackOverflow(MAX_STACK));
        }
        if let Value::Object(r) = &value {
            self.heap.get(*r)?;
        }
        self.stack.push(value);
        Ok(())
    }

    pub fn push_undefined(&mut self) -> EngineResult<()> {
        self.push_value(Value::Undefined)
    }

    pub fn push_null(&mut self) -> EngineResult<()> {
        self.push_value(Value::Null)
    }

    pub fn push_boolean(&mut self, b: bool) -> EngineResult<()> {
        self.push_value(Value::Boolean(b))
    }

    pub fn push_number(&mut self, n: f64) -> EngineResult<()> {
        self.push_value(Value::Number(n))
    }

    pub fn push_string(&mut self, s: &str) -> EngineResult<()> {
        self.push_value(Value::from(s))
    }

    /// Push a string holding exactly `bytes`, which need not be UTF-8.
    ///
    /// Buffers larger than the free heap are refused; strings are only
    /// charged to the heap once stored in an object.
    pub fn push_lstring(&mut self, bytes: &[u8]) -> EngineResult<()> {
        if bytes.len() > self.heap_free() {
            self.gc();
            if bytes.len() > self.heap_free() {
                return Err(EngineError::OutOfMemory {
                    requested: bytes.len(),
                    available: self.heap_free(),
                });
            }
        }
        self.push_value(Value::String(JsString::from_bytes(bytes)))
    }

    pub fn push_global_object(&mut self) -> EngineResult<()> {
        self.push_value(Value::Object(self.global))
    }

    /// Push a new empty object and return its stack index.
    pub fn push_object(&mut self) -> EngineResult<usize> {
        let r = self.alloc(ObjectKind::Plain)?;
        self.push_value(Value::Object(r))?;
        Ok(self.get_top() - 1)
    }

    pub fn push_native_function(&mut self, func: NativeFn, arity: Arity) -> EngineResult<usize> {
        let r = self.alloc(ObjectKind::Native { func, arity })?;
        self.push_value(Value::Object(r))?;
        Ok(self.get_top() - 1)
    }

    /// Push a copy of the value at `index`.
    pub fn dup(&mut self, index: isize) -> EngineResult<()> {
        let value = self.stack[self.abs_index(index)?].clone();
        self.push_value(value)
    }

    pub fn pop(&mut self) -> EngineResult<Value> {
        if self.get_top() == 0 {
            return Err(EngineError::InvalidIndex { index: -1, top: 0 });
        }
        Ok(self.stack.pop().unwrap_or_default())
    }

    pub fn pop_n(&mut self, count: usize) -> EngineResult<()> {
        let top = self.get_top();
        if count > top {
            return Err(EngineError::InvalidIndex {
                index: -(count as isize),
                top,
            });
        }
        self.stack.truncate(self.stack.len() - count);
        Ok(())
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn get_type(&self, index: isize) -> ValueType {
        self.value_at(index)
            .map(Value::value_type)
            .unwrap_or(ValueType::None)
    }

    pub fn get_value(&self, index: isize) -> Option<Value> {
        self.value_at(index).cloned()
    }

    pub fn is_string(&self, index: isize) -> bool {
        self.get_type(index) == ValueType::String
    }

    pub fn is_callable(&self, index: isize) -> bool {
        self.value_at(index)
            .map(|v| self.is_function(v))
            .unwrap_or(false)
    }

    /// The string at `index` when it is a string holding valid UTF-8.
    pub fn get_string(&self, index: isize) -> Option<&str> {
        self.value_at(index)
            .and_then(Value::as_js_string)
            .and_then(JsString::as_str)
    }

    /// The raw bytes of the string at `index`.
    pub fn get_lstring(&self, index: isize) -> Option<&[u8]> {
        self.value_at(index)
            .and_then(Value::as_js_string)
            .map(JsString::as_bytes)
    }

    pub fn get_number(&self, index: isize) -> Option<f64> {
        self.value_at(index).and_then(Value::as_number)
    }

    /// Replace the value at `index` with its string conversion.
    pub fn to_string(&mut self, index: isize) -> EngineResult<()> {
        let pos = self.abs_index(index)?;
        let text = self.stringify(&self.stack[pos]);
        self.stack[pos] = Value::from(text.as_str());
        Ok(())
    }

    /// String conversion of any value.
    pub fn stringify(&self, value: &Value) -> String {
        match value {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.to_string_lossy(),
            Value::Object(_) if self.is_function(value) => {
                "function () { [native code] }".to_string()
            }
            Value::Object(_) => "[object Object]".to_string(),
        }
    }

    pub fn is_function(&self, value: &Value) -> bool {
        self.native_arity(value).is_some()
    }

    /// Declared arity of a native function value.
    pub fn native_arity(&self, value: &Value) -> Option<Arity> {
        let r = value.as_object()?;
        self.heap.native(r).ok().flatten().map(|(_, arity)| arity)
    }

    // =========================================================================
    // Properties
    // =========================================================================

    fn object_at(&self, index: isize) -> EngineResult<ObjectRef> {
        let pos = self.abs_index(index)?;
        self.stack[pos]
            .as_object()
            .ok_or_else(|| EngineError::Type(format!("value at {} is not an object", index)))
    }

    /// Pop the top value and store it as `key` on the object at `obj_index`.
    /// The object index is resolved before the pop.
    pub fn put_prop_string(&mut self, obj_index: isize, key: &str) -> EngineResult<()> {
        let obj = self.object_at(obj_index)?;
        let value = self.stack[self.abs_index(-1)?].clone();
        self.put(obj, JsString::from(key), value)?;
        self.stack.pop();
        Ok(())
    }

    /// Push property `key` of the object at `obj_index`, or `undefined`.
    /// Returns whether the property exists.
    pub fn get_prop_string(&mut self, obj_index: isize, key: &str) -> EngineResult<bool> {
        let obj = self.object_at(obj_index)?;
        let found = self.heap.get(obj)?.get(key.as_bytes()).cloned();
        let exists = found.is_some();
        self.push_value(found.unwrap_or_default())?;
        Ok(exists)
    }

    /// Read a property from an object value held outside the stack.
    pub fn get_property(&self, object: &Value, key: &str) -> EngineResult<Value> {
        let r = object
            .as_object()
            .ok_or_else(|| EngineError::Type(format!("cannot read '{}' of non-object", key)))?;
        Ok(self
            .heap
            .get(r)?
            .get(key.as_bytes())
            .cloned()
            .unwrap_or_default())
    }

    /// Property names of an object in insertion order.
    pub fn property_names(&self, object: &Value) -> EngineResult<Vec<String>> {
        let r = object
            .as_object()
            .ok_or_else(|| EngineError::Type("not an object".to_string()))?;
        Ok(self
            .heap
            .get(r)?
            .properties
            .iter()
            .map(|(k, _)| k.to_string_lossy())
            .collect())
    }

    pub fn global_object(&self) -> Value {
        Value::Object(self.global)
    }

    /// Resolve a dotted property path starting at the global object.
    /// Missing segments resolve to `undefined`.
    pub fn lookup_path(&self, path: &str) -> EngineResult<Value> {
        let mut current = self.global_object();
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            if current.as_object().is_none() {
                return Ok(Value::Undefined);
            }
            current = self.get_property(&current, segment)?;
        }
        Ok(current)
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Call the function below the top `nargs` values.
    ///
    /// `[.. func arg1 .. argN]` becomes `[.. result]`. On error the function
    /// and its arguments are removed and nothing is pushed.
    pub fn call(&mut self, nargs: usize) -> EngineResult<()> {
        if nargs + 1 > self.get_top() {
            return Err(EngineError::InvalidIndex {
                index: -(nargs as isize) - 1,
                top: self.get_top(),
            });
        }
        let func_pos = self.stack.len() - nargs - 1;
        let callee = &self.stack[func_pos];
        let (func, arity) = match callee.as_object().map(|r| self.heap.native(r)) {
            Some(Ok(Some(native))) => native,
            Some(Err(e)) => return Err(e),
            _ => {
                let shown = self.stringify(callee);
                self.stack.truncate(func_pos);
                return Err(EngineError::NotCallable(shown));
            }
        };
        if self.call_depth >= MAX_CALL_DEPTH {
            self.stack.truncate(func_pos);
            return Err(EngineError::CallDepthExceeded(MAX_CALL_DEPTH));
        }

        let saved_base = self.frame_base;
        self.frame_base = func_pos + 1;
        if let Some(n) = arity.count() {
            if let Err(e) = self.set_top(n) {
                self.frame_base = saved_base;
                self.stack.truncate(func_pos);
                return Err(e);
            }
        }

        self.call_depth += 1;
        let outcome = func(self);
        self.call_depth -= 1;

        let result = match outcome {
            Ok(Return::Value) if self.get_top() > 0 => self.stack.pop().unwrap_or_default(),
            Ok(_) => Value::Undefined,
            Err(e) => {
                self.stack.truncate(func_pos);
                self.frame_base = saved_base;
                return Err(e);
            }
        };
        self.stack.truncate(func_pos);
        self.frame_base = saved_base;
        self.stack.push(result);
        Ok(())
    }

    /// Call `function` with `args` and return its result.
    pub fn call_value(&mut self, function: &Value, args: &[Value]) -> EngineResult<Value> {
        let base = self.get_top();
        let outcome = (|| {
            self.push_value(function.clone())?;
            for arg in args {
                self.push_value(arg.clone())?;
            }
            self.call(args.len())?;
            self.pop()
        })();
        if outcome.is_err() {
            self.set_top(base)?;
        }
        outcome
    }

    /// Resolve `path` from the global object and call it with `args`.
    pub fn call_path(&mut self, path: &str, args: &[Value]) -> EngineResult<Value> {
        let function = self.lookup_path(path)?;
        if !self.is_function(&function) {
            return Err(EngineError::NotCallable(path.to_string()));
        }
        self.call_value(&function, args)
    }

    // =========================================================================
    // Debugger
    // =========================================================================

    /// Bind the debug protocol to `transport`, replacing any previous one.
    pub fn debugger_attach(&mut self, transport: Box<dyn DebugTransport>) {
        if self.debugger.is_some() {
            warn!(target: TAG, "replacing attached debugger transport");
        }
        self.debugger = Some(transport);
        debug!(target: TAG, "debugger attached");
    }

    pub fn debugger_detach(&mut self) {
        if self.debugger.take().is_some() {
            debug!(target: TAG, "debugger detached");
        }
    }

    pub fn is_debugger_attached(&self) -> bool {
        self.debugger.is_some()
    }

    pub fn debug_transport_mut(&mut self) -> Option<&mut (dyn DebugTransport + 'static)> {
        self.debugger.as_deref_mut()
    }

    fn with_transport<T>(
        &mut self,
        fallback: T,
        op: impl FnOnce(&mut dyn DebugTransport) -> io::Result<T>,
    ) -> T {
        let Some(transport) = self.debugger.as_deref_mut() else {
            return fallback;
        };
        match op(transport) {
            Ok(v) => v,
            Err(e) => {
                debug!(target: TAG, "debug transport failed: {}", e);
                self.debugger_detach();
                fallback
            }
        }
    }

    /// Read from the debug transport. Returns 0 and detaches when the
    /// transport fails or the peer disconnects.
    pub fn debugger_read(&mut self, buf: &mut [u8]) -> usize {
        let wanted = buf.len();
        let n = self.with_transport(0, |t| t.read(buf));
        if n == 0 && wanted > 0 {
            self.debugger_detach();
        }
        n
    }

    /// Write to the debug transport. Returns 0 and detaches on failure.
    pub fn debugger_write(&mut self, buf: &[u8]) -> usize {
        let n = self.with_transport(0, |t| t.write(buf));
        if n == 0 && !buf.is_empty() {
            self.debugger_detach();
        }
        n
    }

    pub fn debugger_peek(&mut self) -> usize {
        self.with_transport(0, |t| t.peek())
    }

    pub fn debugger_read_flush(&mut self) {
        self.with_transport((), |t| {
            t.read_flush();
            Ok(())
        })
    }

    pub fn debugger_write_flush(&mut self) {
        self.with_transport((), |t| t.write_flush())
    }

    // =========================================================================
    // Host data
    // =========================================================================

    /// Store host-side state reachable from native functions. Replaces any
    /// previous value of the same type.
    pub fn set_host_data<T: Any>(&mut self, value: T) {
        self.host_data.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn host_data<T: Any>(&self) -> Option<&T> {
        self.host_data
            .get(&TypeId::of::<T>())
            .and_then(|b| b.downcast_ref())
    }

    pub fn host_data_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.host_data
            .get_mut(&TypeId::of::<T>())
            .and_then(|b| b.downcast_mut())
    }

    pub fn host_data_or_default<T: Any + Default>(&mut self) -> &mut T {
        self.host_data
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(T::default()))
            .downcast_mut()
            .expect("host data keyed by its own TypeId")
    }

    /// Remove and return host data, e.g. to use it alongside `&mut self`.
    pub fn take_host_data<T: Any>(&mut self) -> Option<T> {
        self.host_data
            .remove(&TypeId::of::<T>())
            .and_then(|b| b.downcast().ok())
            .map(|b| *b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context::new(DEFAULT_HEAP_SIZE).unwrap()
    }

    fn native_sum(ctx: &mut Context) -> EngineResult<Return> {
        let total: f64 = (0..ctx.get_top() as isize)
            .filter_map(|i| ctx.get_number(i))
            .sum();
        ctx.push_number(total)?;
        Ok(Return::Value)
    }

    fn native_top(ctx: &mut Context) -> EngineResult<Return> {
        let top = ctx.get_top();
        ctx.push_number(top as f64)?;
        Ok(Return::Value)
    }

    fn native_throw(_ctx: &mut Context) -> EngineResult<Return> {
        Err(EngineError::Type("boom".to_string()))
    }

    #[test]
    fn test_put_and_get_prop() {
        let mut ctx = ctx();
        ctx.push_object().unwrap();
        ctx.push_number(7.0).unwrap();
        ctx.put_prop_string(-2, "seven").unwrap();
        assert_eq!(ctx.get_top(), 1);

        assert!(ctx.get_prop_string(-1, "seven").unwrap());
        assert_eq!(ctx.get_number(-1), Some(7.0));
        assert!(!ctx.get_prop_string(-2, "missing").unwrap());
        assert_eq!(ctx.get_type(-1), ValueType::Undefined);
    }

    #[test]
    fn test_put_prop_on_non_object() {
        let mut ctx = ctx();
        ctx.push_number(1.0).unwrap();
        ctx.push_number(2.0).unwrap();
        assert!(matches!(
            ctx.put_prop_string(-2, "x"),
            Err(EngineError::Type(_))
        ));
        assert_eq!(ctx.get_top(), 2);
    }

    #[test]
    fn test_invalid_index() {
        let ctx = ctx();
        assert_eq!(ctx.get_type(0), ValueType::None);
        assert_eq!(ctx.get_type(-1), ValueType::None);
    }

    #[test]
    fn test_call_fixed_arity_normalizes_args() {
        let mut ctx = ctx();
        let base = ctx.get_top();

        ctx.push_native_function(native_top, Arity::Fixed(2)).unwrap();
        ctx.call(0).unwrap();
        assert_eq!(ctx.get_number(-1), Some(2.0));

        ctx.push_native_function(native_top, Arity::Fixed(1)).unwrap();
        ctx.push_number(1.0).unwrap();
        ctx.push_number(2.0).unwrap();
        ctx.push_number(3.0).unwrap();
        ctx.call(3).unwrap();
        assert_eq!(ctx.get_number(-1), Some(1.0));

        assert_eq!(ctx.get_top(), base + 2);
    }

    #[test]
    fn test_call_variadic() {
        let mut ctx = ctx();
        let sum = {
            ctx.push_native_function(native_sum, Arity::Variadic).unwrap();
            ctx.pop().unwrap()
        };
        let result = ctx
            .call_value(&sum, &[Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)])
            .unwrap();
        assert_eq!(result, Value::Number(6.0));
        assert_eq!(ctx.get_top(), 0);
    }

    #[test]
    fn test_call_error_cleans_stack() {
        let mut ctx = ctx();
        ctx.push_string("keep").unwrap();
        ctx.push_native_function(native_throw, Arity::Fixed(0)).unwrap();
        ctx.push_number(1.0).unwrap();
        assert!(ctx.call(1).is_err());
        assert_eq!(ctx.get_top(), 1);
        assert_eq!(ctx.get_string(-1), Some("keep"));
    }

    #[test]
    fn test_call_not_callable() {
        let mut ctx = ctx();
        ctx.push_object().unwrap();
        assert!(matches!(ctx.call(0), Err(EngineError::NotCallable(_))));
        assert_eq!(ctx.get_top(), 0);
    }

    #[test]
    fn test_to_string_coercion() {
        let mut ctx = ctx();
        ctx.push_number(3.0).unwrap();
        ctx.to_string(-1).unwrap();
        assert_eq!(ctx.get_string(-1), Some("3"));

        ctx.push_object().unwrap();
        ctx.to_string(-1).unwrap();
        assert_eq!(ctx.get_string(-1), Some("[object Object]"));

        ctx.push_undefined().unwrap();
        ctx.to_string(-1).unwrap();
        assert_eq!(ctx.get_string(-1), Some("undefined"));
    }

    #[test]
    fn test_gc_keeps_reachable() {
        let mut ctx = ctx();
        ctx.push_global_object().unwrap();
        ctx.push_object().unwrap();
        ctx.put_prop_string(-2, "kept").unwrap();
        ctx.pop().unwrap();

        ctx.push_object().unwrap();
        ctx.pop().unwrap();

        let before = ctx.heap_used();
        assert_eq!(ctx.gc(), 1);
        assert!(ctx.heap_used() < before);
        assert!(ctx.lookup_path("kept").unwrap().as_object().is_some());
    }

    #[test]
    fn test_alloc_retries_after_gc() {
        let mut ctx = Context::new(crate::engine::heap::OBJECT_OVERHEAD * 3).unwrap();
        for _ in 0..10 {
            ctx.push_object().unwrap();
            ctx.pop().unwrap();
        }
        ctx.push_object().unwrap();
        ctx.push_object().unwrap();
        assert!(matches!(
            ctx.push_object(),
            Err(EngineError::OutOfMemory { .. })
        ));
    }

    #[test]
    fn test_lookup_path() {
        let mut ctx = ctx();
        ctx.push_global_object().unwrap();
        ctx.push_object().unwrap();
        ctx.push_string("leaf").unwrap();
        ctx.put_prop_string(-2, "b").unwrap();
        ctx.put_prop_string(-2, "a").unwrap();
        ctx.pop().unwrap();

        assert_eq!(ctx.lookup_path("a.b").unwrap(), Value::from("leaf"));
        assert_eq!(ctx.lookup_path("a.b.c").unwrap(), Value::Undefined);
        assert_eq!(ctx.lookup_path("missing.x").unwrap(), Value::Undefined);
    }

    #[test]
    fn test_host_data() {
        #[derive(Default)]
        struct Counter(u32);

        let mut ctx = ctx();
        assert!(ctx.host_data::<Counter>().is_none());
        ctx.host_data_or_default::<Counter>().0 += 2;
        assert_eq!(ctx.host_data::<Counter>().map(|c| c.0), Some(2));
        let taken = ctx.take_host_data::<Counter>().unwrap();
        assert_eq!(taken.0, 2);
        assert!(ctx.host_data::<Counter>().is_none());
    }
}
