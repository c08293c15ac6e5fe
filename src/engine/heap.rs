//! Object heap
//!
//! A slot arena with a fixed byte budget and a mark-and-sweep collector.
//! Byte accounting is an estimate: a fixed overhead per object and per
//! property plus the bytes of keys and string values stored in properties.

use super::error::{EngineError, EngineResult};
use super::value::{Arity, JsString, NativeFn, ObjectRef, Value};

/// Accounted size of an empty object.
pub const OBJECT_OVERHEAD: usize = 48;

/// Accounted size of one property slot, excluding key and value bytes.
pub const PROPERTY_OVERHEAD: usize = 24;

/// What an object is, beyond its properties.
#[derive(Clone, Copy)]
pub(crate) enum ObjectKind {
    Plain,
    Native { func: NativeFn, arity: Arity },
}

pub(crate) struct HeapObject {
    pub(crate) kind: ObjectKind,
    /// Insertion-ordered property list
    pub(crate) properties: Vec<(JsString, Value)>,
    marked: bool,
}

impl HeapObject {
    fn new(kind: ObjectKind) -> Self {
        Self {
            kind,
            properties: Vec::new(),
            marked: false,
        }
    }

    fn footprint(&self) -> usize {
        OBJECT_OVERHEAD
            + self
                .properties
                .iter()
                .map(|(k, v)| PROPERTY_OVERHEAD + k.len() + v.heap_bytes())
                .sum::<usize>()
    }

    pub(crate) fn get(&self, key: &[u8]) -> Option<&Value> {
        self.properties
            .iter()
            .find(|(k, _)| k.as_bytes() == key)
            .map(|(_, v)| v)
    }
}

struct Slot {
    generation: u32,
    object: Option<HeapObject>,
}

pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    budget: usize,
    used: usize,
}

impl Heap {
    pub fn new(budget: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            budget,
            used: 0,
        }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn free_bytes(&self) -> usize {
        self.budget.saturating_sub(self.used)
    }

    pub fn live_objects(&self) -> usize {
        self.slots.iter().filter(|s| s.object.is_some()).count()
    }

    fn reserve(&self, extra: usize) -> EngineResult<()> {
        if self.used + extra > self.budget {
            return Err(EngineError::OutOfMemory {
                requested: extra,
                available: self.free_bytes(),
            });
        }
        Ok(())
    }

    pub(crate) fn alloc(&mut self, kind: ObjectKind) -> EngineResult<ObjectRef> {
        self.reserve(OBJECT_OVERHEAD)?;
        let object = HeapObject::new(kind);
        self.used += object.footprint();

        let r = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.object = Some(object);
                ObjectRef {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    object: Some(object),
                });
                ObjectRef {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        };
        Ok(r)
    }

    pub(crate) fn get(&self, r: ObjectRef) -> EngineResult<&HeapObject> {
        self.slots
            .get(r.index as usize)
            .filter(|s| s.generation == r.generation)
            .and_then(|s| s.object.as_ref())
            .ok_or(EngineError::StaleReference)
    }

    fn get_mut(&mut self, r: ObjectRef) -> EngineResult<&mut HeapObject> {
        self.slots
            .get_mut(r.index as usize)
            .filter(|s| s.generation == r.generation)
            .and_then(|s| s.object.as_mut())
            .ok_or(EngineError::StaleReference)
    }

    pub(crate) fn native(&self, r: ObjectRef) -> EngineResult<Option<(NativeFn, Arity)>> {
        Ok(match self.get(r)?.kind {
            ObjectKind::Native { func, arity } => Some((func, arity)),
            ObjectKind::Plain => None,
        })
    }

    /// Set or replace a property, charging the size change against the budget.
    pub(crate) fn put(&mut self, r: ObjectRef, key: JsString, value: Value) -> EngineResult<()> {
        let existing = self
            .get(r)?
            .properties
            .iter()
            .position(|(k, _)| *k == key);

        let (old_bytes, new_bytes) = match existing {
            Some(pos) => (
                self.get(r)?.properties[pos].1.heap_bytes(),
                value.heap_bytes(),
            ),
            None => (0, PROPERTY_OVERHEAD + key.len() + value.heap_bytes()),
        };
        if new_bytes > old_bytes {
            self.reserve(new_bytes - old_bytes)?;
        }

        let object = self.get_mut(r)?;
        match existing {
            Some(pos) => object.properties[pos].1 = value,
            None => object.properties.push((key, value)),
        }
        self.used = self.used + new_bytes - old_bytes;
        Ok(())
    }

    /// Mark everything reachable from `roots`, then free the rest.
    /// Returns the number of objects freed.
    pub(crate) fn collect<'a>(&mut self, roots: impl Iterator<Item = &'a Value>) -> usize {
        let mut worklist: Vec<ObjectRef> = roots.filter_map(Value::as_object).collect();

        while let Some(r) = worklist.pop() {
            let Ok(object) = self.get_mut(r) else {
                continue;
            };
            if object.marked {
                continue;
            }
            object.marked = true;
            worklist.extend(object.properties.iter().filter_map(|(_, v)| v.as_object()));
        }

        let mut freed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let Some(object) = slot.object.as_mut() else {
                continue;
            };
            if object.marked {
                object.marked = false;
                continue;
            }
            self.used -= object.footprint();
            slot.object = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(index as u32);
            freed += 1;
        }
        freed
    }
}
