//! Tracing mark-and-sweep garbage collector: non-moving, non-generational.
//!
//! An object is reachable iff it is in the root set, reachable from a marked
//! object's reference fields, or held by a [`TempHandle`]. Struct layouts are
//! registered once per loaded module and give the marker the field indices
//! of each struct's reference fields; scalar arrays are opaque payloads the
//! marker does not walk into.

use crate::error::{Error, Result};
use crate::ir::StructLayout;
use crate::vm::value::{Ref, Value};
use std::collections::HashMap;

/// One heap-allocated object.
#[derive(Debug, Clone)]
pub enum HeapObject {
    Str(String),
    /// `elem_is_ref` says whether `elements` holds traced references (so the
    /// marker should walk them) or opaque scalars.
    Array { elem_is_ref: bool, elements: Vec<Value> },
    Struct { layout: String, fields: Vec<Value> },
}

struct Slot {
    object: HeapObject,
    marked: bool,
}

/// The managed heap. Owns every `Str`/`Array`/`Struct` instance and the
/// struct layouts needed to trace them.
#[derive(Default)]
pub struct Heap {
    slots: Vec<Option<Slot>>,
    free: Vec<u32>,
    layouts: HashMap<String, StructLayout>,
    /// Objects pinned by a short-lived [`TempHandle`]: roots independent of
    /// any stack or local-variable cell, per the "temporary hold" contract
    /// for values a native call or an in-progress array/string build returns.
    temporaries: HashMap<u32, u32>,
    temp_counter: u32,
}

/// A pin keeping an object alive across calls that don't yet have anywhere
/// else to root it (e.g. a native function assembling a result). Dropping it
/// does not itself free the object — only the next [`Heap::collect`] does,
/// and only if nothing else still roots the object by then.
pub struct TempHandle {
    id: u32,
    target: Ref,
}

impl TempHandle {
    pub fn target(&self) -> Ref {
        self.target
    }
}

impl Heap {
    pub fn new() -> Self {
        Heap::default()
    }

    pub fn register_layout(&mut self, layout: StructLayout) {
        self.layouts.insert(layout.name.clone(), layout);
    }

    pub fn layout(&self, name: &str) -> Option<&StructLayout> {
        self.layouts.get(name)
    }

    fn insert(&mut self, object: HeapObject) -> Ref {
        let slot = Slot {
            object,
            marked: false,
        };
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = Some(slot);
            idx
        } else {
            self.slots.push(Some(slot));
            (self.slots.len() - 1) as u32
        }
    }

    pub fn alloc_string(&mut self, s: String) -> Ref {
        self.insert(HeapObject::Str(s))
    }

    pub fn alloc_array(&mut self, elem_is_ref: bool, elements: Vec<Value>) -> Ref {
        self.insert(HeapObject::Array {
            elem_is_ref,
            elements,
        })
    }

    pub fn alloc_struct(&mut self, layout: String, fields: Vec<Value>) -> Ref {
        self.insert(HeapObject::Struct { layout, fields })
    }

    pub fn get(&self, r: Ref) -> Result<&HeapObject> {
        self.slots
            .get(r as usize)
            .and_then(|s| s.as_ref())
            .map(|s| &s.object)
            .ok_or_else(|| Error::GcInvariantViolation {
                reason: format!("reference #{r} does not name a live object"),
            })
    }

    pub fn get_mut(&mut self, r: Ref) -> Result<&mut HeapObject> {
        self.slots
            .get_mut(r as usize)
            .and_then(|s| s.as_mut())
            .map(|s| &mut s.object)
            .ok_or_else(|| Error::GcInvariantViolation {
                reason: format!("reference #{r} does not name a live object"),
            })
    }

    /// Pin `target` alive until the handle is released or a collection runs
    /// with no other root keeping it reachable.
    pub fn hold(&mut self, target: Ref) -> TempHandle {
        self.temp_counter += 1;
        let id = self.temp_counter;
        self.temporaries.insert(id, target);
        TempHandle { id, target }
    }

    pub fn release(&mut self, handle: TempHandle) {
        self.temporaries.remove(&handle.id);
    }

    /// How many objects are currently live. Used to assert a clean exit.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Mark every object reachable from `roots`, then free everything left
    /// unmarked. Returns the number of objects freed.
    pub fn collect(&mut self, roots: impl IntoIterator<Item = Ref>) -> usize {
        let mut worklist: Vec<Ref> = roots.into_iter().collect();
        worklist.extend(self.temporaries.values().copied());

        while let Some(r) = worklist.pop() {
            let Some(slot) = self.slots.get_mut(r as usize).and_then(|s| s.as_mut()) else {
                continue;
            };
            if slot.marked {
                continue;
            }
            slot.marked = true;
            match &slot.object {
                HeapObject::Str(_) => {}
                HeapObject::Array {
                    elem_is_ref: true,
                    elements,
                } => {
                    worklist.extend(elements.iter().filter_map(|v| v.as_ref()));
                }
                HeapObject::Array { .. } => {}
                HeapObject::Struct { layout, fields } => {
                    if let Some(layout) = self.layouts.get(layout) {
                        for idx in layout.reference_field_indices() {
                            if let Some(r) = fields.get(idx).and_then(|v| v.as_ref()) {
                                worklist.push(r);
                            }
                        }
                    }
                }
            }
        }

        let mut freed = 0;
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            match slot {
                Some(s) if s.marked => s.marked = false,
                Some(_) => {
                    *slot = None;
                    self.free.push(idx as u32);
                    freed += 1;
                }
                None => {}
            }
        }
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type;

    #[test]
    fn unreachable_strings_are_swept() {
        let mut heap = Heap::new();
        let kept = heap.alloc_string("kept".to_string());
        heap.alloc_string("discarded".to_string());
        let freed = heap.collect([kept]);
        assert_eq!(freed, 1);
        assert_eq!(heap.live_count(), 1);
    }

    #[test]
    fn struct_reference_fields_keep_their_target_alive() {
        let mut heap = Heap::new();
        heap.register_layout(StructLayout {
            name: "Node".to_string(),
            fields: vec![("next".to_string(), Type::Struct("Node".to_string()))],
        });
        let tail = heap.alloc_struct("Node".to_string(), vec![Value::Null]);
        let head = heap.alloc_struct("Node".to_string(), vec![Value::Ref(tail)]);
        let freed = heap.collect([head]);
        assert_eq!(freed, 0);
        assert_eq!(heap.live_count(), 2);
    }

    #[test]
    fn a_temp_hold_survives_a_collection_with_no_other_root() {
        let mut heap = Heap::new();
        let r = heap.alloc_string("pinned".to_string());
        let handle = heap.hold(r);
        let freed = heap.collect([]);
        assert_eq!(freed, 0);
        heap.release(handle);
        let freed = heap.collect([]);
        assert_eq!(freed, 1);
    }
}
