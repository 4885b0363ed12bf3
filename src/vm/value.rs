//! Runtime value representation: the operand stack and local-variable
//! frames are homogeneous `Vec<Value>`, with category-1 (`i32`), category-2
//! (`f32`, stored widened rather than split across two stack cells for
//! simplicity) and reference cells all the same Rust-level size. The
//! interpreter tells them apart using the static type each opcode carries,
//! never by inspecting the value itself.

use std::fmt;

/// A heap reference: an index into [`super::heap::Heap`]'s object table.
pub type Ref = u32;

/// One operand-stack or local-variable cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    I32(i32),
    F32(f32),
    /// `@null`: a reference cell with no target.
    Null,
    /// A live heap reference (string, array or struct instance).
    Ref(Ref),
}

impl Value {
    pub fn as_i32(self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f32(self) -> Option<f32> {
        match self {
            Value::F32(v) => Some(v),
            _ => None,
        }
    }

    /// The reference this cell holds, if any. `Null` is a valid reference
    /// value (it just never resolves to a heap object).
    pub fn as_ref(self) -> Option<Ref> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    pub fn truthy(self) -> bool {
        match self {
            Value::I32(v) => v != 0,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I32(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::Null => write!(f, "null"),
            Value::Ref(r) => write!(f, "#{r}"),
        }
    }
}
