//! Native-function trampolines.
//!
//! A function declared `#[native(lib="...")]` has no emitted body; the
//! interpreter's `invoke` looks it up here by `(lib, name)` instead of
//! jumping into the code segment. A native receives the operand stack and
//! the heap directly: it pops its own arguments (the interpreter trusts the
//! declared signature to say how many) and pushes its own return value,
//! exactly as a bytecode callee would.

use crate::error::{Error, Result};
use crate::vm::heap::Heap;
use crate::vm::value::Value;

pub type NativeFn = fn(&mut Heap, &mut Vec<Value>) -> Result<()>;

/// Lookup table of native functions, keyed by the `lib` name carried on the
/// `#[native(lib=...)]` directive plus the function's own name.
#[derive(Default)]
pub struct NativeRegistry {
    fns: std::collections::HashMap<(String, String), NativeFn>,
}

impl NativeRegistry {
    /// A registry seeded with the bundled `std` and `math` libraries.
    pub fn with_stdlib() -> Self {
        let mut reg = NativeRegistry::default();
        reg.register("std", "print", std_print);
        reg.register("std", "println", std_println);
        reg.register("std", "str_len", std_str_len);
        reg.register("math", "sqrt", math_sqrt);
        reg.register("math", "abs_i32", math_abs_i32);
        reg.register("math", "abs_f32", math_abs_f32);
        reg.register("math", "pow_f32", math_pow_f32);
        reg
    }

    pub fn register(&mut self, lib: &str, name: &str, f: NativeFn) {
        self.fns.insert((lib.to_string(), name.to_string()), f);
    }

    pub fn call(&self, lib: &str, name: &str, heap: &mut Heap, stack: &mut Vec<Value>) -> Result<()> {
        let f = self
            .fns
            .get(&(lib.to_string(), name.to_string()))
            .ok_or_else(|| Error::MissingNativeFunction {
                name: format!("{lib}::{name}"),
            })?;
        f(heap, stack)
    }
}

fn pop(stack: &mut Vec<Value>) -> Result<Value> {
    stack.pop().ok_or(Error::StackOverflow {
        direction: "underflow",
    })
}

fn std_print(heap: &mut Heap, stack: &mut Vec<Value>) -> Result<()> {
    let arg = pop(stack)?;
    let text = match arg {
        Value::Ref(r) => match heap.get(r)? {
            crate::vm::heap::HeapObject::Str(s) => s.clone(),
            _ => return Err(Error::fault("std::print expects a string argument")),
        },
        _ => return Err(Error::fault("std::print expects a string argument")),
    };
    print!("{text}");
    Ok(())
}

fn std_println(heap: &mut Heap, stack: &mut Vec<Value>) -> Result<()> {
    std_print(heap, stack)?;
    println!();
    Ok(())
}

fn std_str_len(heap: &mut Heap, stack: &mut Vec<Value>) -> Result<()> {
    let arg = pop(stack)?;
    let len = match arg {
        Value::Ref(r) => match heap.get(r)? {
            crate::vm::heap::HeapObject::Str(s) => s.chars().count() as i32,
            _ => return Err(Error::fault("std::str_len expects a string argument")),
        },
        _ => return Err(Error::fault("std::str_len expects a string argument")),
    };
    stack.push(Value::I32(len));
    Ok(())
}

fn math_sqrt(_heap: &mut Heap, stack: &mut Vec<Value>) -> Result<()> {
    let v = pop(stack)?
        .as_f32()
        .ok_or_else(|| Error::fault("math::sqrt expects an f32 argument"))?;
    stack.push(Value::F32(v.sqrt()));
    Ok(())
}

fn math_abs_i32(_heap: &mut Heap, stack: &mut Vec<Value>) -> Result<()> {
    let v = pop(stack)?
        .as_i32()
        .ok_or_else(|| Error::fault("math::abs_i32 expects an i32 argument"))?;
    stack.push(Value::I32(v.wrapping_abs()));
    Ok(())
}

fn math_abs_f32(_heap: &mut Heap, stack: &mut Vec<Value>) -> Result<()> {
    let v = pop(stack)?
        .as_f32()
        .ok_or_else(|| Error::fault("math::abs_f32 expects an f32 argument"))?;
    stack.push(Value::F32(v.abs()));
    Ok(())
}

fn math_pow_f32(_heap: &mut Heap, stack: &mut Vec<Value>) -> Result<()> {
    let exp = pop(stack)?
        .as_f32()
        .ok_or_else(|| Error::fault("math::pow_f32 expects an f32 exponent"))?;
    let base = pop(stack)?
        .as_f32()
        .ok_or_else(|| Error::fault("math::pow_f32 expects an f32 base"))?;
    stack.push(Value::F32(base.powf(exp)));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn math_sqrt_is_registered() {
        let reg = NativeRegistry::with_stdlib();
        let mut heap = Heap::new();
        let mut stack = vec![Value::F32(9.0)];
        reg.call("math", "sqrt", &mut heap, &mut stack).unwrap();
        assert_eq!(stack.pop(), Some(Value::F32(3.0)));
    }

    #[test]
    fn unknown_native_is_an_error() {
        let reg = NativeRegistry::with_stdlib();
        let mut heap = Heap::new();
        let mut stack = Vec::new();
        let err = reg.call("std", "nope", &mut heap, &mut stack).unwrap_err();
        assert!(matches!(err, Error::MissingNativeFunction { .. }));
    }
}
