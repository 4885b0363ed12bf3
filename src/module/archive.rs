//! Byte-level reader/writer and the VLE integer codec, plus the top-level
//! `.cmod` encode/decode entry points.
//!
//! Every structured type implements [`Encode`]/[`Decode`] rather than the
//! single overloaded `archive&` operator the format was originally
//! specified against: encoding and decoding are separate trait methods,
//! each total over the type it's implemented for.

use crate::error::{Error, Result};
use crate::ir::Constant;
use crate::types::{FunctionSignature, Type};
use super::{CompiledModule, ExportEntry, ExportKind, ImportEntryKind, ImportTableEntry};

const MAGIC: u32 = 0x736c6332; // "slc2", little-endian on the wire via to_le_bytes

/// Append-only byte buffer with VLE integer and length-prefixed-string helpers.
#[derive(Debug, Default)]
pub struct Writer {
    pub buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Writer::default()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Encode `value` as a VLE integer: first byte carries a sign bit, a
    /// continuation bit, and six data bits; subsequent bytes carry a
    /// continuation bit and seven data bits. At most 9 bytes.
    pub fn write_vle(&mut self, value: i64) {
        let sign = value < 0;
        let mut magnitude = value.unsigned_abs();
        let mut data = (magnitude & 0x3f) as u8;
        magnitude >>= 6;
        let mut cont = magnitude != 0;
        self.buf
            .push(((sign as u8) << 7) | ((cont as u8) << 6) | data);
        while cont {
            data = (magnitude & 0x7f) as u8;
            magnitude >>= 7;
            cont = magnitude != 0;
            self.buf.push(((cont as u8) << 7) | data);
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_vle(bytes.len() as i64);
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_string(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
    }
}

/// Cursor over an immutable byte slice, the dual of [`Writer`].
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| Error::TruncatedStream {
                context: "u8".to_string(),
            })?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self
            .buf
            .get(self.pos..self.pos + 4)
            .ok_or_else(|| Error::TruncatedStream {
                context: "u32".to_string(),
            })?;
        self.pos += 4;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_vle(&mut self) -> Result<i64> {
        let first = self.read_u8()?;
        let sign = (first & 0x80) != 0;
        let mut cont = (first & 0x40) != 0;
        let mut magnitude: u64 = (first & 0x3f) as u64;
        let mut shift = 6u32;
        let mut byte_count = 1;
        while cont {
            byte_count += 1;
            if byte_count > 9 {
                return Err(Error::TruncatedStream {
                    context: "VLE integer exceeds 9 bytes".to_string(),
                });
            }
            let b = self.read_u8()?;
            cont = (b & 0x80) != 0;
            magnitude |= ((b & 0x7f) as u64) << shift;
            shift += 7;
        }
        Ok(if sign {
            -(magnitude as i64)
        } else {
            magnitude as i64
        })
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_vle()?;
        if len < 0 {
            return Err(Error::TruncatedStream {
                context: "negative length prefix".to_string(),
            });
        }
        let len = len as usize;
        let slice = self
            .buf
            .get(self.pos..self.pos + len)
            .ok_or_else(|| Error::TruncatedStream {
                context: "byte array".to_string(),
            })?;
        self.pos += len;
        Ok(slice.to_vec())
    }

    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|_| Error::TruncatedStream {
            context: "utf-8 string".to_string(),
        })
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

/// A type that can serialise itself into a [`Writer`].
pub trait Encode {
    fn encode(&self, w: &mut Writer);
}

/// A type that can deserialise itself from a [`Reader`].
pub trait Decode: Sized {
    fn decode(r: &mut Reader) -> Result<Self>;
}

impl Encode for Type {
    fn encode(&self, w: &mut Writer) {
        match self {
            Type::Void => w.write_u8(0),
            Type::I32 => w.write_u8(1),
            Type::F32 => w.write_u8(2),
            Type::Str => w.write_u8(3),
            Type::Null => w.write_u8(4),
            Type::Array(inner) => {
                w.write_u8(5);
                inner.encode(w);
            }
            Type::Struct(name) => {
                w.write_u8(6);
                w.write_string(name);
            }
            Type::Function(_) | Type::Unresolved(_) => {
                // Never reaches the binary format: resolved before emission.
                w.write_u8(0);
            }
        }
    }
}

impl Decode for Type {
    fn decode(r: &mut Reader) -> Result<Self> {
        let tag = r.read_u8()?;
        Ok(match tag {
            0 => Type::Void,
            1 => Type::I32,
            2 => Type::F32,
            3 => Type::Str,
            4 => Type::Null,
            5 => Type::Array(Box::new(Type::decode(r)?)),
            6 => Type::Struct(r.read_string()?),
            _ => {
                return Err(Error::InvalidTag {
                    tag,
                    context: "Type".to_string(),
                })
            }
        })
    }
}

impl Encode for FunctionSignature {
    fn encode(&self, w: &mut Writer) {
        self.return_type.encode(w);
        w.write_vle(self.arg_types.len() as i64);
        for t in &self.arg_types {
            t.encode(w);
        }
    }
}

impl Decode for FunctionSignature {
    fn decode(r: &mut Reader) -> Result<Self> {
        let return_type = Type::decode(r)?;
        let count = r.read_vle()?.max(0) as usize;
        let mut arg_types = Vec::with_capacity(count);
        for _ in 0..count {
            arg_types.push(Type::decode(r)?);
        }
        Ok(FunctionSignature::new(return_type, arg_types))
    }
}

fn encode_fields(w: &mut Writer, fields: &[(String, Type)]) {
    w.write_vle(fields.len() as i64);
    for (name, ty) in fields {
        w.write_string(name);
        ty.encode(w);
    }
}

fn decode_fields(r: &mut Reader) -> Result<Vec<(String, Type)>> {
    let count = r.read_vle()?.max(0) as usize;
    let mut fields = Vec::with_capacity(count);
    for _ in 0..count {
        let name = r.read_string()?;
        let ty = Type::decode(r)?;
        fields.push((name, ty));
    }
    Ok(fields)
}

impl Encode for Constant {
    fn encode(&self, w: &mut Writer) {
        match self {
            Constant::I32(v) => {
                w.write_u8(0);
                w.write_vle(*v as i64);
            }
            Constant::F32(v) => {
                w.write_u8(1);
                w.write_u32(v.to_bits());
            }
            Constant::Str(s) => {
                w.write_u8(2);
                w.write_string(s);
            }
        }
    }
}

impl Decode for Constant {
    fn decode(r: &mut Reader) -> Result<Self> {
        let tag = r.read_u8()?;
        Ok(match tag {
            0 => Constant::I32(r.read_vle()? as i32),
            1 => Constant::F32(f32::from_bits(r.read_u32()?)),
            2 => Constant::Str(r.read_string()?),
            _ => {
                return Err(Error::InvalidTag {
                    tag,
                    context: "Constant".to_string(),
                })
            }
        })
    }
}

fn encode_path(w: &mut Writer, path: &[String]) {
    w.write_vle(path.len() as i64);
    for seg in path {
        w.write_string(seg);
    }
}

fn decode_path(r: &mut Reader) -> Result<Vec<String>> {
    let count = r.read_vle()?.max(0) as usize;
    let mut path = Vec::with_capacity(count);
    for _ in 0..count {
        path.push(r.read_string()?);
    }
    Ok(path)
}

impl Encode for ImportTableEntry {
    fn encode(&self, w: &mut Writer) {
        encode_path(w, &self.module_path);
        w.write_string(&self.name);
        match &self.kind {
            ImportEntryKind::Function(sig) => {
                w.write_u8(0);
                sig.encode(w);
            }
            ImportEntryKind::Struct(fields) => {
                w.write_u8(1);
                encode_fields(w, fields);
            }
            ImportEntryKind::Constant(ty) => {
                w.write_u8(2);
                ty.encode(w);
            }
        }
    }
}

impl Decode for ImportTableEntry {
    fn decode(r: &mut Reader) -> Result<Self> {
        let module_path = decode_path(r)?;
        let name = r.read_string()?;
        let tag = r.read_u8()?;
        let kind = match tag {
            0 => ImportEntryKind::Function(FunctionSignature::decode(r)?),
            1 => ImportEntryKind::Struct(decode_fields(r)?),
            2 => ImportEntryKind::Constant(Type::decode(r)?),
            _ => {
                return Err(Error::InvalidTag {
                    tag,
                    context: "ImportEntryKind".to_string(),
                })
            }
        };
        Ok(ImportTableEntry {
            module_path,
            name,
            kind,
        })
    }
}

impl Encode for ExportEntry {
    fn encode(&self, w: &mut Writer) {
        w.write_string(&self.name);
        match &self.kind {
            ExportKind::Function {
                sig,
                offset,
                size,
                native_lib,
            } => {
                w.write_u8(0);
                sig.encode(w);
                w.write_u32(*offset);
                w.write_u32(*size);
                match native_lib {
                    Some(lib) => {
                        w.write_u8(1);
                        w.write_string(lib);
                    }
                    None => w.write_u8(0),
                }
            }
            ExportKind::Struct(fields) => {
                w.write_u8(1);
                encode_fields(w, fields);
            }
            ExportKind::Constant { ty, value_index } => {
                w.write_u8(2);
                ty.encode(w);
                w.write_u32(*value_index);
            }
        }
    }
}

impl Decode for ExportEntry {
    fn decode(r: &mut Reader) -> Result<Self> {
        let name = r.read_string()?;
        let tag = r.read_u8()?;
        let kind = match tag {
            0 => {
                let sig = FunctionSignature::decode(r)?;
                let offset = r.read_u32()?;
                let size = r.read_u32()?;
                let native_lib = match r.read_u8()? {
                    1 => Some(r.read_string()?),
                    _ => None,
                };
                ExportKind::Function {
                    sig,
                    offset,
                    size,
                    native_lib,
                }
            }
            1 => ExportKind::Struct(decode_fields(r)?),
            2 => {
                let ty = Type::decode(r)?;
                let value_index = r.read_u32()?;
                ExportKind::Constant { ty, value_index }
            }
            _ => {
                return Err(Error::InvalidTag {
                    tag,
                    context: "ExportKind".to_string(),
                })
            }
        };
        Ok(ExportEntry { name, kind })
    }
}

/// Serialise a [`CompiledModule`] to its on-disk `.cmod` byte representation.
pub fn encode_module(module: &CompiledModule) -> Result<Vec<u8>> {
    let mut w = Writer::new();
    w.write_u32(MAGIC);

    w.write_vle(module.imports.len() as i64);
    for entry in &module.imports {
        entry.encode(&mut w);
    }

    w.write_vle(module.exports.len() as i64);
    for entry in &module.exports {
        entry.encode(&mut w);
    }

    w.write_vle(module.constants.len() as i64);
    for c in &module.constants {
        c.encode(&mut w);
    }

    w.write_bytes(&module.code);

    Ok(w.buf)
}

/// Parse a `.cmod` byte buffer into a [`CompiledModule`].
pub fn decode_module(bytes: &[u8]) -> Result<CompiledModule> {
    let mut r = Reader::new(bytes);
    if r.read_u32()? != MAGIC {
        return Err(Error::BadMagic);
    }

    let import_count = r.read_vle()?.max(0) as usize;
    let mut imports = Vec::with_capacity(import_count);
    for _ in 0..import_count {
        imports.push(ImportTableEntry::decode(&mut r)?);
    }

    let export_count = r.read_vle()?.max(0) as usize;
    let mut exports = Vec::with_capacity(export_count);
    for _ in 0..export_count {
        exports.push(ExportEntry::decode(&mut r)?);
    }

    let constant_count = r.read_vle()?.max(0) as usize;
    let mut constants = Vec::with_capacity(constant_count);
    for _ in 0..constant_count {
        constants.push(Constant::decode(&mut r)?);
    }

    let code = r.read_bytes()?;

    Ok(CompiledModule {
        imports,
        exports,
        constants,
        code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_vle(v: i64) -> i64 {
        let mut w = Writer::new();
        w.write_vle(v);
        let mut r = Reader::new(&w.buf);
        r.read_vle().unwrap()
    }

    #[test]
    fn vle_roundtrips_small_and_large_values() {
        for v in [0i64, 1, -1, 63, -63, 64, -64, 1_000_000, -1_000_000, i32::MAX as i64, i32::MIN as i64] {
            assert_eq!(roundtrip_vle(v), v, "failed for {v}");
        }
    }

    #[test]
    fn bad_magic_is_rejected() {
        let err = decode_module(&[0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, Error::BadMagic));
    }

    #[test]
    fn module_roundtrips() {
        let module = CompiledModule {
            imports: vec![],
            exports: vec![ExportEntry {
                name: "main".to_string(),
                kind: ExportKind::Function {
                    sig: FunctionSignature::new(Type::I32, vec![]),
                    offset: 0,
                    size: 3,
                    native_lib: None,
                },
            }],
            constants: vec![Constant::I32(42)],
            code: vec![0x01, 0, 0, 0, 0x28],
        };
        let bytes = encode_module(&module).unwrap();
        let decoded = decode_module(&bytes).unwrap();
        assert_eq!(decoded.constants, module.constants);
        assert_eq!(decoded.code, module.code);
        assert_eq!(decoded.exports.len(), 1);
    }
}
