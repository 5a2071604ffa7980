//! The field encoder and decoder.
//!
//! [`FieldWriter`] appends tagged values to a growable buffer and
//! [`FieldReader`] reads them back. The layout is deliberately simple:
//!
//! ```text
//! value  := tag:u8 payload
//! string := len:i32 utf8[len]          (len == -1 means null)
//! bytes  := len:i32 raw[len]           (len == -1 means null)
//! map    := count:i32 (name:string value)*
//! ```
//!
//! All integers are big-endian. Every `put_*` that can fail validates its
//! input first, so a failed call leaves the buffer exactly as it was.

use crate::{PropertyMap, ProtocolError, Value};

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

pub(crate) const TAG_NULL: u8 = 0x00;
pub(crate) const TAG_BOOL: u8 = 0x01;
pub(crate) const TAG_BYTE: u8 = 0x02;
pub(crate) const TAG_SHORT: u8 = 0x03;
pub(crate) const TAG_INT: u8 = 0x04;
pub(crate) const TAG_LONG: u8 = 0x05;
pub(crate) const TAG_FLOAT: u8 = 0x06;
pub(crate) const TAG_DOUBLE: u8 = 0x07;
pub(crate) const TAG_STRING: u8 = 0x08;
pub(crate) const TAG_BYTES: u8 = 0x09;
pub(crate) const TAG_MAP: u8 = 0x0A;

/// Length prefix marking a null string or byte array.
const NULL_LENGTH: i32 = -1;

/// Nested maps deeper than this are rejected when decoding.
const MAX_MAP_DEPTH: usize = 16;

fn wire_len(len: usize) -> Result<i32, ProtocolError> {
    i32::try_from(len).map_err(|_| ProtocolError::TooLong(len))
}

// ---------------------------------------------------------------------------
// FieldWriter
// ---------------------------------------------------------------------------

/// Appends tagged values to an owned buffer.
#[derive(Debug, Clone, Default)]
pub struct FieldWriter {
    buf: Vec<u8>,
}

impl FieldWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a writer with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// The bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the writer, returning its buffer.
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    /// Number of bytes written.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Empties the buffer, keeping its allocation.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn put_null(&mut self) {
        self.buf.push(TAG_NULL);
    }

    pub fn put_bool(&mut self, value: bool) {
        self.buf.push(TAG_BOOL);
        self.buf.push(u8::from(value));
    }

    pub fn put_byte(&mut self, value: i8) {
        self.buf.push(TAG_BYTE);
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_short(&mut self, value: i16) {
        self.buf.push(TAG_SHORT);
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_int(&mut self, value: i32) {
        self.buf.push(TAG_INT);
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_long(&mut self, value: i64) {
        self.buf.push(TAG_LONG);
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_float(&mut self, value: f32) {
        self.buf.push(TAG_FLOAT);
        self.buf.extend_from_slice(&value.to_bits().to_be_bytes());
    }

    pub fn put_double(&mut self, value: f64) {
        self.buf.push(TAG_DOUBLE);
        self.buf.extend_from_slice(&value.to_bits().to_be_bytes());
    }

    /// Writes a string, or the null marker for `None`.
    ///
    /// # Errors
    /// Returns [`ProtocolError::TooLong`] if the UTF-8 form does not fit a
    /// 4-byte length prefix. Nothing is written in that case.
    pub fn put_str(&mut self, value: Option<&str>) -> Result<(), ProtocolError> {
        let len = match value {
            Some(s) => wire_len(s.len())?,
            None => NULL_LENGTH,
        };
        self.buf.push(TAG_STRING);
        self.buf.extend_from_slice(&len.to_be_bytes());
        if let Some(s) = value {
            self.buf.extend_from_slice(s.as_bytes());
        }
        Ok(())
    }

    /// Writes a string supplied as UTF-16 code units.
    ///
    /// # Errors
    /// An unpaired surrogate yields [`ProtocolError::InvalidUtf16`] before
    /// any byte is written.
    pub fn put_utf16(&mut self, units: &[u16]) -> Result<(), ProtocolError> {
        let s = String::from_utf16(units)?;
        self.put_str(Some(&s))
    }

    /// Writes a byte array, or the null marker for `None`.
    pub fn put_bytes(&mut self, value: Option<&[u8]>) -> Result<(), ProtocolError> {
        let len = match value {
            Some(b) => wire_len(b.len())?,
            None => NULL_LENGTH,
        };
        self.buf.push(TAG_BYTES);
        self.buf.extend_from_slice(&len.to_be_bytes());
        if let Some(b) = value {
            self.buf.extend_from_slice(b);
        }
        Ok(())
    }

    /// Writes a property map in insertion order, or `Null` for `None`.
    ///
    /// The map is encoded into a scratch buffer first, so an invalid entry
    /// anywhere in it (empty name, oversize string) leaves this writer
    /// untouched.
    pub fn put_map(&mut self, map: Option<&PropertyMap>) -> Result<(), ProtocolError> {
        let Some(map) = map else {
            self.put_null();
            return Ok(());
        };
        let mut scratch = FieldWriter::with_capacity(map.len() * 16);
        scratch.buf.push(TAG_MAP);
        scratch
            .buf
            .extend_from_slice(&wire_len(map.len())?.to_be_bytes());
        for (name, value) in map.iter() {
            if name.is_empty() {
                return Err(ProtocolError::EmptyPropertyName);
            }
            scratch.put_raw_str(name)?;
            scratch.put_value(value)?;
        }
        self.buf.extend_from_slice(&scratch.buf);
        Ok(())
    }

    /// Writes any [`Value`].
    pub fn put_value(&mut self, value: &Value) -> Result<(), ProtocolError> {
        match value {
            Value::Null => self.put_null(),
            Value::Bool(v) => self.put_bool(*v),
            Value::Byte(v) => self.put_byte(*v),
            Value::Short(v) => self.put_short(*v),
            Value::Int(v) => self.put_int(*v),
            Value::Long(v) => self.put_long(*v),
            Value::Float(v) => self.put_float(*v),
            Value::Double(v) => self.put_double(*v),
            Value::String(v) => self.put_str(Some(v))?,
            Value::Bytes(v) => self.put_bytes(Some(v))?,
            Value::Map(v) => self.put_map(Some(v))?,
        }
        Ok(())
    }

    // Untagged primitives for frame headers.

    pub(crate) fn put_raw_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub(crate) fn put_raw_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub(crate) fn put_raw_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub(crate) fn put_raw_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn put_raw_str(&mut self, s: &str) -> Result<(), ProtocolError> {
        let len = wire_len(s.len())?;
        self.buf.extend_from_slice(&len.to_be_bytes());
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FieldReader
// ---------------------------------------------------------------------------

/// Reads tagged values from a borrowed buffer.
///
/// Every read is bounds-checked; malformed input produces a
/// [`ProtocolError`], never a panic.
#[derive(Debug)]
pub struct FieldReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    /// Creates a reader over `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Returns `true` once every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < n {
            return Err(ProtocolError::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub(crate) fn read_raw_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take_array::<1>()?[0])
    }

    pub(crate) fn read_raw_u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    pub(crate) fn read_raw_i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    /// Reads a length prefix, returning `None` for the null sentinel.
    fn read_len(&mut self) -> Result<Option<usize>, ProtocolError> {
        match self.read_raw_i32()? {
            NULL_LENGTH => Ok(None),
            n if n < 0 => Err(ProtocolError::NegativeLength(n)),
            // Non-negative i32 always fits in usize on supported targets.
            n => Ok(Some(n as usize)),
        }
    }

    fn read_raw_str(&mut self) -> Result<String, ProtocolError> {
        let len = self
            .read_len()?
            .ok_or_else(|| ProtocolError::InvalidMessage("null property name".into()))?;
        Ok(String::from_utf8(self.take(len)?.to_vec())?)
    }

    /// Reads the next tagged value.
    pub fn read_value(&mut self) -> Result<Value, ProtocolError> {
        self.read_value_at(0)
    }

    /// Reads a value that must be a map or `Null`.
    pub fn read_optional_map(&mut self) -> Result<Option<PropertyMap>, ProtocolError> {
        match self.read_value()? {
            Value::Null => Ok(None),
            Value::Map(map) => Ok(Some(map)),
            other => Err(ProtocolError::InvalidMessage(format!(
                "expected map, found {}",
                other.type_name()
            ))),
        }
    }

    /// Reads a value that must be a byte array or `Null`.
    pub fn read_optional_bytes(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        match self.read_value()? {
            Value::Null => Ok(None),
            Value::Bytes(b) => Ok(Some(b)),
            other => Err(ProtocolError::InvalidMessage(format!(
                "expected bytes, found {}",
                other.type_name()
            ))),
        }
    }

    fn read_value_at(&mut self, depth: usize) -> Result<Value, ProtocolError> {
        let tag = self.read_raw_u8()?;
        let value = match tag {
            TAG_NULL => Value::Null,
            TAG_BOOL => Value::Bool(self.read_raw_u8()? != 0),
            TAG_BYTE => Value::Byte(i8::from_be_bytes(self.take_array()?)),
            TAG_SHORT => Value::Short(i16::from_be_bytes(self.take_array()?)),
            TAG_INT => Value::Int(i32::from_be_bytes(self.take_array()?)),
            TAG_LONG => Value::Long(i64::from_be_bytes(self.take_array()?)),
            TAG_FLOAT => {
                Value::Float(f32::from_bits(u32::from_be_bytes(self.take_array()?)))
            }
            TAG_DOUBLE => {
                Value::Double(f64::from_bits(u64::from_be_bytes(self.take_array()?)))
            }
            TAG_STRING => match self.read_len()? {
                None => Value::Null,
                Some(len) => Value::String(String::from_utf8(self.take(len)?.to_vec())?),
            },
            TAG_BYTES => match self.read_len()? {
                None => Value::Null,
                Some(len) => Value::Bytes(self.take(len)?.to_vec()),
            },
            TAG_MAP => {
                if depth >= MAX_MAP_DEPTH {
                    return Err(ProtocolError::InvalidMessage(
                        "property maps nested too deeply".into(),
                    ));
                }
                let count = self.read_len()?.ok_or_else(|| {
                    ProtocolError::InvalidMessage("null map count".into())
                })?;
                let mut map = PropertyMap::new();
                for _ in 0..count {
                    let name = self.read_raw_str()?;
                    let value = self.read_value_at(depth + 1)?;
                    map.insert(name, value);
                }
                Value::Map(map)
            }
            other => return Err(ProtocolError::UnknownTag(other)),
        };
        Ok(value)
    }
}
