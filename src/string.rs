//! Immutable UTF-16 strings.
//!
//! Body layout: the length in code units, then the units, then a NUL unit so
//! the data can be handed to native code expecting a terminated wide string.

use alloc::string::String;
use alloc::vec::Vec;
use core::mem::size_of;
use core::ptr;

use crate::builtins;
use crate::error::{RtResult, RuntimeError};
use crate::frame::Frame;
use crate::object::ObjRef;
use crate::runtime::Runtime;

#[repr(C)]
pub(crate) struct StringHeader {
    length: usize,
}

/// Offset of the first code unit from the start of a string body.
pub const STRING_DATA_OFFSET: usize = size_of::<StringHeader>();

impl Runtime {
    pub fn new_string(&self, value: &str) -> ObjRef {
        let units: Vec<u16> = value.encode_utf16().collect();
        self.new_string_utf16(&units)
    }

    pub fn new_string_utf16(&self, units: &[u16]) -> ObjRef {
        let s = self.allocate(&builtins::STRING, STRING_DATA_OFFSET + (units.len() + 1) * 2);
        // SAFETY: the body holds the header and `units.len() + 1` code units;
        // the terminator is already zero.
        unsafe {
            ptr::write(s.body_ptr() as *mut StringHeader, StringHeader { length: units.len() });
            ptr::copy_nonoverlapping(
                units.as_ptr(),
                s.body_ptr().add(STRING_DATA_OFFSET) as *mut u16,
                units.len(),
            );
        }
        s
    }

    /// Length in UTF-16 code units and a pointer to the first unit.
    pub(crate) fn string_parts(&self, s: ObjRef) -> RtResult<(*const u16, usize)> {
        let ty = self.checked_type(s);
        if ty != &builtins::STRING {
            return Err(RuntimeError::cast(builtins::STRING.name(), ty.name()));
        }
        // SAFETY: string bodies start with a `StringHeader`.
        let length = unsafe { ptr::read(s.body_ptr() as *const StringHeader) }.length;
        Ok((s.body_ptr().wrapping_add(STRING_DATA_OFFSET) as *const u16, length))
    }

    pub fn string_len(&self, s: ObjRef) -> RtResult<usize> {
        Ok(self.string_parts(s)?.1)
    }

    /// Copy of the code units, terminator excluded.
    pub fn string_to_utf16(&self, s: ObjRef) -> RtResult<Vec<u16>> {
        let (data, length) = self.string_parts(s)?;
        // SAFETY: `length` units follow the header.
        Ok(unsafe { core::slice::from_raw_parts(data, length) }.to_vec())
    }

    /// Decode to a Rust string; unpaired surrogates become U+FFFD.
    pub fn string_to_rust(&self, s: ObjRef) -> RtResult<String> {
        let units = self.string_to_utf16(s)?;
        Ok(char::decode_utf16(units.iter().copied())
            .map(|unit| unit.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect())
    }

    /// Ordinal equality. Two nulls are equal; null never equals a string.
    pub fn string_equals(&self, a: Option<ObjRef>, b: Option<ObjRef>) -> RtResult<bool> {
        match (a, b) {
            (None, None) => Ok(true),
            (Some(a), Some(b)) => Ok(a == b || self.string_to_utf16(a)? == self.string_to_utf16(b)?),
            _ => Ok(false),
        }
    }

    /// Concatenate two strings; a null operand is treated as empty.
    ///
    /// Both operands are rooted while the result is allocated.
    pub fn concat(&self, a: Option<ObjRef>, b: Option<ObjRef>) -> RtResult<ObjRef> {
        self.with_frame(|frame: &Frame<2>| {
            frame.set(0, a);
            frame.set(1, b);
            let mut units = match a {
                Some(a) => self.string_to_utf16(a)?,
                None => Vec::new(),
            };
            if let Some(b) = b {
                units.extend(self.string_to_utf16(b)?);
            }
            Ok(self.new_string_utf16(&units))
        })
    }
}
