//! Core library behavior of the primitive value types.
//!
//! Hash codes follow the managed platform's definitions so translated
//! programs that print or bucket by hash see the values they expect.

use alloc::format;
use alloc::string::ToString;
use core::fmt;
use core::str::FromStr;

use crate::builtins;
use crate::dispatch::{self, EqualsFn, GetHashCodeFn, ToStringFn, OBJECT_SLOTS};
use crate::object::{Blittable, ObjRef};
use crate::runtime::Runtime;
use crate::types::{Method, TypeDescriptor};

/// A primitive value type with a builtin descriptor.
pub trait Primitive: Blittable + PartialEq + fmt::Display + FromStr {
    fn type_desc() -> &'static TypeDescriptor;

    /// `GetHashCode`.
    fn hash_code(self) -> i32;

    /// `Equals` on two unboxed values.
    fn equals(self, other: Self) -> bool {
        self == other
    }
}

macro_rules! primitive {
    ($t:ty, $desc:path, |$v:ident| $hash:expr) => {
        impl Primitive for $t {
            fn type_desc() -> &'static TypeDescriptor {
                &$desc
            }

            fn hash_code(self) -> i32 {
                let $v = self;
                $hash
            }
        }
    };
}

primitive!(i8, builtins::SBYTE, |v| (v as i32) ^ ((v as i32) << 8));
primitive!(u8, builtins::BYTE, |v| v as i32);
primitive!(i16, builtins::INT16, |v| ((v as u16) as i32) | ((v as i32) << 16));
primitive!(u16, builtins::UINT16, |v| v as i32);
primitive!(i32, builtins::INT32, |v| v);
primitive!(u32, builtins::UINT32, |v| v as i32);
primitive!(i64, builtins::INT64, |v| (v as i32) ^ ((v >> 32) as i32));
primitive!(u64, builtins::UINT64, |v| (v as i32) ^ ((v >> 32) as i32));
primitive!(isize, builtins::INTPTR, |v| (v as i64).hash_code());
primitive!(usize, builtins::UINTPTR, |v| (v as u64).hash_code());

impl Primitive for f32 {
    fn type_desc() -> &'static TypeDescriptor {
        &builtins::SINGLE
    }

    fn hash_code(self) -> i32 {
        if self == 0.0 {
            // +0.0 and -0.0 are equal and must hash the same.
            return 0;
        }
        // Every NaN payload compares equal, so all hash as the canonical NaN.
        let value = if self.is_nan() { f32::NAN } else { self };
        value.to_bits() as i32
    }

    fn equals(self, other: Self) -> bool {
        self == other || (self.is_nan() && other.is_nan())
    }
}

impl Primitive for f64 {
    fn type_desc() -> &'static TypeDescriptor {
        &builtins::DOUBLE
    }

    fn hash_code(self) -> i32 {
        if self == 0.0 {
            return 0;
        }
        let value = if self.is_nan() { f64::NAN } else { self };
        let bits = value.to_bits();
        (bits as i32) ^ ((bits >> 32) as i32)
    }

    fn equals(self, other: Self) -> bool {
        self == other || (self.is_nan() && other.is_nan())
    }
}

// Overrides of the `System.Object` virtuals for boxed primitives.

fn boxed_to_string<T: Primitive>(rt: &Runtime, this: ObjRef) -> ObjRef {
    match rt.unbox::<T>(Some(this), T::type_desc()) {
        Ok(value) => rt.primitive_to_string(value),
        Err(_) => dispatch::default_to_string(rt, this),
    }
}

fn boxed_equals<T: Primitive>(rt: &Runtime, this: ObjRef, other: Option<ObjRef>) -> bool {
    rt.unbox::<T>(Some(this), T::type_desc())
        .map_or(false, |value| rt.primitive_equals_object(value, other))
}

fn boxed_hash_code<T: Primitive>(rt: &Runtime, this: ObjRef) -> i32 {
    rt.unbox::<T>(Some(this), T::type_desc())
        .map_or(0, Primitive::hash_code)
}

const fn primitive_vtable<T: Primitive>() -> [Option<Method>; OBJECT_SLOTS] {
    [
        crate::method!(boxed_to_string::<T> as ToStringFn),
        crate::method!(boxed_equals::<T> as EqualsFn),
        crate::method!(boxed_hash_code::<T> as GetHashCodeFn),
    ]
}

macro_rules! primitive_vtables {
    ($($name:ident: $t:ty),* $(,)?) => {
        $(pub(crate) static $name: [Option<Method>; OBJECT_SLOTS] = primitive_vtable::<$t>();)*
    };
}

primitive_vtables! {
    SBYTE_VTABLE: i8,
    BYTE_VTABLE: u8,
    INT16_VTABLE: i16,
    UINT16_VTABLE: u16,
    INT32_VTABLE: i32,
    UINT32_VTABLE: u32,
    INT64_VTABLE: i64,
    UINT64_VTABLE: u64,
    INTPTR_VTABLE: isize,
    UINTPTR_VTABLE: usize,
    SINGLE_VTABLE: f32,
    DOUBLE_VTABLE: f64,
}

impl Runtime {
    /// `Equals(object)` on a primitive: true only for a box of the same
    /// primitive type holding an equal value. Never fails.
    pub fn primitive_equals_object<T: Primitive>(&self, value: T, obj: Option<ObjRef>) -> bool {
        let Some(obj) = obj else { return false };
        if self.type_of(obj) != T::type_desc() {
            return false;
        }
        self.unbox::<T>(Some(obj), T::type_desc())
            .map_or(false, |boxed| value.equals(boxed))
    }

    /// `ToString()` on a primitive; allocates the result.
    pub fn primitive_to_string<T: Primitive>(&self, value: T) -> ObjRef {
        self.new_string(&value.to_string())
    }

    /// `TryParse`: surrounding whitespace is ignored, null or malformed input
    /// yields `None`.
    pub fn try_parse<T: Primitive>(&self, s: Option<ObjRef>) -> Option<T> {
        let text = self.string_to_rust(s?).ok()?;
        text.trim().parse().ok()
    }

    /// `Parse` with the managed exception name on failure.
    pub fn parse<T: Primitive>(&self, s: Option<ObjRef>) -> Result<T, ParseError> {
        let Some(s) = s else { return Err(ParseError::Null) };
        let text = self.string_to_rust(s).map_err(|_| ParseError::Null)?;
        text.trim()
            .parse()
            .map_err(|_| ParseError::Format(format!("input string was not in a correct format: {:?}", text)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// `System.ArgumentNullException`
    Null,
    /// `System.FormatException`
    Format(alloc::string::String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Null => write!(f, "System.ArgumentNullException: value is null"),
            ParseError::Format(detail) => write!(f, "System.FormatException: {}", detail),
        }
    }
}
