//! Virtual and interface method dispatch.
//!
//! Every descriptor may carry a table of virtual slots. Slot numbers are
//! shared along a base chain: `System.Object` owns [`TO_STRING`],
//! [`EQUALS`] and [`GET_HASH_CODE`], and a derived class numbers the
//! virtuals it introduces from [`OBJECT_SLOTS`] on. Lookup starts at the
//! runtime type and takes the first implementation found walking toward
//! `System.Object`, so an override always wins over the method it replaces.
//!
//! Interface methods are resolved through the per-interface tables a class
//! supplies with [`TypeDescriptor::with_interface_vtables`].

use core::slice;

use crate::builtins;
use crate::error::{fatal, FatalError, RtResult, RuntimeError};
use crate::object::ObjRef;
use crate::runtime::Runtime;
use crate::types::{Method, TypeDescriptor, TypeKind};

/// `string ToString()`
pub const TO_STRING: usize = 0;
/// `bool Equals(object)`
pub const EQUALS: usize = 1;
/// `int GetHashCode()`
pub const GET_HASH_CODE: usize = 2;
/// First slot free for virtuals introduced below `System.Object`.
pub const OBJECT_SLOTS: usize = 3;

pub type ToStringFn = fn(&Runtime, ObjRef) -> ObjRef;
pub type EqualsFn = fn(&Runtime, ObjRef, Option<ObjRef>) -> bool;
pub type GetHashCodeFn = fn(&Runtime, ObjRef) -> i32;

/// A `static` method table entry for `f`.
#[macro_export]
macro_rules! method {
    ($f:expr) => {
        ::core::option::Option::Some($crate::types::Method::new($f as *const ()))
    };
}

pub(crate) static OBJECT_VTABLE: [Option<Method>; OBJECT_SLOTS] = [
    method!(default_to_string as ToStringFn),
    method!(default_equals as EqualsFn),
    method!(default_hash_code as GetHashCodeFn),
];

pub(crate) static VALUE_TYPE_VTABLE: [Option<Method>; OBJECT_SLOTS] = [
    None,
    method!(value_equals as EqualsFn),
    method!(value_hash_code as GetHashCodeFn),
];

pub(crate) static STRING_VTABLE: [Option<Method>; OBJECT_SLOTS] = [
    method!(string_to_string as ToStringFn),
    method!(string_equals as EqualsFn),
    method!(string_hash_code as GetHashCodeFn),
];

/// `Object.ToString`: the runtime type's name.
pub fn default_to_string(rt: &Runtime, this: ObjRef) -> ObjRef {
    rt.new_string(rt.type_of(this).name())
}

/// `Object.Equals`: reference identity.
pub fn default_equals(_rt: &Runtime, this: ObjRef, other: Option<ObjRef>) -> bool {
    other == Some(this)
}

/// `Object.GetHashCode`: derived from the address, which never changes
/// because objects are not moved.
pub fn default_hash_code(_rt: &Runtime, this: ObjRef) -> i32 {
    let addr = this.addr() as u64;
    ((addr >> 3) as u32 ^ (addr >> 35) as u32) as i32
}

fn value_body(rt: &Runtime, obj: ObjRef) -> &[u8] {
    let len = rt.type_of(obj).size();
    // SAFETY: a boxed value's body is exactly `size()` bytes.
    unsafe { slice::from_raw_parts(obj.body_ptr() as *const u8, len) }
}

/// `ValueType.Equals`: same type and bitwise equal contents.
fn value_equals(rt: &Runtime, this: ObjRef, other: Option<ObjRef>) -> bool {
    match other {
        Some(other) if rt.type_of(other) == rt.type_of(this) => {
            value_body(rt, this) == value_body(rt, other)
        }
        _ => false,
    }
}

fn value_hash_code(rt: &Runtime, this: ObjRef) -> i32 {
    value_body(rt, this)
        .chunks(4)
        .fold(0i32, |hash, chunk| {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            hash.rotate_left(5) ^ i32::from_le_bytes(word)
        })
}

fn string_to_string(_rt: &Runtime, this: ObjRef) -> ObjRef {
    this
}

fn string_equals(rt: &Runtime, this: ObjRef, other: Option<ObjRef>) -> bool {
    match other {
        Some(other) if rt.type_of(other) == &builtins::STRING => {
            rt.string_equals(Some(this), Some(other)).unwrap_or(false)
        }
        _ => false,
    }
}

/// Non-randomized, so equal strings hash alike across runs.
fn string_hash_code(rt: &Runtime, this: ObjRef) -> i32 {
    let units = rt.string_to_utf16(this).unwrap_or_default();
    let mut hash1: i32 = 5381;
    let mut hash2 = hash1;
    for pair in units.chunks(2) {
        hash1 = (hash1 << 5).wrapping_add(hash1) ^ pair[0] as i32;
        if let Some(&unit) = pair.get(1) {
            hash2 = (hash2 << 5).wrapping_add(hash2) ^ unit as i32;
        }
    }
    hash1.wrapping_add(hash2.wrapping_mul(1_566_083_941))
}

fn missing(ty: &'static TypeDescriptor, detail: &'static str) -> ! {
    fatal(FatalError::CorruptMetadata {
        type_name: ty.name(),
        detail,
    })
}

impl Runtime {
    /// `callvirt`: the implementation of virtual `slot` for the runtime type
    /// of `obj`. A slot no type along the chain implements is fatal.
    pub fn virtual_method(&self, obj: Option<ObjRef>, slot: usize) -> RtResult<Method> {
        let obj = obj.ok_or(RuntimeError::NullReference)?;
        let ty = self.checked_type(obj);
        match ty.resolve_virtual(slot) {
            Some(method) => Ok(method),
            None => missing(ty, "virtual slot has no implementation"),
        }
    }

    /// `callvirt` through an interface. Fails with `Cast` when the runtime
    /// type does not implement `iface`.
    pub fn interface_method(
        &self,
        obj: Option<ObjRef>,
        iface: &'static TypeDescriptor,
        slot: usize,
    ) -> RtResult<Method> {
        if iface.kind() != TypeKind::Interface {
            missing(iface, "dispatch through a non-interface type");
        }
        let obj = obj.ok_or(RuntimeError::NullReference)?;
        let ty = self.checked_type(obj);
        match ty.resolve_interface(iface) {
            Some(table) => match table.methods.get(slot) {
                Some(&method) => Ok(method),
                None => missing(ty, "interface slot outside the method table"),
            },
            None if iface.is_assignable_from(ty) => missing(ty, "interface has no method table"),
            None => Err(RuntimeError::cast(iface.name(), ty.name())),
        }
    }

    /// Virtual `ToString()`.
    pub fn invoke_to_string(&self, obj: Option<ObjRef>) -> RtResult<ObjRef> {
        let method = self.virtual_method(obj, TO_STRING)?;
        // SAFETY: the slot is declared with `ToStringFn`.
        let f: ToStringFn = unsafe { method.as_fn() };
        Ok(f(self, obj.ok_or(RuntimeError::NullReference)?))
    }

    /// Virtual `Equals(object)`.
    pub fn invoke_equals(&self, obj: Option<ObjRef>, other: Option<ObjRef>) -> RtResult<bool> {
        let method = self.virtual_method(obj, EQUALS)?;
        // SAFETY: the slot is declared with `EqualsFn`.
        let f: EqualsFn = unsafe { method.as_fn() };
        Ok(f(self, obj.ok_or(RuntimeError::NullReference)?, other))
    }

    /// Virtual `GetHashCode()`.
    pub fn invoke_hash_code(&self, obj: Option<ObjRef>) -> RtResult<i32> {
        let method = self.virtual_method(obj, GET_HASH_CODE)?;
        // SAFETY: the slot is declared with `GetHashCodeFn`.
        let f: GetHashCodeFn = unsafe { method.as_fn() };
        Ok(f(self, obj.ok_or(RuntimeError::NullReference)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::frame::Frame;
    use crate::types::TypeRegistry;

    fn runtime() -> Runtime {
        Runtime::initialize(RuntimeConfig::new().heap_size(8 * 1024), TypeRegistry::new()).unwrap()
    }

    #[test]
    fn object_defaults_use_identity() {
        let rt = runtime();
        rt.with_frame(|frame: &Frame<2>| {
            let a = rt.new_object(&builtins::OBJECT);
            frame.set(0, Some(a));
            let b = rt.new_object(&builtins::OBJECT);
            frame.set(1, Some(b));

            assert_eq!(rt.invoke_equals(Some(a), Some(a)), Ok(true));
            assert_eq!(rt.invoke_equals(Some(a), Some(b)), Ok(false));
            assert_eq!(rt.invoke_equals(Some(a), None), Ok(false));

            let before = rt.invoke_hash_code(Some(a)).unwrap();
            rt.collect();
            assert_eq!(rt.invoke_hash_code(Some(a)), Ok(before));

            let name = rt.invoke_to_string(Some(a)).unwrap();
            assert_eq!(rt.string_to_rust(name).unwrap(), "System.Object");
        });
    }

    #[test]
    fn strings_compare_by_content() {
        let rt = runtime();
        rt.with_frame(|frame: &Frame<2>| {
            let a = rt.new_string("hello");
            frame.set(0, Some(a));
            let b = rt.new_string("hello");
            frame.set(1, Some(b));

            assert_ne!(a, b);
            assert_eq!(rt.invoke_equals(Some(a), Some(b)), Ok(true));
            assert_eq!(rt.invoke_hash_code(Some(a)), rt.invoke_hash_code(Some(b)));
            assert_eq!(rt.invoke_to_string(Some(a)), Ok(a));

            let boxed = rt.box_value(&builtins::INT32, 5i32);
            assert_eq!(rt.invoke_equals(Some(a), Some(boxed)), Ok(false));
        });
    }

    #[test]
    fn null_receivers_are_reported() {
        let rt = runtime();
        assert_eq!(rt.invoke_to_string(None), Err(RuntimeError::NullReference));
        assert_eq!(rt.virtual_method(None, EQUALS), Err(RuntimeError::NullReference));
    }

    #[test]
    #[should_panic(expected = "virtual slot has no implementation")]
    fn unimplemented_slot_is_fatal() {
        let rt = runtime();
        let obj = rt.new_object(&builtins::OBJECT);
        let _ = rt.virtual_method(Some(obj), OBJECT_SLOTS);
    }
}
