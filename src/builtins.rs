//! Descriptors for the core library types every program image links against.

use crate::dispatch::{OBJECT_VTABLE, STRING_VTABLE, VALUE_TYPE_VTABLE};
use crate::primitives::{
    BYTE_VTABLE, DOUBLE_VTABLE, INT16_VTABLE, INT32_VTABLE, INT64_VTABLE, INTPTR_VTABLE,
    SBYTE_VTABLE, SINGLE_VTABLE, UINT16_VTABLE, UINT32_VTABLE, UINT64_VTABLE, UINTPTR_VTABLE,
};
use crate::types::{TypeDescriptor, TypeKind};

pub static OBJECT: TypeDescriptor =
    TypeDescriptor::new("System.Object", TypeKind::Reference, 0, None).with_vtable(&OBJECT_VTABLE);
pub static VALUE_TYPE: TypeDescriptor =
    TypeDescriptor::new("System.ValueType", TypeKind::Reference, 0, Some(&OBJECT))
        .with_vtable(&VALUE_TYPE_VTABLE);
pub static ENUM: TypeDescriptor =
    TypeDescriptor::new("System.Enum", TypeKind::Reference, 0, Some(&VALUE_TYPE));
pub static STRING: TypeDescriptor =
    TypeDescriptor::new("System.String", TypeKind::String, 0, Some(&OBJECT)).with_vtable(&STRING_VTABLE);
pub static ARRAY: TypeDescriptor =
    TypeDescriptor::new("System.Array", TypeKind::Array, 0, Some(&OBJECT));
pub static DELEGATE: TypeDescriptor =
    TypeDescriptor::new("System.Delegate", TypeKind::Delegate, 0, Some(&OBJECT));

pub static BOOLEAN: TypeDescriptor =
    TypeDescriptor::new("System.Boolean", TypeKind::UnsignedInteger, 1, Some(&VALUE_TYPE));
pub static CHAR: TypeDescriptor =
    TypeDescriptor::new("System.Char", TypeKind::UnsignedInteger, 2, Some(&VALUE_TYPE));
pub static SBYTE: TypeDescriptor =
    TypeDescriptor::new("System.SByte", TypeKind::Integer, 1, Some(&VALUE_TYPE))
        .with_vtable(&SBYTE_VTABLE);
pub static BYTE: TypeDescriptor =
    TypeDescriptor::new("System.Byte", TypeKind::UnsignedInteger, 1, Some(&VALUE_TYPE))
        .with_vtable(&BYTE_VTABLE);
pub static INT16: TypeDescriptor =
    TypeDescriptor::new("System.Int16", TypeKind::Integer, 2, Some(&VALUE_TYPE))
        .with_vtable(&INT16_VTABLE);
pub static UINT16: TypeDescriptor =
    TypeDescriptor::new("System.UInt16", TypeKind::UnsignedInteger, 2, Some(&VALUE_TYPE))
        .with_vtable(&UINT16_VTABLE);
pub static INT32: TypeDescriptor =
    TypeDescriptor::new("System.Int32", TypeKind::Integer, 4, Some(&VALUE_TYPE))
        .with_vtable(&INT32_VTABLE);
pub static UINT32: TypeDescriptor =
    TypeDescriptor::new("System.UInt32", TypeKind::UnsignedInteger, 4, Some(&VALUE_TYPE))
        .with_vtable(&UINT32_VTABLE);
pub static INT64: TypeDescriptor =
    TypeDescriptor::new("System.Int64", TypeKind::Integer, 8, Some(&VALUE_TYPE))
        .with_vtable(&INT64_VTABLE);
pub static UINT64: TypeDescriptor =
    TypeDescriptor::new("System.UInt64", TypeKind::UnsignedInteger, 8, Some(&VALUE_TYPE))
        .with_vtable(&UINT64_VTABLE);
pub static INTPTR: TypeDescriptor = TypeDescriptor::new(
    "System.IntPtr",
    TypeKind::Integer,
    core::mem::size_of::<isize>(),
    Some(&VALUE_TYPE),
)
.with_vtable(&INTPTR_VTABLE);
pub static UINTPTR: TypeDescriptor = TypeDescriptor::new(
    "System.UIntPtr",
    TypeKind::UnsignedInteger,
    core::mem::size_of::<usize>(),
    Some(&VALUE_TYPE),
)
.with_vtable(&UINTPTR_VTABLE);
pub static SINGLE: TypeDescriptor =
    TypeDescriptor::new("System.Single", TypeKind::Value, 4, Some(&VALUE_TYPE))
        .with_vtable(&SINGLE_VTABLE);
pub static DOUBLE: TypeDescriptor =
    TypeDescriptor::new("System.Double", TypeKind::Value, 8, Some(&VALUE_TYPE))
        .with_vtable(&DOUBLE_VTABLE);

/// Every builtin, registered by [`TypeRegistry::new`](crate::types::TypeRegistry::new).
pub static ALL: [&TypeDescriptor; 20] = [
    &OBJECT,
    &VALUE_TYPE,
    &ENUM,
    &STRING,
    &ARRAY,
    &DELEGATE,
    &BOOLEAN,
    &CHAR,
    &SBYTE,
    &BYTE,
    &INT16,
    &UINT16,
    &INT32,
    &UINT32,
    &INT64,
    &UINT64,
    &INTPTR,
    &UINTPTR,
    &SINGLE,
    &DOUBLE,
];
