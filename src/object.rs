//! Object header layout, object references and field access.
//!
//! Every heap entity starts with the same [`ObjectHeader`]: the type pointer
//! followed by collector bookkeeping. The body starts `HEADER_SIZE` bytes
//! after the header and is laid out as the type descriptor describes.
//!
//! ```text
//! +----------------+------------+----------+---------------------------+
//! | type_desc      | block_size | gc_flags | body (instance_size bytes) |
//! +----------------+------------+----------+---------------------------+
//! ^ ObjRef                                 ^ ObjRef::body_ptr()
//! ```

use alloc::vec::Vec;
use core::cell::Cell;
use core::fmt;
use core::mem::size_of;
use core::ptr::{self, NonNull};

use crate::error::{fatal, FatalError, RtResult, RuntimeError};
use crate::heap::{align_up, ALIGN};
use crate::runtime::Runtime;
use crate::types::{TypeDescriptor, REF_SIZE};

pub(crate) const FLAG_ALLOCATED: u32 = 1 << 0;
pub(crate) const FLAG_MARKED: u32 = 1 << 1;
pub(crate) const FLAG_FINALIZE_SUPPRESSED: u32 = 1 << 2;
pub(crate) const FLAG_FINALIZED: u32 = 1 << 3;

/// Header shared by every heap-allocated entity.
#[repr(C)]
pub struct ObjectHeader {
    type_desc: Cell<*const TypeDescriptor>,
    /// Size of the whole block in bytes, header included.
    block_size: Cell<u32>,
    gc_flags: Cell<u32>,
}

/// Bytes reserved for the header; the body starts at this offset.
pub const HEADER_SIZE: usize = align_up(size_of::<ObjectHeader>(), ALIGN);

impl ObjectHeader {
    pub fn type_desc(&self) -> Option<&'static TypeDescriptor> {
        // SAFETY: the type pointer is either null or was written from a
        // `&'static TypeDescriptor` in `init`.
        unsafe { self.type_desc.get().as_ref() }
    }

    pub fn block_size(&self) -> usize {
        self.block_size.get() as usize
    }

    pub fn is_allocated(&self) -> bool {
        self.has(FLAG_ALLOCATED)
    }

    pub fn is_marked(&self) -> bool {
        self.has(FLAG_MARKED)
    }

    pub(crate) fn has(&self, flag: u32) -> bool {
        self.gc_flags.get() & flag != 0
    }

    pub(crate) fn set(&self, flag: u32) {
        self.gc_flags.set(self.gc_flags.get() | flag);
    }

    pub(crate) fn unset(&self, flag: u32) {
        self.gc_flags.set(self.gc_flags.get() & !flag);
    }

    pub(crate) fn init(&self, ty: &'static TypeDescriptor, block_size: u32) {
        self.type_desc.set(ty);
        self.block_size.set(block_size);
        self.gc_flags.set(FLAG_ALLOCATED);
    }

    /// Turn the header into a free-block header.
    pub(crate) fn release(&self, block_size: u32) {
        self.type_desc.set(ptr::null());
        self.block_size.set(block_size);
        self.gc_flags.set(0);
    }
}

/// A reference to a managed object.
///
/// This is a plain pointer to the object header: it does not keep the object
/// alive. Anything that must survive an allocation has to sit in a frame slot,
/// a static, a GC handle or a field of another live object.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ObjRef(NonNull<ObjectHeader>);

impl ObjRef {
    /// # Safety
    ///
    /// `ptr` must point at an initialized object header inside a heap region.
    pub(crate) unsafe fn from_raw(ptr: *mut u8) -> Self {
        ObjRef(NonNull::new_unchecked(ptr.cast()))
    }

    pub fn as_ptr(self) -> *mut u8 {
        self.0.as_ptr().cast()
    }

    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    /// Address of the first body byte.
    pub fn body_ptr(self) -> *mut u8 {
        self.as_ptr().wrapping_add(HEADER_SIZE)
    }

    /// # Safety
    ///
    /// The object must still be allocated.
    pub(crate) unsafe fn header<'a>(self) -> &'a ObjectHeader {
        &*self.0.as_ptr()
    }

    /// Length of the body in bytes, which may exceed the type's instance size.
    ///
    /// # Safety
    ///
    /// The object must still be allocated.
    pub(crate) unsafe fn body_len(self) -> usize {
        self.header().block_size() - HEADER_SIZE
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjRef({:#x})", self.addr())
    }
}

/// Plain data that may be copied in and out of object bodies.
///
/// # Safety
///
/// Every bit pattern must be a valid value of the type and the type must not
/// contain object references.
pub unsafe trait Blittable: Copy + 'static {}

unsafe impl Blittable for u8 {}
unsafe impl Blittable for i8 {}
unsafe impl Blittable for u16 {}
unsafe impl Blittable for i16 {}
unsafe impl Blittable for u32 {}
unsafe impl Blittable for i32 {}
unsafe impl Blittable for u64 {}
unsafe impl Blittable for i64 {}
unsafe impl Blittable for usize {}
unsafe impl Blittable for isize {}
unsafe impl Blittable for f32 {}
unsafe impl Blittable for f64 {}

/// Static layout of an instance, as the collector sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLayout {
    pub header_size: usize,
    pub instance_size: usize,
    pub reference_offsets: Vec<usize>,
}

pub fn layout_of(ty: &'static TypeDescriptor) -> ObjectLayout {
    ObjectLayout {
        header_size: HEADER_SIZE,
        instance_size: ty.size(),
        reference_offsets: ty.reference_offsets(),
    }
}

impl Runtime {
    /// Runtime type of a live object.
    pub fn type_of(&self, obj: ObjRef) -> &'static TypeDescriptor {
        self.checked_type(obj)
    }

    pub(crate) fn checked_type(&self, obj: ObjRef) -> &'static TypeDescriptor {
        if !self.heap.borrow().contains(obj) {
            fatal(FatalError::DanglingReference { address: obj.addr() });
        }
        // SAFETY: `contains` proved `obj` is the start of an allocated block.
        match unsafe { obj.header() }.type_desc() {
            Some(ty) => ty,
            None => fatal(FatalError::DanglingReference { address: obj.addr() }),
        }
    }

    fn field_ptr(&self, obj: ObjRef, offset: usize, width: usize) -> *mut u8 {
        let ty = self.checked_type(obj);
        if offset.checked_add(width).map_or(true, |end| end > ty.size()) {
            fatal(FatalError::CorruptMetadata {
                type_name: ty.name(),
                detail: "field access outside instance bounds",
            });
        }
        obj.body_ptr().wrapping_add(offset)
    }

    /// Read a plain field at `offset` bytes into the body.
    pub fn field<T: Blittable>(&self, obj: ObjRef, offset: usize) -> T {
        let ptr = self.field_ptr(obj, offset, size_of::<T>());
        // SAFETY: bounds checked against the live object's instance size.
        unsafe { ptr::read_unaligned(ptr as *const T) }
    }

    pub fn set_field<T: Blittable>(&self, obj: ObjRef, offset: usize, value: T) {
        let ptr = self.field_ptr(obj, offset, size_of::<T>());
        // SAFETY: bounds checked against the live object's instance size.
        unsafe { ptr::write_unaligned(ptr as *mut T, value) }
    }

    /// Read a reference field.
    pub fn field_ref(&self, obj: ObjRef, offset: usize) -> Option<ObjRef> {
        let ptr = self.field_ptr(obj, offset, REF_SIZE);
        // SAFETY: bounds checked; any bit pattern is a valid `Option<ObjRef>`.
        unsafe { ptr::read_unaligned(ptr as *const Option<ObjRef>) }
    }

    pub fn set_field_ref(&self, obj: ObjRef, offset: usize, value: Option<ObjRef>) {
        if let Some(target) = value {
            self.checked_type(target);
        }
        let ptr = self.field_ptr(obj, offset, REF_SIZE);
        // SAFETY: bounds checked against the live object's instance size.
        unsafe { ptr::write_unaligned(ptr as *mut Option<ObjRef>, value) }
    }

    /// Box a value: allocate an object of `ty` whose body is a copy of `value`.
    pub fn box_value<T: Blittable>(&self, ty: &'static TypeDescriptor, value: T) -> ObjRef {
        check_payload::<T>(ty);
        let obj = self.allocate(ty, 0);
        // SAFETY: freshly allocated body of exactly `size_of::<T>()` bytes.
        unsafe { ptr::write_unaligned(obj.body_ptr() as *mut T, value) };
        obj
    }

    /// Unbox a value, failing with `Cast` unless the object's type is exactly `ty`.
    pub fn unbox<T: Blittable>(
        &self,
        obj: Option<ObjRef>,
        ty: &'static TypeDescriptor,
    ) -> RtResult<T> {
        let obj = obj.ok_or(RuntimeError::NullReference)?;
        let actual = self.checked_type(obj);
        if actual != ty {
            return Err(RuntimeError::cast(ty.name(), actual.name()));
        }
        check_payload::<T>(ty);
        // SAFETY: the object is a live box of `ty`, whose size equals `T`'s.
        Ok(unsafe { ptr::read_unaligned(obj.body_ptr() as *const T) })
    }
}

fn check_payload<T>(ty: &'static TypeDescriptor) {
    if !ty.kind().is_value_like() {
        fatal(FatalError::CorruptMetadata {
            type_name: ty.name(),
            detail: "boxing requires a value type",
        });
    }
    if size_of::<T>() != ty.size() {
        fatal(FatalError::CorruptMetadata {
            type_name: ty.name(),
            detail: "payload size differs from instance size",
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins;
    use crate::config::RuntimeConfig;
    use crate::types::{MarkTarget, TypeKind, TypeRegistry};

    static POINT: TypeDescriptor = TypeDescriptor::new(
        "Demo.Point",
        TypeKind::Value,
        8,
        Some(&builtins::VALUE_TYPE),
    );
    static BOX_TARGETS: [MarkTarget; 1] = [MarkTarget::Reference(8)];
    static LABELLED: TypeDescriptor = TypeDescriptor::new(
        "Demo.Labelled",
        TypeKind::Reference,
        16,
        Some(&builtins::OBJECT),
    )
    .with_mark_targets(&BOX_TARGETS);

    fn runtime() -> Runtime {
        let mut types = TypeRegistry::new();
        types.register(&POINT);
        types.register(&LABELLED);
        Runtime::initialize(RuntimeConfig::new().heap_size(4096), types).unwrap()
    }

    #[test]
    fn header_size_is_aligned() {
        assert_eq!(HEADER_SIZE % ALIGN, 0);
        assert!(HEADER_SIZE >= size_of::<ObjectHeader>());
    }

    #[test]
    fn layout_reports_reference_offsets() {
        let layout = layout_of(&LABELLED);
        assert_eq!(layout.header_size, HEADER_SIZE);
        assert_eq!(layout.instance_size, 16);
        assert_eq!(layout.reference_offsets, [8]);
    }

    #[test]
    fn box_then_unbox_is_bitwise_equal() {
        let rt = runtime();
        let bits = 0xDEAD_BEEF_0BAD_F00Du64;
        let boxed = rt.box_value(&builtins::UINT64, bits);
        assert_eq!(rt.type_of(boxed), &builtins::UINT64);
        assert_eq!(rt.unbox::<u64>(Some(boxed), &builtins::UINT64), Ok(bits));
    }

    #[test]
    fn unbox_with_wrong_type_is_a_cast_error() {
        let rt = runtime();
        let boxed = rt.box_value(&builtins::INT32, 7i32);
        assert_eq!(
            rt.unbox::<u32>(Some(boxed), &builtins::UINT32),
            Err(RuntimeError::cast("System.UInt32", "System.Int32"))
        );
        assert_eq!(
            rt.unbox::<i32>(None, &builtins::INT32),
            Err(RuntimeError::NullReference)
        );
    }

    #[test]
    fn fields_round_trip_through_the_body() {
        let rt = runtime();
        let obj = rt.new_object(&LABELLED);
        assert_eq!(rt.field::<i32>(obj, 0), 0);
        assert_eq!(rt.field_ref(obj, 8), None);

        let label = rt.new_string("x");
        rt.set_field(obj, 0, 42i32);
        rt.set_field_ref(obj, 8, Some(label));
        assert_eq!(rt.field::<i32>(obj, 0), 42);
        assert_eq!(rt.field_ref(obj, 8), Some(label));
    }

    #[test]
    fn value_types_box_with_their_own_descriptor() {
        let rt = runtime();
        let boxed = rt.new_object(&POINT);
        rt.set_field(boxed, 0, 3i32);
        rt.set_field(boxed, 4, -4i32);
        assert_eq!(rt.type_of(boxed), &POINT);
        assert_eq!(rt.field::<i32>(boxed, 4), -4);
        assert!(rt.unbox::<u64>(Some(boxed), &POINT).is_ok());
        assert!(rt.unbox::<u64>(Some(boxed), &builtins::UINT64).is_err());
    }

    #[test]
    #[should_panic(expected = "field access outside instance bounds")]
    fn field_access_past_the_instance_is_fatal() {
        let rt = runtime();
        let obj = rt.new_object(&LABELLED);
        rt.field::<u64>(obj, 12);
    }
}
