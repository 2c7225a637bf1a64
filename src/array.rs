//! Single-dimensional, zero-based arrays.
//!
//! The runtime type of every array is `System.Array`; the element type is
//! stored in a small header at the start of the body, followed by the
//! elements. Reference elements take one pointer each, value elements are
//! stored inline at their instance size.

use alloc::vec::Vec;
use core::mem::size_of;
use core::ptr;

use crate::builtins;
use crate::error::{fatal, FatalError, RtResult, RuntimeError};
use crate::frame::Frame;
use crate::handles::HandleKind;
use crate::heap::{align_up, ALIGN};
use crate::object::{Blittable, ObjRef};
use crate::primitives::Primitive;
use crate::runtime::Runtime;
use crate::types::{TypeDescriptor, REF_SIZE};

#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct ArrayHeader {
    element_type: *const TypeDescriptor,
    pub(crate) length: usize,
}

impl ArrayHeader {
    /// Offset of the first element from the start of the body.
    pub(crate) const DATA_OFFSET: usize = align_up(size_of::<ArrayHeader>(), ALIGN);

    pub(crate) fn element_type(&self) -> &'static TypeDescriptor {
        // SAFETY: written from a `&'static TypeDescriptor` in `new_array`.
        unsafe { &*self.element_type }
    }
}

/// Offset of the first element from the start of an array body.
pub const ARRAY_DATA_OFFSET: usize = ArrayHeader::DATA_OFFSET;

/// Shape of a validated array.
#[derive(Clone, Copy)]
struct ArrayView {
    element: &'static TypeDescriptor,
    length: usize,
    data: *mut u8,
}

impl ArrayView {
    fn check_index(&self, index: usize) -> RtResult<()> {
        if index < self.length {
            Ok(())
        } else {
            Err(RuntimeError::IndexOutOfRange {
                index,
                length: self.length,
            })
        }
    }

    fn stride(&self) -> usize {
        self.element.storage_size()
    }

    fn element_ptr(&self, index: usize) -> *mut u8 {
        self.data.wrapping_add(index * self.stride())
    }
}

impl Runtime {
    /// Allocate a zeroed array of `length` elements.
    ///
    /// A negative length fails with `InvalidLength`.
    pub fn new_array(&self, element_type: &'static TypeDescriptor, length: isize) -> RtResult<ObjRef> {
        if length < 0 {
            return Err(RuntimeError::InvalidLength { length });
        }
        let count = length as usize;
        let body = count
            .checked_mul(element_type.storage_size())
            .and_then(|bytes| bytes.checked_add(ArrayHeader::DATA_OFFSET))
            .filter(|bytes| *bytes <= u32::MAX as usize)
            .ok_or(RuntimeError::InvalidLength { length })?;

        let arr = self.allocate(&builtins::ARRAY, body);
        let header = ArrayHeader {
            element_type,
            length: count,
        };
        // SAFETY: the body is at least `DATA_OFFSET` bytes.
        unsafe { ptr::write(arr.body_ptr() as *mut ArrayHeader, header) };
        Ok(arr)
    }

    /// Allocate an array of primitives holding a copy of `values`.
    pub fn new_array_from<T: Primitive>(&self, values: &[T]) -> ObjRef {
        let length = values.len() as isize;
        let arr = match self.new_array(T::type_desc(), length) {
            Ok(arr) => arr,
            Err(_) => fatal(FatalError::OutOfMemory {
                requested: values.len() * size_of::<T>(),
                capacity: self.heap_stats().capacity,
            }),
        };
        let data = arr.body_ptr().wrapping_add(ArrayHeader::DATA_OFFSET) as *mut T;
        for (index, value) in values.iter().enumerate() {
            // SAFETY: the array was allocated with `values.len()` elements of `T`.
            unsafe { ptr::write_unaligned(data.add(index), *value) };
        }
        arr
    }

    fn array_view(&self, arr: ObjRef) -> RtResult<ArrayView> {
        let ty = self.checked_type(arr);
        if ty != &builtins::ARRAY {
            return Err(RuntimeError::cast(builtins::ARRAY.name(), ty.name()));
        }
        // SAFETY: array bodies start with an `ArrayHeader`.
        let header = unsafe { ptr::read(arr.body_ptr() as *const ArrayHeader) };
        Ok(ArrayView {
            element: header.element_type(),
            length: header.length,
            data: arr.body_ptr().wrapping_add(ArrayHeader::DATA_OFFSET),
        })
    }

    pub fn array_len(&self, arr: ObjRef) -> RtResult<usize> {
        Ok(self.array_view(arr)?.length)
    }

    pub fn array_element_type(&self, arr: ObjRef) -> RtResult<&'static TypeDescriptor> {
        Ok(self.array_view(arr)?.element)
    }

    fn value_view<T>(&self, arr: ObjRef) -> RtResult<ArrayView> {
        let view = self.array_view(arr)?;
        if !view.element.kind().is_value_like() || view.stride() != size_of::<T>() {
            return Err(RuntimeError::cast(view.element.name(), core::any::type_name::<T>()));
        }
        Ok(view)
    }

    /// Read a value element.
    pub fn array_get<T: Blittable>(&self, arr: ObjRef, index: usize) -> RtResult<T> {
        let view = self.value_view::<T>(arr)?;
        view.check_index(index)?;
        // SAFETY: index checked against the stored length.
        Ok(unsafe { ptr::read_unaligned(view.element_ptr(index) as *const T) })
    }

    pub fn array_set<T: Blittable>(&self, arr: ObjRef, index: usize, value: T) -> RtResult<()> {
        let view = self.value_view::<T>(arr)?;
        view.check_index(index)?;
        // SAFETY: index checked against the stored length.
        unsafe { ptr::write_unaligned(view.element_ptr(index) as *mut T, value) };
        Ok(())
    }

    fn reference_view(&self, arr: ObjRef) -> RtResult<ArrayView> {
        let view = self.array_view(arr)?;
        if !view.element.kind().is_reference_like() {
            return Err(RuntimeError::cast(view.element.name(), builtins::OBJECT.name()));
        }
        Ok(view)
    }

    /// Read a reference element.
    pub fn array_get_ref(&self, arr: ObjRef, index: usize) -> RtResult<Option<ObjRef>> {
        let view = self.reference_view(arr)?;
        view.check_index(index)?;
        // SAFETY: index checked against the stored length.
        Ok(unsafe { ptr::read_unaligned(view.element_ptr(index) as *const Option<ObjRef>) })
    }

    /// Store a reference element. The value must be assignable to the
    /// element type.
    pub fn array_set_ref(&self, arr: ObjRef, index: usize, value: Option<ObjRef>) -> RtResult<()> {
        let view = self.reference_view(arr)?;
        view.check_index(index)?;
        if let Some(obj) = value {
            let actual = self.checked_type(obj);
            if !view.element.is_assignable_from(actual) {
                return Err(RuntimeError::cast(view.element.name(), actual.name()));
            }
        }
        // SAFETY: index checked against the stored length.
        unsafe { ptr::write_unaligned(view.element_ptr(index) as *mut Option<ObjRef>, value) };
        Ok(())
    }

    fn element_field_ptr(&self, view: &ArrayView, index: usize, offset: usize) -> RtResult<*mut u8> {
        if !view.element.kind().is_value_like() {
            return Err(RuntimeError::cast(view.element.name(), builtins::VALUE_TYPE.name()));
        }
        view.check_index(index)?;
        if offset + REF_SIZE > view.stride() {
            fatal(FatalError::CorruptMetadata {
                type_name: view.element.name(),
                detail: "field access outside element bounds",
            });
        }
        Ok(view.element_ptr(index).wrapping_add(offset))
    }

    /// Read a reference field of a value-type element.
    pub fn array_element_field_ref(
        &self,
        arr: ObjRef,
        index: usize,
        offset: usize,
    ) -> RtResult<Option<ObjRef>> {
        let view = self.array_view(arr)?;
        let field = self.element_field_ptr(&view, index, offset)?;
        // SAFETY: bounds checked against the element stride.
        Ok(unsafe { ptr::read_unaligned(field as *const Option<ObjRef>) })
    }

    /// Store a reference field of a value-type element.
    pub fn set_array_element_field_ref(
        &self,
        arr: ObjRef,
        index: usize,
        offset: usize,
        value: Option<ObjRef>,
    ) -> RtResult<()> {
        let view = self.array_view(arr)?;
        let field = self.element_field_ptr(&view, index, offset)?;
        if let Some(obj) = value {
            self.checked_type(obj);
        }
        // SAFETY: bounds checked against the element stride.
        unsafe { ptr::write_unaligned(field as *mut Option<ObjRef>, value) };
        Ok(())
    }

    /// Fill a primitive array from its little-endian initialization image.
    ///
    /// `data` must hold exactly `length * element size` bytes.
    pub fn initialize_array(&self, arr: ObjRef, data: &[u8]) -> RtResult<()> {
        let view = self.array_view(arr)?;
        if !view.element.kind().is_value_like() || view.element.has_references() {
            return Err(RuntimeError::cast(view.element.name(), builtins::VALUE_TYPE.name()));
        }
        if data.len() != view.length * view.stride() {
            return Err(RuntimeError::InvalidLength {
                length: data.len() as isize,
            });
        }
        // SAFETY: the element area is exactly `data.len()` bytes.
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), view.data, data.len()) };
        Ok(())
    }

    /// Copy every reference element out of an array.
    pub fn array_refs(&self, arr: ObjRef) -> RtResult<Vec<Option<ObjRef>>> {
        let view = self.reference_view(arr)?;
        Ok((0..view.length)
            .map(|index| {
                // SAFETY: `index < length`.
                unsafe { ptr::read_unaligned(view.element_ptr(index) as *const Option<ObjRef>) }
            })
            .collect())
    }

    /// Allocate a reference array holding `items`. The items stay rooted
    /// across the allocation, the array while it is filled.
    pub fn new_array_of_refs(
        &self,
        element_type: &'static TypeDescriptor,
        items: &[Option<ObjRef>],
    ) -> RtResult<ObjRef> {
        let handles: Vec<_> = items
            .iter()
            .flatten()
            .map(|&item| self.alloc_handle(Some(item), HandleKind::Normal))
            .collect();
        let built = self.new_array(element_type, items.len() as isize);
        for handle in handles {
            self.free_handle(handle);
        }
        let arr = built?;

        self.with_frame(|frame: &Frame<1>| {
            frame.set(0, Some(arr));
            for (index, item) in items.iter().enumerate() {
                self.array_set_ref(arr, index, *item)?;
            }
            Ok(arr)
        })
    }

    pub(crate) fn array_data(&self, arr: ObjRef) -> RtResult<(*mut u8, usize, &'static TypeDescriptor)> {
        let view = self.array_view(arr)?;
        Ok((view.data, view.length, view.element))
    }
}
