//! Execution frames: the explicit root set of translated code.
//!
//! Each translated method that holds references across a possible allocation
//! owns one frame record on the native stack. Records form a singly linked
//! chain through their headers; the collector walks the chain from the most
//! recent frame and treats every reference slot as a root. Slots that hold a
//! pointer to a stack-resident value (plus its type) let the collector trace
//! references embedded in locals of value type.
//!
//! The closure form is the normal way in:
//!
//! ```
//! use ilrt::{Frame, Runtime, RuntimeConfig, TypeRegistry};
//!
//! let rt = Runtime::initialize(RuntimeConfig::new(), TypeRegistry::new()).unwrap();
//! let len = rt.with_frame(|frame: &Frame<1>| {
//!     frame.set(0, Some(rt.new_string("rooted")));
//!     rt.collect();
//!     rt.string_to_rust(frame.get(0).unwrap()).unwrap().len()
//! });
//! assert_eq!(len, 6);
//! ```

use core::cell::Cell;
use core::mem::size_of;
use core::ptr;
use core::slice;

use crate::error::{fatal, FatalError};
use crate::object::ObjRef;
use crate::runtime::Runtime;
use crate::types::TypeDescriptor;

/// Fixed prefix of every frame record.
#[repr(C)]
pub struct FrameHeader {
    prev: Cell<*const FrameHeader>,
    ref_count: u16,
    value_count: u16,
}

impl FrameHeader {
    pub fn prev(&self) -> *const FrameHeader {
        self.prev.get()
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count as usize
    }

    pub fn value_count(&self) -> usize {
        self.value_count as usize
    }

    /// # Safety
    ///
    /// `this` must point at the header of a live [`Frame`] record and must
    /// have been derived from a pointer to the whole record.
    pub(crate) unsafe fn ref_slots<'a>(this: *const FrameHeader) -> &'a [Cell<Option<ObjRef>>] {
        let first = (this as *const u8).add(size_of::<FrameHeader>()) as *const Cell<Option<ObjRef>>;
        slice::from_raw_parts(first, (*this).ref_count())
    }

    /// # Safety
    ///
    /// Same as [`FrameHeader::ref_slots`].
    pub(crate) unsafe fn value_slots<'a>(this: *const FrameHeader) -> &'a [ValueSlot] {
        let refs = (this as *const u8).add(size_of::<FrameHeader>()) as *const Cell<Option<ObjRef>>;
        let first = refs.add((*this).ref_count()) as *const ValueSlot;
        slice::from_raw_parts(first, (*this).value_count())
    }
}

/// A frame slot describing a value-type local that lives on the stack.
#[repr(C)]
pub struct ValueSlot {
    ptr: Cell<*const u8>,
    ty: Cell<Option<&'static TypeDescriptor>>,
}

impl ValueSlot {
    pub(crate) fn get(&self) -> Option<(*const u8, &'static TypeDescriptor)> {
        let ty = self.ty.get()?;
        let ptr = self.ptr.get();
        if ptr.is_null() {
            None
        } else {
            Some((ptr, ty))
        }
    }
}

const EMPTY_REF: Cell<Option<ObjRef>> = Cell::new(None);
const EMPTY_VALUE: ValueSlot = ValueSlot {
    ptr: Cell::new(ptr::null()),
    ty: Cell::new(None),
};

/// A frame record with `R` reference slots and `V` value slots.
#[repr(C)]
pub struct Frame<const R: usize, const V: usize = 0> {
    header: FrameHeader,
    refs: [Cell<Option<ObjRef>>; R],
    values: [ValueSlot; V],
}

impl<const R: usize, const V: usize> Frame<R, V> {
    pub const fn new() -> Self {
        assert!(R <= u16::MAX as usize && V <= u16::MAX as usize);
        Frame {
            header: FrameHeader {
                prev: Cell::new(ptr::null()),
                ref_count: R as u16,
                value_count: V as u16,
            },
            refs: [EMPTY_REF; R],
            values: [EMPTY_VALUE; V],
        }
    }

    pub fn get(&self, slot: usize) -> Option<ObjRef> {
        self.refs[slot].get()
    }

    pub fn set(&self, slot: usize, value: Option<ObjRef>) {
        self.refs[slot].set(value);
    }

    /// Null every reference slot.
    pub fn clear(&self) {
        for slot in &self.refs {
            slot.set(None);
        }
    }

    /// Describe a stack-resident value of type `ty` at `value` to the collector.
    ///
    /// # Safety
    ///
    /// `value` must stay valid for reads of `ty.size()` bytes until the slot
    /// is unbound or the frame is unlinked.
    pub unsafe fn bind_value(&self, slot: usize, value: *const u8, ty: &'static TypeDescriptor) {
        self.values[slot].ptr.set(value);
        self.values[slot].ty.set(Some(ty));
    }

    pub fn unbind_value(&self, slot: usize) {
        self.values[slot].ptr.set(ptr::null());
        self.values[slot].ty.set(None);
    }

    /// Pointer to the record's header, suitable for [`Runtime::link_frame`].
    pub fn as_raw(&self) -> *const FrameHeader {
        (self as *const Self).cast()
    }
}

impl<const R: usize, const V: usize> Default for Frame<R, V> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// FrameChain
// ---------------------------------------------------------------------------

/// The linked list of frames currently on the stack.
pub(crate) struct FrameChain {
    current: Cell<*const FrameHeader>,
    depth: Cell<usize>,
    checks: bool,
}

impl FrameChain {
    pub(crate) fn new(checks: bool) -> Self {
        FrameChain {
            current: Cell::new(ptr::null()),
            depth: Cell::new(0),
            checks,
        }
    }

    pub(crate) fn current(&self) -> *const FrameHeader {
        self.current.get()
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth.get()
    }

    /// # Safety
    ///
    /// See [`Runtime::link_frame`].
    pub(crate) unsafe fn link(&self, frame: *const FrameHeader) {
        (*frame).prev.set(self.current.get());
        self.current.set(frame);
        self.depth.set(self.depth.get() + 1);
    }

    /// # Safety
    ///
    /// See [`Runtime::unlink_frame`].
    pub(crate) unsafe fn unlink(&self, frame: *const FrameHeader) {
        let current = self.current.get();
        if self.checks && !ptr::eq(current, frame) {
            fatal(FatalError::UnlinkedFrame {
                expected: current as usize,
                actual: frame as usize,
            });
        }
        self.current.set((*frame).prev.get());
        self.depth.set(self.depth.get().saturating_sub(1));
    }

    /// Visit every linked frame, most recent first.
    pub(crate) fn for_each(&self, mut f: impl FnMut(*const FrameHeader)) {
        let mut frame = self.current.get();
        let mut seen = 0;
        while !frame.is_null() {
            seen += 1;
            if self.checks && seen > self.depth.get() {
                fatal(FatalError::UnlinkedFrame {
                    expected: self.depth.get(),
                    actual: seen,
                });
            }
            f(frame);
            // SAFETY: linked frames stay alive until they are unlinked.
            frame = unsafe { (*frame).prev.get() };
        }
    }
}

struct Unlink<'a> {
    chain: &'a FrameChain,
    frame: *const FrameHeader,
}

impl Drop for Unlink<'_> {
    fn drop(&mut self) {
        // SAFETY: the frame was linked by `with_frame` and is still on its stack.
        unsafe { self.chain.unlink(self.frame) }
    }
}

impl Runtime {
    /// Push a frame record onto the chain.
    ///
    /// # Safety
    ///
    /// `frame` must come from [`Frame::as_raw`] and the record must neither
    /// move nor be dropped until it is passed to [`Runtime::unlink_frame`].
    /// Frames must be unlinked in the reverse order they were linked.
    pub unsafe fn link_frame(&self, frame: *const FrameHeader) {
        self.frames.link(frame);
    }

    /// Pop the most recent frame record.
    ///
    /// With frame checks enabled, unlinking anything but the current frame
    /// is fatal.
    ///
    /// # Safety
    ///
    /// `frame` must have been linked with [`Runtime::link_frame`] and still
    /// be alive.
    pub unsafe fn unlink_frame(&self, frame: *const FrameHeader) {
        self.frames.unlink(frame);
    }

    /// Run `f` with a fresh frame linked for its whole duration.
    ///
    /// The frame is unlinked when `f` returns or unwinds.
    pub fn with_frame<const R: usize, const V: usize, T, F>(&self, f: F) -> T
    where
        F: FnOnce(&Frame<R, V>) -> T,
    {
        let frame = Frame::<R, V>::new();
        let raw = frame.as_raw();
        // SAFETY: `frame` stays in place until `_unlink` drops, which happens
        // before `frame` itself goes out of scope.
        unsafe { self.frames.link(raw) };
        let _unlink = Unlink {
            chain: &self.frames,
            frame: raw,
        };
        f(&frame)
    }

    /// The most recently linked frame, or null.
    pub fn current_frame(&self) -> *const FrameHeader {
        self.frames.current()
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.depth()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_header_is_the_record_prefix() {
        let frame = Frame::<3, 2>::new();
        let raw = frame.as_raw();
        unsafe {
            assert_eq!((*raw).ref_count(), 3);
            assert_eq!((*raw).value_count(), 2);
            let refs = FrameHeader::ref_slots(raw);
            assert_eq!(refs.len(), 3);
            assert!(ptr::eq(&refs[0], &frame.refs[0]));
            let values = FrameHeader::value_slots(raw);
            assert!(ptr::eq(&values[1], &frame.values[1]));
        }
    }

    #[test]
    fn value_slots_start_unbound() {
        let frame = Frame::<0, 1>::new();
        assert!(frame.values[0].get().is_none());
        let local = 7u64;
        unsafe {
            frame.bind_value(0, &local as *const u64 as *const u8, &crate::builtins::UINT64);
        }
        assert!(frame.values[0].get().is_some());
        frame.unbind_value(0);
        assert!(frame.values[0].get().is_none());
    }

    #[test]
    fn chain_links_and_unlinks_in_order() {
        let chain = FrameChain::new(true);
        let outer = Frame::<1>::new();
        let inner = Frame::<1>::new();
        unsafe {
            chain.link(outer.as_raw());
            chain.link(inner.as_raw());
            assert_eq!(chain.depth(), 2);
            assert!(ptr::eq(chain.current(), inner.as_raw()));

            let mut visited = 0;
            chain.for_each(|_| visited += 1);
            assert_eq!(visited, 2);

            chain.unlink(inner.as_raw());
            assert!(ptr::eq(chain.current(), outer.as_raw()));
            chain.unlink(outer.as_raw());
        }
        assert!(chain.current().is_null());
        assert_eq!(chain.depth(), 0);
    }

    #[test]
    #[should_panic(expected = "unlinked frame")]
    fn unlinking_out_of_order_is_fatal() {
        let chain = FrameChain::new(true);
        let outer = Frame::<1>::new();
        let inner = Frame::<1>::new();
        unsafe {
            chain.link(outer.as_raw());
            chain.link(inner.as_raw());
            chain.unlink(outer.as_raw());
        }
    }
}
