//! Stop-the-world mark and sweep collection.
//!
//! Marking starts from the frame chain, the static reference slots, strong
//! GC handles and the finalization queue, and follows references through an
//! explicit work stack so deep object graphs cannot overflow the native stack.
//! Every reference found is checked against the heap's block-start bitmap
//! before it is followed.
//!
//! After marking, weak handles to unmarked objects are cleared and unmarked
//! objects with a finalizer are moved to the finalization queue, which keeps
//! them (and everything they reference) alive for one more cycle. Finalizers
//! run only from [`Runtime::request_collection`] and
//! [`Runtime::run_pending_finalizers`], never from inside an allocation.

use alloc::vec::Vec;
use core::ptr;

use crate::array::ArrayHeader;
use crate::delegate::{DelegateEntry, DelegateHeader, DELEGATE_DATA_OFFSET};
use crate::error::{fatal, FatalError};
use crate::frame::{Frame, FrameHeader};
use crate::heap::Heap;
use crate::object::{ObjRef, FLAG_FINALIZED, FLAG_FINALIZE_SUPPRESSED, FLAG_MARKED};
use crate::runtime::Runtime;
use crate::types::{MarkTarget, TypeDescriptor, TypeKind, REF_SIZE};

/// Summary of one collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionReport {
    pub marked: usize,
    pub freed_objects: usize,
    pub freed_bytes: usize,
    pub live_objects: usize,
    pub live_bytes: usize,
    pub weak_cleared: usize,
    pub finalizers_queued: usize,
}

struct Marker<'h> {
    heap: &'h Heap,
    stack: Vec<ObjRef>,
    marked: usize,
}

impl<'h> Marker<'h> {
    fn new(heap: &'h Heap) -> Self {
        Marker {
            heap,
            stack: Vec::new(),
            marked: 0,
        }
    }

    fn mark(&mut self, obj: ObjRef) {
        if !self.heap.contains(obj) {
            fatal(FatalError::DanglingReference { address: obj.addr() });
        }
        // SAFETY: `contains` proved `obj` is an allocated block.
        let header = unsafe { obj.header() };
        if header.is_marked() {
            return;
        }
        header.set(FLAG_MARKED);
        self.marked += 1;
        match header.type_desc() {
            Some(ty) if ty.has_references() => self.stack.push(obj),
            Some(_) => {}
            None => fatal(FatalError::DanglingReference { address: obj.addr() }),
        }
    }

    fn mark_slot(&mut self, slot: Option<ObjRef>) {
        if let Some(obj) = slot {
            self.mark(obj);
        }
    }

    fn drain(&mut self) {
        while let Some(obj) = self.stack.pop() {
            self.trace(obj);
        }
    }

    fn trace(&mut self, obj: ObjRef) {
        // SAFETY: only marked, allocated objects are pushed.
        let (ty, body_len) = unsafe {
            match obj.header().type_desc() {
                Some(ty) => (ty, obj.body_len()),
                None => return,
            }
        };
        let body = obj.body_ptr() as *const u8;
        match ty.kind() {
            TypeKind::String | TypeKind::Interface => {}
            TypeKind::Array => self.trace_array(body, body_len),
            TypeKind::Delegate => self.trace_delegate(ty, body, body_len),
            _ => self.trace_fields(ty, body, body_len),
        }
    }

    /// Trace the mark targets of `ty` and its base chain for an instance
    /// whose body starts at `base` and spans `limit` bytes.
    fn trace_fields(&mut self, ty: &'static TypeDescriptor, base: *const u8, limit: usize) {
        for level in ty.ancestry() {
            for target in level.mark_targets() {
                match *target {
                    MarkTarget::Reference(offset) => {
                        if offset + REF_SIZE > limit {
                            corrupt(ty, "reference offset outside instance bounds");
                        }
                        // SAFETY: in bounds; any bit pattern is a valid `Option<ObjRef>`.
                        let slot = unsafe {
                            ptr::read_unaligned(base.add(offset) as *const Option<ObjRef>)
                        };
                        self.mark_slot(slot);
                    }
                    MarkTarget::Value { offset, ty: field_ty } => {
                        if offset + field_ty.size() > limit {
                            corrupt(ty, "embedded value outside instance bounds");
                        }
                        if field_ty.has_references() {
                            self.trace_fields(field_ty, base.wrapping_add(offset), field_ty.size());
                        }
                    }
                }
            }
        }
    }

    fn trace_array(&mut self, body: *const u8, body_len: usize) {
        // SAFETY: array bodies always start with an `ArrayHeader`.
        let header = unsafe { ptr::read(body as *const ArrayHeader) };
        let element = header.element_type();
        let stride = element.storage_size();
        let data = body.wrapping_add(ArrayHeader::DATA_OFFSET);
        let fits = header
            .length
            .checked_mul(stride)
            .and_then(|bytes| bytes.checked_add(ArrayHeader::DATA_OFFSET))
            .map_or(false, |end| end <= body_len);
        if !fits {
            corrupt(&crate::builtins::ARRAY, "elements exceed the array block");
        }

        if element.kind().is_reference_like() {
            for index in 0..header.length {
                // SAFETY: bounds checked above.
                let slot = unsafe {
                    ptr::read_unaligned(data.add(index * REF_SIZE) as *const Option<ObjRef>)
                };
                self.mark_slot(slot);
            }
        } else if element.has_references() {
            for index in 0..header.length {
                self.trace_fields(element, data.wrapping_add(index * stride), stride);
            }
        }
    }

    fn trace_delegate(&mut self, ty: &'static TypeDescriptor, body: *const u8, body_len: usize) {
        // SAFETY: delegate bodies always start with a `DelegateHeader`.
        let count = unsafe { ptr::read(body as *const DelegateHeader) }.count;
        let entry_size = core::mem::size_of::<DelegateEntry>();
        let fits = count
            .checked_mul(entry_size)
            .and_then(|bytes| bytes.checked_add(DELEGATE_DATA_OFFSET))
            .map_or(false, |end| end <= body_len);
        if !fits {
            corrupt(ty, "invocation list exceeds the delegate block");
        }
        let entries = body.wrapping_add(DELEGATE_DATA_OFFSET) as *const DelegateEntry;
        for index in 0..count {
            // SAFETY: bounds checked above.
            let entry = unsafe { ptr::read(entries.add(index)) };
            self.mark_slot(entry.target);
        }
    }
}

fn corrupt(ty: &'static TypeDescriptor, detail: &'static str) -> ! {
    fatal(FatalError::CorruptMetadata {
        type_name: ty.name(),
        detail,
    })
}

impl Runtime {
    /// Run a full collection without running finalizers.
    pub fn collect(&self) -> CollectionReport {
        if self.native_depth.get() > 0 {
            fatal(FatalError::NativeReentry);
        }
        if self.collecting.replace(true) {
            fatal(FatalError::Lifecycle("collection re-entered"));
        }

        let mut heap = self.heap.borrow_mut();
        let (marked, weak_cleared, finalizers_queued) = {
            let mut marker = Marker::new(&heap);
            self.mark_roots(&mut marker);
            marker.drain();

            let weak_cleared = self.handles.borrow_mut().clear_unmarked_weak(&heap);
            let finalizers_queued = self.queue_finalizers(&heap, &mut marker);
            marker.drain();
            (marker.marked, weak_cleared, finalizers_queued)
        };
        let swept = heap.sweep();
        drop(heap);
        self.collecting.set(false);

        let report = CollectionReport {
            marked,
            freed_objects: swept.freed_objects,
            freed_bytes: swept.freed_bytes,
            live_objects: swept.live_objects,
            live_bytes: swept.live_bytes,
            weak_cleared,
            finalizers_queued,
        };
        log::debug!(
            "gc: marked {}, freed {} objects ({} bytes), {} live ({} bytes), {} finalizers queued",
            report.marked,
            report.freed_objects,
            report.freed_bytes,
            report.live_objects,
            report.live_bytes,
            report.finalizers_queued
        );
        report
    }

    fn mark_roots(&self, marker: &mut Marker<'_>) {
        self.frames.for_each(|frame| {
            // SAFETY: linked frames were derived from whole records and stay
            // alive until unlinked.
            let (refs, values) =
                unsafe { (FrameHeader::ref_slots(frame), FrameHeader::value_slots(frame)) };
            for slot in refs {
                marker.mark_slot(slot.get());
            }
            for slot in values {
                if let Some((ptr, ty)) = slot.get() {
                    marker.trace_fields(ty, ptr, ty.size());
                }
            }
        });

        for slot in self.statics.iter() {
            marker.mark_slot(slot.get());
        }
        for target in self.handles.borrow().strong_targets() {
            marker.mark(target);
        }
        for &pending in self.finalization.borrow().iter() {
            marker.mark(pending);
        }
    }

    /// Queue every unmarked finalizable object and mark what it keeps alive.
    fn queue_finalizers(&self, heap: &Heap, marker: &mut Marker<'_>) -> usize {
        let mut queue = self.finalization.borrow_mut();
        let start = queue.len();
        for obj in heap.objects() {
            // SAFETY: `objects` yields allocated blocks only.
            let header = unsafe { obj.header() };
            if header.is_marked() || header.has(FLAG_FINALIZE_SUPPRESSED | FLAG_FINALIZED) {
                continue;
            }
            let Some(ty) = header.type_desc() else { continue };
            if ty.finalizer().is_some() {
                header.set(FLAG_FINALIZED);
                queue.push_back(obj);
            }
        }
        for &obj in queue.iter().skip(start) {
            marker.mark(obj);
        }
        queue.len() - start
    }

    /// Collect, then run the finalizers of objects found unreachable.
    pub fn request_collection(&self) -> CollectionReport {
        let report = self.collect();
        self.run_pending_finalizers();
        report
    }

    /// Run queued finalizers in discovery order. Returns how many ran.
    ///
    /// Each object is rooted in a frame while its finalizer runs; once the
    /// finalizer returns it is unreachable again and the next collection
    /// frees it unless it was re-registered or resurrected.
    pub fn run_pending_finalizers(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.finalization.borrow_mut().pop_front();
            let Some(obj) = next else { break };
            let Some(finalizer) = self.checked_type(obj).finalizer() else {
                continue;
            };
            self.with_frame(|frame: &Frame<1>| {
                frame.set(0, Some(obj));
                finalizer(self, obj);
            });
            ran += 1;
        }
        if ran > 0 {
            log::trace!("ran {} finalizers", ran);
        }
        ran
    }

    pub fn pending_finalizers(&self) -> usize {
        self.finalization.borrow().len()
    }

    /// Exempt `obj` from finalization.
    pub fn suppress_finalize(&self, obj: ObjRef) {
        self.checked_type(obj);
        // SAFETY: validated above.
        unsafe { obj.header() }.set(FLAG_FINALIZE_SUPPRESSED);
    }

    /// Make `obj` eligible for finalization again, even if it already ran.
    pub fn reregister_for_finalize(&self, obj: ObjRef) {
        self.checked_type(obj);
        // SAFETY: validated above.
        unsafe { obj.header() }.unset(FLAG_FINALIZE_SUPPRESSED | FLAG_FINALIZED);
    }
}
