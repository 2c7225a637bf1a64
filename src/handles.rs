//! GC handles: references held on behalf of code outside the frame chain.
//!
//! A `Normal` or `Pinned` handle keeps its target alive. A `Weak` handle
//! does not; the collector clears it once the target becomes unreachable.
//! The heap never moves objects, so `Pinned` only adds the right to ask for
//! the body address.

use alloc::vec::Vec;

use crate::error::{fatal, FatalError};
use crate::heap::Heap;
use crate::object::ObjRef;
use crate::runtime::Runtime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Weak,
    Normal,
    Pinned,
}

impl HandleKind {
    pub fn is_strong(self) -> bool {
        !matches!(self, HandleKind::Weak)
    }
}

/// An index into the runtime's handle table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GcHandle(u32);

impl GcHandle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

struct HandleEntry {
    kind: HandleKind,
    target: Option<ObjRef>,
}

pub(crate) struct HandleTable {
    entries: Vec<Option<HandleEntry>>,
    /// Indices of freed entries available for reuse
    free_list: Vec<u32>,
}

impl HandleTable {
    pub(crate) fn new() -> Self {
        HandleTable {
            entries: Vec::new(),
            free_list: Vec::new(),
        }
    }

    pub(crate) fn alloc(&mut self, kind: HandleKind, target: Option<ObjRef>) -> GcHandle {
        let entry = Some(HandleEntry { kind, target });
        if let Some(index) = self.free_list.pop() {
            self.entries[index as usize] = entry;
            GcHandle(index)
        } else {
            let index = self.entries.len() as u32;
            self.entries.push(entry);
            GcHandle(index)
        }
    }

    fn entry(&self, handle: GcHandle) -> &HandleEntry {
        match self.entries.get(handle.index()) {
            Some(Some(entry)) => entry,
            _ => fatal(FatalError::InvalidHandle(handle.0)),
        }
    }

    fn entry_mut(&mut self, handle: GcHandle) -> &mut HandleEntry {
        match self.entries.get_mut(handle.index()) {
            Some(Some(entry)) => entry,
            _ => fatal(FatalError::InvalidHandle(handle.0)),
        }
    }

    pub(crate) fn free(&mut self, handle: GcHandle) {
        self.entry(handle);
        self.entries[handle.index()] = None;
        self.free_list.push(handle.0);
    }

    pub(crate) fn live(&self) -> usize {
        self.entries.len() - self.free_list.len()
    }

    /// Targets that act as roots.
    pub(crate) fn strong_targets(&self) -> impl Iterator<Item = ObjRef> + '_ {
        self.entries
            .iter()
            .flatten()
            .filter(|entry| entry.kind.is_strong())
            .filter_map(|entry| entry.target)
    }

    /// Clear weak handles whose targets were not marked. Returns the count.
    pub(crate) fn clear_unmarked_weak(&mut self, heap: &Heap) -> usize {
        let mut cleared = 0;
        for entry in self.entries.iter_mut().flatten() {
            if entry.kind != HandleKind::Weak {
                continue;
            }
            if let Some(target) = entry.target {
                // SAFETY: a weak target is either the start of an allocated
                // block or was cleared by an earlier collection.
                if !heap.contains(target) || !unsafe { target.header() }.is_marked() {
                    entry.target = None;
                    cleared += 1;
                }
            }
        }
        cleared
    }
}

impl Runtime {
    pub fn alloc_handle(&self, target: Option<ObjRef>, kind: HandleKind) -> GcHandle {
        if let Some(obj) = target {
            self.checked_type(obj);
        }
        let handle = self.handles.borrow_mut().alloc(kind, target);
        log::trace!("gc handle #{} ({:?}) -> {:?}", handle.0, kind, target);
        handle
    }

    pub fn handle_target(&self, handle: GcHandle) -> Option<ObjRef> {
        self.handles.borrow().entry(handle).target
    }

    pub fn set_handle_target(&self, handle: GcHandle, target: Option<ObjRef>) {
        if let Some(obj) = target {
            self.checked_type(obj);
        }
        self.handles.borrow_mut().entry_mut(handle).target = target;
    }

    pub fn handle_kind(&self, handle: GcHandle) -> HandleKind {
        self.handles.borrow().entry(handle).kind
    }

    /// Body address of a pinned handle's target. `None` for other kinds or
    /// a null target.
    pub fn pinned_address(&self, handle: GcHandle) -> Option<*mut u8> {
        let handles = self.handles.borrow();
        let entry = handles.entry(handle);
        match (entry.kind, entry.target) {
            (HandleKind::Pinned, Some(obj)) => Some(obj.body_ptr()),
            _ => None,
        }
    }

    pub fn free_handle(&self, handle: GcHandle) {
        self.handles.borrow_mut().free(handle);
    }

    pub fn handle_count(&self) -> usize {
        self.handles.borrow().live()
    }
}
