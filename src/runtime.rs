//! The runtime context: heap, type registry, roots and lifecycle.
//!
//! A [`Runtime`] is a single-mutator context. It is deliberately neither
//! `Send` nor `Sync`; everything inside uses `Cell`/`RefCell`, and every
//! entry point takes `&self` so translated code can hold references to it
//! freely while allocating.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use core::cell::{Cell, RefCell};

use crate::config::RuntimeConfig;
use crate::error::{fatal, FatalError, RtResult, RuntimeError};
use crate::frame::FrameChain;
use crate::handles::HandleTable;
use crate::heap::{Heap, HeapRegion, HeapStats};
use crate::object::ObjRef;
use crate::types::{StaticSlot, TypeDescriptor, TypeKind, TypeRegistry};

pub struct Runtime {
    pub(crate) config: RuntimeConfig,
    pub(crate) types: TypeRegistry,
    pub(crate) heap: RefCell<Heap>,
    pub(crate) frames: FrameChain,
    pub(crate) statics: Box<[Cell<Option<ObjRef>>]>,
    pub(crate) handles: RefCell<HandleTable>,
    /// Objects found unreachable whose finalizer has not run yet
    pub(crate) finalization: RefCell<VecDeque<ObjRef>>,
    /// Nesting depth of `native_call`
    pub(crate) native_depth: Cell<u32>,
    pub(crate) collecting: Cell<bool>,
}

impl Runtime {
    /// Allocate the heap from the global allocator and build the runtime.
    pub fn initialize(config: RuntimeConfig, types: TypeRegistry) -> Result<Self, &'static str> {
        config.validate()?;
        let region = HeapRegion::allocate(config.heap_size)?;
        Ok(Self::with_region(config, types, region))
    }

    /// Build the runtime over an existing region; `config.heap_size` is ignored.
    pub fn with_region(config: RuntimeConfig, types: TypeRegistry, region: HeapRegion) -> Self {
        let statics = (0..types.static_count()).map(|_| Cell::new(None)).collect();
        let heap = Heap::new(region);
        log::info!(
            "runtime initialized: {} KiB heap, {} types, {} statics",
            heap.capacity() / 1024,
            types.len(),
            types.static_count()
        );
        Runtime {
            config,
            types,
            heap: RefCell::new(heap),
            frames: FrameChain::new(config.frame_checks),
            statics,
            handles: RefCell::new(HandleTable::new()),
            finalization: RefCell::new(VecDeque::new()),
            native_depth: Cell::new(0),
            collecting: Cell::new(false),
        }
    }

    /// Tear the runtime down and release its heap.
    ///
    /// Finalizers that are still pending do not run.
    pub fn shutdown(self) {
        let current = self.frames.current();
        if self.config.frame_checks && !current.is_null() {
            fatal(FatalError::UnlinkedFrame {
                expected: 0,
                actual: current as usize,
            });
        }
        let stats = self.heap_stats();
        log::info!(
            "runtime shutdown: {} live objects, {} bytes in use, {} collections, {} pending finalizers",
            stats.live_objects,
            stats.used_bytes,
            stats.collections,
            self.finalization.borrow().len()
        );
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn heap_stats(&self) -> HeapStats {
        self.heap.borrow().stats()
    }

    /// Allocate an object of `ty` with `extra_bytes` of body beyond the
    /// instance size. The body is zeroed.
    ///
    /// When the heap is exhausted this collects once and retries; if that
    /// also fails the condition is fatal.
    pub fn allocate(&self, ty: &'static TypeDescriptor, extra_bytes: usize) -> ObjRef {
        if self.native_depth.get() > 0 {
            fatal(FatalError::NativeReentry);
        }
        if cfg!(debug_assertions) && !self.types.contains(ty) {
            fatal(FatalError::CorruptMetadata {
                type_name: ty.name(),
                detail: "type is not registered",
            });
        }
        let capacity = self.heap.borrow().capacity();
        let body = match ty.size().checked_add(extra_bytes) {
            Some(body) => body,
            None => fatal(FatalError::OutOfMemory {
                requested: usize::MAX,
                capacity,
            }),
        };

        if self.config.stress_collect {
            self.collect();
        }
        if let Some(obj) = self.heap.borrow_mut().allocate(ty, body) {
            log::trace!("alloc {} ({} bytes) at {:?}", ty.name(), body, obj);
            return obj;
        }

        log::warn!("heap exhausted allocating {} ({} bytes), collecting", ty.name(), body);
        self.collect();
        match self.heap.borrow_mut().allocate(ty, body) {
            Some(obj) => obj,
            None => fatal(FatalError::OutOfMemory {
                requested: body,
                capacity,
            }),
        }
    }

    /// Allocate a zeroed instance of a class, or a zeroed box of a value type.
    pub fn new_object(&self, ty: &'static TypeDescriptor) -> ObjRef {
        match ty.kind() {
            TypeKind::Array | TypeKind::String | TypeKind::Delegate | TypeKind::Interface => {
                fatal(FatalError::CorruptMetadata {
                    type_name: ty.name(),
                    detail: "type cannot be instantiated directly",
                })
            }
            _ => self.allocate(ty, 0),
        }
    }

    /// `isinst`: false for null.
    pub fn is_instance(&self, obj: Option<ObjRef>, ty: &'static TypeDescriptor) -> bool {
        match obj {
            Some(obj) => ty.is_assignable_from(self.checked_type(obj)),
            None => false,
        }
    }

    /// `castclass`: null passes through, a mismatch fails with `Cast`.
    pub fn checked_cast(
        &self,
        obj: Option<ObjRef>,
        ty: &'static TypeDescriptor,
    ) -> RtResult<Option<ObjRef>> {
        let Some(target) = obj else { return Ok(None) };
        let actual = self.checked_type(target);
        if ty.is_assignable_from(actual) {
            Ok(obj)
        } else {
            Err(RuntimeError::cast(ty.name(), actual.name()))
        }
    }

    pub fn static_ref(&self, slot: StaticSlot) -> Option<ObjRef> {
        self.statics[slot.index()].get()
    }

    pub fn set_static_ref(&self, slot: StaticSlot, value: Option<ObjRef>) {
        if let Some(obj) = value {
            self.checked_type(obj);
        }
        self.statics[slot.index()].set(value);
    }

    /// True if `obj` is the start of a live heap object.
    pub fn is_live(&self, obj: ObjRef) -> bool {
        self.heap.borrow().contains(obj)
    }
}
