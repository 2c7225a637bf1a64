//! Type descriptors and the type registry.
//!
//! Every translated type contributes one static [`TypeDescriptor`]. The
//! descriptors are plain data: name, kind, body size, a weak link to the base
//! type, the offsets at which the body holds traceable references, and the
//! method tables used for virtual and interface dispatch. The collector reads
//! only the first four to walk an object graph.
//!
//! Descriptors are built with `const fn`s so they can live in `static`s:
//!
//! ```
//! use ilrt::builtins;
//! use ilrt::types::{MarkTarget, TypeDescriptor, TypeKind};
//!
//! static NODE_TARGETS: [MarkTarget; 1] = [MarkTarget::Reference(0)];
//! static NODE: TypeDescriptor = TypeDescriptor::new(
//!     "Demo.Node",
//!     TypeKind::Reference,
//!     16,
//!     Some(&builtins::OBJECT),
//! )
//! .with_mark_targets(&NODE_TARGETS);
//!
//! assert!(builtins::OBJECT.is_assignable_from(&NODE));
//! ```

use alloc::vec::Vec;
use core::fmt;
use core::mem::{align_of, size_of};
use core::ptr;

use crate::builtins;
use crate::error::{fatal, FatalError};
use crate::object::ObjRef;
use crate::runtime::Runtime;

/// Size of a reference slot inside an object body.
pub const REF_SIZE: usize = size_of::<Option<ObjRef>>();

/// Called once for an unreachable object before its memory is reclaimed.
pub type Finalizer = fn(&Runtime, ObjRef);

/// The shape class of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// A class instance; fixed-size body.
    Reference,
    /// A struct; stored inline, boxed on demand.
    Value,
    /// A signed integral value or an enum over one.
    Integer,
    /// An unsigned integral value or an enum over one.
    UnsignedInteger,
    /// `System.Array`; the element type lives in the array header.
    Array,
    /// `System.String`; variable-size UTF-16 body.
    String,
    /// A delegate type; variable-size invocation list.
    Delegate,
    /// An interface; never instantiated.
    Interface,
}

impl TypeKind {
    /// Kinds whose instances are stored inline rather than behind a reference.
    pub const fn is_value_like(self) -> bool {
        matches!(
            self,
            TypeKind::Value | TypeKind::Integer | TypeKind::UnsignedInteger
        )
    }

    /// Kinds whose instances live on the managed heap.
    pub const fn is_reference_like(self) -> bool {
        !self.is_value_like()
    }
}

/// An opaque code pointer stored in a method table.
///
/// Translated code casts it back to the signature the slot was declared
/// with; see [`Method::as_fn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Method(*const ());

// SAFETY: a code address is immutable and valid on every thread.
unsafe impl Sync for Method {}
unsafe impl Send for Method {}

impl Method {
    pub const fn new(code: *const ()) -> Self {
        Method(code)
    }

    pub fn code(self) -> *const () {
        self.0
    }

    /// Reinterpret the slot as the function pointer type `F`.
    ///
    /// # Safety
    ///
    /// `F` must be a function pointer type matching the signature of the
    /// function this slot was built from.
    pub unsafe fn as_fn<F: Copy>(self) -> F {
        assert_eq!(size_of::<F>(), size_of::<*const ()>(), "method slot is not a function pointer");
        core::mem::transmute_copy(&self.0)
    }
}

/// The methods a type supplies for one interface, indexed by interface slot.
#[derive(Debug, Clone, Copy)]
pub struct InterfaceVTable {
    pub interface: &'static TypeDescriptor,
    pub methods: &'static [Method],
}

/// A location inside an instance that the collector must trace.
#[derive(Debug, Clone, Copy)]
pub enum MarkTarget {
    /// A nullable object reference at this byte offset.
    Reference(usize),
    /// An embedded value type at this byte offset, traced with its own targets.
    Value {
        offset: usize,
        ty: &'static TypeDescriptor,
    },
}

/// Static metadata for one translated type.
pub struct TypeDescriptor {
    name: &'static str,
    kind: TypeKind,
    instance_size: usize,
    base: Option<&'static TypeDescriptor>,
    mark_targets: &'static [MarkTarget],
    interfaces: &'static [&'static TypeDescriptor],
    /// Virtual slots; `None` inherits the base type's entry.
    vtable: &'static [Option<Method>],
    interface_vtables: &'static [InterfaceVTable],
    finalizer: Option<Finalizer>,
}

impl TypeDescriptor {
    /// A descriptor with no mark targets, interfaces or finalizer.
    ///
    /// `instance_size` is the size of the body, excluding the object header.
    pub const fn new(
        name: &'static str,
        kind: TypeKind,
        instance_size: usize,
        base: Option<&'static TypeDescriptor>,
    ) -> Self {
        Self {
            name,
            kind,
            instance_size,
            base,
            mark_targets: &[],
            interfaces: &[],
            vtable: &[],
            interface_vtables: &[],
            finalizer: None,
        }
    }

    pub const fn with_mark_targets(self, mark_targets: &'static [MarkTarget]) -> Self {
        Self {
            mark_targets,
            ..self
        }
    }

    pub const fn with_interfaces(self, interfaces: &'static [&'static TypeDescriptor]) -> Self {
        Self { interfaces, ..self }
    }

    /// Virtual slots this type introduces or overrides. Slot numbers are
    /// shared along the base chain; a `None` entry, or a slot past the end of
    /// the table, is inherited.
    pub const fn with_vtable(self, vtable: &'static [Option<Method>]) -> Self {
        Self { vtable, ..self }
    }

    /// Method tables for implemented interfaces. Each interface named here is
    /// also implemented for assignability.
    pub const fn with_interface_vtables(self, interface_vtables: &'static [InterfaceVTable]) -> Self {
        Self {
            interface_vtables,
            ..self
        }
    }

    pub const fn with_finalizer(self, finalizer: Finalizer) -> Self {
        Self {
            finalizer: Some(finalizer),
            ..self
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn size(&self) -> usize {
        self.instance_size
    }

    pub fn base(&self) -> Option<&'static TypeDescriptor> {
        self.base
    }

    pub fn mark_targets(&self) -> &'static [MarkTarget] {
        self.mark_targets
    }

    pub fn interfaces(&self) -> &'static [&'static TypeDescriptor] {
        self.interfaces
    }

    pub fn vtable(&self) -> &'static [Option<Method>] {
        self.vtable
    }

    pub fn interface_vtables(&self) -> &'static [InterfaceVTable] {
        self.interface_vtables
    }

    /// Interfaces declared directly on this type, with or without a method table.
    fn own_interfaces(&self) -> impl Iterator<Item = &'static TypeDescriptor> + '_ {
        self.interfaces
            .iter()
            .copied()
            .chain(self.interface_vtables.iter().map(|table| table.interface))
    }

    /// The most derived implementation of virtual `slot`.
    pub fn resolve_virtual(&'static self, slot: usize) -> Option<Method> {
        self.ancestry()
            .find_map(|ty| ty.vtable.get(slot).copied().flatten())
    }

    /// The most derived method table for exactly `iface`.
    pub fn resolve_interface(&'static self, iface: &TypeDescriptor) -> Option<&'static InterfaceVTable> {
        self.ancestry().find_map(|ty| {
            ty.interface_vtables
                .iter()
                .find(|table| ptr::eq(table.interface, iface))
        })
    }

    /// Bytes one instance occupies when stored in a field or array element.
    pub fn storage_size(&self) -> usize {
        if self.kind.is_reference_like() {
            REF_SIZE
        } else {
            self.instance_size
        }
    }

    /// This type followed by its base chain, most derived first.
    pub fn ancestry(&'static self) -> impl Iterator<Item = &'static TypeDescriptor> {
        core::iter::successors(Some(self), |ty| ty.base)
    }

    /// True if a value of type `other` can be stored in a location of this type.
    pub fn is_assignable_from(&self, other: &'static TypeDescriptor) -> bool {
        for ty in other.ancestry() {
            if ptr::eq(ty, self) {
                return true;
            }
            if self.kind == TypeKind::Interface
                && ty.own_interfaces().any(|iface| iface.extends_interface(self))
            {
                return true;
            }
        }
        false
    }

    fn extends_interface(&self, target: &TypeDescriptor) -> bool {
        ptr::eq(self, target)
            || self
                .interfaces
                .iter()
                .any(|iface| iface.extends_interface(target))
    }

    /// The nearest finalizer declared along the base chain.
    pub fn finalizer(&'static self) -> Option<Finalizer> {
        self.ancestry().find_map(|ty| ty.finalizer)
    }

    /// True if an instance body contains anything the collector must visit.
    pub fn has_references(&'static self) -> bool {
        match self.kind {
            TypeKind::Array | TypeKind::Delegate => true,
            TypeKind::String | TypeKind::Interface => false,
            _ => self.ancestry().any(|ty| {
                ty.mark_targets.iter().any(|target| match target {
                    MarkTarget::Reference(_) => true,
                    MarkTarget::Value { ty, .. } => ty.has_references(),
                })
            }),
        }
    }

    /// Flattened absolute reference offsets, base chain included.
    pub fn reference_offsets(&'static self) -> Vec<usize> {
        let mut offsets = Vec::new();
        self.collect_offsets(0, &mut offsets);
        offsets
    }

    fn collect_offsets(&'static self, base_offset: usize, out: &mut Vec<usize>) {
        for ty in self.ancestry() {
            for target in ty.mark_targets {
                match *target {
                    MarkTarget::Reference(offset) => out.push(base_offset + offset),
                    MarkTarget::Value { offset, ty } => ty.collect_offsets(base_offset + offset, out),
                }
            }
        }
    }

    /// Check the descriptor for internal consistency, aborting on the first defect.
    pub fn validate(&'static self) {
        let corrupt = |detail| {
            fatal(FatalError::CorruptMetadata {
                type_name: self.name,
                detail,
            })
        };

        if matches!(
            self.kind,
            TypeKind::Array | TypeKind::String | TypeKind::Delegate | TypeKind::Interface
        ) && !self.mark_targets.is_empty()
        {
            corrupt("runtime-shaped kinds cannot declare mark targets");
        }

        if let Some(base) = self.base {
            if self.kind == TypeKind::Reference
                && base.kind == TypeKind::Reference
                && base.instance_size > self.instance_size
            {
                corrupt("instance is smaller than its base type");
            }
        }

        if self.kind == TypeKind::Interface && !self.interface_vtables.is_empty() {
            corrupt("interfaces cannot carry interface method tables");
        }
        for table in self.interface_vtables {
            if table.interface.kind != TypeKind::Interface {
                corrupt("interface method table names a non-interface type");
            }
        }

        for target in self.mark_targets {
            match *target {
                MarkTarget::Reference(offset) => {
                    if offset % align_of::<usize>() != 0 {
                        corrupt("reference offset is not pointer aligned");
                    }
                    if offset + REF_SIZE > self.instance_size {
                        corrupt("reference offset outside instance bounds");
                    }
                }
                MarkTarget::Value { offset, ty } => {
                    if !ty.kind.is_value_like() {
                        corrupt("embedded field is not a value type");
                    }
                    if offset + ty.instance_size > self.instance_size {
                        corrupt("embedded value outside instance bounds");
                    }
                    ty.validate();
                }
            }
        }
    }
}

/// Descriptors are compared by identity, never by content.
impl PartialEq for TypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self, other)
    }
}

impl Eq for TypeDescriptor {}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("size", &self.instance_size)
            .field("base", &self.base.map(|b| b.name))
            .finish()
    }
}

/// Index of a global reference static declared in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StaticSlot(pub(crate) u16);

impl StaticSlot {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The set of types and static reference slots known to a program image.
///
/// Built during static initialization and moved into the runtime by
/// [`Runtime::initialize`], after which it is read-only.
pub struct TypeRegistry {
    types: Vec<&'static TypeDescriptor>,
    statics: Vec<&'static str>,
}

impl TypeRegistry {
    /// A registry holding the core library types.
    pub fn new() -> Self {
        let mut registry = Self {
            types: Vec::new(),
            statics: Vec::new(),
        };
        for ty in builtins::ALL {
            registry.register(ty);
        }
        registry
    }

    /// Validate and add a descriptor, its base chain and embedded value types.
    pub fn register(&mut self, ty: &'static TypeDescriptor) -> &'static TypeDescriptor {
        if self.contains(ty) {
            return ty;
        }
        ty.validate();
        self.types.push(ty);
        log::trace!("registered type {} ({:?}, {} bytes)", ty.name, ty.kind, ty.instance_size);

        if let Some(base) = ty.base {
            self.register(base);
        }
        for target in ty.mark_targets {
            if let MarkTarget::Value { ty: field_ty, .. } = target {
                self.register(field_ty);
            }
        }
        for iface in ty.own_interfaces() {
            self.register(iface);
        }
        ty
    }

    /// Reserve a global reference static.
    pub fn declare_static(&mut self, name: &'static str) -> StaticSlot {
        let index = self.statics.len();
        assert!(index < u16::MAX as usize, "too many static reference slots");
        self.statics.push(name);
        StaticSlot(index as u16)
    }

    pub fn contains(&self, ty: &TypeDescriptor) -> bool {
        self.types.iter().any(|known| ptr::eq(*known, ty))
    }

    pub fn find(&self, name: &str) -> Option<&'static TypeDescriptor> {
        self.types.iter().copied().find(|ty| ty.name == name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static TypeDescriptor> + '_ {
        self.types.iter().copied()
    }

    pub fn static_count(&self) -> usize {
        self.statics.len()
    }

    pub fn static_name(&self, slot: StaticSlot) -> &'static str {
        self.statics[slot.index()]
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.types.len())
            .field("statics", &self.statics.len())
            .finish()
    }
}
