//! Delegates: an invocation list of (target, method) pairs.
//!
//! A single-cast delegate has one entry; combining produces a new delegate
//! whose list is the concatenation of both operands' lists. The method is an
//! opaque code pointer that translated code casts back to the right
//! signature; targets are traced like any other reference.

use alloc::vec::Vec;
use core::mem::{align_of, size_of};
use core::ptr;

use crate::error::{fatal, FatalError, RtResult, RuntimeError};
use crate::frame::Frame;
use crate::handles::HandleKind;
use crate::heap::align_up;
use crate::object::ObjRef;
use crate::runtime::Runtime;
use crate::types::{TypeDescriptor, TypeKind};

#[repr(C)]
pub(crate) struct DelegateHeader {
    pub(crate) count: usize,
}

/// One entry of an invocation list.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelegateEntry {
    /// `None` for a static method.
    pub target: Option<ObjRef>,
    pub method: *const (),
}

const MISMATCHED_TYPES: RuntimeError = RuntimeError::Argument {
    detail: "delegates must be of the same type",
};

pub(crate) const DELEGATE_DATA_OFFSET: usize =
    align_up(size_of::<DelegateHeader>(), align_of::<DelegateEntry>());

impl Runtime {
    /// Allocate a single-cast delegate of type `ty`.
    pub fn new_delegate(
        &self,
        ty: &'static TypeDescriptor,
        target: Option<ObjRef>,
        method: *const (),
    ) -> ObjRef {
        self.create_delegate(ty, &[DelegateEntry { target, method }])
    }

    fn create_delegate(&self, ty: &'static TypeDescriptor, entries: &[DelegateEntry]) -> ObjRef {
        if ty.kind() != TypeKind::Delegate {
            fatal(FatalError::CorruptMetadata {
                type_name: ty.name(),
                detail: "not a delegate type",
            });
        }
        for entry in entries {
            if let Some(target) = entry.target {
                self.checked_type(target);
            }
        }
        // The entries are copied by value; keep their targets alive across
        // the allocation.
        let handles: Vec<_> = entries
            .iter()
            .filter_map(|entry| entry.target)
            .map(|target| self.alloc_handle(Some(target), HandleKind::Normal))
            .collect();

        let body = DELEGATE_DATA_OFFSET + entries.len() * size_of::<DelegateEntry>();
        let d = self.allocate(ty, body);
        for handle in handles {
            self.free_handle(handle);
        }
        // SAFETY: the body holds the header and `entries.len()` entries.
        unsafe {
            ptr::write(d.body_ptr() as *mut DelegateHeader, DelegateHeader { count: entries.len() });
            ptr::copy_nonoverlapping(
                entries.as_ptr(),
                d.body_ptr().add(DELEGATE_DATA_OFFSET) as *mut DelegateEntry,
                entries.len(),
            );
        }
        d
    }

    fn delegate_parts(&self, d: ObjRef) -> RtResult<(&'static TypeDescriptor, *const DelegateEntry, usize)> {
        let ty = self.checked_type(d);
        if ty.kind() != TypeKind::Delegate {
            return Err(RuntimeError::cast(crate::builtins::DELEGATE.name(), ty.name()));
        }
        // SAFETY: delegate bodies start with a `DelegateHeader`.
        let count = unsafe { ptr::read(d.body_ptr() as *const DelegateHeader) }.count;
        let entries = d.body_ptr().wrapping_add(DELEGATE_DATA_OFFSET) as *const DelegateEntry;
        Ok((ty, entries, count))
    }

    /// Copy of the invocation list, in call order.
    pub fn delegate_entries(&self, d: ObjRef) -> RtResult<Vec<DelegateEntry>> {
        let (_, entries, count) = self.delegate_parts(d)?;
        // SAFETY: `count` entries follow the header.
        Ok(unsafe { core::slice::from_raw_parts(entries, count) }.to_vec())
    }

    pub fn delegate_count(&self, d: ObjRef) -> RtResult<usize> {
        Ok(self.delegate_parts(d)?.2)
    }

    /// `Delegate.Combine`: null operands are identities; otherwise both must
    /// have the same delegate type, or the call fails with `Argument`.
    pub fn combine_delegates(&self, a: Option<ObjRef>, b: Option<ObjRef>) -> RtResult<Option<ObjRef>> {
        let (a, b) = match (a, b) {
            (None, other) | (other, None) => return Ok(other),
            (Some(a), Some(b)) => (a, b),
        };
        self.with_frame(|frame: &Frame<2>| {
            frame.set(0, Some(a));
            frame.set(1, Some(b));
            let (ty_a, _, _) = self.delegate_parts(a)?;
            let (ty_b, _, _) = self.delegate_parts(b)?;
            if ty_a != ty_b {
                return Err(MISMATCHED_TYPES);
            }
            let mut entries = self.delegate_entries(a)?;
            entries.extend(self.delegate_entries(b)?);
            Ok(Some(self.create_delegate(ty_a, &entries)))
        })
    }

    /// `Delegate.Remove`: drop the last occurrence of `value`'s invocation
    /// list from `source`.
    pub fn remove_delegate(&self, source: Option<ObjRef>, value: Option<ObjRef>) -> RtResult<Option<ObjRef>> {
        let (source, value) = match (source, value) {
            (None, _) => return Ok(None),
            (source, None) => return Ok(source),
            (Some(s), Some(v)) => (s, v),
        };
        self.with_frame(|frame: &Frame<2>| {
            frame.set(0, Some(source));
            frame.set(1, Some(value));
            let (ty, _, _) = self.delegate_parts(source)?;
            if self.delegate_parts(value)?.0 != ty {
                return Err(MISMATCHED_TYPES);
            }
            let list = self.delegate_entries(source)?;
            let remove = self.delegate_entries(value)?;
            if remove.is_empty() || remove.len() > list.len() {
                return Ok(Some(source));
            }
            let found = (0..=list.len() - remove.len())
                .rev()
                .find(|&start| list[start..start + remove.len()] == remove[..]);
            match found {
                None => Ok(Some(source)),
                Some(_) if remove.len() == list.len() => Ok(None),
                Some(start) => {
                    let mut kept = list[..start].to_vec();
                    kept.extend_from_slice(&list[start + remove.len()..]);
                    Ok(Some(self.create_delegate(ty, &kept)))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins;
    use crate::config::RuntimeConfig;
    use crate::types::TypeRegistry;

    static ACTION: TypeDescriptor =
        TypeDescriptor::new("System.Action", TypeKind::Delegate, 0, Some(&builtins::DELEGATE));
    static PREDICATE: TypeDescriptor =
        TypeDescriptor::new("System.Predicate", TypeKind::Delegate, 0, Some(&builtins::DELEGATE));

    fn first() -> u32 {
        1
    }

    fn second() -> u32 {
        2
    }

    fn runtime() -> Runtime {
        let mut types = TypeRegistry::new();
        types.register(&ACTION);
        types.register(&PREDICATE);
        Runtime::initialize(RuntimeConfig::new().heap_size(4096), types).unwrap()
    }

    #[test]
    fn combine_concatenates_invocation_lists() {
        let rt = runtime();
        let target = rt.new_string("target");
        let a = rt.new_delegate(&ACTION, Some(target), first as *const ());
        let b = rt.new_delegate(&ACTION, None, second as *const ());

        let both = rt.combine_delegates(Some(a), Some(b)).unwrap().unwrap();
        let entries = rt.delegate_entries(both).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].target, Some(target));
        assert_eq!(entries[1].method, second as *const ());

        assert_eq!(rt.combine_delegates(None, Some(b)), Ok(Some(b)));
        assert_eq!(rt.combine_delegates(None, None), Ok(None));
    }

    #[test]
    fn combining_different_delegate_types_fails() {
        let rt = runtime();
        let a = rt.new_delegate(&ACTION, None, first as *const ());
        let p = rt.new_delegate(&PREDICATE, None, first as *const ());
        let err = rt.combine_delegates(Some(a), Some(p)).unwrap_err();
        assert_eq!(err.exception_name(), "System.ArgumentException");
        assert_eq!(rt.remove_delegate(Some(a), Some(p)), Err(err));
    }

    #[test]
    fn remove_drops_the_last_occurrence() {
        let rt = runtime();
        let a = rt.new_delegate(&ACTION, None, first as *const ());
        let b = rt.new_delegate(&ACTION, None, second as *const ());
        let ab = rt.combine_delegates(Some(a), Some(b)).unwrap();
        let aba = rt.combine_delegates(ab, Some(a)).unwrap();

        let without_a = rt.remove_delegate(aba, Some(a)).unwrap().unwrap();
        let methods: Vec<_> = rt
            .delegate_entries(without_a)
            .unwrap()
            .iter()
            .map(|entry| entry.method)
            .collect();
        assert_eq!(methods, [first as *const (), second as *const ()]);
        assert_eq!(rt.remove_delegate(Some(a), Some(a)), Ok(None));
    }
}
