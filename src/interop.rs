//! Calls into native code.
//!
//! While a native call is in progress the runtime refuses to allocate or
//! collect: heap memory handed out as raw pointers (array data, string
//! units, pinned bodies) must not change under the native callee. Because
//! the collector never moves objects, a pointer stays valid for as long as
//! its object is rooted.

use core::ffi::c_long;
use core::mem::size_of;
use core::time::Duration;

use crate::builtins;
use crate::error::{RtResult, RuntimeError};
use crate::object::{Blittable, ObjRef};
use crate::runtime::Runtime;
use crate::types::{TypeDescriptor, TypeKind};

struct LeaveNative<'a>(&'a Runtime);

impl Drop for LeaveNative<'_> {
    fn drop(&mut self) {
        let depth = &self.0.native_depth;
        depth.set(depth.get() - 1);
    }
}

impl Runtime {
    /// Run `f` as a native call. Allocation or collection inside `f` is fatal.
    pub fn native_call<T>(&self, f: impl FnOnce() -> T) -> T {
        self.native_depth.set(self.native_depth.get() + 1);
        let _leave = LeaveNative(self);
        f()
    }

    pub fn in_native_call(&self) -> bool {
        self.native_depth.get() > 0
    }

    /// Pointer to the first element and the element count, for passing a
    /// primitive array to native code.
    pub fn array_raw_parts<T: Blittable>(&self, arr: ObjRef) -> RtResult<(*mut T, usize)> {
        let (data, length, element) = self.array_data(arr)?;
        if !element.kind().is_value_like() || element.storage_size() != size_of::<T>() {
            return Err(RuntimeError::cast(element.name(), core::any::type_name::<T>()));
        }
        Ok((data as *mut T, length))
    }

    /// Pointer to a NUL-terminated UTF-16 copy-free view of a string.
    pub fn string_wide_ptr(&self, s: ObjRef) -> RtResult<*const u16> {
        Ok(self.string_parts(s)?.0)
    }
}

/// `time_t` as the Unix C libraries the runtime targets define it.
#[cfg(not(windows))]
pub type TimeT = c_long;
#[cfg(windows)]
pub type TimeT = i64;

/// `struct timespec` with the target C library's field widths.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeSpec {
    pub tv_sec: TimeT,
    pub tv_nsec: c_long,
}

// SAFETY: plain integers. Off Windows both are `long`, so there is no padding.
unsafe impl Blittable for TimeSpec {}

pub static TIMESPEC: TypeDescriptor = TypeDescriptor::new(
    "Interop.timespec",
    TypeKind::Value,
    size_of::<TimeSpec>(),
    Some(&builtins::VALUE_TYPE),
);

impl TimeSpec {
    /// Split a millisecond count the way a sleep call expects it.
    pub fn from_millis(ms: i32) -> Self {
        TimeSpec {
            tv_sec: (ms / 1000) as TimeT,
            tv_nsec: (ms % 1000) as c_long * 1_000_000,
        }
    }

    pub fn to_duration(self) -> Option<Duration> {
        let secs = u64::try_from(self.tv_sec).ok()?;
        let nanos = u32::try_from(self.tv_nsec).ok().filter(|n| *n < 1_000_000_000)?;
        Some(Duration::new(secs, nanos))
    }
}

/// Saturates at `TimeT::MAX` seconds.
impl From<Duration> for TimeSpec {
    fn from(duration: Duration) -> Self {
        TimeSpec {
            tv_sec: TimeT::try_from(duration.as_secs()).unwrap_or(TimeT::MAX),
            tv_nsec: duration.subsec_nanos() as c_long,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::types::TypeRegistry;

    fn runtime() -> Runtime {
        let mut types = TypeRegistry::new();
        types.register(&TIMESPEC);
        Runtime::initialize(RuntimeConfig::new().heap_size(4096), types).unwrap()
    }

    #[test]
    fn timespec_splits_milliseconds() {
        assert_eq!(TimeSpec::from_millis(1500), TimeSpec { tv_sec: 1, tv_nsec: 500_000_000 });
        assert_eq!(
            TimeSpec::from_millis(250).to_duration(),
            Some(Duration::from_millis(250))
        );
        assert_eq!(TimeSpec::from(Duration::from_micros(2_000_001)).tv_nsec, 1_000);
        assert_eq!(TimeSpec::from(Duration::MAX).tv_sec, TimeT::MAX);
    }

    #[cfg(not(windows))]
    #[test]
    fn timespec_fields_are_c_longs() {
        assert_eq!(size_of::<TimeSpec>(), 2 * size_of::<c_long>());
        assert_eq!(TIMESPEC.size(), size_of::<TimeSpec>());
    }

    #[test]
    fn native_depth_is_restored() {
        let rt = runtime();
        let inner = rt.native_call(|| rt.native_call(|| rt.in_native_call()));
        assert!(inner);
        assert!(!rt.in_native_call());
    }

    #[test]
    fn array_data_is_visible_to_native_code() {
        let rt = runtime();
        let arr = rt.new_array_from(&[1u32, 2, 3]);
        let (data, len) = rt.array_raw_parts::<u32>(arr).unwrap();
        let sum = rt.native_call(|| unsafe { core::slice::from_raw_parts(data, len) }.iter().sum::<u32>());
        assert_eq!(sum, 6);
        assert!(rt.array_raw_parts::<u64>(arr).is_err());
    }

    #[test]
    #[should_panic(expected = "re-entered from inside a native call")]
    fn allocating_inside_a_native_call_is_fatal() {
        let rt = runtime();
        rt.native_call(|| rt.new_string("nope"));
    }
}
