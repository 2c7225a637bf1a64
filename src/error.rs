//! Runtime error types.
//!
//! Two families exist. [`RuntimeError`] is recoverable: it is returned to
//! translated code and propagated like any managed exception. [`FatalError`]
//! describes a condition the runtime cannot survive; it is never returned,
//! only passed to [`fatal`], which reports it and aborts.

use core::fmt;

/// A recoverable runtime condition surfaced to translated call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeError {
    /// A checked conversion did not match the runtime type.
    Cast {
        expected: &'static str,
        actual: &'static str,
    },
    /// An array length was negative or too large to represent.
    InvalidLength { length: isize },
    /// An element index was outside `0..length`.
    IndexOutOfRange { index: usize, length: usize },
    /// A null reference was dereferenced (unbox of null, etc).
    NullReference,
    /// An argument was rejected by a core library method.
    Argument { detail: &'static str },
}

impl RuntimeError {
    pub fn cast(expected: &'static str, actual: &'static str) -> Self {
        RuntimeError::Cast { expected, actual }
    }

    /// The managed exception type this condition maps to.
    pub fn exception_name(&self) -> &'static str {
        match self {
            RuntimeError::Cast { .. } => "System.InvalidCastException",
            RuntimeError::InvalidLength { .. } => "System.OverflowException",
            RuntimeError::IndexOutOfRange { .. } => "System.IndexOutOfRangeException",
            RuntimeError::NullReference => "System.NullReferenceException",
            RuntimeError::Argument { .. } => "System.ArgumentException",
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Cast { expected, actual } => {
                write!(f, "{}: cannot cast {} to {}", self.exception_name(), actual, expected)
            }
            RuntimeError::InvalidLength { length } => {
                write!(f, "{}: invalid array length {}", self.exception_name(), length)
            }
            RuntimeError::IndexOutOfRange { index, length } => write!(
                f,
                "{}: index {} out of range for length {}",
                self.exception_name(),
                index,
                length
            ),
            RuntimeError::NullReference => {
                write!(f, "{}: object reference is null", self.exception_name())
            }
            RuntimeError::Argument { detail } => write!(f, "{}: {}", self.exception_name(), detail),
        }
    }
}

pub type RtResult<T> = Result<T, RuntimeError>;

/// An unrecoverable runtime condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalError {
    /// Allocation failed even after a full collection.
    OutOfMemory { requested: usize, capacity: usize },
    /// A type descriptor is inconsistent with its declared size or kind.
    CorruptMetadata {
        type_name: &'static str,
        detail: &'static str,
    },
    /// The frame chain no longer matches the link/unlink discipline.
    UnlinkedFrame { expected: usize, actual: usize },
    /// A reference does not point at the start of a live heap object.
    DanglingReference { address: usize },
    /// A heap block header is unreadable.
    CorruptHeap { offset: usize },
    /// A GC handle was used after it was freed.
    InvalidHandle(u32),
    /// The runtime was entered from inside a native call.
    NativeReentry,
    /// A lifecycle hook was called in the wrong state.
    Lifecycle(&'static str),
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalError::OutOfMemory { requested, capacity } => write!(
                f,
                "out of memory: {} bytes requested, heap capacity {} bytes",
                requested, capacity
            ),
            FatalError::CorruptMetadata { type_name, detail } => {
                write!(f, "corrupt metadata for {}: {}", type_name, detail)
            }
            FatalError::UnlinkedFrame { expected, actual } => write!(
                f,
                "unlinked frame: expected {:#x}, found {:#x}",
                expected, actual
            ),
            FatalError::DanglingReference { address } => {
                write!(f, "dangling reference to {:#x}", address)
            }
            FatalError::CorruptHeap { offset } => {
                write!(f, "corrupt heap block at offset {:#x}", offset)
            }
            FatalError::InvalidHandle(index) => write!(f, "invalid GC handle #{}", index),
            FatalError::NativeReentry => {
                write!(f, "runtime re-entered from inside a native call")
            }
            FatalError::Lifecycle(what) => write!(f, "lifecycle violation: {}", what),
        }
    }
}

/// Report a fatal condition and abort.
///
/// Diagnostic output is flushed before the panic so the message survives on
/// targets whose panic handler halts immediately.
#[cold]
#[inline(never)]
pub fn fatal(err: FatalError) -> ! {
    log::error!("fatal runtime error: {}", err);
    log::logger().flush();
    panic!("fatal runtime error: {}", err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn display_names_the_managed_exception() {
        let err = RuntimeError::cast("System.String", "System.Int32");
        assert_eq!(
            err.to_string(),
            "System.InvalidCastException: cannot cast System.Int32 to System.String"
        );
        assert_eq!(
            RuntimeError::IndexOutOfRange { index: 3, length: 0 }.exception_name(),
            "System.IndexOutOfRangeException"
        );
    }

    #[test]
    #[should_panic(expected = "out of memory")]
    fn fatal_panics_with_the_message() {
        fatal(FatalError::OutOfMemory {
            requested: 64,
            capacity: 32,
        });
    }
}
