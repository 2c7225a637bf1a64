//! ilrt: managed-object runtime for ahead-of-time translated bytecode.
//!
//! Programs compiled from a managed intermediate language into native code
//! link against this crate for everything the original virtual machine used
//! to provide: object allocation, type checks, boxing, arrays, strings,
//! delegates and a precise, non-moving mark-and-sweep garbage collector that
//! runs inside a single fixed-size heap region.
//!
//! # Architecture
//!
//! - **Types** (`types.rs`, `builtins.rs`): static type descriptors and the registry
//! - **Objects** (`object.rs`): header layout, references, field access, boxing
//! - **Dispatch** (`dispatch.rs`): virtual and interface method tables, `System.Object` virtuals
//! - **Heap** (`heap.rs`): bump + free-list block allocator with a block-start bitmap
//! - **Frames** (`frame.rs`): the explicit root chain kept by translated methods
//! - **Collector** (`gc.rs`, `handles.rs`): marking, finalization, weak/pinned handles
//! - **Runtime** (`runtime.rs`, `global.rs`): lifecycle and the allocation slow path
//!
//! # Usage
//!
//! ```rust
//! use ilrt::{builtins, Frame, Runtime, RuntimeConfig, TypeRegistry};
//!
//! let rt = Runtime::initialize(RuntimeConfig::new(), TypeRegistry::new()).unwrap();
//! rt.with_frame(|frame: &Frame<1>| {
//!     let arr = rt.new_array(&builtins::INT32, 3).unwrap();
//!     frame.set(0, Some(arr));
//!     rt.array_set(arr, 1, 250i32).unwrap();
//!     rt.collect();
//!     assert_eq!(rt.array_get::<i32>(arr, 1), Ok(250));
//! });
//! rt.shutdown();
//! ```

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod array;
pub mod builtins;
pub mod config;
pub mod delegate;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod gc;
pub mod global;
pub mod handles;
pub mod heap;
pub mod interop;
pub mod logger;
pub mod object;
pub mod primitives;
pub mod runtime;
pub mod string;
pub mod types;

pub use config::RuntimeConfig;
pub use delegate::DelegateEntry;
pub use error::{fatal, FatalError, RtResult, RuntimeError};
pub use frame::{Frame, FrameHeader};
pub use gc::CollectionReport;
pub use handles::{GcHandle, HandleKind};
pub use heap::{HeapRegion, HeapStats};
pub use object::{layout_of, Blittable, ObjRef, ObjectLayout};
pub use primitives::Primitive;
pub use runtime::Runtime;
pub use types::{
    InterfaceVTable, MarkTarget, Method, StaticSlot, TypeDescriptor, TypeKind, TypeRegistry,
};
