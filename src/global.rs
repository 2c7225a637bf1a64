//! The process-wide runtime instance used by translated program images.
//!
//! Generated code calls [`initialize_runtime`] once during startup, reaches
//! the runtime through [`with_runtime`], and calls [`shutdown_runtime`] at
//! exit. The instance is owned by a `spin::Mutex` so lifecycle transitions
//! are ordered; the mutator itself runs without holding the lock.

use alloc::boxed::Box;
use core::sync::atomic::{AtomicUsize, Ordering};
use spin::Mutex;

use crate::config::RuntimeConfig;
use crate::error::{fatal, FatalError};
use crate::gc::CollectionReport;
use crate::runtime::Runtime;
use crate::types::TypeRegistry;

struct GlobalRuntime(Option<Box<Runtime>>);

// SAFETY: the runtime is only used by the single mutator thread. The mutex
// exists to sequence initialize/shutdown, not to share the runtime.
unsafe impl Send for GlobalRuntime {}

static RUNTIME: Mutex<GlobalRuntime> = Mutex::new(GlobalRuntime(None));

/// Calls to `with_runtime` currently in progress.
static ACTIVE: AtomicUsize = AtomicUsize::new(0);

/// Create the global runtime. Initializing twice is fatal.
pub fn initialize_runtime(config: RuntimeConfig, types: TypeRegistry) -> Result<(), &'static str> {
    let mut slot = RUNTIME.lock();
    if slot.0.is_some() {
        fatal(FatalError::Lifecycle("runtime initialized twice"));
    }
    slot.0 = Some(Box::new(Runtime::initialize(config, types)?));
    Ok(())
}

pub fn is_initialized() -> bool {
    RUNTIME.lock().0.is_some()
}

struct Leave;

impl Drop for Leave {
    fn drop(&mut self) {
        ACTIVE.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Run `f` against the global runtime. Fatal if it is not initialized.
pub fn with_runtime<T>(f: impl FnOnce(&Runtime) -> T) -> T {
    let runtime: *const Runtime = match RUNTIME.lock().0.as_deref() {
        Some(runtime) => runtime,
        None => fatal(FatalError::Lifecycle("runtime used before initialization")),
    };
    ACTIVE.fetch_add(1, Ordering::SeqCst);
    let _leave = Leave;
    // SAFETY: the box is only dropped by `shutdown_runtime`, which refuses
    // to run while ACTIVE is non-zero.
    f(unsafe { &*runtime })
}

/// `GC.Collect()` followed by pending finalizers.
pub fn request_collection() -> CollectionReport {
    with_runtime(|runtime| runtime.request_collection())
}

/// Tear the global runtime down. Fatal if it was never initialized or is
/// still in use.
pub fn shutdown_runtime() {
    if ACTIVE.load(Ordering::SeqCst) > 0 {
        fatal(FatalError::Lifecycle("runtime shut down while in use"));
    }
    let runtime = RUNTIME.lock().0.take();
    match runtime {
        Some(runtime) => (*runtime).shutdown(),
        None => fatal(FatalError::Lifecycle("runtime shut down before initialization")),
    }
}
