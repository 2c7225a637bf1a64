//! The process-wide runtime. Everything runs in one test because the
//! instance is shared by the whole test binary.

use std::panic::catch_unwind;

use ilrt::global::{
    initialize_runtime, is_initialized, request_collection, shutdown_runtime, with_runtime,
};
use ilrt::{Frame, RuntimeConfig, TypeRegistry};

#[test]
fn global_runtime_lifecycle() {
    assert!(!is_initialized());
    assert!(catch_unwind(|| with_runtime(|_| ())).is_err());
    assert!(catch_unwind(shutdown_runtime).is_err());

    initialize_runtime(RuntimeConfig::new().heap_size(8 * 1024), TypeRegistry::new()).unwrap();
    assert!(is_initialized());
    assert!(catch_unwind(|| {
        initialize_runtime(RuntimeConfig::new(), TypeRegistry::new())
    })
    .is_err());

    let kept = with_runtime(|rt| {
        rt.new_string("garbage");
        rt.with_frame(|frame: &Frame<1>| {
            frame.set(0, Some(rt.new_string("kept")));
            let report = request_collection();
            assert_eq!(report.live_objects, 1);
            rt.string_to_rust(frame.get(0).unwrap()).unwrap()
        })
    });
    assert_eq!(kept, "kept");

    assert!(catch_unwind(|| with_runtime(|_| shutdown_runtime())).is_err());

    shutdown_runtime();
    assert!(!is_initialized());
}
