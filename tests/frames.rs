//! Frame chain discipline.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;

use ilrt::{Frame, Runtime, RuntimeConfig, TypeRegistry};

fn runtime() -> Runtime {
    let config = RuntimeConfig::new().heap_size(8 * 1024).frame_checks(true);
    Runtime::initialize(config, TypeRegistry::new()).unwrap()
}

#[test]
fn nested_frames_restore_the_chain() {
    let rt = runtime();
    let frames: Vec<Frame<2>> = (0..5).map(|_| Frame::new()).collect();
    let before = rt.current_frame();

    for frame in &frames {
        unsafe { rt.link_frame(frame.as_raw()) };
    }
    assert_eq!(rt.frame_depth(), 5);
    assert!(ptr::eq(rt.current_frame(), frames[4].as_raw()));
    assert!(ptr::eq(unsafe { (*frames[4].as_raw()).prev() }, frames[3].as_raw()));

    for frame in frames.iter().rev() {
        unsafe { rt.unlink_frame(frame.as_raw()) };
    }
    assert_eq!(rt.current_frame(), before);
    assert_eq!(rt.frame_depth(), 0);
}

#[test]
#[should_panic(expected = "unlinked frame")]
fn out_of_order_unlink_is_detected() {
    let rt = runtime();
    let outer = Frame::<1>::new();
    let inner = Frame::<1>::new();
    unsafe {
        rt.link_frame(outer.as_raw());
        rt.link_frame(inner.as_raw());
        rt.unlink_frame(outer.as_raw());
    }
}

#[test]
fn with_frame_unlinks_on_unwind() {
    let rt = runtime();
    let result = catch_unwind(AssertUnwindSafe(|| {
        rt.with_frame(|_frame: &Frame<1>| {
            rt.with_frame(|_inner: &Frame<1>| panic!("managed exception"));
        })
    }));
    assert!(result.is_err());
    assert_eq!(rt.frame_depth(), 0);
    assert!(rt.current_frame().is_null());
}

#[test]
fn outer_roots_survive_inner_frames() {
    let rt = runtime();
    rt.with_frame(|outer: &Frame<1>| {
        outer.set(0, Some(rt.new_string("outer")));
        for _ in 0..10 {
            rt.with_frame(|inner: &Frame<2>| {
                inner.set(0, Some(rt.new_string("inner")));
                inner.set(1, Some(rt.new_string("inner too")));
                assert_eq!(rt.frame_depth(), 2);
            });
            rt.collect();
        }
        let report = rt.collect();
        assert_eq!(report.live_objects, 1);
        assert_eq!(rt.string_to_rust(outer.get(0).unwrap()).unwrap(), "outer");
    });
}

#[test]
fn cleared_slots_stop_rooting() {
    let rt = runtime();
    rt.with_frame(|frame: &Frame<3>| {
        for slot in 0..3 {
            frame.set(slot, Some(rt.new_string("x")));
        }
        assert_eq!(rt.collect().live_objects, 3);
        frame.clear();
        assert_eq!(rt.collect().live_objects, 0);
    });
}
