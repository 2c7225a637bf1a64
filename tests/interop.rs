//! Handing managed memory to native functions.

use ilrt::interop::{TimeSpec, TIMESPEC};
use ilrt::{builtins, Frame, HandleKind, Runtime, RuntimeConfig, TypeRegistry};

fn runtime() -> Runtime {
    let mut types = TypeRegistry::new();
    types.register(&TIMESPEC);
    Runtime::initialize(RuntimeConfig::new().heap_size(8 * 1024), types).unwrap()
}

#[cfg(unix)]
#[test]
fn timespec_matches_the_c_library_layout() {
    use std::mem::{size_of, size_of_val};

    let native: libc::timespec = unsafe { std::mem::zeroed() };
    let base = &native as *const libc::timespec as usize;
    assert_eq!(size_of::<TimeSpec>(), size_of::<libc::timespec>());
    assert_eq!(size_of::<ilrt::interop::TimeT>(), size_of_val(&native.tv_sec));
    assert_eq!(std::mem::size_of::<std::ffi::c_long>(), size_of_val(&native.tv_nsec));

    let ours = TimeSpec::default();
    let ours_base = &ours as *const TimeSpec as usize;
    assert_eq!(
        &ours.tv_nsec as *const _ as usize - ours_base,
        &native.tv_nsec as *const _ as usize - base
    );
}

#[cfg(unix)]
#[test]
fn timespec_is_passed_to_nanosleep() {
    let rt = runtime();
    let boxed = rt.box_value(&TIMESPEC, TimeSpec::from_millis(1));
    let pinned = rt.alloc_handle(Some(boxed), HandleKind::Pinned);
    let request = rt.pinned_address(pinned).unwrap() as *const libc::timespec;

    let status = rt.native_call(|| unsafe { libc::nanosleep(request, std::ptr::null_mut()) });
    assert_eq!(status, 0);
    assert_eq!(
        rt.unbox::<TimeSpec>(Some(boxed), &TIMESPEC),
        Ok(TimeSpec { tv_sec: 0, tv_nsec: 1_000_000 })
    );
    rt.free_handle(pinned);
}

#[test]
fn strings_are_terminated_wide_buffers() {
    let rt = runtime();
    rt.with_frame(|frame: &Frame<1>| {
        let s = rt.new_string("wide");
        frame.set(0, Some(s));
        let data = rt.string_wide_ptr(s).unwrap();
        let len = rt.native_call(|| {
            let mut len = 0;
            while unsafe { *data.add(len) } != 0 {
                len += 1;
            }
            len
        });
        assert_eq!(len, 4);
    });
}

#[test]
fn native_code_writes_are_visible_after_the_call() {
    let rt = runtime();
    let arr = rt.new_array(&builtins::INT64, 4).unwrap();
    let (data, len) = rt.array_raw_parts::<i64>(arr).unwrap();
    rt.native_call(|| {
        let out = unsafe { std::slice::from_raw_parts_mut(data, len) };
        for (index, slot) in out.iter_mut().enumerate() {
            *slot = (index as i64) * 10;
        }
    });
    assert_eq!(rt.array_get::<i64>(arr, 3), Ok(30));
}

#[test]
#[should_panic(expected = "re-entered from inside a native call")]
fn collecting_from_a_native_callback_is_fatal() {
    let rt = runtime();
    rt.native_call(|| {
        rt.collect();
    });
}
