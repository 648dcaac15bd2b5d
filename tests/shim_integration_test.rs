//! End-to-end exercise of the exported `malloc`/`calloc`/`realloc`/`free`
//! symbols against a forced-sampling period, since `cargo test` links this
//! crate as an `rlib` rather than `LD_PRELOAD`ing the `cdylib`.

use std::ffi::c_void;

fn force_always_sample() {
    // SAFETY: test-only, single-threaded-enough for our purposes; other
    // tests in this binary don't depend on the sample period's value.
    std::env::set_var("POIREAU_SAMPLE_PERIOD_BYTES", "1");
    std::env::set_var("POIREAU_QUIET", "1");
}

#[test]
fn sampled_allocations_round_trip_through_the_registry() {
    force_always_sample();

    unsafe {
        let ptr = poireau::shim::malloc(4096) as *mut u8;
        assert!(!ptr.is_null());

        // Exercise the memory: a tracked allocation must be genuinely
        // writable, not just a bookkeeping entry.
        *ptr = 0xAB;
        assert_eq!(*ptr, 0xAB);

        poireau::shim::free(ptr as *mut c_void);
    }
}

#[test]
fn calloc_always_returns_zeroed_memory() {
    force_always_sample();

    unsafe {
        let ptr = poireau::shim::calloc(16, 16) as *mut u8;
        assert!(!ptr.is_null());
        let slice = std::slice::from_raw_parts(ptr, 256);
        assert!(slice.iter().all(|&b| b == 0));
        poireau::shim::free(ptr as *mut c_void);
    }
}

#[test]
fn realloc_growth_preserves_prefix_bytes() {
    force_always_sample();

    unsafe {
        let ptr = poireau::shim::malloc(32) as *mut u8;
        for i in 0..32u8 {
            *ptr.add(i as usize) = i;
        }

        let grown = poireau::shim::realloc(ptr as *mut c_void, 8192) as *mut u8;
        assert!(!grown.is_null());
        for i in 0..32u8 {
            assert_eq!(*grown.add(i as usize), i);
        }

        poireau::shim::free(grown as *mut c_void);
    }
}

#[test]
fn freeing_null_is_harmless() {
    unsafe {
        poireau::shim::free(std::ptr::null_mut());
    }
}
