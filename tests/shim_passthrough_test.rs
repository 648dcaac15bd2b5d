//! Exercises the overwhelmingly common case: a sample period wide enough
//! that ordinary allocations pass straight through to the real allocator
//! and the registry never sees them.
//!
//! Kept in its own test binary (`cargo test` gives each file under
//! `tests/` a fresh process) since the sample period is cached globally
//! for the life of the process the first time anything reads it.

use std::ffi::c_void;

#[test]
fn unsampled_allocations_pass_through_to_the_real_allocator() {
    std::env::set_var("POIREAU_SAMPLE_PERIOD_BYTES", "999999999999");
    std::env::set_var("POIREAU_QUIET", "1");

    unsafe {
        let ptr = poireau::shim::malloc(64) as *mut u8;
        assert!(!ptr.is_null());
        assert!(!poireau::TrackedRegistry::is_tracked(ptr));
        poireau::shim::free(ptr as *mut c_void);
    }
}

#[test]
fn untracked_free_of_a_stack_address_does_not_touch_the_registry() {
    // free() must treat anything not aligned to TRACKING_ALIGNMENT as a
    // regular pointer without consulting the table at all.
    let x = 0u8;
    assert!(!poireau::TrackedRegistry::is_tracked(&x as *const u8));
}
