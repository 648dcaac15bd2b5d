//! The interposed `malloc`/`calloc`/`realloc`/`free` entry points.
//!
//! This module is the only place the rest of the crate is exposed to the C
//! ABI. Each exported function either forwards straight to the real
//! allocator (found once via `dlsym(RTLD_NEXT, ...)`, the resolution order
//! following `original_source/src/shim.c`'s `FOREACH_WRAPPED(free, realloc,
//! malloc, calloc)`) or routes through [`crate::sampler`] and
//! [`crate::registry`] for the small sampled fraction.
//!
//! `dlsym` itself allocates on some libc implementations, which would
//! recurse straight back into these functions before `dlsym` has returned
//! anything to resolve to. The [`bootstrap`] null-returning stubs and the
//! `BOOTSTRAPPING` thread-local guard exist solely to break that cycle.

mod bootstrap;
mod copy;

use std::cell::Cell;
use std::ffi::c_void;
use std::ptr;
use std::sync::OnceLock;

use crate::probes;
use crate::registry::TrackedRegistry;
use crate::sampler::Sampler;

type MallocFn = unsafe extern "C" fn(usize) -> *mut c_void;
type CallocFn = unsafe extern "C" fn(usize, usize) -> *mut c_void;
type ReallocFn = unsafe extern "C" fn(*mut c_void, usize) -> *mut c_void;
type FreeFn = unsafe extern "C" fn(*mut c_void);

thread_local! {
    /// Set for the duration of a `dlsym` lookup on this thread, so any
    /// allocation `dlsym` itself triggers is served from the null-returning
    /// bootstrap stubs instead of recursing back into symbol resolution.
    static BOOTSTRAPPING: Cell<bool> = Cell::new(false);
}

unsafe fn resolve<F>(name: &[u8]) -> F {
    BOOTSTRAPPING.with(|flag| flag.set(true));
    let sym = libc::dlsym(libc::RTLD_NEXT, name.as_ptr().cast());
    BOOTSTRAPPING.with(|flag| flag.set(false));

    assert!(
        !sym.is_null(),
        "poireau: dlsym(RTLD_NEXT) failed to resolve a real allocator symbol"
    );
    // SAFETY: `F` is always one of the four `*Fn` type aliases above, and
    // the caller passes a name known to resolve to that exact C signature.
    std::mem::transmute_copy::<*mut c_void, F>(&sym)
}

fn real_free() -> FreeFn {
    static REAL: OnceLock<FreeFn> = OnceLock::new();
    *REAL.get_or_init(|| unsafe { resolve(b"free\0") })
}

fn real_realloc() -> ReallocFn {
    static REAL: OnceLock<ReallocFn> = OnceLock::new();
    *REAL.get_or_init(|| unsafe { resolve(b"realloc\0") })
}

fn real_malloc() -> MallocFn {
    static REAL: OnceLock<MallocFn> = OnceLock::new();
    *REAL.get_or_init(|| unsafe { resolve(b"malloc\0") })
}

fn real_calloc() -> CallocFn {
    static REAL: OnceLock<CallocFn> = OnceLock::new();
    *REAL.get_or_init(|| unsafe { resolve(b"calloc\0") })
}

#[inline]
fn bootstrapping() -> bool {
    BOOTSTRAPPING.with(|flag| flag.get())
}

unsafe fn dispatch_malloc(size: usize) -> *mut c_void {
    if !Sampler::test(size) {
        return real_malloc()(size);
    }

    // A positive `test` on a thread's very first allocation just means the
    // thread had no debt yet, not a genuine Poisson arrival; `reset`
    // reports that case so we can skip tracking it.
    if Sampler::reset() {
        return real_malloc()(size);
    }

    match TrackedRegistry::get(size) {
        Some((ptr, id)) => {
            probes::malloc(id, ptr, size as u64);
            ptr as *mut c_void
        }
        None => real_malloc()(size),
    }
}

unsafe fn dispatch_calloc(num: usize, size: usize) -> *mut c_void {
    let total = match num.checked_mul(size) {
        Some(total) => total,
        None => {
            probes::calloc_overflow(num as u64, size as u64);
            return ptr::null_mut();
        }
    };

    if !Sampler::test(total) {
        return real_calloc()(num, size);
    }
    if Sampler::reset() {
        return real_calloc()(num, size);
    }

    match TrackedRegistry::get(total) {
        Some((ptr, id)) => {
            // Anonymous mmap pages arrive zero-filled, satisfying calloc's
            // contract without an explicit memset.
            probes::calloc(num as u64, size as u64, id, ptr, total as u64);
            ptr as *mut c_void
        }
        None => real_calloc()(num, size),
    }
}

unsafe fn dispatch_free(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }

    if TrackedRegistry::is_tracked(ptr as *const u8) {
        let info = TrackedRegistry::info(ptr as *const u8);
        probes::free(info.id, ptr as *const u8, info.size as u64);
        TrackedRegistry::put(ptr as *mut u8);
        return;
    }

    real_free()(ptr);
}

unsafe fn realloc_untracked(ptr: *mut c_void, new_size: usize) -> *mut c_void {
    if !Sampler::test(new_size) {
        return real_realloc()(ptr, new_size);
    }
    if Sampler::reset() {
        return real_realloc()(ptr, new_size);
    }

    match TrackedRegistry::get(new_size) {
        Some((new_ptr, id)) => {
            // The old allocation's true size is unknown (we never tracked
            // it), so copy defensively rather than risk reading past its end.
            copy::fault_tolerant_copy(new_ptr, ptr as *const u8, new_size);
            real_free()(ptr);
            probes::realloc(ptr as *const u8, 0, id, new_ptr, new_size as u64);
            new_ptr as *mut c_void
        }
        None => real_realloc()(ptr, new_size),
    }
}

unsafe fn realloc_tracked(ptr: *mut u8, new_size: usize) -> *mut c_void {
    let info = TrackedRegistry::info(ptr as *const u8);
    let old_id = info.id;
    let old_size = info.size;

    if !Sampler::test(new_size) {
        // This resize wouldn't itself have been sampled; let the
        // allocation lapse back to a regular, untracked block rather than
        // keep paying for a dedicated 1 GiB-aligned mapping.
        let new_ptr = real_malloc()(new_size);
        if !new_ptr.is_null() {
            let copy_len = new_size.min(old_size);
            ptr::copy_nonoverlapping(ptr, new_ptr as *mut u8, copy_len);
            probes::realloc_to_regular(
                old_id,
                ptr as *const u8,
                old_size as u64,
                new_ptr as *const u8,
                new_size as u64,
            );
            TrackedRegistry::put(ptr);
        }
        return new_ptr;
    }

    if TrackedRegistry::resize(ptr, new_size) {
        probes::realloc_from_tracked(
            old_id,
            ptr as *const u8,
            old_size as u64,
            old_id,
            ptr as *const u8,
            new_size as u64,
        );
        return ptr as *mut c_void;
    }

    // In-place resize couldn't claim the adjoining pages; migrate to a
    // fresh tracked region.
    match TrackedRegistry::get(new_size) {
        Some((new_ptr, new_id)) => {
            let copy_len = new_size.min(old_size);
            ptr::copy_nonoverlapping(ptr, new_ptr, copy_len);
            probes::realloc_from_tracked(
                old_id,
                ptr as *const u8,
                old_size as u64,
                new_id,
                new_ptr,
                new_size as u64,
            );
            TrackedRegistry::put(ptr);
            new_ptr as *mut c_void
        }
        None => {
            // Both the in-place grow and a fresh tracked mapping failed;
            // fall back to a regular allocation rather than fail the call.
            let new_ptr = real_malloc()(new_size);
            if !new_ptr.is_null() {
                let copy_len = new_size.min(old_size);
                ptr::copy_nonoverlapping(ptr, new_ptr as *mut u8, copy_len);
                TrackedRegistry::put(ptr);
            }
            new_ptr
        }
    }
}

unsafe fn dispatch_realloc(ptr: *mut c_void, new_size: usize) -> *mut c_void {
    if ptr.is_null() {
        return dispatch_malloc(new_size);
    }
    if new_size == 0 {
        dispatch_free(ptr);
        return ptr::null_mut();
    }

    if TrackedRegistry::is_tracked(ptr as *const u8) {
        realloc_tracked(ptr as *mut u8, new_size)
    } else {
        realloc_untracked(ptr, new_size)
    }
}

/// Interposed `malloc`.
///
/// # Safety
///
/// Must only be called the way the C ABI calls `malloc`: any `size`, no
/// aliasing requirements on the caller's part.
#[no_mangle]
pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
    if bootstrapping() {
        return bootstrap::malloc(size);
    }
    dispatch_malloc(size)
}

/// Interposed `calloc`.
///
/// # Safety
///
/// Must only be called the way the C ABI calls `calloc`.
#[no_mangle]
pub unsafe extern "C" fn calloc(num: usize, size: usize) -> *mut c_void {
    if bootstrapping() {
        return bootstrap::calloc(num, size);
    }
    dispatch_calloc(num, size)
}

/// Interposed `realloc`.
///
/// # Safety
///
/// `ptr` must be `NULL` or a value previously returned by this crate's
/// `malloc`/`calloc`/`realloc` (or, for untracked pointers, by the real
/// allocator reached through them).
#[no_mangle]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    if bootstrapping() {
        return bootstrap::realloc(ptr, size);
    }
    dispatch_realloc(ptr, size)
}

/// Interposed `free`.
///
/// # Safety
///
/// `ptr` must be `NULL` or a value previously returned by this crate's
/// `malloc`/`calloc`/`realloc`.
#[no_mangle]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    if bootstrapping() {
        return bootstrap::free(ptr);
    }
    dispatch_free(ptr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malloc_free_round_trip_through_the_real_allocator() {
        unsafe {
            let ptr = malloc(64);
            assert!(!ptr.is_null());
            free(ptr);
        }
    }

    #[test]
    fn calloc_zeroes_memory() {
        unsafe {
            let ptr = calloc(8, 8) as *mut u8;
            assert!(!ptr.is_null());
            let slice = std::slice::from_raw_parts(ptr, 64);
            assert!(slice.iter().all(|&b| b == 0));
            free(ptr as *mut c_void);
        }
    }

    #[test]
    fn calloc_overflow_is_reported_and_returns_null() {
        unsafe {
            let ptr = calloc(usize::MAX, 2);
            assert!(ptr.is_null());
        }
    }

    #[test]
    fn realloc_null_behaves_like_malloc() {
        unsafe {
            let ptr = realloc(ptr::null_mut(), 32);
            assert!(!ptr.is_null());
            free(ptr);
        }
    }

    #[test]
    fn realloc_to_zero_frees_and_returns_null() {
        unsafe {
            let ptr = malloc(32);
            assert!(realloc(ptr, 0).is_null());
        }
    }

    #[test]
    fn realloc_preserves_contents_on_growth() {
        unsafe {
            let ptr = malloc(16) as *mut u8;
            for i in 0..16u8 {
                *ptr.add(i as usize) = i;
            }
            let grown = realloc(ptr as *mut c_void, 64) as *mut u8;
            assert!(!grown.is_null());
            for i in 0..16u8 {
                assert_eq!(*grown.add(i as usize), i);
            }
            free(grown as *mut c_void);
        }
    }
}
