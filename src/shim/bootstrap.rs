//! Null-returning stubs installed as the initial values of the underlying
//! `malloc`/`calloc`/`realloc`/`free` entry points while this crate is
//! still resolving the real symbols via `dlsym`.
//!
//! spec.md section 4.3 is explicit about this: "Bootstrap malloc/calloc/
//! realloc return null (triggering the dynamic linker's fallback path,
//! which tolerates allocation failure); bootstrap free is a no-op." Any
//! allocation made during symbol resolution (some libc implementations
//! call `calloc` internally inside `dlsym`) must therefore fail exactly
//! the way a real allocator failing would, not silently succeed from a
//! side arena: the caller (here, the dynamic linker itself) already has to
//! tolerate `malloc` returning `NULL`, which is the only property this
//! bootstrap path is allowed to rely on.

use std::ffi::c_void;

/// Bootstrap `malloc`: always fails.
pub fn malloc(_size: usize) -> *mut c_void {
    std::ptr::null_mut()
}

/// Bootstrap `calloc`: always fails.
pub fn calloc(_num: usize, _size: usize) -> *mut c_void {
    std::ptr::null_mut()
}

/// Bootstrap `realloc`: always fails.
pub fn realloc(_ptr: *mut c_void, _size: usize) -> *mut c_void {
    std::ptr::null_mut()
}

/// Bootstrap `free`: a no-op, since nothing was ever allocated to free.
pub fn free(_ptr: *mut c_void) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malloc_calloc_realloc_return_null() {
        assert!(malloc(64).is_null());
        assert!(calloc(8, 8).is_null());
        assert!(realloc(std::ptr::null_mut(), 64).is_null());
    }

    #[test]
    fn free_is_harmless_on_any_pointer() {
        free(std::ptr::null_mut());
        free(0x1000 as *mut c_void);
    }
}
