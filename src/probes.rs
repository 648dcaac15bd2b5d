//! USDT probe points fired for sampled allocation events.
//!
//! Declared once via the `usdt` crate's `dtrace_provider!` macro from
//! `poireau.d` (compiled by `build.rs`), giving `libpoireau` the provider a
//! `bpftrace`/`dtrace` script can attach to: `malloc`, `calloc`,
//! `calloc_overflow`, `realloc`, `realloc_from_tracked`,
//! `realloc_to_regular`, `free`, and `mmap_failed` (spec.md section 6).
//!
//! Every probe here is a no-op unless something has actually attached to
//! it; the `usdt` crate compiles each one down to a single predictable
//! branch over a static, so the uninstrumented cost of carrying these
//! calls on the allocation hot path is negligible.

usdt::dtrace_provider!("poireau.d");

/// Fires the `malloc` probe for a freshly sampled allocation.
#[inline]
pub fn malloc(id: u64, ptr: *const u8, size: u64) {
    malloc!(|| (id, ptr as usize, size));
}

/// Fires the `calloc` probe for a freshly sampled `calloc`.
#[inline]
pub fn calloc(num: u64, size: u64, id: u64, ptr: *const u8, requested: u64) {
    calloc!(|| (num, size, id, ptr as usize, requested));
}

/// Fires the `calloc_overflow` probe when `num * size` would overflow.
#[inline]
pub fn calloc_overflow(num: u64, size: u64) {
    calloc_overflow!(|| (num, size));
}

/// Fires the `realloc` probe when an untracked allocation graduates to a
/// tracked one.
#[inline]
pub fn realloc(old_ptr: *const u8, old_useful_size: u64, id: u64, new_ptr: *const u8, new_size: u64) {
    realloc!(|| (old_ptr as usize, old_useful_size, id, new_ptr as usize, new_size));
}

/// Fires the `realloc_from_tracked` probe when a tracked allocation is
/// resized, whether in place or by move.
#[inline]
pub fn realloc_from_tracked(
    old_id: u64,
    old_ptr: *const u8,
    old_size: u64,
    new_id: u64,
    new_ptr: *const u8,
    new_size: u64,
) {
    realloc_from_tracked!(|| (old_id, old_ptr as usize, old_size, new_id, new_ptr as usize, new_size));
}

/// Fires the `realloc_to_regular` probe when a tracked allocation is
/// resized down to a size the sampler no longer wants tracked.
#[inline]
pub fn realloc_to_regular(old_id: u64, old_ptr: *const u8, old_size: u64, new_ptr: *const u8, new_size: u64) {
    realloc_to_regular!(|| (old_id, old_ptr as usize, old_size, new_ptr as usize, new_size));
}

/// Fires the `free` probe when a tracked allocation is released.
#[inline]
pub fn free(id: u64, ptr: *const u8, size: u64) {
    free!(|| (id, ptr as usize, size));
}

/// Fires the `mmap_failed` probe when the registry cannot back a new
/// tracked allocation.
#[inline]
pub fn mmap_failed(size: u64, alignment: u64, padded_size: u64, errno: i32) {
    mmap_failed!(|| (size, alignment, padded_size, errno));
}
