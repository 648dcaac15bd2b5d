//! Raw, alignment-aware `mmap`/`munmap` wrappers used by the tracked
//! registry.
//!
//! Reproduces `original_source/src/tracked_alloc.c`'s `aligned_mmap` /
//! `aligned_munmap` slop-trimming algorithm: request `size` rounded up to a
//! page plus one full `alignment` of padding, then trim whatever head/tail
//! slop is left so the returned region starts exactly on an `alignment`
//! boundary.

use std::ffi::c_void;
use std::io;
use std::sync::OnceLock;

use crate::probes;

/// glibc/Linux kernel value for `MAP_FIXED_NOREPLACE`. Not exposed by every
/// `libc` crate version, so it is spelled out here; see
/// `include/uapi/asm-generic/mman-common.h` in the Linux source.
const MAP_FIXED_NOREPLACE: i32 = 0x0010_0000;

fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize })
}

#[inline]
fn round_up(value: usize, multiple: usize) -> usize {
    (value + multiple - 1) & !(multiple - 1)
}

/// Requests a fresh, zero-filled mapping of `size` bytes (rounded up to a
/// page), aligned to `alignment` (a power of two), placed near `hint`.
/// `hint` is a heuristic only; the kernel is free to place the mapping
/// elsewhere.
///
/// Returns `None` on failure, having already emitted the `mmap_failed`
/// probe.
pub fn aligned_mmap(size: usize, alignment: usize, hint: usize) -> Option<*mut u8> {
    debug_assert!(alignment.is_power_of_two());

    if size > isize::MAX as usize {
        return None;
    }

    let rounded_size = round_up(size, page_size());
    let padded_size = rounded_size + alignment;

    let map = unsafe {
        libc::mmap(
            hint as *mut c_void,
            padded_size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };

    if map == libc::MAP_FAILED {
        let errno = io::Error::last_os_error().raw_os_error().unwrap_or(0);
        probes::mmap_failed(size as u64, alignment as u64, padded_size as u64, errno);
        return None;
    }

    let map_begin = map as usize;
    let map_end = map_begin + padded_size;

    let chunk_begin = round_up(map_begin, alignment);
    if chunk_begin != map_begin {
        let slop = chunk_begin - map_begin;
        let r = unsafe { libc::munmap(map_begin as *mut c_void, slop) };
        assert_eq!(r, 0, "poireau: header slop munmap failed");
    }

    let chunk_end = chunk_begin + rounded_size;
    if chunk_end != map_end {
        let slop = map_end - chunk_end;
        let r = unsafe { libc::munmap(chunk_end as *mut c_void, slop) };
        assert_eq!(r, 0, "poireau: trailer slop munmap failed");
    }

    Some(chunk_begin as *mut u8)
}

/// Releases a mapping previously returned by [`aligned_mmap`].
pub fn aligned_munmap(ptr: *mut u8, size: usize) {
    if ptr.is_null() {
        return;
    }

    let rounded_size = round_up(size, page_size());
    let r = unsafe { libc::munmap(ptr as *mut c_void, rounded_size) };
    assert_eq!(r, 0, "poireau: release munmap failed");
}

/// Shrinks a mapping in place by unmapping the trailing pages beyond
/// `new_size`. Cannot fail: `munmap`-ing a subset of an existing mapping
/// always succeeds.
pub fn shrink_in_place(ptr: *mut u8, old_size: usize, new_size: usize) {
    let old_rounded = round_up(old_size, page_size());
    let new_rounded = round_up(new_size, page_size());
    debug_assert!(new_rounded <= old_rounded);

    if new_rounded == old_rounded {
        return;
    }

    let trim_start = (ptr as usize) + new_rounded;
    let trim_len = old_rounded - new_rounded;
    let r = unsafe { libc::munmap(trim_start as *mut c_void, trim_len) };
    assert_eq!(r, 0, "poireau: shrink munmap failed");
}

/// Attempts to grow a mapping in place by requesting the trailing byte
/// range at a fixed address just past the current mapping's last page.
///
/// Uses `MAP_FIXED_NOREPLACE` when available so the kernel refuses outright
/// rather than silently placing the mapping elsewhere; on kernels too old
/// to know that flag, falls back to `MAP_FIXED` and verifies the returned
/// address, undoing the mapping if the kernel relocated it anyway.
///
/// Returns `true` on success (the mapping now covers `new_size` bytes).
pub fn grow_in_place(ptr: *mut u8, old_size: usize, new_size: usize) -> bool {
    let old_rounded = round_up(old_size, page_size());
    let new_rounded = round_up(new_size, page_size());
    debug_assert!(new_rounded >= old_rounded);

    if new_rounded == old_rounded {
        return true;
    }

    let grow_start = (ptr as usize) + old_rounded;
    let grow_len = new_rounded - old_rounded;

    let map = unsafe {
        libc::mmap(
            grow_start as *mut c_void,
            grow_len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | MAP_FIXED_NOREPLACE,
            -1,
            0,
        )
    };

    if map == libc::MAP_FAILED {
        return false;
    }

    if map as usize != grow_start {
        // Either MAP_FIXED_NOREPLACE isn't supported and the kernel treated
        // it as a plain hint, or (should never happen under NOREPLACE) it
        // relocated us anyway. Either way, undo and report failure.
        let actual_len = round_up(grow_len, page_size());
        let r = unsafe { libc::munmap(map, actual_len) };
        assert_eq!(r, 0, "poireau: undo-grow munmap failed");
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_up_is_identity_on_aligned_values() {
        assert_eq!(round_up(4096, 4096), 4096);
        assert_eq!(round_up(0, 4096), 0);
    }

    #[test]
    fn round_up_rounds_towards_next_multiple() {
        assert_eq!(round_up(1, 4096), 4096);
        assert_eq!(round_up(4097, 4096), 8192);
    }

    #[test]
    fn aligned_mmap_returns_aligned_pointer_and_is_released_cleanly() {
        let alignment = 1 << 20; // 1 MiB, to keep the test light.
        let ptr = aligned_mmap(4096, alignment, 0).expect("mmap should succeed");
        assert_eq!(ptr as usize % alignment, 0);
        aligned_munmap(ptr, 4096);
    }

    #[test]
    fn shrink_then_grow_round_trips() {
        let alignment = 1 << 20;
        let ptr = aligned_mmap(page_size() * 4, alignment, 0).expect("mmap should succeed");
        shrink_in_place(ptr, page_size() * 4, page_size());
        assert!(grow_in_place(ptr, page_size(), page_size() * 4));
        aligned_munmap(ptr, page_size() * 4);
    }
}
