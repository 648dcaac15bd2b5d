//! The tracked-allocation registry.
//!
//! Every sampled allocation gets its own dedicated `mmap` region, aligned to
//! [`TRACKING_ALIGNMENT`], so that the region's base address alone
//! identifies which slot of a flat, address-indexed table holds its
//! metadata (spec.md section 5, "Tracked registry"). `free`/`realloc` on an
//! untracked pointer never touches this table at all beyond one alignment
//! check; only tracked pointers pay for a table lookup.
//!
//! Grounded in `original_source/src/tracked_alloc.c` for the slot layout and
//! the atomic publish/clear ordering, and in the teacher crate's
//! `tracking/stats.rs` for the `AtomicUsize`/`Ordering` idiom this module
//! generalizes to a full table instead of a handful of named counters.

mod mmap;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::OnceLock;

/// Alignment (and therefore minimum size) of every tracked `mmap` region:
/// 1 GiB. Chosen, as in the original, to make the slot index a cheap shift
/// of the pointer rather than a hash.
pub const TRACKING_ALIGNMENT: usize = 1 << 30;

/// Upper bound on the virtual address space a tracked pointer can fall in:
/// 2^47, the usual top of user-space on a 4-level x86-64 page table.
pub const ADDRESS_SPACE_MAX: usize = 1 << 47;

const TABLE_LEN: usize = ADDRESS_SPACE_MAX / TRACKING_ALIGNMENT;

/// Metadata associated with one tracked allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedInfo {
    /// Monotonically increasing allocation id, unique for the life of the
    /// process (spec.md section 5: "ids are never reused").
    pub id: u64,
    /// Size in bytes the caller most recently requested for this
    /// allocation (the "useful size", not the padded mapping size).
    pub size: usize,
}

struct Slot {
    present_address: AtomicUsize,
    id: AtomicU64,
    size: AtomicUsize,
}

fn table() -> &'static [Slot] {
    static TABLE: OnceLock<Box<[Slot]>> = OnceLock::new();
    TABLE.get_or_init(|| {
        (0..TABLE_LEN)
            .map(|_| Slot {
                present_address: AtomicUsize::new(0),
                id: AtomicU64::new(0),
                size: AtomicUsize::new(0),
            })
            .collect()
    })
}

#[inline]
fn slot_index(addr: usize) -> usize {
    addr / TRACKING_ALIGNMENT
}

/// The address-indexed table of tracked allocations.
///
/// A zero-sized handle, mirroring [`crate::sampler::Sampler`]: all state
/// lives in the lazily-allocated static table, not in any instance of this
/// type.
pub struct TrackedRegistry;

impl TrackedRegistry {
    /// Creates a new tracked allocation of `size` bytes, returning its
    /// pointer and freshly assigned id, or `None` if the underlying `mmap`
    /// failed (in which case the caller must fall back to an untracked
    /// allocation; spec.md section 4.3).
    pub fn get(size: usize) -> Option<(*mut u8, u64)> {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);

        // A cheap, well-spread hint so successive tracked regions don't
        // pile up at the same address and force the kernel to search; any
        // placement the kernel actually returns is accepted regardless.
        let hint = (id as usize)
            .wrapping_mul(17)
            .wrapping_mul(TRACKING_ALIGNMENT)
            % ADDRESS_SPACE_MAX;

        let ptr = mmap::aligned_mmap(size, TRACKING_ALIGNMENT, hint)?;
        let addr = ptr as usize;
        let slot = &table()[slot_index(addr)];

        slot.id.store(id, Ordering::Release);
        slot.size.store(size, Ordering::Release);
        let previous = slot.present_address.swap(addr, Ordering::AcqRel);
        if previous != 0 {
            // Two live tracked regions claiming the same 1 GiB slot can only
            // mean the table was corrupted or a prior release never
            // cleared its slot.
            std::process::abort();
        }

        Some((ptr, id))
    }

    /// Returns whether `ptr` is the base address of a currently tracked
    /// allocation. Pointers not aligned to [`TRACKING_ALIGNMENT`] are
    /// rejected without touching the table at all.
    #[inline]
    pub fn is_tracked(ptr: *const u8) -> bool {
        if ptr.is_null() {
            return false;
        }
        let addr = ptr as usize;
        if addr % TRACKING_ALIGNMENT != 0 || addr >= ADDRESS_SPACE_MAX {
            return false;
        }
        table()[slot_index(addr)].present_address.load(Ordering::Acquire) == addr
    }

    /// Returns the metadata for a tracked pointer.
    ///
    /// # Panics / aborts
    ///
    /// Aborts the process if `ptr` is not currently tracked: callers must
    /// check [`Self::is_tracked`] first (or otherwise know the pointer was
    /// just returned by [`Self::get`]), since reaching this with a bogus
    /// pointer means the registry's own bookkeeping has been corrupted.
    pub fn info(ptr: *const u8) -> TrackedInfo {
        let addr = ptr as usize;
        let slot = &table()[slot_index(addr)];
        if slot.present_address.load(Ordering::Acquire) != addr {
            std::process::abort();
        }
        TrackedInfo {
            id: slot.id.load(Ordering::Acquire),
            size: slot.size.load(Ordering::Acquire),
        }
    }

    /// Updates the recorded "useful size" of a tracked allocation without
    /// changing its address, backing or shrinking the underlying mapping to
    /// match (spec.md section 4.3, `realloc`'s shrink-in-place case).
    ///
    /// Returns `false` (leaving the allocation untouched) if growing the
    /// mapping in place was not possible; the caller must then fall back to
    /// allocate-copy-free.
    pub fn resize(ptr: *mut u8, new_size: usize) -> bool {
        let addr = ptr as usize;
        let slot = &table()[slot_index(addr)];
        if slot.present_address.load(Ordering::Acquire) != addr {
            std::process::abort();
        }
        let old_size = slot.size.load(Ordering::Acquire);

        if new_size < old_size {
            mmap::shrink_in_place(ptr, old_size, new_size);
        } else if new_size > old_size && !mmap::grow_in_place(ptr, old_size, new_size) {
            return false;
        }

        slot.size.store(new_size, Ordering::Release);
        true
    }

    /// Releases a tracked allocation, unmapping its backing memory and
    /// clearing its slot so the address can be reused by a future mapping.
    pub fn put(ptr: *mut u8) {
        let addr = ptr as usize;
        let slot = &table()[slot_index(addr)];

        if slot.present_address.load(Ordering::Acquire) != addr {
            std::process::abort();
        }
        let size = slot.size.load(Ordering::Acquire);

        // Clear id and size before publishing the slot as empty, the
        // reverse of the publish order in `get`, so a concurrent `get`
        // landing on the same slot never observes a present address paired
        // with stale metadata.
        slot.id.store(0, Ordering::Release);
        slot.size.store(0, Ordering::Release);
        let previous = slot.present_address.swap(0, Ordering::AcqRel);
        if previous != addr {
            std::process::abort();
        }

        mmap::aligned_munmap(ptr, size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_put_round_trip() {
        let (ptr, id) = TrackedRegistry::get(4096).expect("mmap should succeed");
        assert!(id > 0);
        assert!(TrackedRegistry::is_tracked(ptr));
        assert_eq!(TrackedRegistry::info(ptr).size, 4096);
        TrackedRegistry::put(ptr);
        assert!(!TrackedRegistry::is_tracked(ptr));
    }

    #[test]
    fn ids_are_never_reused() {
        let (ptr_a, id_a) = TrackedRegistry::get(4096).unwrap();
        TrackedRegistry::put(ptr_a);
        let (ptr_b, id_b) = TrackedRegistry::get(4096).unwrap();
        assert_ne!(id_a, id_b);
        TrackedRegistry::put(ptr_b);
    }

    #[test]
    fn untracked_pointers_are_rejected_cheaply() {
        assert!(!TrackedRegistry::is_tracked(std::ptr::null()));
        // Misaligned stack address: never a valid tracked pointer.
        let x = 0u8;
        assert!(!TrackedRegistry::is_tracked(&x as *const u8));
    }

    #[test]
    fn resize_grow_then_shrink_preserves_tracking() {
        let (ptr, _) = TrackedRegistry::get(4096).expect("mmap should succeed");
        assert!(TrackedRegistry::resize(ptr, 4096 * 8));
        assert_eq!(TrackedRegistry::info(ptr).size, 4096 * 8);
        assert!(TrackedRegistry::resize(ptr, 4096));
        assert_eq!(TrackedRegistry::info(ptr).size, 4096);
        TrackedRegistry::put(ptr);
    }
}
