//! Fault-tolerant memory copy for moving data out of an allocation whose
//! true extent we don't know.
//!
//! `realloc` on a pointer this crate never allocated only knows the new
//! size the caller wants, not how many bytes the old allocation actually
//! held. A plain `memcpy` of `new_size` bytes would run off the end of a
//! smaller old allocation and segfault. `process_vm_readv` reads from one
//! address space into another and simply returns a short count when it hits
//! unmapped memory instead of faulting the caller, so reading "as much as
//! exists, up to `new_size`" falls out for free.

use std::ffi::c_void;

fn page_size() -> usize {
    use std::sync::OnceLock;
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize })
}

fn try_vm_readv(dst: *mut u8, src: *const u8, len: usize) -> Option<usize> {
    if len == 0 {
        return Some(0);
    }

    let local = libc::iovec {
        iov_base: dst as *mut c_void,
        iov_len: len,
    };
    let remote = libc::iovec {
        iov_base: src as *mut c_void,
        iov_len: len,
    };

    let ret = unsafe { libc::process_vm_readv(libc::getpid(), &local, 1, &remote, 1, 0) };
    if ret < 0 {
        None
    } else {
        Some(ret as usize)
    }
}

/// Copies up to `max_len` bytes from `src` to `dst`, stopping early (rather
/// than faulting) if `src`'s backing allocation turns out to be smaller
/// than `max_len`. Returns the number of bytes actually copied.
pub fn fault_tolerant_copy(dst: *mut u8, src: *const u8, max_len: usize) -> usize {
    if max_len == 0 {
        return 0;
    }

    if let Some(copied) = try_vm_readv(dst, src, max_len) {
        if copied == max_len {
            return copied;
        }
        // A short, non-failing read already tells us exactly where the
        // source ends; no need to retry page by page.
        return copied;
    }

    // process_vm_readv failed outright (e.g. the whole span straddled an
    // unmapped page right from the start, or the call wasn't available).
    // Retry one page at a time so a single bad page only truncates the
    // copy instead of losing it entirely.
    let page = page_size();
    let mut copied = 0usize;
    while copied < max_len {
        let offset_in_page = (src as usize + copied) % page;
        let chunk = (max_len - copied).min(page - offset_in_page);

        let dst_chunk = unsafe { dst.add(copied) };
        let src_chunk = unsafe { src.add(copied) };

        match try_vm_readv(dst_chunk, src_chunk, chunk) {
            Some(n) if n == chunk => copied += n,
            Some(n) => {
                copied += n;
                break;
            }
            None => break,
        }
    }

    copied
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_full_range_between_two_live_buffers() {
        let src = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let mut dst = [0u8; 8];
        let copied = fault_tolerant_copy(dst.as_mut_ptr(), src.as_ptr(), src.len());
        assert_eq!(copied, src.len());
        assert_eq!(dst, src);
    }

    #[test]
    fn zero_length_copy_is_a_no_op() {
        let src = [1u8, 2, 3];
        let mut dst = [0u8; 3];
        assert_eq!(fault_tolerant_copy(dst.as_mut_ptr(), src.as_ptr(), 0), 0);
        assert_eq!(dst, [0, 0, 0]);
    }
}
