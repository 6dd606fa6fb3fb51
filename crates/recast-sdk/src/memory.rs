//! Guest linear-memory helpers used by the exported entry points.
//!
//! The host reserves space with `recast_alloc`, copies an inbound record in,
//! and hands `(ptr, len)` to `on_record_written`. From then on the guest owns
//! the allocation and reclaims it with [`take_guest_bytes`].

use std::mem;

/// Allocate `size` bytes in guest linear memory.
/// Called by the host to reserve space before writing data.
#[must_use]
pub fn allocate(size: i32) -> i32 {
    let mut buffer: Vec<u8> = Vec::with_capacity(size.max(0) as usize);
    let ptr = buffer.as_mut_ptr();
    mem::forget(buffer);
    ptr as usize as i32
}

/// Free memory previously allocated by [`allocate`].
///
/// # Safety
/// `ptr` must come from [`allocate`] with the same `capacity`, and must not
/// have been freed or taken already.
pub unsafe fn deallocate(ptr: i32, capacity: i32) {
    if ptr == 0 || capacity <= 0 {
        return;
    }
    drop(Vec::from_raw_parts(
        ptr as usize as *mut u8,
        0,
        capacity as usize,
    ));
}

/// Take ownership of `len` initialized bytes the host placed at `ptr`.
///
/// # Safety
/// `ptr` must come from [`allocate`] with capacity `len`, and the host must
/// have initialized all `len` bytes.
#[must_use]
pub unsafe fn take_guest_bytes(ptr: i32, len: i32) -> Vec<u8> {
    if ptr == 0 || len <= 0 {
        return Vec::new();
    }
    Vec::from_raw_parts(ptr as usize as *mut u8, len as usize, len as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_takes_nothing() {
        let bytes = unsafe { take_guest_bytes(0, 0) };
        assert!(bytes.is_empty());
        let bytes = unsafe { take_guest_bytes(16, -1) };
        assert!(bytes.is_empty());
    }

    // allocate/take round-trips use i32 pointers sized for wasm32 linear
    // memory and are exercised by the wasm guest tests in recast-runtime.
}
