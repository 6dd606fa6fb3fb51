//! Reads and writes against guest linear memory.

use anyhow::{bail, Context, Result};
use recast_types::abi::GUEST_MEMORY;
use wasmtime::{AsContextMut, Caller, Extern, Memory, TypedFunc};

use crate::host_state::HostState;

fn guest_range(ptr: i32, len: i32) -> Result<std::ops::Range<usize>> {
    let start = usize::try_from(ptr).context("negative guest pointer")?;
    let len = usize::try_from(len).context("negative guest length")?;
    let end = start.checked_add(len).context("guest range overflows")?;
    Ok(start..end)
}

/// Resolve the guest's exported memory from inside a host function.
pub(crate) fn caller_memory(caller: &mut Caller<'_, HostState>) -> Result<Memory> {
    match caller.get_export(GUEST_MEMORY) {
        Some(Extern::Memory(memory)) => Ok(memory),
        _ => bail!("guest has no exported '{GUEST_MEMORY}'"),
    }
}

/// Copy `len` bytes out of guest memory at `ptr`.
pub(crate) fn read_from_guest(
    caller: &mut Caller<'_, HostState>,
    ptr: i32,
    len: i32,
) -> Result<Vec<u8>> {
    let memory = caller_memory(caller)?;
    let range = guest_range(ptr, len)?;
    memory
        .data(&*caller)
        .get(range)
        .map(<[u8]>::to_vec)
        .context("guest range out of bounds")
}

/// Read a UTF-8 string from guest memory at `(ptr, len)`.
pub(crate) fn read_string_from_guest(
    caller: &mut Caller<'_, HostState>,
    ptr: i32,
    len: i32,
) -> Result<String> {
    let bytes = read_from_guest(caller, ptr, len)?;
    String::from_utf8(bytes).context("guest string is not valid UTF-8")
}

/// Write `data` into guest memory at `ptr`, bounded by `cap`.
pub(crate) fn write_into_guest(
    caller: &mut Caller<'_, HostState>,
    ptr: i32,
    cap: i32,
    data: &[u8],
) -> Result<()> {
    let cap = usize::try_from(cap).context("negative guest capacity")?;
    if data.len() > cap {
        bail!("{} bytes do not fit in guest buffer of {cap}", data.len());
    }
    let memory = caller_memory(caller)?;
    let start = usize::try_from(ptr).context("negative guest pointer")?;
    memory
        .write(caller, start, data)
        .context("guest buffer out of bounds")
}

/// Allocate a buffer in the guest via its allocator export and copy `data` in.
/// Returns `(ptr, len)` in guest address space.
pub(crate) fn write_to_guest(
    mut store: impl AsContextMut,
    alloc: &TypedFunc<i32, i32>,
    memory: &Memory,
    data: &[u8],
) -> Result<(i32, i32)> {
    let len = i32::try_from(data.len()).context("record too large for guest memory")?;
    if len == 0 {
        return Ok((0, 0));
    }
    let ptr = alloc
        .call(&mut store, len)
        .context("Failed to call recast_alloc")?;
    if ptr == 0 {
        bail!("recast_alloc returned null pointer");
    }
    let start = usize::try_from(ptr).context("negative guest pointer")?;
    memory
        .write(&mut store, start, data)
        .context("Failed to write data to guest memory")?;
    Ok((ptr, len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guest_range_rejects_negative_values() {
        assert!(guest_range(-1, 4).is_err());
        assert!(guest_range(4, -1).is_err());
        assert_eq!(guest_range(8, 4).unwrap(), 8..12);
    }
}
