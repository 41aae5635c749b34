//! Integer helpers shared by the header, the bucket index and the picklers.
//!
//! All on-disk integers use the host byte order and a width of 1, 2, 4 or 8
//! bytes.

/// Widest integer the format can store.
pub(crate) const MAX_INT_SIZE: u8 = 8;

/// Returns true if `n` is zero or a power of two.
pub(crate) fn is_pow2(n: u64) -> bool {
    n & n.wrapping_sub(1) == 0
}

/// Largest bucket count a massset may use.
pub(crate) const MAX_BUCKET_COUNT: u64 = 1 << 40;

/// Smallest power of two greater than or equal to `n`; zero stays zero.
///
/// Returns `None` if the result does not fit into a `u64`.
pub(crate) fn ceil_pow2(n: u64) -> Option<u64> {
    if is_pow2(n) {
        Some(n)
    } else {
        n.checked_next_power_of_two()
    }
}

/// Returns true if `int_size` is a width the format can encode.
pub(crate) fn is_valid_int_size(int_size: u8) -> bool {
    int_size > 0 && int_size <= MAX_INT_SIZE && is_pow2(int_size as u64)
}

/// Minimal power-of-two byte width able to hold `value`, at least 1.
pub(crate) fn min_int_size(value: u64) -> u8 {
    let bits = u64::BITS - value.leading_zeros();
    let bytes = bits.div_ceil(8) as u64;
    // at most 8 bytes, always a valid power of two
    ceil_pow2(bytes).unwrap_or(MAX_INT_SIZE as u64).max(1) as u8
}

/// Largest value representable with `int_size` bytes.
pub(crate) fn max_value(int_size: u8) -> u64 {
    if int_size >= MAX_INT_SIZE {
        u64::MAX
    } else {
        (1u64 << (8 * int_size as u32)) - 1
    }
}

/// Rounds `n` up to the next multiple of `align`.
pub(crate) fn pad_to_multiple(align: u64, n: u64) -> u64 {
    if align <= 1 {
        return n;
    }
    n.div_ceil(align) * align
}

/// Number of buckets needed to keep `count` items under `load_factor`.
///
/// Returns `None` if that exceeds [`MAX_BUCKET_COUNT`].
pub(crate) fn bucket_count_for(count: u64, load_factor: f64) -> Option<u64> {
    if count == 0 {
        return Some(0);
    }
    let wanted = (count as f64 / load_factor).ceil();
    if !(wanted <= MAX_BUCKET_COUNT as f64) {
        return None;
    }
    ceil_pow2(wanted as u64)
}

/// Appends `value` to `out` using `int_size` bytes in native byte order.
///
/// The caller guarantees `value <= max_value(int_size)`.
pub(crate) fn write_uint(out: &mut Vec<u8>, value: u64, int_size: u8) {
    let bytes = value.to_ne_bytes();
    let n = int_size as usize;
    if cfg!(target_endian = "little") {
        out.extend_from_slice(&bytes[..n]);
    } else {
        out.extend_from_slice(&bytes[bytes.len() - n..]);
    }
}

/// Reads a native byte order integer occupying all of `data` (at most 8 bytes).
pub(crate) fn read_uint(data: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    let n = data.len().min(bytes.len());
    if cfg!(target_endian = "little") {
        bytes[..n].copy_from_slice(&data[..n]);
    } else {
        bytes[8 - n..].copy_from_slice(&data[..n]);
    }
    u64::from_ne_bytes(bytes)
}
