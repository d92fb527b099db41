//! Little-endian conversions from byte slices used by the binary workbook decoders.
//! Callers are responsible for slice length: every function reads exactly its width from the front.

/// Converts a byte slice into an iterator of 32-bit unsigned integers.
/// Trailing bytes that do not fill a 4-byte chunk are ignored.
pub(crate) fn to_u32_iter(bytes: &[u8]) -> impl Iterator<Item = u32> + '_ {
    bytes.chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
}

/// Converts a byte slice into an iterator of sector or record indexes.
pub(crate) fn to_usize_iter(bytes: &[u8]) -> impl Iterator<Item = usize> + '_ {
    to_u32_iter(bytes).map(|value| value as usize)
}

#[inline]
pub(crate) fn to_f64(s: &[u8]) -> f64 {
    f64::from_bits(to_u64(s))
}

#[inline]
pub(crate) fn to_u64(s: &[u8]) -> u64 {
    u64::from_le_bytes([s[0], s[1], s[2], s[3], s[4], s[5], s[6], s[7]])
}

#[inline]
pub(crate) fn to_u32(s: &[u8]) -> u32 {
    u32::from_le_bytes([s[0], s[1], s[2], s[3]])
}

#[inline]
pub(crate) fn to_u16(s: &[u8]) -> u16 {
    u16::from_le_bytes([s[0], s[1]])
}

/// Reads 4 bytes as an unsigned index. Widening from u32 never truncates on supported targets.
#[inline]
pub(crate) fn to_usize(s: &[u8]) -> usize {
    to_u32(s) as usize
}
