//! LEB128 unsigned varints used for lengths and attribute ids inside packed values
//! and patch buffers.

/// Maximum encoded size of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// Number of bytes `value` occupies when encoded.
#[inline]
pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - value.max(1).leading_zeros() as usize;
    bits.div_ceil(7)
}

/// Appends the encoding of `value` to `buf`.
pub fn encode_to_vec(mut value: u64, buf: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
}

/// Writes the encoding of `value` at the start of `buf` and returns the number of
/// bytes written, or `None` if `buf` is too short.
pub fn encode(mut value: u64, buf: &mut [u8]) -> Option<usize> {
    let mut i = 0;
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        let slot = buf.get_mut(i)?;
        i += 1;
        if value == 0 {
            *slot = byte;
            return Some(i);
        }
        *slot = byte | 0x80;
    }
}

/// Decodes a varint from the start of `buf`, returning the value and the number of
/// bytes consumed.
///
/// Returns `None` for a truncated or over-long encoding.
pub fn decode(buf: &[u8]) -> Option<(u64, usize)> {
    let mut result = 0u64;
    for (i, &byte) in buf.iter().take(MAX_VARINT_LEN).enumerate() {
        let bits = (byte & 0x7F) as u64;
        if i == MAX_VARINT_LEN - 1 && bits > 1 {
            return None;
        }
        result |= bits << (7 * i);
        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }
    }
    None
}
