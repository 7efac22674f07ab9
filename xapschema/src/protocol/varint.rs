//! Varint encoding helpers for compact u64 representation.
//!
//! Values are split into 7-bit groups, least-significant first. Every byte but the last
//! has its MSB set. Signed values are zigzag mapped first so that small negative numbers
//! stay small on the wire.

/// Maximum number of bytes a u64 varint can take.
pub const MAX_VARINT_LEN: usize = 10;

/// Encode an unsigned 64-bit integer using LEB128 and feed the bytes to `encoder`.
///
/// Returns the number of bytes emitted.
///
/// Notes:
/// - Value 0 encodes to a single byte `0x00`.
/// - The encoding for 300 is `[0xac, 0x02]`.
pub fn encode_u64<F: FnMut(&[u8])>(mut value: u64, encoder: &mut F) -> usize {
    let mut size = 0;
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        size += 1;

        if value == 0 {
            encoder(&[byte]);
            return size;
        }
        encoder(&[byte | 0x80]);
    }
}

/// Decode one unsigned 64-bit integer from the front of `buf`.
///
/// On success returns `Some(value)` and advances `buf` past the varint. Returns `None`
/// when the slice ends before the terminating byte, when the varint is longer than
/// [`MAX_VARINT_LEN`] bytes, or when it encodes a value above `u64::MAX`; `buf` is left
/// untouched in that case.
pub fn decode_u64(buf: &mut &[u8]) -> Option<u64> {
    let bytes: &[u8] = *buf;
    let mut value: u64 = 0;

    for (idx, &byte) in bytes.iter().enumerate().take(MAX_VARINT_LEN) {
        // The last group only has room for the 64th bit
        if idx == MAX_VARINT_LEN - 1 && byte > 0x01 {
            return None;
        }
        value |= ((byte & 0x7F) as u64) << (7 * idx);

        if byte & 0x80 == 0 {
            *buf = &bytes[idx + 1..];
            return Some(value);
        }
    }

    None
}

/// Compute the encoded size in bytes of a u64 value.
///
/// This is useful for preallocating buffers.
pub fn encoded_size_u64(value: u64) -> usize {
    if value == 0 {
        return 1;
    }
    let sig_bits = (64 - value.leading_zeros()) as usize;
    sig_bits.div_ceil(7)
}

/// Map a signed integer onto an unsigned one (0, -1, 1, -2, ... -> 0, 1, 2, 3, ...).
pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`zigzag_encode`].
pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    use super::*;

    fn encode(value: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_u64(value, &mut |b| buf.extend_from_slice(b));
        buf
    }

    #[test]
    fn known_encodings() {
        assert_eq!(encode(0), vec![0x00]);
        assert_eq!(encode(127), vec![0x7f]);
        assert_eq!(encode(128), vec![0x80, 0x01]);
        assert_eq!(encode(300), vec![0xac, 0x02]);
        assert_eq!(encode(u64::MAX).len(), MAX_VARINT_LEN);
    }

    #[test]
    fn roundtrip_edge_values() {
        let values = [0_u64, 1, 127, 128, 16383, 16384, u32::MAX as u64, u64::MAX];
        for &v in &values {
            let buf = encode(v);
            let mut s: &[u8] = &buf;
            assert_eq!(decode_u64(&mut s), Some(v), "value {v} roundtrip");
            assert!(s.is_empty(), "buffer not fully consumed for {v}");
            assert_eq!(encoded_size_u64(v), buf.len(), "size mismatch for {v}");
        }
    }

    #[test]
    fn roundtrip_random_sequence() {
        let mut rng = ChaCha20Rng::seed_from_u64(0x5eed);
        let values: Vec<u64> = (0..256).map(|_| rng.random::<u64>() >> rng.random_range(0..64u32)).collect();

        let mut buf = Vec::new();
        for &v in &values {
            encode_u64(v, &mut |b| buf.extend_from_slice(b));
        }

        let mut s: &[u8] = &buf;
        for &v in &values {
            assert_eq!(decode_u64(&mut s), Some(v));
        }
        assert!(s.is_empty());
    }

    #[test]
    fn truncated_and_overlong_inputs_fail() {
        let mut truncated: &[u8] = &[0x80, 0x80];
        assert_eq!(decode_u64(&mut truncated), None);
        assert_eq!(truncated.len(), 2, "failed decode must not consume input");

        let overlong = [0xff_u8; 11];
        let mut s: &[u8] = &overlong;
        assert_eq!(decode_u64(&mut s), None);
    }

    #[test]
    fn values_above_u64_max_fail() {
        let mut max = encode(u64::MAX);
        assert_eq!(max[MAX_VARINT_LEN - 1], 0x01);

        max[MAX_VARINT_LEN - 1] = 0x02;
        let mut s: &[u8] = &max;
        assert_eq!(decode_u64(&mut s), None);
        assert_eq!(s.len(), MAX_VARINT_LEN);

        max[MAX_VARINT_LEN - 1] = 0x7f;
        let mut s: &[u8] = &max;
        assert_eq!(decode_u64(&mut s), None);
    }

    #[test]
    fn zigzag_maps_small_magnitudes_to_small_values() {
        assert_eq!(zigzag_encode(0), 0);
        assert_eq!(zigzag_encode(-1), 1);
        assert_eq!(zigzag_encode(1), 2);
        assert_eq!(zigzag_encode(-2), 3);
        for v in [i64::MIN, -12345, 0, 42, i64::MAX] {
            assert_eq!(zigzag_decode(zigzag_encode(v)), v);
        }
    }
}
