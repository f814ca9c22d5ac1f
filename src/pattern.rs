//! Reproducible test payloads.
//!
//! Every buffer is keyed by `(file_number, buffer_index)`: a starting byte
//! `seed = (15 * file + 7 * index) mod 256` and a step
//! `stride = (file mod 5 + 1) * (index mod 3 + 1)`. Byte `i` of the buffer is
//! `seed + i * stride (mod 256)`. Nothing is stored; the verifier regenerates
//! the same walk and counts disagreeing bytes.

fn seed_and_stride(file_number: u32, buffer_index: u64) -> (u8, u8) {
    let seed = (15 * u64::from(file_number) + 7 * buffer_index) % 256;
    let stride = (u64::from(file_number) % 5 + 1) * (buffer_index % 3 + 1);
    (seed as u8, stride as u8)
}

pub fn fill(buffer: &mut [u8], file_number: u32, buffer_index: u64) {
    let (mut v, stride) = seed_and_stride(file_number, buffer_index);
    for b in buffer.iter_mut() {
        *b = v;
        v = v.wrapping_add(stride);
    }
}

pub fn generate(file_number: u32, buffer_index: u64, length: usize) -> Vec<u8> {
    let mut buffer = vec![0u8; length];
    fill(&mut buffer, file_number, buffer_index);
    buffer
}

/// Number of bytes in `buffer` that differ from the expected pattern.
pub fn verify(buffer: &[u8], file_number: u32, buffer_index: u64) -> u64 {
    let (mut v, stride) = seed_and_stride(file_number, buffer_index);
    let mut errors = 0u64;
    for &b in buffer {
        if b != v {
            errors += 1;
        }
        v = v.wrapping_add(stride);
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn known_sequence() {
        // seed = 15*1 + 7*1 = 22, stride = 2 * 2 = 4
        assert_eq!(generate(1, 1, 4), vec![22, 26, 30, 34]);
        // seed = 15*4 + 0 = 60, stride = 5 * 1 = 5, wraps past 255
        let b = generate(4, 0, 60);
        assert_eq!(b[0], 60);
        assert_eq!(b[39], ((60 + 39 * 5) % 256) as u8);
        assert_eq!(b[59], ((60 + 59 * 5) % 256) as u8);
    }

    #[test]
    fn different_keys_differ() {
        assert_ne!(generate(1, 0, 64), generate(2, 0, 64));
        assert_ne!(generate(1, 0, 64), generate(1, 1, 64));
    }

    #[test]
    fn empty_buffer_has_no_errors() {
        assert_eq!(verify(&[], 7, 3), 0);
    }

    #[test]
    fn wrong_key_is_detected() {
        let b = generate(3, 2, 4096);
        assert!(verify(&b, 3, 5) > 0);
        assert!(verify(&b, 8, 2) > 0);
    }

    proptest! {
        #[test]
        fn round_trip(file in 1u32..100_000, index in 0u64..1_000_000, len in 0usize..8192) {
            let b = generate(file, index, len);
            prop_assert_eq!(b.len(), len);
            prop_assert_eq!(verify(&b, file, index), 0);
        }

        #[test]
        fn single_flip_counts_once(
            file in 1u32..100_000,
            index in 0u64..10_000,
            len in 1usize..4096,
            pos_seed in any::<usize>(),
            xor in 1u8..=255,
        ) {
            let mut b = generate(file, index, len);
            let pos = pos_seed % len;
            b[pos] ^= xor;
            prop_assert_eq!(verify(&b, file, index), 1);
        }

        #[test]
        fn generation_is_pure(file in 1u32..100_000, index in 0u64..10_000, len in 0usize..2048) {
            let first = generate(file, index, len);
            let _other = generate(file.wrapping_add(1), index + 1, len);
            prop_assert_eq!(first, generate(file, index, len));
        }
    }
}
