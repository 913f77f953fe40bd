//! Deterministic hashing primitives: xxHash32 over byte slices, a
//! single-lane xxHash32 combine for seed derivation, and the xorshift32
//! generator used by weighted partition sampling.
//!
//! Everything here is 32-bit unsigned arithmetic modulo 2^32. No
//! floating point is permitted anywhere in this module.

use xxhash_rust::xxh32::xxh32;

const PRIME32_2: u32 = 0x85EB_CA77;
const PRIME32_3: u32 = 0xC2B2_AE3D;
const PRIME32_4: u32 = 0x27D4_EB2F;

/// Hashes a byte slice with the given seed, identical to the xxHash32
/// reference implementation.
pub fn xxhash32(bytes: &[u8], seed: u32) -> u32 {
    xxh32(bytes, seed)
}

/// Folds a single `u32` value into a running hash. This is the xxHash32
/// single-lane round followed by the finalization avalanche, used to
/// derive per-partition RNG seeds from `(frame, partition)` pairs.
pub fn hash_u32(prev: u32, value: u32) -> u32 {
    let acc = prev
        .wrapping_add(value.wrapping_mul(PRIME32_3))
        .rotate_left(17)
        .wrapping_mul(PRIME32_4);
    avalanche(acc)
}

fn avalanche(mut acc: u32) -> u32 {
    acc ^= acc >> 15;
    acc = acc.wrapping_mul(PRIME32_2);
    acc ^= acc >> 13;
    acc = acc.wrapping_mul(PRIME32_3);
    acc ^= acc >> 16;
    acc
}

/// Classic 13/17/5 xorshift generator. A zero seed would produce an
/// all-zero stream, so it is remapped to a fixed odd constant.
pub struct Xorshift32 {
    state: u32,
}

impl Xorshift32 {
    pub fn new(seed: u32) -> Self {
        Self {
            state: if seed == 0 { 0x9E37_79B9 } else { seed },
        }
    }

    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }
}
