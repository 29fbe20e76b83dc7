//! Seeded flow hashing
//!
//! Bob Jenkins' lookup3 word hash. The seed is drawn once per table so an
//! attacker cannot precompute keys that pile into one bucket.

use sase_common::FlowKey;

/// Keyed hash over flow key words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowHasher {
    seed: u32,
}

impl FlowHasher {
    /// Hasher with a fresh random seed
    pub fn random() -> Self {
        Self {
            seed: rand::random(),
        }
    }

    /// Hasher with a fixed seed
    pub const fn with_seed(seed: u32) -> Self {
        Self { seed }
    }

    /// Seed in use
    pub const fn seed(&self) -> u32 {
        self.seed
    }

    /// Hash a key; protocol and fib perturb the initial value
    #[inline]
    pub fn hash(&self, key: &FlowKey) -> u32 {
        let init = self
            .seed
            .wrapping_add(u32::from(key.protocol()))
            .wrapping_add(key.fib().rotate_left(8));
        hashword(key.words(), init)
    }
}

impl Default for FlowHasher {
    fn default() -> Self {
        Self::random()
    }
}

#[inline(always)]
fn mix(mut a: u32, mut b: u32, mut c: u32) -> (u32, u32, u32) {
    a = a.wrapping_sub(c);
    a ^= c.rotate_left(4);
    c = c.wrapping_add(b);
    b = b.wrapping_sub(a);
    b ^= a.rotate_left(6);
    a = a.wrapping_add(c);
    c = c.wrapping_sub(b);
    c ^= b.rotate_left(8);
    b = b.wrapping_add(a);
    a = a.wrapping_sub(c);
    a ^= c.rotate_left(16);
    c = c.wrapping_add(b);
    b = b.wrapping_sub(a);
    b ^= a.rotate_left(19);
    a = a.wrapping_add(c);
    c = c.wrapping_sub(b);
    c ^= b.rotate_left(4);
    b = b.wrapping_add(a);
    (a, b, c)
}

#[inline(always)]
fn final_mix(mut a: u32, mut b: u32, mut c: u32) -> u32 {
    c ^= b;
    c = c.wrapping_sub(b.rotate_left(14));
    a ^= c;
    a = a.wrapping_sub(c.rotate_left(11));
    b ^= a;
    b = b.wrapping_sub(a.rotate_left(25));
    c ^= b;
    c = c.wrapping_sub(b.rotate_left(16));
    a ^= c;
    a = a.wrapping_sub(c.rotate_left(4));
    b ^= a;
    b = b.wrapping_sub(a.rotate_left(14));
    c ^= b;
    c.wrapping_sub(b.rotate_left(24))
}

/// lookup3 `hashword`
pub fn hashword(k: &[u32], initval: u32) -> u32 {
    let mut a = 0xdead_beef_u32
        .wrapping_add((k.len() as u32) << 2)
        .wrapping_add(initval);
    let mut b = a;
    let mut c = a;

    let mut rest = k;
    while rest.len() > 3 {
        a = a.wrapping_add(rest[0]);
        b = b.wrapping_add(rest[1]);
        c = c.wrapping_add(rest[2]);
        (a, b, c) = mix(a, b, c);
        rest = &rest[3..];
    }

    match *rest {
        [x, y, z] => final_mix(a.wrapping_add(x), b.wrapping_add(y), c.wrapping_add(z)),
        [x, y] => final_mix(a.wrapping_add(x), b.wrapping_add(y), c),
        [x] => final_mix(a.wrapping_add(x), b, c),
        _ => c,
    }
}
