//! Occupied-bucket bitset
//!
//! Maintenance walks only the buckets whose bit is set, so a sparse shard
//! costs O(occupied) rather than O(buckets) per pass.

/// One bit per bucket
#[derive(Debug, Clone)]
pub struct OccupancyMap {
    words: Box<[u64]>,
    buckets: usize,
}

impl OccupancyMap {
    /// Empty map covering `buckets` buckets
    pub fn new(buckets: usize) -> Self {
        Self {
            words: vec![0u64; buckets.div_ceil(64)].into_boxed_slice(),
            buckets,
        }
    }

    /// Buckets covered
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buckets
    }

    /// Mark a bucket occupied
    #[inline(always)]
    pub fn set(&mut self, bucket: usize) {
        debug_assert!(bucket < self.buckets);
        self.words[bucket / 64] |= 1 << (bucket % 64);
    }

    /// Mark a bucket empty
    #[inline(always)]
    pub fn clear(&mut self, bucket: usize) {
        debug_assert!(bucket < self.buckets);
        self.words[bucket / 64] &= !(1 << (bucket % 64));
    }

    /// Is the bucket marked occupied?
    #[inline(always)]
    pub fn contains(&self, bucket: usize) -> bool {
        self.words[bucket / 64] & (1 << (bucket % 64)) != 0
    }

    /// Number of 64-bit words
    #[inline]
    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Raw word `w`
    #[inline(always)]
    pub fn word(&self, w: usize) -> u64 {
        self.words[w]
    }

    /// Occupied bucket count
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// No bucket occupied
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Occupied buckets in ascending order
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words
            .iter()
            .enumerate()
            .flat_map(|(w, &bits)| SetBits { bits, base: w * 64 })
    }
}

/// Indices of the set bits of one word
#[derive(Debug, Clone, Copy)]
pub(crate) struct SetBits {
    bits: u64,
    base: usize,
}

impl SetBits {
    pub(crate) const fn new(bits: u64, base: usize) -> Self {
        Self { bits, base }
    }
}

impl Iterator for SetBits {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<usize> {
        if self.bits == 0 {
            return None;
        }
        let bit = self.bits.trailing_zeros() as usize;
        self.bits &= self.bits - 1;
        Some(self.base + bit)
    }
}
