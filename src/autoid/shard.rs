use std::sync::atomic::{AtomicU64, Ordering};

/// Bit layout of a sharded 64-bit ID: `[sign?][shard bits][incremental bits]`.
///
/// Signed columns never use the sign bit, so the incremental part shrinks by
/// one. Unsigned auto-random columns shard into the top bit as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardIdLayout {
    pub shard_bits: u64,
    pub incremental_bits: u64,
    pub has_sign_bit: bool,
}

impl ShardIdLayout {
    pub fn new(type_bits: u64, shard_bits: u64, unsigned: bool) -> Self {
        let has_sign_bit = !unsigned;
        let mut incremental_bits = type_bits.saturating_sub(shard_bits);
        if has_sign_bit {
            incremental_bits = incremental_bits.saturating_sub(1);
        }
        Self {
            shard_bits,
            incremental_bits,
            has_sign_bit,
        }
    }

    /// Layout of the implicit row ID for a table with `shard_bits` shard bits.
    pub fn row_id(shard_bits: u64) -> Self {
        Self::new(64, shard_bits, false)
    }

    pub fn incremental_mask(&self) -> u64 {
        if self.incremental_bits >= 64 {
            u64::MAX
        } else {
            (1u64 << self.incremental_bits) - 1
        }
    }

    pub fn shard_mask(&self) -> u64 {
        if self.shard_bits == 0 {
            0
        } else {
            ((1u64 << self.shard_bits) - 1) << self.incremental_bits
        }
    }

    /// Largest value the incremental part can hold.
    pub fn max_incremental(&self) -> i64 {
        self.incremental_mask().min(i64::MAX as u64) as i64
    }

    pub fn overflows(&self, incremental: i64) -> bool {
        incremental < 0 || incremental > self.max_incremental()
    }

    pub fn compose(&self, shard: u64, incremental: i64) -> i64 {
        let shard = if self.shard_bits == 0 {
            0
        } else {
            (shard & ((1u64 << self.shard_bits) - 1)) << self.incremental_bits
        };
        (shard | (incremental as u64 & self.incremental_mask())) as i64
    }

    pub fn incremental_part(&self, id: i64) -> i64 {
        (id as u64 & self.incremental_mask()) as i64
    }
}

/// Pseudo-random shard values from a process-random seed and a counter.
#[derive(Debug)]
pub struct ShardGenerator {
    seed: u64,
    counter: AtomicU64,
}

impl Default for ShardGenerator {
    fn default() -> Self {
        Self::new(rand::random())
    }
}

impl ShardGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            counter: AtomicU64::new(0),
        }
    }

    pub fn next_shard(&self) -> u64 {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        splitmix64(self.seed ^ n.wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_layout_reserves_sign_bit() {
        let layout = ShardIdLayout::new(64, 15, false);
        assert_eq!(layout.incremental_bits, 48);
        assert_eq!(layout.max_incremental(), (1i64 << 48) - 1);
        let id = layout.compose(u64::MAX, 7);
        assert!(id > 0);
        assert_eq!(layout.incremental_part(id), 7);
    }

    #[test]
    fn test_unsigned_layout_uses_sign_bit() {
        let layout = ShardIdLayout::new(64, 5, true);
        assert_eq!(layout.incremental_bits, 59);
        let id = layout.compose(0b10000, 1);
        assert!(id < 0);
        assert_eq!(layout.incremental_part(id), 1);
    }

    #[test]
    fn test_overflow_bound() {
        let layout = ShardIdLayout::row_id(15);
        let max = layout.max_incremental();
        assert!(!layout.overflows(max));
        assert!(layout.overflows(max + 1));
        assert_eq!(ShardIdLayout::row_id(0).max_incremental(), i64::MAX);
    }

    #[test]
    fn test_shards_spread() {
        let generator = ShardGenerator::new(42);
        let layout = ShardIdLayout::row_id(4);
        let distinct: std::collections::HashSet<i64> = (0..64)
            .map(|i| layout.compose(generator.next_shard(), i) >> layout.incremental_bits)
            .collect();
        assert!(distinct.len() > 1);
    }
}
