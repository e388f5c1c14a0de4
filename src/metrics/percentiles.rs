use serde::Serialize;

use super::error::PercentileError;

/// Ranks are expressed in hundredths of a percent (p99.9 → 9990).
pub const FULL_RANK: u32 = 10_000;

/// Ranks reported for every endpoint, paired with their report labels.
pub const LADDER: [(&str, u32); 6] = [
    ("p50", 5_000),
    ("p90", 9_000),
    ("p95", 9_500),
    ("p99", 9_900),
    ("p99.9", 9_990),
    ("p99.99", 9_999),
];

/// Nearest-rank percentile of an ascending-sorted slice.
///
/// Picks the element at 1-based position ⌈rank/10000 × N⌉, no
/// interpolation.  Integer arithmetic only: `99.9 / 100.0 * 1000.0` is
/// `999.0000000000001` in floating point and would round up one slot.
pub fn nearest_rank(sorted: &[u64], rank: u32) -> Result<u64, PercentileError> {
    if sorted.is_empty() {
        return Err(PercentileError::Empty);
    }
    if rank == 0 || rank > FULL_RANK {
        return Err(PercentileError::InvalidRank(rank));
    }
    let n = sorted.len() as u64;
    let pos = (u64::from(rank) * n).div_ceil(u64::from(FULL_RANK)).max(1);
    Ok(sorted[(pos.min(n) - 1) as usize])
}

/// The full percentile breakdown for one endpoint, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PercentileLadder {
    pub p50: u64,
    pub p90: u64,
    pub p95: u64,
    pub p99: u64,
    pub p999: u64,
    pub p9999: u64,
}

impl PercentileLadder {
    /// Sorts `samples` in place and reads the ladder off it.
    pub fn from_samples(samples: &mut [u64]) -> Result<Self, PercentileError> {
        samples.sort_unstable();
        let mut values = [0u64; LADDER.len()];
        for (slot, (_, rank)) in values.iter_mut().zip(LADDER.iter()) {
            *slot = nearest_rank(samples, *rank)?;
        }
        let [p50, p90, p95, p99, p999, p9999] = values;
        Ok(Self {
            p50,
            p90,
            p95,
            p99,
            p999,
            p9999,
        })
    }

    /// Label/value pairs in ladder order, for flat reports.
    pub fn labelled(&self) -> [(&'static str, u64); 6] {
        [
            (LADDER[0].0, self.p50),
            (LADDER[1].0, self.p90),
            (LADDER[2].0, self.p95),
            (LADDER[3].0, self.p99),
            (LADDER[4].0, self.p999),
            (LADDER[5].0, self.p9999),
        ]
    }
}
