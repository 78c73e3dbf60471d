//! Reciprocal Rank Fusion (RRF) for combining ranked lists
//!
//! RRF is a simple but effective fusion method that:
//! - Doesn't require score normalization (BM25 and cosine scales differ)
//! - Only looks at rank positions
//! - Is robust to backend-specific scoring outliers
//!
//! `score(key) = Σ 1 / (k + rank)` over every list the key appears in.

use super::{FusionKey, RawHit};
use std::collections::HashMap;

/// RRF fusion parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RRFusion {
    /// Smoothing constant k (typically 60)
    pub k: f64,
}

impl Default for RRFusion {
    fn default() -> Self {
        Self { k: 60.0 }
    }
}

/// One deduplicated entry of a fused ranking
#[derive(Debug, Clone, PartialEq)]
pub struct FusedCandidate {
    pub key: FusionKey,
    /// First hit seen for the key
    pub hit: RawHit,
    pub fused_score: f64,
}

impl RRFusion {
    /// Create with a custom smoothing constant
    pub fn new(k: u32) -> Self {
        Self { k: f64::from(k) }
    }

    /// Contribution of a 1-based rank
    pub fn reciprocal(&self, rank: usize) -> f64 {
        1.0 / (self.k + rank as f64)
    }

    /// Fuse two ranked lists, deduplicating by [`FusionKey`].
    ///
    /// `list_a` is folded first, so its hits win representative selection and
    /// score ties. The result holds at most `top_k` entries.
    pub fn fuse(&self, list_a: Vec<RawHit>, list_b: Vec<RawHit>, top_k: usize) -> Vec<FusedCandidate> {
        let mut fused: Vec<FusedCandidate> = Vec::with_capacity(list_a.len() + list_b.len());
        let mut positions: HashMap<FusionKey, usize> = HashMap::new();

        for list in [list_a, list_b] {
            for (idx, hit) in list.into_iter().enumerate() {
                let contribution = self.reciprocal(idx + 1);
                let key = FusionKey::of(&hit);
                match positions.get(&key) {
                    Some(&pos) => fused[pos].fused_score += contribution,
                    None => {
                        positions.insert(key.clone(), fused.len());
                        fused.push(FusedCandidate {
                            key,
                            hit,
                            fused_score: contribution,
                        });
                    }
                }
            }
        }

        // Stable sort: equal scores keep first-seen order
        fused.sort_by(|a, b| b.fused_score.total_cmp(&a.fused_score));
        fused.truncate(top_k);
        fused
    }

    /// [`fuse`](Self::fuse), keeping only the representative hits
    pub fn fuse_hits(&self, list_a: Vec<RawHit>, list_b: Vec<RawHit>, top_k: usize) -> Vec<RawHit> {
        self.fuse(list_a, list_b, top_k)
            .into_iter()
            .map(|candidate| candidate.hit)
            .collect()
    }
}
