use rand::seq::SliceRandom;
use rand::Rng;

/// Criteria for selecting relays for a circuit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathSelectionCriteria {
    /// Requested circuit length before clamping
    pub circuit_length: usize,
}

impl PathSelectionCriteria {
    /// Take a hop count as the client sent it; zero and negative become 1
    pub fn from_requested(hops: i64) -> Self {
        Self {
            circuit_length: usize::try_from(hops).unwrap_or(0).max(1),
        }
    }
}

/// Uniform random relay selection
pub struct PathSelector;

impl PathSelector {
    /// Draw `k` distinct entries without replacement, `k` clamped to
    /// `[1, candidates.len()]`. Order of the result is the hop order.
    pub fn select<T: Clone, R: Rng + ?Sized>(
        candidates: &[T],
        k: usize,
        rng: &mut R,
    ) -> Result<Vec<T>, PathSelectionError> {
        if candidates.is_empty() {
            return Err(PathSelectionError::NoRoutersAvailable);
        }

        let k = k.clamp(1, candidates.len());
        Ok(candidates.choose_multiple(rng, k).cloned().collect())
    }
}

/// Errors in path selection
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathSelectionError {
    #[error("No routers available")]
    NoRoutersAvailable,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn test_criteria_clamping() {
        assert_eq!(PathSelectionCriteria::from_requested(-3).circuit_length, 1);
        assert_eq!(PathSelectionCriteria::from_requested(0).circuit_length, 1);
        assert_eq!(PathSelectionCriteria::from_requested(4).circuit_length, 4);
        assert_eq!(PathSelectionCriteria::from_requested(i64::MAX).circuit_length, i64::MAX as usize);
    }

    #[test]
    fn test_select_is_distinct() {
        let mut rng = StdRng::seed_from_u64(9);
        let candidates: Vec<u32> = (0..20).collect();

        for k in 1..=20 {
            let chosen = PathSelector::select(&candidates, k, &mut rng).unwrap();
            assert_eq!(chosen.len(), k);
            let unique: HashSet<_> = chosen.iter().collect();
            assert_eq!(unique.len(), k);
        }
    }

    #[test]
    fn test_select_clamps() {
        let mut rng = StdRng::seed_from_u64(9);
        let candidates = vec!['a', 'b'];

        assert_eq!(PathSelector::select(&candidates, 0, &mut rng).unwrap().len(), 1);
        assert_eq!(PathSelector::select(&candidates, 9, &mut rng).unwrap().len(), 2);
    }

    #[test]
    fn test_select_empty() {
        let mut rng = StdRng::seed_from_u64(1);
        let candidates: Vec<u8> = Vec::new();
        assert_eq!(
            PathSelector::select(&candidates, 1, &mut rng),
            Err(PathSelectionError::NoRoutersAvailable)
        );
    }

    #[test]
    fn test_every_candidate_reachable() {
        let mut rng = StdRng::seed_from_u64(3);
        let candidates: Vec<u32> = (0..5).collect();
        let mut seen = HashSet::new();

        for _ in 0..200 {
            seen.extend(PathSelector::select(&candidates, 1, &mut rng).unwrap());
        }
        assert_eq!(seen.len(), 5);
    }
}
