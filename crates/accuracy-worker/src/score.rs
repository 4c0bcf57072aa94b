//! Unified evaluation scale, pure functions only

use serde::{Deserialize, Serialize};

/// Value of a forced mate on the move. Mate in `n` scores `MATE_SCORE - n`.
pub const MATE_SCORE: i32 = 100_000;

/// Longest mate distance kept distinct; anything longer shares the last slot.
pub const MAX_MATE_DISTANCE: i32 = 10_000;

/// Centipawn scores are clamped into this band so they never reach a mate score.
pub const MAX_CP: i32 = MATE_SCORE - MAX_MATE_DISTANCE - 1;

/// Score of one candidate move relative to the side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvaluationValue(pub i32);

impl EvaluationValue {
    pub fn from_cp(cp: i32) -> Self {
        Self(cp.clamp(-MAX_CP, MAX_CP))
    }

    /// `mate > 0`: side to move mates in `mate`; `mate <= 0`: side to move gets mated.
    pub fn from_mate(mate: i32) -> Self {
        let distance = mate.abs().min(MAX_MATE_DISTANCE);
        if mate > 0 {
            Self(MATE_SCORE - distance)
        } else {
            Self(-MATE_SCORE + distance)
        }
    }

    /// Combine the two halves of a UCI `score` token. Mate wins over cp.
    pub fn from_uci(cp: Option<i32>, mate: Option<i32>) -> Option<Self> {
        match (mate, cp) {
            (Some(m), _) => Some(Self::from_mate(m)),
            (None, Some(c)) => Some(Self::from_cp(c)),
            (None, None) => None,
        }
    }

    pub fn is_mate(self) -> bool {
        self.0.abs() > MAX_CP
    }

    pub fn get(self) -> i32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mate_above_material() {
        assert!(EvaluationValue::from_mate(30) > EvaluationValue::from_cp(i32::MAX));
        assert!(EvaluationValue::from_mate(-30) < EvaluationValue::from_cp(i32::MIN));
    }

    #[test]
    fn test_sooner_mate_ranks_higher() {
        assert!(EvaluationValue::from_mate(1) > EvaluationValue::from_mate(3));
        // Getting mated later is better than getting mated sooner
        assert!(EvaluationValue::from_mate(-5) > EvaluationValue::from_mate(-1));
        assert!(EvaluationValue::from_mate(-1) > EvaluationValue::from_mate(0));
    }

    #[test]
    fn test_distinct_mate_distances_never_collide() {
        let values: Vec<_> = (1..200).map(EvaluationValue::from_mate).collect();
        assert!(values.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_from_uci() {
        assert_eq!(EvaluationValue::from_uci(Some(35), None), Some(EvaluationValue(35)));
        assert_eq!(
            EvaluationValue::from_uci(None, Some(2)),
            Some(EvaluationValue(MATE_SCORE - 2))
        );
        assert_eq!(EvaluationValue::from_uci(None, None), None);
        assert!(EvaluationValue::from_mate(4).is_mate());
        assert!(!EvaluationValue::from_cp(900).is_mate());
    }
}
