//! Elo rating math for matchmaking.

/// Rating spread that maps to a 10x expected-score advantage.
const ELO_SCALE: f64 = 400.0;

/// Quality decay constant: quality halves roughly every 140 rating points
/// of spread.
const QUALITY_SCALE: f64 = 200.0;

/// Stateless Elo calculator.
#[derive(Debug, Clone, Copy, Default)]
pub struct EloCalculator;

impl EloCalculator {
    /// Expected score of `a` against `b`, in `[0, 1]`.
    pub fn expected_score(rating_a: f64, rating_b: f64) -> f64 {
        1.0 / (1.0 + 10f64.powf((rating_b - rating_a) / ELO_SCALE))
    }

    /// Applies one game result. `score_a` is 1.0 for a win by `a`, 0.5 for
    /// a draw, 0.0 for a loss. The delta is rounded to whole points and the
    /// updated `(a, b)` ratings are returned.
    pub fn update(rating_a: i32, rating_b: i32, score_a: f64, k: f64) -> (i32, i32) {
        let expected_a = Self::expected_score(f64::from(rating_a), f64::from(rating_b));
        let delta = (k * (score_a - expected_a)).round() as i32;
        (rating_a + delta, rating_b - delta)
    }

    /// K-factor by experience: volatile for new players, stable for
    /// veterans.
    pub fn suggested_k(games_played: u32) -> f64 {
        if games_played < 30 {
            40.0
        } else if games_played < 100 {
            32.0
        } else {
            16.0
        }
    }

    /// Match quality in `[0, 1]` from the rating spread of participants.
    /// Fewer than two ratings is trivially a perfect match.
    pub fn match_quality(ratings: &[f64]) -> f64 {
        if ratings.len() < 2 {
            return 1.0;
        }
        let mean = ratings.iter().sum::<f64>() / ratings.len() as f64;
        let variance =
            ratings.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / ratings.len() as f64;
        (-variance.sqrt() / QUALITY_SCALE).exp().clamp(0.0, 1.0)
    }
}
