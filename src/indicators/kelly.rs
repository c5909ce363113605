// =============================================================================
// Kelly Criterion — optimal fraction of bankroll to risk
// =============================================================================
//
// Formula:
//   f* = win_rate - (1 - win_rate) / win_loss_ratio
//
// where `win_loss_ratio` is the ratio of the average winning trade's size to
// the average losing trade's size (sometimes called "b" in the classic
// Kelly formulation). A negative result means the edge is negative and no
// capital should be risked; the fraction is clamped to [0, 1] since a bot
// cannot stake more than its full balance.
// =============================================================================

/// Compute the Kelly fraction for a given `win_rate` (0.0..=1.0) and
/// `win_loss_ratio` (average win size / average loss size).
///
/// # Edge cases
/// - `win_rate` outside `[0, 1]` => `None` (not a probability)
/// - `win_loss_ratio <= 0.0` => `None` (division guard / not meaningful)
/// - Negative edge (`f* < 0.0`) is clamped to `0.0`, not returned as `None`
/// - Result is always clamped to `[0.0, 1.0]`
pub fn kelly_fraction(win_rate: f64, win_loss_ratio: f64) -> Option<f64> {
    if !(0.0..=1.0).contains(&win_rate) {
        return None;
    }
    if win_loss_ratio <= 0.0 || !win_loss_ratio.is_finite() {
        return None;
    }

    let raw = win_rate - (1.0 - win_rate) / win_loss_ratio;
    if !raw.is_finite() {
        return None;
    }

    Some(raw.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_edge_coin_flip_with_better_payoff() {
        // 50% win rate, 2:1 payoff => f* = 0.5 - 0.5/2 = 0.25
        let f = kelly_fraction(0.5, 2.0).unwrap();
        assert!((f - 0.25).abs() < 1e-10);
    }

    #[test]
    fn no_edge_clamps_to_zero() {
        // 40% win rate, 1:1 payoff => f* = 0.4 - 0.6 = -0.2 => clamp to 0
        let f = kelly_fraction(0.4, 1.0).unwrap();
        assert_eq!(f, 0.0);
    }

    #[test]
    fn full_confidence_clamps_to_one() {
        // 100% win rate always clamps to full allocation, not > 1.0.
        let f = kelly_fraction(1.0, 0.1).unwrap();
        assert_eq!(f, 1.0);
    }

    #[test]
    fn invalid_win_rate_rejected() {
        assert!(kelly_fraction(-0.1, 2.0).is_none());
        assert!(kelly_fraction(1.1, 2.0).is_none());
    }

    #[test]
    fn invalid_ratio_rejected() {
        assert!(kelly_fraction(0.5, 0.0).is_none());
        assert!(kelly_fraction(0.5, -1.0).is_none());
    }
}
