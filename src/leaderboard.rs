// =============================================================================
// Leaderboard Service (C10)
// =============================================================================
//
// Runs on an hourly cadence (spec §4.10), aggregating realized performance
// per bot over four trailing windows and writing a fully-ranked,
// atomically-replaced row set per period. Cadence shape borrowed from the
// teacher's reconciliation loop in `main.rs` (`tokio::time::interval` +
// `tokio::select!` against a shutdown signal), generalized from a Binance
// balance poll to a ranking recomputation.

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::db::leaderboard::LeaderboardEntry;
use crate::db::Db;
use crate::error::AppResult;
use crate::types::LeaderboardPeriod;

pub const ALL_PERIODS: [LeaderboardPeriod; 4] = [
    LeaderboardPeriod::Daily,
    LeaderboardPeriod::Weekly,
    LeaderboardPeriod::Monthly,
    LeaderboardPeriod::AllTime,
];

pub struct Leaderboard {
    db: Db,
}

struct BotPerformance {
    bot_id: String,
    owner_id: String,
    total_pnl: f64,
    trade_count: u64,
    win_rate: f64,
    sharpe: f64,
    max_drawdown: f64,
    earliest_trade_at: String,
}

impl Leaderboard {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Recomputes every period's ranking. Called on the hourly cadence and
    /// forceable by an admin via `/admin/recompute-leaderboard`.
    pub async fn recompute_all(&self, now: DateTime<Utc>) -> AppResult<()> {
        for period in ALL_PERIODS {
            if let Err(err) = self.recompute_period(period, now).await {
                warn!(%period, %err, "leaderboard recomputation failed for period");
            }
        }
        Ok(())
    }

    pub async fn recompute_period(&self, period: LeaderboardPeriod, now: DateTime<Utc>) -> AppResult<()> {
        let (from, to) = window(period, now);
        let bots = self.db.list_bots(None).await?;

        let mut performances = Vec::new();
        for bot in &bots {
            let trades = self.db.closed_trades_in_period(&bot.id, &from, &to).await?;
            if trades.is_empty() {
                continue;
            }
            let trade_count = trades.len() as u64;
            let total_pnl: f64 = trades.iter().map(|t| t.realized_pnl).sum();
            let wins = trades.iter().filter(|t| t.realized_pnl > 0.0).count() as u64;
            let win_rate = wins as f64 / trade_count as f64;
            let earliest_trade_at = trades[0].executed_at.clone();

            let snapshots = self.db.snapshots_in_range(&bot.id, &from, &to).await?;
            let equity: Vec<f64> = snapshots.iter().map(|s| s.total_value).collect();

            performances.push(BotPerformance {
                bot_id: bot.id.clone(),
                owner_id: bot.owner_id.clone(),
                total_pnl,
                trade_count,
                win_rate,
                sharpe: naive_sharpe(&equity),
                max_drawdown: max_drawdown(&equity),
                earliest_trade_at,
            });
        }

        // Rank by total pnl desc; ties broken by win rate desc, then by
        // whichever bot traded first in the window (spec §4.10).
        performances.sort_by(|a, b| {
            b.total_pnl
                .partial_cmp(&a.total_pnl)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.win_rate.partial_cmp(&a.win_rate).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| a.earliest_trade_at.cmp(&b.earliest_trade_at))
        });

        let computed_at = now.to_rfc3339();
        let entries: Vec<LeaderboardEntry> = performances
            .into_iter()
            .enumerate()
            .map(|(idx, p)| LeaderboardEntry {
                period: period.to_string(),
                rank: (idx + 1) as u32,
                bot_id: p.bot_id,
                owner_id: p.owner_id,
                total_pnl: p.total_pnl,
                trade_count: p.trade_count,
                win_rate: p.win_rate,
                sharpe: p.sharpe,
                max_drawdown: p.max_drawdown,
                computed_at: computed_at.clone(),
            })
            .collect();

        info!(%period, ranked = entries.len(), "leaderboard recomputed");
        self.db.replace_leaderboard_period(&period.to_string(), &entries).await?;
        Ok(())
    }
}

fn window(period: LeaderboardPeriod, now: DateTime<Utc>) -> (String, String) {
    let from = match period {
        LeaderboardPeriod::Daily => now - Duration::days(1),
        LeaderboardPeriod::Weekly => now - Duration::days(7),
        LeaderboardPeriod::Monthly => now - Duration::days(30),
        LeaderboardPeriod::AllTime => DateTime::<Utc>::from_timestamp(0, 0).unwrap_or(now),
    };
    (from.to_rfc3339(), now.to_rfc3339())
}

/// Mean return over standard deviation of return, unannualized — "naive
/// Sharpe" per spec §4.10, computed over the equity-curve snapshots falling
/// inside the window. Zero when fewer than two snapshots or zero variance.
pub(crate) fn naive_sharpe(equity: &[f64]) -> f64 {
    if equity.len() < 2 {
        return 0.0;
    }
    let returns: Vec<f64> = equity
        .windows(2)
        .filter_map(|w| (w[0] != 0.0).then(|| (w[1] - w[0]) / w[0]))
        .collect();
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    let stdev = variance.sqrt();
    if stdev == 0.0 {
        0.0
    } else {
        mean / stdev
    }
}

/// Largest peak-to-trough fractional decline in the equity curve.
pub(crate) fn max_drawdown(equity: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0;
    for &value in equity {
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            let drawdown = (peak - value) / peak;
            if drawdown > worst {
                worst = drawdown;
            }
        }
    }
    worst
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naive_sharpe_is_zero_for_flat_equity() {
        let equity = vec![1000.0, 1000.0, 1000.0];
        assert_eq!(naive_sharpe(&equity), 0.0);
    }

    #[test]
    fn naive_sharpe_is_positive_for_steady_gains() {
        let equity = vec![1000.0, 1010.0, 1020.0, 1030.0];
        assert!(naive_sharpe(&equity) > 0.0);
    }

    #[test]
    fn max_drawdown_tracks_largest_decline_from_peak() {
        let equity = vec![1000.0, 1200.0, 900.0, 1100.0];
        let dd = max_drawdown(&equity);
        assert!((dd - 0.25).abs() < 1e-9);
    }

    #[test]
    fn max_drawdown_is_zero_for_monotonic_gains() {
        let equity = vec![1000.0, 1100.0, 1200.0];
        assert_eq!(max_drawdown(&equity), 0.0);
    }
}
