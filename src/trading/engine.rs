// =============================================================================
// Trading Engine (C6) — paper ledger + live settlement, shared decision logic
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::config::Settings;
use crate::db::models::{Decision, Position, Snapshot, Trade};
use crate::db::Db;
use crate::error::AppResult;
use crate::exchange::ExchangeAdapter;
use crate::types::{CloseReason, PositionSide, PositionStatus, TradeAction};

/// One position/trade write produced during a bot turn, queued up so the
/// whole turn (every open/close plus the decision and snapshot rows) commits
/// in a single transaction (spec §4.1).
pub enum TurnWrite {
    Open { position: Position, trade: Trade },
    Close { position: Position, trade: Trade },
}

/// The parts of a `Snapshot` known before the turn's writes are committed.
/// `realized_pnl`, `trade_count`, and `win_rate` are derived inside the same
/// transaction so they reflect any trade this turn just closed.
pub struct SnapshotDraft {
    pub id: String,
    pub owner_id: String,
    pub bot_id: String,
    pub balance: f64,
    pub unrealized_pnl: f64,
    pub timestamp: String,
}

/// Per-bot in-memory state mirroring the database — the teacher's
/// `PositionManager` generalized from `RwLock<Vec<Position>>` per-process to
/// one ledger per bot, since turns are serial within a bot but parallel
/// across bots (spec §4.8.2).
#[derive(Debug, Clone, Default)]
pub struct BotLedger {
    pub balance: f64,
    pub open_positions: Vec<Position>,
    /// symbol -> cooldown expiry, set only on close (spec §4.6.1 step 5).
    pub cooldowns: HashMap<String, DateTime<Utc>>,
}

impl BotLedger {
    pub fn opened_position_for_symbol(&self, symbol: &str) -> Option<&Position> {
        self.open_positions.iter().find(|p| p.symbol == symbol)
    }

    pub fn opened_position_for_symbol_by_id(&self, position_id: &str) -> Option<&Position> {
        self.open_positions.iter().find(|p| p.id == position_id)
    }

    pub fn cooldown_remaining(&self, symbol: &str, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.cooldowns.get(symbol).and_then(|expiry| {
            let remaining = *expiry - now;
            (remaining.num_milliseconds() > 0).then_some(remaining)
        })
    }
}

pub enum OpenOutcome {
    Opened {
        position: Position,
        trade: Trade,
        note: Option<String>,
    },
    Rejected {
        note: String,
    },
}

pub enum CloseOutcome {
    Closed { position: Position, trade: Trade },
    NotFound,
}

/// A position force-closed during mark-to-market, and why.
pub struct ForcedExit {
    pub position_id: String,
    pub reason: CloseReason,
    pub exit_price: f64,
}

pub struct TradingEngine {
    db: Db,
    ledgers: RwLock<HashMap<String, BotLedger>>,
    exchange: Option<Arc<dyn ExchangeAdapter>>,
}

impl TradingEngine {
    pub fn new(db: Db, exchange: Option<Arc<dyn ExchangeAdapter>>) -> Self {
        Self {
            db,
            ledgers: RwLock::new(HashMap::new()),
            exchange,
        }
    }

    /// `cooldowns` restores any expiry still in effect at the last broadcast
    /// projection (spec §9 Open Question: cooldown durability) — an empty map
    /// for a bot with none pending.
    pub fn hydrate_ledger(
        &self,
        bot_id: &str,
        balance: f64,
        open_positions: Vec<Position>,
        cooldowns: HashMap<String, DateTime<Utc>>,
    ) {
        self.ledgers.write().insert(
            bot_id.to_string(),
            BotLedger {
                balance,
                open_positions,
                cooldowns,
            },
        );
    }

    pub fn ledger_snapshot(&self, bot_id: &str) -> Option<BotLedger> {
        self.ledgers.read().get(bot_id).cloned()
    }

    fn liquidation_price(side: PositionSide, entry: f64, leverage: f64, maintenance_margin_rate: f64) -> f64 {
        match side {
            PositionSide::Long => entry * (1.0 - 1.0 / leverage + maintenance_margin_rate),
            PositionSide::Short => entry * (1.0 + 1.0 / leverage - maintenance_margin_rate),
        }
    }

    fn unrealized_pnl(side: PositionSide, entry: f64, size: f64, mark: f64) -> f64 {
        (mark - entry) * (size / entry) * side.sign()
    }

    /// Opens a LONG/SHORT position for `bot_id`, applying spec §4.6.1's
    /// validation, fee, and liquidation-price computation, and persisting
    /// the Position + Trade atomically.
    #[allow(clippy::too_many_arguments)]
    pub async fn open(
        &self,
        bot_id: &str,
        owner_id: &str,
        side: PositionSide,
        symbol: &str,
        requested_size: f64,
        leverage: f64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
        mark_price: f64,
        allowed_symbols: &[String],
        settings: &Settings,
        now: DateTime<Utc>,
    ) -> AppResult<OpenOutcome> {
        if !allowed_symbols.iter().any(|s| s == symbol) {
            return Ok(OpenOutcome::Rejected {
                note: format!("{symbol} is not in the bot's allowed symbol list"),
            });
        }

        let mut ledgers = self.ledgers.write();
        let ledger = ledgers.entry(bot_id.to_string()).or_default();

        if let Some(remaining) = ledger.cooldown_remaining(symbol, now) {
            return Ok(OpenOutcome::Rejected {
                note: format!("{symbol} is on cooldown for {} more ms", remaining.num_milliseconds()),
            });
        }

        if let Some(existing) = ledger.opened_position_for_symbol(symbol) {
            let opened_at: DateTime<Utc> = existing
                .opened_at
                .parse()
                .unwrap_or(now);
            let age_ms = (now - opened_at).num_milliseconds();
            if age_ms < settings.minimum_position_duration_ms as i64 {
                return Ok(OpenOutcome::Rejected {
                    note: format!("{symbol} already has an open position younger than the minimum position duration"),
                });
            }
            return Ok(OpenOutcome::Rejected {
                note: format!("{symbol} already has an open position"),
            });
        }

        let entry_fee_rate = settings.entry_fee_rate;
        let mut size = requested_size;
        let required = size / leverage + size * entry_fee_rate;

        if ledger.balance < required {
            // Clamp to the maximum feasible size: solve
            // balance = size/leverage + size*entry_fee_rate for size.
            let max_size = ledger.balance / (1.0 / leverage + entry_fee_rate);
            if max_size < settings.minimum_trade_size_usd {
                return Ok(OpenOutcome::Rejected {
                    note: "insufficient balance even after clamping to minimum trade size".into(),
                });
            }
            size = max_size;
        }
        if size < settings.minimum_trade_size_usd {
            return Ok(OpenOutcome::Rejected {
                note: format!("requested size {size} is below the minimum trade size"),
            });
        }

        let note = (size < requested_size).then(|| {
            format!("size clamped from {requested_size} to {size} due to insufficient balance")
        });

        let entry_fee = size * entry_fee_rate;
        let debit = size / leverage + entry_fee;
        let liquidation_price = Self::liquidation_price(side, mark_price, leverage, settings.maintenance_margin_rate);

        let position = Position {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            bot_id: bot_id.to_string(),
            symbol: symbol.to_string(),
            side,
            entry_price: mark_price,
            size,
            leverage,
            liquidation_price,
            stop_loss,
            take_profit,
            unrealized_pnl: 0.0,
            status: PositionStatus::Open,
            close_reason: None,
            opened_at: now.to_rfc3339(),
            closed_at: None,
        };

        let trade = Trade {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            bot_id: bot_id.to_string(),
            position_id: Some(position.id.clone()),
            symbol: symbol.to_string(),
            side,
            action: TradeAction::Open,
            entry_price: mark_price,
            exit_price: None,
            size,
            leverage,
            realized_pnl: 0.0,
            fee: entry_fee,
            executed_at: now.to_rfc3339(),
        };

        ledger.balance -= debit;
        ledger.open_positions.push(position.clone());

        info!(bot_id, symbol, %side, size, leverage, "position opened");

        Ok(OpenOutcome::Opened {
            position,
            trade,
            note,
        })
    }

    /// Mark-to-market pass for every open position matching `symbol`,
    /// applying the tie-break order liquidation > stop-loss > take-profit
    /// (spec §4.6.3). Returns the set of positions that must be force-closed;
    /// the caller is responsible for invoking [`TradingEngine::close`] on
    /// each.
    pub fn mark_to_market(&self, bot_id: &str, symbol: &str, mark_price: f64) -> Vec<ForcedExit> {
        let mut ledgers = self.ledgers.write();
        let Some(ledger) = ledgers.get_mut(bot_id) else {
            return Vec::new();
        };

        let mut forced = Vec::new();
        for pos in ledger.open_positions.iter_mut().filter(|p| p.symbol == symbol) {
            pos.unrealized_pnl = Self::unrealized_pnl(pos.side, pos.entry_price, pos.size, mark_price);

            let liquidation_breached = pos.unrealized_pnl <= -pos.size / pos.leverage;
            if liquidation_breached {
                forced.push(ForcedExit {
                    position_id: pos.id.clone(),
                    reason: CloseReason::Liquidated,
                    exit_price: pos.liquidation_price,
                });
                continue;
            }

            let sl_breached = pos.stop_loss.is_some_and(|sl| match pos.side {
                PositionSide::Long => mark_price <= sl,
                PositionSide::Short => mark_price >= sl,
            });
            if sl_breached {
                forced.push(ForcedExit {
                    position_id: pos.id.clone(),
                    reason: CloseReason::StopLoss,
                    exit_price: pos.stop_loss.unwrap(),
                });
                continue;
            }

            let tp_breached = pos.take_profit.is_some_and(|tp| match pos.side {
                PositionSide::Long => mark_price >= tp,
                PositionSide::Short => mark_price <= tp,
            });
            if tp_breached {
                forced.push(ForcedExit {
                    position_id: pos.id.clone(),
                    reason: CloseReason::TakeProfit,
                    exit_price: pos.take_profit.unwrap(),
                });
            }
        }

        forced
    }

    /// Closes a position, explicit or forced. Sets a cooldown on close only
    /// (spec §4.6.1 step 5 — never on open).
    pub async fn close(
        &self,
        bot_id: &str,
        position_id: &str,
        forced_price: Option<f64>,
        current_mark: f64,
        reason: CloseReason,
        settings: &Settings,
        now: DateTime<Utc>,
    ) -> AppResult<CloseOutcome> {
        let mut ledgers = self.ledgers.write();
        let Some(ledger) = ledgers.get_mut(bot_id) else {
            return Ok(CloseOutcome::NotFound);
        };

        let Some(idx) = ledger.open_positions.iter().position(|p| p.id == position_id) else {
            return Ok(CloseOutcome::NotFound);
        };
        let mut position = ledger.open_positions.remove(idx);

        let exit_price = forced_price.unwrap_or(current_mark);
        let exit_fee = position.size * settings.exit_fee_rate;
        let realized_pnl =
            (exit_price - position.entry_price) * (position.size / position.entry_price) * position.side.sign()
                - exit_fee;

        position.status = PositionStatus::Closed;
        position.close_reason = Some(reason);
        position.closed_at = Some(now.to_rfc3339());
        position.unrealized_pnl = 0.0;

        let trade = Trade {
            id: Uuid::new_v4().to_string(),
            owner_id: position.owner_id.clone(),
            bot_id: bot_id.to_string(),
            position_id: Some(position.id.clone()),
            symbol: position.symbol.clone(),
            side: position.side,
            action: TradeAction::Close,
            entry_price: position.entry_price,
            exit_price: Some(exit_price),
            size: position.size,
            leverage: position.leverage,
            realized_pnl,
            fee: exit_fee,
            executed_at: now.to_rfc3339(),
        };

        let credit = position.size / position.leverage + realized_pnl;
        ledger.balance += credit;
        ledger
            .cooldowns
            .insert(position.symbol.clone(), now + chrono::Duration::milliseconds(settings.symbol_cooldown_ms as i64));

        info!(
            bot_id,
            position_id,
            reason = %reason,
            realized_pnl,
            "position closed"
        );

        Ok(CloseOutcome::Closed { position, trade })
    }

    pub fn exchange(&self) -> Option<&Arc<dyn ExchangeAdapter>> {
        self.exchange.as_ref()
    }

    /// Commits every position/trade write queued during a bot turn together
    /// with its Decision and Snapshot rows in one SQLite transaction (spec
    /// §4.1: "all mutations of related entities within one bot turn ... occur
    /// in a single transaction; partial writes must not be observable").
    /// `realized_pnl`/`trade_count`/`win_rate` are computed inside the
    /// transaction so a trade this turn just closed is already reflected.
    pub async fn persist_turn(
        &self,
        writes: Vec<TurnWrite>,
        decision: Decision,
        draft: SnapshotDraft,
    ) -> AppResult<Snapshot> {
        let snapshot = self
            .db
            .with_tx(move |tx| {
                for write in &writes {
                    match write {
                        TurnWrite::Open { position, trade } => {
                            crate::db::positions::insert_position_tx(tx, position)?;
                            crate::db::trades::insert_trade_tx(tx, trade)?;
                        }
                        TurnWrite::Close { position, trade } => {
                            let close_reason = position.close_reason.unwrap_or(CloseReason::Manual);
                            let closed_at = position.closed_at.as_deref().unwrap_or_default();
                            crate::db::positions::close_position_tx(tx, &position.id, close_reason, closed_at)?;
                            crate::db::trades::insert_trade_tx(tx, trade)?;
                        }
                    }
                }

                Db::insert_decision_tx(tx, &decision)?;

                let realized_pnl = crate::db::trades::sum_realized_pnl_tx(tx, &draft.bot_id)?;
                let trade_count = crate::db::trades::count_trades_for_bot_tx(tx, &draft.bot_id)?;
                let wins = crate::db::trades::winning_trades_count_tx(tx, &draft.bot_id)?;
                let win_rate = if trade_count > 0 { wins as f64 / trade_count as f64 } else { 0.0 };

                let snapshot = Snapshot {
                    id: draft.id.clone(),
                    owner_id: draft.owner_id.clone(),
                    bot_id: draft.bot_id.clone(),
                    balance: draft.balance,
                    unrealized_pnl: draft.unrealized_pnl,
                    realized_pnl,
                    total_value: draft.balance + draft.unrealized_pnl,
                    trade_count,
                    win_rate,
                    timestamp: draft.timestamp.clone(),
                };
                Db::insert_snapshot_tx(tx, &snapshot)?;

                Ok(snapshot)
            })
            .await?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn settings() -> Settings {
        Settings::default()
    }

    fn now() -> DateTime<Utc> {
        "2026-07-26T00:00:00Z".parse().unwrap()
    }

    #[tokio::test]
    async fn open_then_close_roundtrip_paper_long() {
        let (db, _tmp) = crate::db::test_db();
        let engine = TradingEngine::new(db, None);
        engine.hydrate_ledger("bot1", 10_000.0, Vec::new(), HashMap::new());
        let settings = settings();
        let allowed = vec!["BTCUSDT".to_string()];

        let outcome = engine
            .open(
                "bot1",
                "user1",
                PositionSide::Long,
                "BTCUSDT",
                1000.0,
                10.0,
                Some(65000.0),
                Some(73000.0),
                69500.0,
                &allowed,
                &settings,
                now(),
            )
            .await
            .unwrap();

        let position_id = match outcome {
            OpenOutcome::Opened { position, .. } => position.id,
            OpenOutcome::Rejected { note } => panic!("unexpected rejection: {note}"),
        };

        let forced = engine.mark_to_market("bot1", "BTCUSDT", 73000.0);
        assert_eq!(forced.len(), 1);
        assert_eq!(forced[0].reason, CloseReason::TakeProfit);

        let close = engine
            .close(
                "bot1",
                &position_id,
                Some(forced[0].exit_price),
                73000.0,
                CloseReason::TakeProfit,
                &settings,
                now(),
            )
            .await
            .unwrap();

        match close {
            CloseOutcome::Closed { position, trade } => {
                assert_eq!(position.status, PositionStatus::Closed);
                assert!(trade.realized_pnl > 0.0, "long position into a higher exit should profit");
            }
            CloseOutcome::NotFound => panic!("expected close to find the position"),
        }

        let ledger = engine.ledger_snapshot("bot1").unwrap();
        assert!(ledger.open_positions.is_empty());
        assert!(ledger.cooldowns.contains_key("BTCUSDT"));
    }

    #[tokio::test]
    async fn liquidation_wins_over_stop_loss() {
        let (db, _tmp) = crate::db::test_db();
        let engine = TradingEngine::new(db, None);
        engine.hydrate_ledger("bot1", 10_000.0, Vec::new(), HashMap::new());
        let settings = settings();
        let allowed = vec!["BTCUSDT".to_string()];

        let outcome = engine
            .open(
                "bot1",
                "user1",
                PositionSide::Long,
                "BTCUSDT",
                2000.0,
                20.0,
                Some(98.0),
                None,
                100.0,
                &allowed,
                &settings,
                now(),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, OpenOutcome::Opened { .. }));

        let forced = engine.mark_to_market("bot1", "BTCUSDT", 94.0);
        assert_eq!(forced.len(), 1);
        assert_eq!(forced[0].reason, CloseReason::Liquidated);
    }

    #[tokio::test]
    async fn rejects_when_symbol_not_allowed() {
        let (db, _tmp) = crate::db::test_db();
        let engine = TradingEngine::new(db, None);
        let settings = settings();
        let allowed = vec!["ETHUSDT".to_string()];

        let outcome = engine
            .open(
                "bot1",
                "user1",
                PositionSide::Long,
                "BTCUSDT",
                1000.0,
                10.0,
                None,
                None,
                69500.0,
                &allowed,
                &settings,
                now(),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, OpenOutcome::Rejected { .. }));
    }

    #[tokio::test]
    async fn clamps_size_when_balance_insufficient() {
        let (db, _tmp) = crate::db::test_db();
        let engine = TradingEngine::new(db, None);
        engine.hydrate_ledger("bot1", 50.0, Vec::new(), HashMap::new());
        let settings = settings();
        let allowed = vec!["BTCUSDT".to_string()];

        let outcome = engine
            .open(
                "bot1",
                "user1",
                PositionSide::Long,
                "BTCUSDT",
                10_000.0,
                10.0,
                None,
                None,
                69500.0,
                &allowed,
                &settings,
                now(),
            )
            .await
            .unwrap();

        match outcome {
            OpenOutcome::Opened { note, position, .. } => {
                assert!(note.is_some());
                assert!(position.size < 10_000.0);
            }
            OpenOutcome::Rejected { note } => panic!("expected clamp, got rejection: {note}"),
        }
    }

    #[tokio::test]
    async fn rejects_when_clamped_size_below_minimum() {
        let (db, _tmp) = crate::db::test_db();
        let engine = TradingEngine::new(db, None);
        engine.hydrate_ledger("bot1", 0.5, Vec::new(), HashMap::new());
        let settings = settings();
        let allowed = vec!["BTCUSDT".to_string()];

        let outcome = engine
            .open(
                "bot1",
                "user1",
                PositionSide::Long,
                "BTCUSDT",
                10_000.0,
                10.0,
                None,
                None,
                69500.0,
                &allowed,
                &settings,
                now(),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, OpenOutcome::Rejected { .. }));
    }
}
