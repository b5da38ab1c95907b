//! Paper trading book
//!
//! Tracks simulated positions opened from pipeline entries. Every cycle the
//! book is synced against the latest annotated series: new entries open
//! positions, entries whose simulated outcome is final close them. A position
//! whose entry bar leaves the fetched window before resolving is expired.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};

use crate::series::AnnotatedSeries;
use crate::{Direction, Symbol, TradeOutcome};

/// An open simulated trade
#[derive(Debug, Clone, PartialEq)]
pub struct PaperPosition {
    pub symbol: Symbol,
    pub direction: Direction,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit_1: f64,
    pub take_profit_2: f64,
}

/// A resolved simulated trade
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedTrade {
    pub position: PaperPosition,
    pub outcome: TradeOutcome,
    pub exit_time: DateTime<Utc>,
    pub exit_price: f64,
    pub reward: f64,
}

/// Changes produced by one sync
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaperUpdate {
    pub opened: Vec<PaperPosition>,
    pub closed: Vec<ClosedTrade>,
    /// Positions whose entry was invalidated before resolving
    pub cancelled: usize,
    /// Positions dropped because their entry bar left the window unresolved
    pub expired: usize,
}

/// Simulated positions of one instrument
#[derive(Debug)]
pub struct PaperBook {
    symbol: Symbol,
    max_holding: usize,
    open: BTreeMap<DateTime<Utc>, PaperPosition>,
    closed: Vec<ClosedTrade>,
    seen: HashSet<DateTime<Utc>>,
}

impl PaperBook {
    pub fn new(symbol: Symbol, max_holding: usize) -> Self {
        Self {
            symbol,
            max_holding,
            open: BTreeMap::new(),
            closed: Vec::new(),
            seen: HashSet::new(),
        }
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &PaperPosition> {
        self.open.values()
    }

    pub fn closed_trades(&self) -> &[ClosedTrade] {
        &self.closed
    }

    /// Sum of closed rewards in R
    pub fn net_r(&self) -> f64 {
        self.closed.iter().map(|t| t.reward).sum()
    }

    /// Apply the latest pipeline output
    pub fn sync(&mut self, series: &AnnotatedSeries) -> PaperUpdate {
        let mut update = PaperUpdate::default();

        if let Some(first) = series.bars().first().map(|b| b.datetime()) {
            self.seen.retain(|t| *t >= first);
        }

        for bar in series.entries() {
            let (Some(entry), Some(risk)) = (bar.entry, bar.risk) else {
                continue;
            };
            if risk.is_degenerate() || !self.seen.insert(entry.time) {
                continue;
            }

            let position = PaperPosition {
                symbol: self.symbol.clone(),
                direction: entry.direction,
                entry_time: entry.time,
                entry_price: entry.price,
                stop_loss: risk.stop_loss,
                take_profit_1: risk.take_profit_1,
                take_profit_2: risk.take_profit_2,
            };
            info!(
                "[{}] paper {} opened at {:.2} (sl {:.2}, tp1 {:.2}, tp2 {:.2})",
                self.symbol,
                position.direction,
                position.entry_price,
                position.stop_loss,
                position.take_profit_1,
                position.take_profit_2
            );
            self.open.insert(entry.time, position.clone());
            update.opened.push(position);
        }

        let open_times: Vec<DateTime<Utc>> = self.open.keys().copied().collect();
        for time in open_times {
            let Some(bar) = series.position(time).and_then(|i| series.get(i)) else {
                if let Some(position) = self.open.remove(&time) {
                    warn!(
                        "[{}] paper position from {} expired, entry bar left the window unresolved",
                        self.symbol, position.entry_time
                    );
                    update.expired += 1;
                }
                continue;
            };

            if bar.entry.is_none() {
                if let Some(position) = self.open.remove(&time) {
                    warn!(
                        "[{}] paper position from {} cancelled, entry invalidated",
                        self.symbol, position.entry_time
                    );
                    update.cancelled += 1;
                }
                continue;
            }

            let Some(outcome) = bar.outcome else {
                continue;
            };
            if outcome.is_provisional(self.max_holding) {
                continue;
            }

            if let Some(position) = self.open.remove(&time) {
                let trade = ClosedTrade {
                    position,
                    outcome: outcome.kind,
                    exit_time: outcome.exit_time,
                    exit_price: outcome.exit_price,
                    reward: outcome.reward_achieved,
                };
                info!(
                    "[{}] paper trade closed: {} at {:.2} ({:+.2}R)",
                    self.symbol, trade.outcome, trade.exit_price, trade.reward
                );
                self.closed.push(trade.clone());
                update.closed.push(trade);
            }
        }

        update
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::{Column, Entry, Outcome, RiskLevels};
    use crate::Candle;
    use chrono::{Duration, TimeZone};

    fn series(n: usize) -> AnnotatedSeries {
        window(0, n)
    }

    /// `n` bars starting at bar index `first`
    fn window(first: usize, n: usize) -> AnnotatedSeries {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let candles = (first..first + n)
            .map(|i| {
                Candle::new_unchecked(start + Duration::minutes(15 * i as i64), 100.0, 101.0, 99.0, 100.0, 1.0)
            })
            .collect();
        let mut s = AnnotatedSeries::new("15m", candles);
        s.mark_column(Column::Entry);
        s
    }

    fn add_entry(s: &mut AnnotatedSeries, i: usize, outcome: Option<(TradeOutcome, usize)>) {
        let bar = &mut s.bars_mut()[i];
        let t = bar.candle.datetime;
        bar.entry = Some(Entry {
            price: 100.0,
            time: t,
            source_breakout_time: t - Duration::minutes(15),
            direction: Direction::Bullish,
            swing: 98.0,
        });
        bar.risk = Some(RiskLevels {
            stop_loss: 98.0,
            take_profit_1: 100.54,
            take_profit_2: 101.24,
            reward_ratio_1: Some(0.27),
            reward_ratio_2: Some(0.62),
        });
        bar.outcome = outcome.map(|(kind, bars_held)| Outcome {
            kind,
            exit_price: 100.0,
            exit_time: t + Duration::minutes(15 * bars_held as i64),
            holding_duration: Duration::minutes(15 * bars_held as i64),
            reward_achieved: if kind == TradeOutcome::Stop { -1.0 } else { 0.0 },
            bars_held,
        });
    }

    #[test]
    fn test_entry_opens_once() {
        let mut book = PaperBook::new(Symbol::new("BTCUSDT"), 20);
        let mut s = series(5);
        add_entry(&mut s, 2, Some((TradeOutcome::Timeout, 2)));

        assert_eq!(book.sync(&s).opened.len(), 1);
        assert_eq!(book.sync(&s).opened.len(), 0);
        // provisional timeout keeps it open
        assert_eq!(book.open_positions().count(), 1);
    }

    #[test]
    fn test_resolved_outcome_closes() {
        let mut book = PaperBook::new(Symbol::new("BTCUSDT"), 20);
        let mut s = series(5);
        add_entry(&mut s, 1, None);
        book.sync(&s);

        add_entry(&mut s, 1, Some((TradeOutcome::Stop, 3)));
        let update = book.sync(&s);
        assert_eq!(update.closed.len(), 1);
        assert_eq!(book.open_positions().count(), 0);
        assert_eq!(book.net_r(), -1.0);
    }

    #[test]
    fn test_full_timeout_closes() {
        let mut book = PaperBook::new(Symbol::new("BTCUSDT"), 3);
        let mut s = series(5);
        add_entry(&mut s, 1, Some((TradeOutcome::Timeout, 3)));
        let update = book.sync(&s);
        assert_eq!(update.opened.len(), 1);
        assert_eq!(update.closed.len(), 1);
        assert_eq!(update.closed[0].outcome, TradeOutcome::Timeout);
    }

    #[test]
    fn test_invalidated_entry_cancels_position() {
        let mut book = PaperBook::new(Symbol::new("BTCUSDT"), 20);
        let mut s = series(5);
        add_entry(&mut s, 1, None);
        book.sync(&s);

        s.bars_mut()[1].clear_entry();
        assert_eq!(book.sync(&s).cancelled, 1);
        assert_eq!(book.open_positions().count(), 0);
    }

    #[test]
    fn test_stale_position_expires_and_seen_is_pruned() {
        let mut book = PaperBook::new(Symbol::new("BTCUSDT"), 20);
        let mut s = series(5);
        add_entry(&mut s, 1, Some((TradeOutcome::Timeout, 3)));
        book.sync(&s);
        assert_eq!(book.open_positions().count(), 1);

        // the window has moved past the entry bar without resolving it
        let mut later = window(3, 5);
        add_entry(&mut later, 2, None);
        let update = book.sync(&later);

        assert_eq!(update.expired, 1);
        assert_eq!(update.opened.len(), 1);
        assert_eq!(book.open_positions().count(), 1);
        assert_eq!(book.seen.len(), 1);
        assert!(book.closed_trades().is_empty());
    }
}
